//! Core engine for turning a stream of raw GPS/motion fixes into a
//! reconstructed timeline of visits and trips.
//!
//! ```rust
//! use locomotion_core::{Config, LocomotionContext, RawFix};
//! use chrono::Utc;
//!
//! let ctx = LocomotionContext::new(Config::default())?;
//! let sample = ctx.record_fix(RawFix {
//!     date: Utc::now(),
//!     latitude: 37.7749,
//!     longitude: -122.4194,
//!     horizontal_accuracy: 10.0,
//!     altitude: None,
//!     vertical_accuracy: None,
//!     course: None,
//!     course_accuracy: None,
//! })?;
//! assert!(sample.classifier_results.is_some());
//! # Ok::<(), locomotion_core::LocomotionError>(())
//! ```

pub mod actors;
pub mod cancel;
pub mod classifier;
pub mod config;
pub mod error;
pub mod exportimport;
pub mod filters;
pub mod ids;
pub mod model;
pub mod places;
pub mod sampling;
pub mod spatial;
pub mod storage;
pub mod timeline;

pub use actors::{BackgroundTaskHost, ClassifierActor, LocomotionContext, PersistenceActor, SamplingActor, SensorSink, TimelineActor};
pub use config::Config;
pub use error::{LocomotionError, Result};
pub use ids::{Id, ItemId, PlaceId, SampleId};
pub use model::{ActivityType, LocomotionSample, Place, ProbabilityVector, TimelineItemBase, TimelineItemKind, TimelineItemTrip, TimelineItemVisit};
pub use sampling::{RawFix, SampleAssembler};

pub use geo::{Point, Polygon, Rect};
pub use spatial::{bounding_box, convex_hull, distance_between, knn, DistanceMetric};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports for host applications.
pub mod prelude {
    pub use crate::{Config, LocomotionContext, LocomotionError, RawFix, Result};
    pub use crate::{ActivityType, LocomotionSample, Place, TimelineItemBase};
    pub use crate::{BackgroundTaskHost, SensorSink};
    pub use geo::{Point, Polygon, Rect};
}
