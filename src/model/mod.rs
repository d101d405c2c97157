//! The entity model: samples, timeline items, places and activity types.

pub mod activity;
pub mod item;
pub mod place;
pub mod sample;

pub use activity::{average_probabilities, best_match, ActivityType, ProbabilityVector};
pub use item::{TimelineItemBase, TimelineItemKind, TimelineItemTrip, TimelineItemVisit};
pub use place::Place;
pub use sample::{LocomotionSample, MovingState, RecordingState};
