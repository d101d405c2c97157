//! Stage F/G: the activity-type classifier tree and its model updater.

pub mod cache;
pub mod model;
pub mod tree;
pub mod updater;

pub use model::{ActivityTypesModel, FeatureVector};
pub use tree::{cell_bounds, cell_center, geo_key, ClassifierTree, BD0_KEY};
pub use updater::{ensure_distinct_types, ModelTrainer, ModelUpdater, NullTrainer, TrainingRow};
