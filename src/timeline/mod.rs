//! Stages H-J: the timeline recorder, processor and pruning pass.

pub mod processor;
pub mod pruning;
pub mod recorder;

pub use processor::ItemChain;
pub use recorder::TimelineRecorder;
