//! Stage A–D of the sampling pipeline: location/altitude filtering,
//! stationary detection, sleep-mode detection, and motion summarization.

pub mod kalman;
pub mod motion;
pub mod sleep;
pub mod stationary;

pub use kalman::LocationKalman;
pub use motion::MotionSampler;
pub use sleep::SleepDetector;
pub use stationary::StationaryDetector;
