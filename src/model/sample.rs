//! A single locomotion sample: one fused reading of the device's location and
//! motion state at an instant in time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ItemId, SampleId};
use crate::model::activity::{ActivityType, ProbabilityVector};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocomotionSample {
    pub id: SampleId,
    pub date: DateTime<Utc>,

    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub horizontal_accuracy: f64,
    pub vertical_accuracy: Option<f64>,
    pub course: Option<f64>,
    pub course_accuracy: Option<f64>,
    pub speed: Option<f64>,
    pub speed_accuracy: Option<f64>,

    pub step_hz: Option<f64>,
    pub x_y_acceleration: Option<f64>,
    pub z_acceleration: Option<f64>,
    pub heart_rate: Option<f64>,

    pub moving_state: MovingState,
    pub recording_state: RecordingState,
    pub disabled: bool,

    pub classifier_results: Option<ProbabilityVector>,
    pub confirmed_type: Option<ActivityType>,

    pub timeline_item_id: Option<ItemId>,
    pub last_saved: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MovingState {
    Stationary,
    Moving,
    Uncertain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordingState {
    Recording,
    Sleeping,
    Off,
}

impl LocomotionSample {
    pub fn new(date: DateTime<Utc>, latitude: f64, longitude: f64, horizontal_accuracy: f64) -> Self {
        Self {
            id: SampleId::new(),
            date,
            latitude,
            longitude,
            altitude: None,
            horizontal_accuracy,
            vertical_accuracy: None,
            course: None,
            course_accuracy: None,
            speed: None,
            speed_accuracy: None,
            step_hz: None,
            x_y_acceleration: None,
            z_acceleration: None,
            heart_rate: None,
            moving_state: MovingState::Uncertain,
            recording_state: RecordingState::Recording,
            disabled: false,
            classifier_results: None,
            confirmed_type: None,
            timeline_item_id: None,
            last_saved: date,
        }
    }

    pub fn activity_type(&self) -> ActivityType {
        if let Some(confirmed) = self.confirmed_type {
            return confirmed;
        }
        match &self.classifier_results {
            Some(probs) => crate::model::activity::argmax(probs),
            None => ActivityType::Unknown,
        }
    }

    pub fn coordinate(&self) -> geo::Point<f64> {
        geo::Point::new(self.longitude, self.latitude)
    }
}
