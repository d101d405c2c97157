//! Once the stationary detector confirms stillness, the sleep detector starts
//! tracking a candidate geofence around the stationary fixes. The fence stays
//! a moving weighted center until the device has dwelled inside it
//! continuously for the configured duration, at which point it freezes: its
//! center and a bounded radius stop updating and fixes within it are reported
//! as low-power "sleeping" samples rather than waking full recording.

use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::model::sample::RecordingState;
use crate::spatial::distance_between;
use geo::Point;

#[derive(Debug, Clone)]
pub struct SleepDetector {
    dwell_required_secs: u32,
    min_radius_meters: f64,
    max_radius_meters: f64,

    candidate_center: Option<Point<f64>>,
    candidate_count: u32,
    dwell_start: Option<DateTime<Utc>>,
    max_candidate_distance: f64,

    frozen_center: Option<Point<f64>>,
    frozen_radius: Option<f64>,
}

impl SleepDetector {
    pub fn new(config: &Config) -> Self {
        Self {
            dwell_required_secs: config.sleep_dwell_required_secs,
            min_radius_meters: config.sleep_min_radius_meters,
            max_radius_meters: config.sleep_max_radius_meters,
            candidate_center: None,
            candidate_count: 0,
            dwell_start: None,
            max_candidate_distance: 0.0,
            frozen_center: None,
            frozen_radius: None,
        }
    }

    /// Called on each fix while the stationary detector reports `Stationary`.
    /// Accumulates dwell time and a weighted candidate center; once dwell
    /// reaches the configured threshold the fence freezes and stops moving.
    pub fn arm(&mut self, date: DateTime<Utc>, point: Point<f64>) {
        if self.frozen_center.is_some() {
            return;
        }

        match self.candidate_center {
            None => {
                self.candidate_center = Some(point);
                self.candidate_count = 1;
                self.dwell_start = Some(date);
                self.max_candidate_distance = 0.0;
            }
            Some(center) => {
                self.candidate_count += 1;
                let n = self.candidate_count as f64;
                let blended = Point::new(
                    center.x() + (point.x() - center.x()) / n,
                    center.y() + (point.y() - center.y()) / n,
                );
                self.max_candidate_distance = self
                    .max_candidate_distance
                    .max(distance_between(blended, point, crate::spatial::DistanceMetric::Haversine));
                self.candidate_center = Some(blended);
            }
        }

        let dwell_secs = (date - self.dwell_start.unwrap()).num_seconds();
        if dwell_secs >= self.dwell_required_secs as i64 {
            let radius = self.max_candidate_distance.clamp(self.min_radius_meters, self.max_radius_meters);
            self.frozen_center = self.candidate_center;
            self.frozen_radius = Some(radius);
        }
    }

    /// Called whenever the stationary detector is no longer `Stationary`;
    /// discards both the candidate and any frozen fence.
    pub fn disarm(&mut self) {
        self.candidate_center = None;
        self.candidate_count = 0;
        self.dwell_start = None;
        self.max_candidate_distance = 0.0;
        self.frozen_center = None;
        self.frozen_radius = None;
    }

    /// Classifies a new fix against the frozen geofence, if one has formed.
    /// Before the fence freezes, fixes are reported as ordinary recording.
    pub fn classify(&mut self, _date: DateTime<Utc>, point: Point<f64>) -> RecordingState {
        match (self.frozen_center, self.frozen_radius) {
            (Some(center), Some(radius)) => {
                let d = distance_between(center, point, crate::spatial::DistanceMetric::Haversine);
                if d <= radius {
                    RecordingState::Sleeping
                } else {
                    self.disarm();
                    RecordingState::Recording
                }
            }
            _ => RecordingState::Recording,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.frozen_center.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn unarmed_detector_reports_recording() {
        let config = Config::default();
        let mut det = SleepDetector::new(&config);
        assert_eq!(det.classify(base(), Point::new(0.0, 0.0)), RecordingState::Recording);
    }

    /// §8 boundary: the fence stays unarmed (classify keeps reporting
    /// `recording`) until dwell reaches the required threshold.
    #[test]
    fn fence_does_not_freeze_before_dwell_threshold() {
        let config = Config::default().with_sleep_dwell_required_secs(120);
        let mut det = SleepDetector::new(&config);
        let point = Point::new(-122.0, 37.0);

        det.arm(base(), point);
        assert_eq!(det.classify(base(), point), RecordingState::Recording);
        assert!(!det.is_armed());

        det.arm(base() + chrono::Duration::seconds(60), point);
        assert_eq!(det.classify(base() + chrono::Duration::seconds(60), point), RecordingState::Recording);
        assert!(!det.is_armed());
    }

    /// §8 boundary: the fence freezes exactly when dwell reaches the
    /// threshold, and subsequent fixes inside it classify as sleeping.
    #[test]
    fn fence_freezes_exactly_at_dwell_threshold() {
        let config = Config::default().with_sleep_dwell_required_secs(120);
        let mut det = SleepDetector::new(&config);
        let point = Point::new(-122.0, 37.0);

        det.arm(base(), point);
        det.arm(base() + chrono::Duration::seconds(60), point);
        let armed_at_threshold = base() + chrono::Duration::seconds(120);
        det.arm(armed_at_threshold, point);

        assert!(det.is_armed());
        assert_eq!(det.classify(armed_at_threshold, point), RecordingState::Sleeping);
    }

    #[test]
    fn leaving_the_frozen_fence_wakes_recording() {
        let config = Config::default().with_sleep_dwell_required_secs(120).with_sleep_min_radius_meters(20.0);
        let mut det = SleepDetector::new(&config);
        let point = Point::new(-122.0, 37.0);

        det.arm(base(), point);
        det.arm(base() + chrono::Duration::seconds(120), point);
        assert!(det.is_armed());

        assert_eq!(det.classify(base() + chrono::Duration::seconds(121), Point::new(-121.9, 37.0)), RecordingState::Recording);
        assert!(!det.is_armed());
    }

    #[test]
    fn radius_is_bounded_between_min_and_max() {
        let config = Config::default()
            .with_sleep_dwell_required_secs(60)
            .with_sleep_min_radius_meters(20.0)
            .with_sleep_max_radius_meters(100.0);
        let mut det = SleepDetector::new(&config);

        det.arm(base(), Point::new(-122.0, 37.0));
        det.arm(base() + chrono::Duration::seconds(60), Point::new(-122.0, 37.0));

        let radius = det.frozen_radius.unwrap();
        assert!(radius >= 20.0 && radius <= 100.0);
    }
}
