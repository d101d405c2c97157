//! Assembles one [`LocomotionSample`] per raw fix by running it through the
//! filter pipeline (A-D) and combining their outputs.

use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::filters::{LocationKalman, MotionSampler, SleepDetector, StationaryDetector};
use crate::model::sample::LocomotionSample;

pub struct RawFix {
    pub date: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub horizontal_accuracy: f64,
    pub altitude: Option<f64>,
    pub vertical_accuracy: Option<f64>,
    pub course: Option<f64>,
    pub course_accuracy: Option<f64>,
}

/// Drives the filter pipeline for one recording session.
pub struct SampleAssembler {
    kalman: LocationKalman,
    stationary: StationaryDetector,
    sleep: SleepDetector,
    motion: MotionSampler,
    last_heart_rate: Option<f64>,
}

impl SampleAssembler {
    pub fn new(config: &Config) -> Self {
        Self {
            kalman: LocationKalman::new(),
            stationary: StationaryDetector::new(config),
            sleep: SleepDetector::new(config),
            motion: MotionSampler::new(),
            last_heart_rate: None,
        }
    }

    pub fn accelerometer(&mut self, reading: crate::filters::motion::AccelerometerReading) {
        self.motion.push_accelerometer(reading);
    }

    pub fn steps(&mut self, count: u32, window_secs: f64) {
        self.motion.push_steps(count, window_secs);
    }

    /// Records the most recent heart-rate reading; the next assembled sample
    /// carries it.
    pub fn heart_rate(&mut self, bpm: f64) {
        self.last_heart_rate = Some(bpm);
    }

    /// Runs one raw fix through the full pipeline and produces the finished
    /// sample.
    pub fn assemble(&mut self, fix: RawFix) -> LocomotionSample {
        let (filtered_lat, filtered_lon, filtered_alt) = self.kalman.update(
            fix.date,
            fix.latitude,
            fix.longitude,
            fix.horizontal_accuracy,
            fix.altitude,
            fix.vertical_accuracy,
        );

        let speed = self.kalman.speed_estimate(filtered_lat);
        let moving_state = self.stationary.update(fix.date, speed, fix.horizontal_accuracy);

        let point = geo::Point::new(filtered_lon, filtered_lat);
        if moving_state == crate::model::sample::MovingState::Stationary {
            self.sleep.arm(fix.date, point);
        } else {
            self.sleep.disarm();
        }
        let recording_state = self.sleep.classify(fix.date, point);

        let (step_hz, xy_accel, z_accel) = self.motion.drain_summary();

        let mut sample = LocomotionSample::new(fix.date, filtered_lat, filtered_lon, fix.horizontal_accuracy);
        sample.altitude = filtered_alt;
        sample.vertical_accuracy = fix.vertical_accuracy;
        sample.course = fix.course;
        sample.course_accuracy = fix.course_accuracy;
        sample.speed = Some(speed);
        sample.step_hz = step_hz;
        sample.x_y_acceleration = xy_accel;
        sample.z_acceleration = z_accel;
        sample.moving_state = moving_state;
        sample.recording_state = recording_state;
        sample.heart_rate = self.last_heart_rate.take();

        sample
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn assembles_a_sample_from_one_fix() {
        let config = Config::default();
        let mut assembler = SampleAssembler::new(&config);
        let fix = RawFix {
            date: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            latitude: 37.0,
            longitude: -122.0,
            horizontal_accuracy: 10.0,
            altitude: Some(5.0),
            vertical_accuracy: Some(3.0),
            course: None,
            course_accuracy: None,
        };
        let sample = assembler.assemble(fix);
        assert!((sample.latitude - 37.0).abs() < 0.01);
        assert!((sample.longitude - (-122.0)).abs() < 0.01);
    }
}
