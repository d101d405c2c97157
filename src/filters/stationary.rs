//! Declares the device stationary once a trailing window of fixes has an
//! accuracy-weighted mean and standard deviation of speed both below
//! threshold, and the window's fixes are themselves accurate enough to
//! trust.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::model::sample::MovingState;

#[derive(Debug, Clone)]
struct Reading {
    date: DateTime<Utc>,
    speed: f64,
    horizontal_accuracy: f64,
}

#[derive(Debug, Clone)]
pub struct StationaryDetector {
    window: VecDeque<Reading>,
    window_secs: u32,
    mean_speed_threshold: f64,
    speed_stddev_threshold: f64,
    max_mean_accuracy_meters: f64,
}

impl StationaryDetector {
    pub fn new(config: &Config) -> Self {
        Self {
            window: VecDeque::new(),
            window_secs: config.stationary_window_secs,
            mean_speed_threshold: config.stationary_speed_threshold,
            speed_stddev_threshold: config.stationary_speed_stddev_threshold,
            max_mean_accuracy_meters: config.stationary_max_mean_accuracy_meters,
        }
    }

    /// Feeds one fix's filtered speed (metres/second) and horizontal
    /// accuracy (metres) into the detector, returning the device's current
    /// moving state.
    pub fn update(&mut self, date: DateTime<Utc>, speed: f64, horizontal_accuracy: f64) -> MovingState {
        self.window.push_back(Reading { date, speed, horizontal_accuracy });
        let cutoff = date - chrono::Duration::seconds(self.window_secs as i64);
        while let Some(front) = self.window.front() {
            if front.date < cutoff {
                self.window.pop_front();
            } else {
                break;
            }
        }

        if self.window.is_empty() {
            return MovingState::Uncertain;
        }

        let span_secs = (date - self.window.front().unwrap().date).num_seconds();
        if span_secs < self.window_secs as i64 {
            return MovingState::Uncertain;
        }

        let mean_accuracy = self.window.iter().map(|r| r.horizontal_accuracy).sum::<f64>() / self.window.len() as f64;
        if mean_accuracy > self.max_mean_accuracy_meters {
            return MovingState::Uncertain;
        }

        let (mean_speed, stddev_speed) = Self::weighted_mean_and_stddev(&self.window);
        if mean_speed < self.mean_speed_threshold && stddev_speed < self.speed_stddev_threshold {
            MovingState::Stationary
        } else {
            MovingState::Moving
        }
    }

    /// Accuracy-weighted mean and standard deviation of the window's speeds.
    /// Weight is inverse-variance (`1 / accuracy^2`), treating a fix's
    /// horizontal accuracy as its one-sigma error; accuracy is floored at
    /// 1m so a suspiciously perfect fix can't dominate the window.
    fn weighted_mean_and_stddev(window: &VecDeque<Reading>) -> (f64, f64) {
        let weights: Vec<f64> = window.iter().map(|r| 1.0 / r.horizontal_accuracy.max(1.0).powi(2)).collect();
        let weight_sum: f64 = weights.iter().sum();

        let mean = window.iter().zip(&weights).map(|(r, w)| r.speed * w).sum::<f64>() / weight_sum;
        let variance = window.iter().zip(&weights).map(|(r, w)| w * (r.speed - mean).powi(2)).sum::<f64>() / weight_sum;
        (mean, variance.sqrt())
    }

    pub fn reset(&mut self) {
        self.window.clear();
    }
}
