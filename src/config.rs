//! Tunable configuration for the sampling, classifier, timeline and
//! persistence subsystems.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{LocomotionError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Seconds of low-variance fixes required before the stationary detector
    /// declares the device stationary.
    pub stationary_window_secs: u32,
    /// Accuracy-weighted mean speed, in metres/second, the window's fixes
    /// must fall below for the stationary detector to declare stillness.
    pub stationary_speed_threshold: f64,
    /// Accuracy-weighted speed standard deviation, in metres/second, the
    /// window must fall below alongside the mean-speed threshold.
    pub stationary_speed_stddev_threshold: f64,
    /// The window's (unweighted) mean horizontal accuracy, in metres, above
    /// which the detector reports `uncertain` rather than trusting the
    /// speed statistics.
    pub stationary_max_mean_accuracy_meters: f64,

    /// Seconds of continuous stillness required before the sleep detector
    /// freezes its candidate geofence and starts reporting `sleeping`.
    pub sleep_dwell_required_secs: u32,
    /// Lower bound, in metres, on the geofence radius derived from recent
    /// locations when the fence freezes.
    pub sleep_min_radius_meters: f64,
    /// Upper bound, in metres, on the geofence radius derived from recent
    /// locations when the fence freezes.
    pub sleep_max_radius_meters: f64,

    /// Minimum gap, in seconds, between two timeline items before the
    /// pruning pass considers merging across the gap.
    pub pruning_merge_window_secs: u32,

    /// Minimum number of labelled samples a geo key bucket must have before
    /// its classifier model is considered complete rather than falling back
    /// to its parent bucket.
    pub classifier_completeness_minimum: usize,
    /// Capacity of the per-sample classifier result cache.
    pub classifier_cache_capacity: usize,

    /// Minimum number of training rows required before a model update is
    /// attempted for a geo key bucket.
    pub training_minimum_rows: usize,
    /// How often, in seconds, the classifier updater considers retraining a
    /// bucket's model.
    pub training_cadence_secs: u32,

    /// Number of items per export bucket file.
    pub export_chunk_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stationary_window_secs: 60,
            stationary_speed_threshold: 0.5,
            stationary_speed_stddev_threshold: 0.3,
            stationary_max_mean_accuracy_meters: 50.0,
            sleep_dwell_required_secs: 120,
            sleep_min_radius_meters: 20.0,
            sleep_max_radius_meters: 100.0,
            pruning_merge_window_secs: 600,
            classifier_completeness_minimum: 50,
            classifier_cache_capacity: 4096,
            training_minimum_rows: 200,
            training_cadence_secs: 86_400,
            export_chunk_size: 500,
        }
    }
}

impl Config {
    pub fn with_stationary_window_secs(mut self, secs: u32) -> Self {
        self.stationary_window_secs = secs;
        self
    }

    pub fn with_stationary_speed_threshold(mut self, mps: f64) -> Self {
        self.stationary_speed_threshold = mps;
        self
    }

    pub fn with_stationary_speed_stddev_threshold(mut self, mps: f64) -> Self {
        self.stationary_speed_stddev_threshold = mps;
        self
    }

    pub fn with_stationary_max_mean_accuracy_meters(mut self, meters: f64) -> Self {
        self.stationary_max_mean_accuracy_meters = meters;
        self
    }

    pub fn with_sleep_dwell_required_secs(mut self, secs: u32) -> Self {
        self.sleep_dwell_required_secs = secs;
        self
    }

    pub fn with_sleep_min_radius_meters(mut self, meters: f64) -> Self {
        self.sleep_min_radius_meters = meters;
        self
    }

    pub fn with_sleep_max_radius_meters(mut self, meters: f64) -> Self {
        self.sleep_max_radius_meters = meters;
        self
    }

    pub fn with_pruning_merge_window_secs(mut self, secs: u32) -> Self {
        self.pruning_merge_window_secs = secs;
        self
    }

    pub fn with_classifier_completeness_minimum(mut self, n: usize) -> Self {
        self.classifier_completeness_minimum = n;
        self
    }

    pub fn with_classifier_cache_capacity(mut self, n: usize) -> Self {
        self.classifier_cache_capacity = n;
        self
    }

    pub fn with_training_minimum_rows(mut self, n: usize) -> Self {
        self.training_minimum_rows = n;
        self
    }

    pub fn with_training_cadence_secs(mut self, secs: u32) -> Self {
        self.training_cadence_secs = secs;
        self
    }

    pub fn with_export_chunk_size(mut self, n: usize) -> Self {
        self.export_chunk_size = n;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.stationary_window_secs == 0 {
            return Err(LocomotionError::InvalidInput("stationary_window_secs must be > 0".into()));
        }
        if self.stationary_speed_threshold <= 0.0 {
            return Err(LocomotionError::InvalidInput("stationary_speed_threshold must be > 0".into()));
        }
        if self.stationary_speed_stddev_threshold <= 0.0 {
            return Err(LocomotionError::InvalidInput("stationary_speed_stddev_threshold must be > 0".into()));
        }
        if self.stationary_max_mean_accuracy_meters <= 0.0 {
            return Err(LocomotionError::InvalidInput("stationary_max_mean_accuracy_meters must be > 0".into()));
        }
        if self.sleep_dwell_required_secs == 0 {
            return Err(LocomotionError::InvalidInput("sleep_dwell_required_secs must be > 0".into()));
        }
        if self.sleep_min_radius_meters <= 0.0 || self.sleep_min_radius_meters > self.sleep_max_radius_meters {
            return Err(LocomotionError::InvalidInput(
                "sleep_min_radius_meters must be > 0 and <= sleep_max_radius_meters".into(),
            ));
        }
        if self.classifier_completeness_minimum == 0 {
            return Err(LocomotionError::InvalidInput("classifier_completeness_minimum must be > 0".into()));
        }
        if self.classifier_cache_capacity == 0 {
            return Err(LocomotionError::InvalidInput("classifier_cache_capacity must be > 0".into()));
        }
        if self.training_minimum_rows == 0 {
            return Err(LocomotionError::InvalidInput("training_minimum_rows must be > 0".into()));
        }
        if self.export_chunk_size == 0 {
            return Err(LocomotionError::InvalidInput("export_chunk_size must be > 0".into()));
        }
        Ok(())
    }

    pub fn from_json(s: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    #[cfg(feature = "toml-config")]
    pub fn from_toml(s: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(s)
            .map_err(|e| LocomotionError::Other(format!("invalid toml config: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    #[cfg(feature = "toml-config")]
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| LocomotionError::Other(format!("toml encode: {e}")))
    }

    pub fn load_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_window() {
        let cfg = Config::default().with_stationary_window_secs(0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn json_round_trips() {
        let cfg = Config::default().with_training_minimum_rows(42);
        let json = cfg.to_json().unwrap();
        let back = Config::from_json(&json).unwrap();
        assert_eq!(cfg, back);
    }
}
