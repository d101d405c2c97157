//! A single trained model for one geo key bucket: a per-[`ActivityType`]
//! weight table over a small set of input features, evaluated linearly.
//!
//! [`ActivityType`]: crate::model::activity::ActivityType

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::activity::{ActivityType, ProbabilityVector};

/// Max confirmed samples drawn per training run, by depth (spec §4.G step 1).
pub const MAX_TRAINING_SAMPLES: [usize; 3] = [250_000, 200_000, 200_000];

/// Feature vector fed to a bucket's model: speed, course stability, step
/// frequency and vertical acceleration, the same summary fields carried on
/// every sample.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureVector {
    pub speed_mps: f64,
    pub course_variance: f64,
    pub step_hz: f64,
    pub xy_acceleration: f64,
    pub z_acceleration: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityTypesModel {
    pub geo_key: String,
    pub depth: u8,
    pub sample_count: usize,
    /// One weight row per activity type, over
    /// `[bias, speed, course_variance, step_hz, xy_accel, z_accel]`.
    pub weights: Vec<[f64; 6]>,
    /// Set whenever a confirmed sample lands inside this cell; cleared once
    /// a training run installs a fresh model.
    pub needs_update: bool,
    /// `1 - validationError` from the most recent successful training run,
    /// or `None` if training never produced a usable model (too few rows,
    /// or only one confirmed activity type with no synthetic sample to
    /// inject).
    pub accuracy_score: Option<f64>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl ActivityTypesModel {
    pub fn new(geo_key: impl Into<String>, depth: u8) -> Self {
        Self {
            geo_key: geo_key.into(),
            depth,
            sample_count: 0,
            weights: vec![[0.0; 6]; ActivityType::COUNT],
            needs_update: false,
            accuracy_score: None,
            last_updated: None,
        }
    }

    /// Per spec §4.G: depth-0 full rebuilds at most every 7 days (1 day if
    /// the model has never reached completeness); depth-1/2 models may
    /// retrain as soon as they're marked `needs_update`, and an incomplete
    /// `CD2` may retrain immediately regardless of cadence.
    pub fn is_due_for_training(&self, now: DateTime<Utc>, completeness_minimum: usize) -> bool {
        if !self.needs_update {
            return false;
        }
        if self.depth != 0 {
            return true;
        }
        let cadence = if self.is_complete(completeness_minimum) {
            chrono::Duration::days(7)
        } else {
            chrono::Duration::days(1)
        };
        self.last_updated.is_none_or(|last| now - last >= cadence)
    }

    pub fn is_complete(&self, minimum_samples: usize) -> bool {
        self.sample_count >= minimum_samples
    }

    /// `min(1, totalSamples / minRequired)` — how much weight this model has
    /// earned toward a classifier-tree merge, before the last-classifier
    /// override (spec: completeness of the last classifier in a merge chain
    /// is taken as 1.0, or 0.5 for the bundled `BD0` fallback).
    pub fn completeness_score(&self, minimum_samples: usize) -> f64 {
        if minimum_samples == 0 {
            return 1.0;
        }
        (self.sample_count as f64 / minimum_samples as f64).min(1.0)
    }

    pub fn predict(&self, features: FeatureVector) -> ProbabilityVector {
        let x = [
            1.0,
            features.speed_mps,
            features.course_variance,
            features.step_hz,
            features.xy_acceleration,
            features.z_acceleration,
        ];

        let mut scores = [0.0f32; ActivityType::COUNT];
        for (idx, row) in self.weights.iter().enumerate() {
            let dot: f64 = row.iter().zip(x.iter()).map(|(w, v)| w * v).sum();
            scores[idx] = dot as f32;
        }
        softmax(scores)
    }
}

fn softmax(mut scores: ProbabilityVector) -> ProbabilityVector {
    let max = scores.iter().cloned().fold(f32::MIN, f32::max);
    let mut sum = 0.0f32;
    for s in scores.iter_mut() {
        *s = (*s - max).exp();
        sum += *s;
    }
    if sum > 0.0 {
        for s in scores.iter_mut() {
            *s /= sum;
        }
    }
    scores
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untrained_model_predicts_uniformly() {
        let model = ActivityTypesModel::new("B0_9_18", 0);
        let probs = model.predict(FeatureVector::default());
        let expected = 1.0 / ActivityType::COUNT as f32;
        for p in probs {
            assert!((p - expected).abs() < 1e-4);
        }
    }

    #[test]
    fn completeness_threshold() {
        let mut model = ActivityTypesModel::new("B0_9_18", 0);
        assert!(!model.is_complete(10));
        model.sample_count = 10;
        assert!(model.is_complete(10));
    }
}
