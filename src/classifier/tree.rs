//! The 3-level geographic grid of classifier models, plus the bundled
//! read-only `BD0` fallback, merged highest-depth-first.

use std::collections::HashMap;

use crate::classifier::cache::ClassifierCache;
use crate::classifier::model::{ActivityTypesModel, FeatureVector};
use crate::config::Config;
use crate::model::activity::{ActivityType, ProbabilityVector};
use crate::model::sample::LocomotionSample;

/// Depth-0 cells are 10 degrees of latitude by 10 degrees of longitude,
/// giving an 18x36 global grid. Depth-1 subdivides a depth-0 cell into a
/// 100x100 grid, depth-2 subdivides a depth-1 cell into a 200x200 grid.
const DEPTH0_LAT_BUCKETS: u32 = 18;
const DEPTH0_LON_BUCKETS: u32 = 36;
const DEPTH1_SUB_BUCKETS: u32 = 100;
const DEPTH2_SUB_BUCKETS: u32 = 200;

pub fn geo_key(latitude: f64, longitude: f64, depth: u8) -> String {
    let lat = (latitude + 90.0).clamp(0.0, 180.0 - 1e-9);
    let lon = (longitude + 180.0).clamp(0.0, 360.0 - 1e-9);

    let d0_lat = (lat / 10.0) as u32 % DEPTH0_LAT_BUCKETS;
    let d0_lon = (lon / 10.0) as u32 % DEPTH0_LON_BUCKETS;
    if depth == 0 {
        return format!("B0_{d0_lat}_{d0_lon}");
    }

    let lat_in_cell = lat % 10.0;
    let lon_in_cell = lon % 10.0;
    let d1_lat = (lat_in_cell / (10.0 / DEPTH1_SUB_BUCKETS as f64)) as u32;
    let d1_lon = (lon_in_cell / (10.0 / DEPTH1_SUB_BUCKETS as f64)) as u32;
    if depth == 1 {
        return format!("B1_{d0_lat}_{d0_lon}_{d1_lat}_{d1_lon}");
    }

    let cell1_size = 10.0 / DEPTH1_SUB_BUCKETS as f64;
    let lat_in_subcell = lat_in_cell % cell1_size;
    let lon_in_subcell = lon_in_cell % cell1_size;
    let d2_lat = (lat_in_subcell / (cell1_size / DEPTH2_SUB_BUCKETS as f64)) as u32;
    let d2_lon = (lon_in_subcell / (cell1_size / DEPTH2_SUB_BUCKETS as f64)) as u32;
    format!("B2_{d0_lat}_{d0_lon}_{d1_lat}_{d1_lon}_{d2_lat}_{d2_lon}")
}

/// Reconstructs the lat/lon bounding box (`min_lat, max_lat, min_lon,
/// max_lon`) of a key produced by [`geo_key`]. Returns `None` for `BD0` or
/// any malformed key.
pub fn cell_bounds(key: &str) -> Option<(f64, f64, f64, f64)> {
    let mut parts = key.split('_');
    let tag = parts.next()?;
    let indices: Vec<f64> = parts.map(|p| p.parse::<i64>().ok()).collect::<Option<Vec<_>>>()?.into_iter().map(|v| v as f64).collect();

    let cell1_size = 10.0 / DEPTH1_SUB_BUCKETS as f64;
    let cell2_size = cell1_size / DEPTH2_SUB_BUCKETS as f64;

    match (tag, indices.as_slice()) {
        ("B0", [d0_lat, d0_lon]) => {
            let lat_min = d0_lat * 10.0 - 90.0;
            let lon_min = d0_lon * 10.0 - 180.0;
            Some((lat_min, lat_min + 10.0, lon_min, lon_min + 10.0))
        }
        ("B1", [d0_lat, d0_lon, d1_lat, d1_lon]) => {
            let lat_min = (d0_lat * 10.0 - 90.0) + d1_lat * cell1_size;
            let lon_min = (d0_lon * 10.0 - 180.0) + d1_lon * cell1_size;
            Some((lat_min, lat_min + cell1_size, lon_min, lon_min + cell1_size))
        }
        ("B2", [d0_lat, d0_lon, d1_lat, d1_lon, d2_lat, d2_lon]) => {
            let cell1_lat_min = (d0_lat * 10.0 - 90.0) + d1_lat * cell1_size;
            let cell1_lon_min = (d0_lon * 10.0 - 180.0) + d1_lon * cell1_size;
            let lat_min = cell1_lat_min + d2_lat * cell2_size;
            let lon_min = cell1_lon_min + d2_lon * cell2_size;
            Some((lat_min, lat_min + cell2_size, lon_min, lon_min + cell2_size))
        }
        _ => None,
    }
}

/// The midpoint of a cell's bounding box, used to place a synthetic training
/// sample when a cell's confirmed data lacks enough variety to train on.
pub fn cell_center(key: &str) -> Option<(f64, f64)> {
    let (lat_min, lat_max, lon_min, lon_max) = cell_bounds(key)?;
    Some(((lat_min + lat_max) / 2.0, (lon_min + lon_max) / 2.0))
}

pub const BD0_KEY: &str = "BD0";

pub struct ClassifierTree {
    models: HashMap<String, ActivityTypesModel>,
    bundled_fallback: ActivityTypesModel,
    cache: ClassifierCache,
    completeness_minimum: usize,
}

impl ClassifierTree {
    pub fn new(config: &Config) -> Self {
        Self {
            models: HashMap::new(),
            bundled_fallback: ActivityTypesModel::new(BD0_KEY, 0),
            cache: ClassifierCache::new(config.classifier_cache_capacity),
            completeness_minimum: config.classifier_completeness_minimum,
        }
    }

    /// Installs a trained model, replacing any existing model for the same
    /// geo key. This is the only mutation path classifier training uses.
    pub fn install_model(&mut self, model: ActivityTypesModel) {
        self.cache.clear();
        if model.geo_key == BD0_KEY {
            self.bundled_fallback = model;
        } else {
            self.models.insert(model.geo_key.clone(), model);
        }
    }

    pub fn model(&self, geo_key: &str) -> Option<&ActivityTypesModel> {
        self.models.get(geo_key)
    }

    fn features_of(sample: &LocomotionSample) -> FeatureVector {
        FeatureVector {
            speed_mps: sample.speed.unwrap_or(0.0),
            course_variance: 0.0,
            step_hz: sample.step_hz.unwrap_or(0.0),
            xy_acceleration: sample.x_y_acceleration.unwrap_or(0.0),
            z_acceleration: sample.z_acceleration.unwrap_or(0.0),
        }
    }

    /// Classifies one sample, honoring the host's power policy: a sample
    /// classified while the host is in the background carries no signal and
    /// returns `None` rather than spending the merge work.
    pub fn classify(&mut self, sample: &LocomotionSample, in_background: bool) -> Option<ProbabilityVector> {
        if in_background {
            return None;
        }
        Some(self.predict_probabilities(sample))
    }

    /// Classifies a whole sequence of samples (e.g. the open samples of one
    /// trip) by averaging each sample's probability vector, then reducing the
    /// blended vector to its winning activity type via [`best_match`].
    /// Returns `None` in the background, or for an empty sequence.
    pub fn classify_sequence(&mut self, samples: &[LocomotionSample], in_background: bool) -> Option<ActivityType> {
        if in_background || samples.is_empty() {
            return None;
        }
        let vectors: Vec<ProbabilityVector> = samples.iter().map(|s| self.predict_probabilities(s)).collect();
        let averaged = crate::model::activity::average_probabilities(&vectors)?;
        Some(crate::model::activity::best_match(&averaged))
    }

    /// Merges whichever of CD2/CD1/CD0 are installed plus the bundled `BD0`
    /// fallback, highest depth first: start from the top classifier's raw
    /// prediction, reserve `remainingWeight = 1 - completeness(top)` for the
    /// rest, then for each next classifier (descending depth) blend in `w =
    /// remainingWeight * completeness` weight and subtract it from what's
    /// left. The last classifier in the chain is treated as fully complete
    /// (1.0), except `BD0` which is only ever 0.5-complete as a last resort.
    fn predict_probabilities(&mut self, sample: &LocomotionSample) -> ProbabilityVector {
        if let Some(cached) = self.cache.get(&sample.id) {
            return cached;
        }

        let features = Self::features_of(sample);
        let keys = [
            geo_key(sample.latitude, sample.longitude, 2),
            geo_key(sample.latitude, sample.longitude, 1),
            geo_key(sample.latitude, sample.longitude, 0),
        ];

        let mut candidates: Vec<&ActivityTypesModel> = keys.iter().filter_map(|k| self.models.get(k)).collect();
        candidates.push(&self.bundled_fallback);
        let last_index = candidates.len() - 1;

        let completeness_of = |index: usize, model: &ActivityTypesModel| -> f64 {
            if index == last_index {
                if model.geo_key == BD0_KEY {
                    0.5
                } else {
                    1.0
                }
            } else {
                model.completeness_score(self.completeness_minimum)
            }
        };

        let mut candidates = candidates.into_iter().enumerate();
        let (_, top) = candidates.next().expect("BD0 fallback is always a candidate");
        let mut result = top.predict(features);
        let mut remaining_weight = 1.0 - completeness_of(0, top);

        for (index, model) in candidates {
            if remaining_weight <= 0.0 {
                break;
            }
            let completeness = completeness_of(index, model);
            let w = (remaining_weight * completeness).clamp(0.0, 1.0) as f32;
            let probs = model.predict(features);
            for (r, p) in result.iter_mut().zip(probs.iter()) {
                *r = *r * (1.0 - w) + p * w;
            }
            remaining_weight -= w as f64;
        }

        self.cache.put(sample.id, result);
        result
    }

    pub fn invalidate(&mut self, sample_id: &crate::ids::SampleId) {
        self.cache.invalidate(sample_id);
    }

    /// Marks the depth-0/1/2 models containing `(lat, lon)` as needing an
    /// update, creating them on demand if a confirmed sample lands inside a
    /// previously-uncovered cell.
    pub fn mark_needs_update(&mut self, latitude: f64, longitude: f64) {
        for depth in 0..=2u8 {
            let key = geo_key(latitude, longitude, depth);
            self.models.entry(key.clone()).or_insert_with(|| ActivityTypesModel::new(key, depth)).needs_update = true;
        }
    }

    /// The next model due for a background training pass, prioritised by
    /// `depth DESC, totalSamples ASC` among those marked `needs_update` and
    /// not blocked by their cadence policy.
    pub fn next_training_candidate(&self, now: chrono::DateTime<chrono::Utc>) -> Option<&ActivityTypesModel> {
        self.models
            .values()
            .filter(|m| m.is_due_for_training(now, self.completeness_minimum))
            .max_by(|a, b| a.depth.cmp(&b.depth).then(b.sample_count.cmp(&a.sample_count)))
    }

    /// Records that a training attempt for `geo_key` produced no usable
    /// model: clears `needs_update` so the cell isn't retried on the very
    /// next pass, without bumping `sample_count` or `accuracy_score`.
    pub fn mark_training_failed(&mut self, geo_key: &str) {
        if let Some(model) = self.models.get_mut(geo_key) {
            model.needs_update = false;
            model.last_updated = Some(chrono::Utc::now());
        }
    }
}
