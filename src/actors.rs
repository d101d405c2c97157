//! Actor isolation, re-expressed as synchronous structs guarded by
//! `parking_lot::Mutex` rather than real OS-thread mailboxes: every command
//! is an ordinary method call that takes the lock, giving single-consumer
//! ordering per subsystem without pulling in an async runtime. Background
//! training and export run on their own `std::thread`, cancellable via
//! [`CancelToken`], and only their final "install"/"commit" step touches the
//! locked state.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cancel::CancelToken;
use crate::classifier::{ClassifierTree, ModelTrainer};
use crate::config::Config;
use crate::error::Result;
use crate::model::activity::ActivityType;
use crate::model::item::TimelineItemBase;
use crate::model::place::Place;
use crate::model::sample::LocomotionSample;
use crate::places::PlaceEngine;
use crate::sampling::{RawFix, SampleAssembler};
use crate::storage::Store;
use crate::timeline::{ItemChain, TimelineRecorder};

/// Host-implemented source of raw sensor readings.
pub trait SensorSink {
    fn on_location(&mut self, fix: RawFix);
    fn on_motion(&mut self, reading: crate::filters::motion::AccelerometerReading);
    fn on_pedometer(&mut self, steps: u32, window_secs: f64);
    fn on_heart_rate(&mut self, bpm: f64);
}

/// Host-implemented scheduler for periodic background work (classifier
/// retraining, incremental export).
pub trait BackgroundTaskHost {
    fn register_task(&mut self, name: &str, cadence_secs: u32, cancel: CancelToken);
}

pub struct SamplingActor {
    assembler: Mutex<SampleAssembler>,
}

impl SamplingActor {
    pub fn new(config: &Config) -> Self {
        Self { assembler: Mutex::new(SampleAssembler::new(config)) }
    }

    pub fn record_fix(&self, fix: RawFix) -> LocomotionSample {
        self.assembler.lock().assemble(fix)
    }

    pub fn accelerometer(&self, reading: crate::filters::motion::AccelerometerReading) {
        self.assembler.lock().accelerometer(reading);
    }

    pub fn steps(&self, count: u32, window_secs: f64) {
        self.assembler.lock().steps(count, window_secs);
    }

    pub fn heart_rate(&self, bpm: f64) {
        self.assembler.lock().heart_rate(bpm);
    }
}

pub struct TimelineActor {
    recorder: Mutex<TimelineRecorder>,
}

impl Default for TimelineActor {
    fn default() -> Self {
        Self::new()
    }
}

impl TimelineActor {
    pub fn new() -> Self {
        Self { recorder: Mutex::new(TimelineRecorder::new()) }
    }

    /// Appends a sample to the open item, returning any item the sample's
    /// state transition closed.
    pub fn append_sample(&self, sample: &LocomotionSample) -> Option<TimelineItemBase> {
        self.recorder.lock().append(sample)
    }

    pub fn flush(&self) -> Option<TimelineItemBase> {
        self.recorder.lock().flush()
    }

    pub fn drain_completed(&self) -> Vec<TimelineItemBase> {
        self.recorder.lock().completed_items()
    }

    /// The item currently open for appends, if any — the item the most
    /// recently appended sample belongs to.
    pub fn open_item(&self) -> Option<TimelineItemBase> {
        self.recorder.lock().open_item().cloned()
    }

    /// Runs a processor pass over `items`, committing the result as one
    /// transaction via `store`.
    pub fn run_processor_pass(&self, store: &Store, items: Vec<TimelineItemBase>, merge_window_secs: u32) -> Result<usize> {
        let mut chain = ItemChain::from_ordered(items);
        let merged = chain.run_pass(merge_window_secs);
        chain.recompute_changed_items(|sample_ids| store.get_samples(sample_ids).unwrap_or_default());
        let items = chain.into_items();
        store.commit_item_chain(&items)?;
        Ok(merged)
    }

    /// Runs the density-reduction pruning pass over one closed item: loads
    /// its samples, hard-deletes the ones the activity-aware policy drops,
    /// and commits the item's thinned `sample_ids` alongside the deletion.
    pub fn prune_item(&self, store: &Store, mut item: TimelineItemBase) -> Result<usize> {
        let samples = store.get_samples(&item.sample_ids)?;
        let removed = crate::timeline::pruning::prune_item(&mut item, &samples);
        if removed.is_empty() {
            return Ok(0);
        }
        store.put_item(&item)?;
        store.delete_samples(&removed)?;
        Ok(removed.len())
    }

    /// Soft-deletes `target` within its neighbourhood `items`: bridges the
    /// chain around it, detaches its samples, and commits the result (item
    /// rows plus the now-orphaned samples) in one go.
    pub fn delete_item(&self, store: &Store, items: Vec<TimelineItemBase>, target: crate::ids::ItemId) -> Result<bool> {
        let mut chain = ItemChain::from_ordered(items);
        let Some(detached) = chain.delete_item(target) else {
            return Ok(false);
        };
        let items = chain.into_items();
        store.commit_item_chain(&items)?;
        store.detach_samples(&detached)?;
        Ok(true)
    }
}

pub struct ClassifierActor {
    tree: Mutex<ClassifierTree>,
    in_background: std::sync::atomic::AtomicBool,
}

impl ClassifierActor {
    pub fn new(config: &Config) -> Self {
        Self { tree: Mutex::new(ClassifierTree::new(config)), in_background: std::sync::atomic::AtomicBool::new(false) }
    }

    /// Tracks whether the host application is currently backgrounded; while
    /// true, every `classify`/`classify_sequence` call returns `None`.
    pub fn set_background(&self, in_background: bool) {
        self.in_background.store(in_background, std::sync::atomic::Ordering::Relaxed);
    }

    fn is_background(&self) -> bool {
        self.in_background.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn classify(&self, sample: &LocomotionSample) -> Option<[f32; ActivityType::COUNT]> {
        self.tree.lock().classify(sample, self.is_background())
    }

    pub fn classify_sequence(&self, samples: &[LocomotionSample]) -> Option<ActivityType> {
        self.tree.lock().classify_sequence(samples, self.is_background())
    }

    pub fn install_model(&self, model: crate::classifier::ActivityTypesModel) {
        self.tree.lock().install_model(model);
    }

    /// Marks the depth-0/1/2 cells containing `(latitude, longitude)` as
    /// needing a retrain — called whenever a confirmed sample is saved.
    pub fn mark_needs_update(&self, latitude: f64, longitude: f64) {
        self.tree.lock().mark_needs_update(latitude, longitude);
    }

    pub fn next_training_candidate(&self) -> Option<crate::classifier::ActivityTypesModel> {
        self.tree.lock().next_training_candidate(chrono::Utc::now()).cloned()
    }

    pub fn mark_training_failed(&self, geo_key: &str) {
        self.tree.lock().mark_training_failed(geo_key);
    }

    /// Spawns background training on its own thread; only the final
    /// `install_model` call (driven by the caller once the thread's result
    /// arrives) touches actor state.
    pub fn spawn_training(
        self: &Arc<Self>,
        trainer: Arc<dyn ModelTrainer>,
        csv_path: PathBuf,
        target_column: String,
        cancel: CancelToken,
    ) -> std::thread::JoinHandle<Result<PathBuf>> {
        std::thread::spawn(move || {
            if cancel.is_cancelled() {
                return Err(crate::error::LocomotionError::ExportCancelled);
            }
            trainer.train(&csv_path, &target_column)
        })
    }
}

pub struct PersistenceActor {
    store: Store,
    places: Mutex<PlaceEngine>,
}

impl PersistenceActor {
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self { store: Store::open_in_memory()?, places: Mutex::new(PlaceEngine::new()) })
    }

    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Ok(Self { store: Store::open(path)?, places: Mutex::new(PlaceEngine::new()) })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn insert_place(&self, place: Place) -> Result<()> {
        self.store.put_place(&place)?;
        self.places.lock().insert(place);
        Ok(())
    }

    pub fn search_nearby(&self, center: geo::Point<f64>, arrival: chrono::DateTime<chrono::Utc>, margin_meters: f64) -> Vec<crate::places::PlaceCandidate> {
        self.places.lock().search_nearby(center, arrival, margin_meters)
    }
}

/// Bundles the four actors plus shared configuration — the thing a host
/// constructs once and holds for the lifetime of the recording session,
/// replacing a globally reachable singleton.
pub struct LocomotionContext {
    pub config: Config,
    pub sampling: SamplingActor,
    pub timeline: TimelineActor,
    pub classifier: ClassifierActor,
    pub persistence: PersistenceActor,
}

impl LocomotionContext {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            sampling: SamplingActor::new(&config),
            timeline: TimelineActor::new(),
            classifier: ClassifierActor::new(&config),
            persistence: PersistenceActor::open_in_memory()?,
            config,
        })
    }

    pub fn open(config: Config, path: impl AsRef<std::path::Path>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            sampling: SamplingActor::new(&config),
            timeline: TimelineActor::new(),
            classifier: ClassifierActor::new(&config),
            persistence: PersistenceActor::open(path)?,
            config,
        })
    }

    /// Records one raw fix end to end: assembles the sample, classifies it,
    /// appends it to the timeline, and persists it. The sample's
    /// `timeline_item_id` reflects the item it lands in once appended, and
    /// that item's row is upserted in the same call — mirroring the spec's
    /// trigger-maintained `startDate`/`endDate`/`samplesChanged` bookkeeping
    /// that fires on every sample insert, not only when the item closes.
    pub fn record_fix(&self, fix: RawFix) -> Result<LocomotionSample> {
        let mut sample = self.sampling.record_fix(fix);
        sample.classifier_results = self.classifier.classify(&sample);

        let closed = self.timeline.append_sample(&sample);
        sample.timeline_item_id = self.timeline.open_item().map(|item| item.id);

        self.persistence.store().put_sample(&sample)?;
        if let Some(closed) = closed {
            self.persistence.store().put_item(&closed)?;
        }
        if let Some(open) = self.timeline.open_item() {
            self.persistence.store().put_item(&open)?;
        }
        Ok(sample)
    }

    /// Records a ground-truth activity type for a sample, persists it, and
    /// marks the depth-0/1/2 classifier cells at its coordinate dirty so the
    /// background training worker picks them up.
    pub fn confirm_sample_activity_type(&self, sample_id: crate::ids::SampleId, activity_type: ActivityType) -> Result<()> {
        let Some(mut sample) = self.persistence.store().get_sample(&sample_id)? else {
            return Err(crate::error::LocomotionError::InvalidInput(format!("unknown sample {sample_id}")));
        };
        sample.confirmed_type = Some(activity_type);
        self.persistence.store().put_sample(&sample)?;
        self.classifier.mark_needs_update(sample.latitude, sample.longitude);
        Ok(())
    }

    /// Runs one background-training pass end to end (spec §4.G): picks the
    /// next cell due for a retrain, draws its confirmed samples (most recent
    /// first, capped per depth), hands them to `trainer`, and installs the
    /// model it produces. Returns `false` if no cell is currently due.
    pub fn run_training_pass(&self, trainer: &dyn ModelTrainer) -> Result<bool> {
        let Some(candidate) = self.classifier.next_training_candidate() else {
            return Ok(false);
        };
        let Some((lat_min, lat_max, lon_min, lon_max)) = crate::classifier::cell_bounds(&candidate.geo_key) else {
            self.classifier.mark_training_failed(&candidate.geo_key);
            return Ok(true);
        };

        let cap = crate::classifier::model::MAX_TRAINING_SAMPLES[candidate.depth.min(2) as usize];
        let samples = self.persistence.store().confirmed_samples_in_bbox(lat_min, lat_max, lon_min, lon_max, cap)?;

        let rows: Vec<crate::classifier::TrainingRow> = samples
            .iter()
            .filter_map(|s| {
                let since_item_start = s
                    .timeline_item_id
                    .and_then(|id| self.persistence.store().get_item(&id).ok().flatten())
                    .map(|item| (s.date - item.start_date).num_seconds() as f64)
                    .unwrap_or(0.0);
                crate::classifier::TrainingRow::from_sample(s, since_item_start)
            })
            .collect();

        let center = crate::classifier::cell_center(&candidate.geo_key).unwrap_or((lat_min, lon_min));
        let rows = match crate::classifier::ensure_distinct_types(rows, center) {
            Ok(rows) => rows,
            Err(_) => {
                self.classifier.mark_training_failed(&candidate.geo_key);
                return Ok(true);
            }
        };

        let updater = crate::classifier::ModelUpdater::new(&self.config);
        let csv_path = std::env::temp_dir().join(format!("{}-{}.csv", candidate.geo_key, crate::ids::SampleId::new()));
        if updater.write_training_csv(&csv_path, &rows).is_err() {
            self.classifier.mark_training_failed(&candidate.geo_key);
            return Ok(true);
        }

        let model_path = match trainer.train(&csv_path, "confirmedActivityType") {
            Ok(path) => path,
            Err(_) => {
                self.classifier.mark_training_failed(&candidate.geo_key);
                return Ok(true);
            }
        };
        let payload = std::fs::read_to_string(&model_path)?;
        let mut model: crate::classifier::ActivityTypesModel = serde_json::from_str(&payload)?;
        model.geo_key = candidate.geo_key.clone();
        model.depth = candidate.depth;
        model.sample_count = rows.len();
        model.needs_update = false;
        model.last_updated = Some(chrono::Utc::now());

        self.persistence.store().put_activity_model(&model)?;
        self.classifier.install_model(model);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn context_records_a_fix_end_to_end() {
        let ctx = LocomotionContext::new(Config::default()).unwrap();
        let fix = RawFix {
            date: Utc::now(),
            latitude: 37.0,
            longitude: -122.0,
            horizontal_accuracy: 10.0,
            altitude: None,
            vertical_accuracy: None,
            course: None,
            course_accuracy: None,
        };
        let sample = ctx.record_fix(fix).unwrap();
        assert!(sample.classifier_results.is_some());
        let stats = ctx.persistence.store().stats().unwrap();
        assert_eq!(stats.sample_count, 1);
    }
}
