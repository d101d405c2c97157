//! Emits training data for a geo key bucket as CSV and installs the model an
//! external trainer produces.
//!
//! Training runs off the classifier actor: [`ModelUpdater::export_training_csv`]
//! and [`ModelTrainer::train`] are expected to run on a background thread,
//! with only [`ClassifierTree::install_model`] touching actor state.
//!
//! [`ClassifierTree::install_model`]: crate::classifier::tree::ClassifierTree::install_model

use std::path::{Path, PathBuf};

use chrono::Timelike;

use crate::config::Config;
use crate::error::{LocomotionError, Result};
use crate::model::activity::ActivityType;
use crate::model::sample::{LocomotionSample, MovingState};

/// A row of training data, columns per spec §4.G step 3:
/// `confirmedActivityType, stepHz, xyAcceleration, zAcceleration,
/// movingState, verticalAccuracy, horizontalAccuracy, speed, course,
/// latitude, longitude, altitude, heartRate, timeOfDay, sinceVisitStart`.
#[derive(Debug, Clone)]
pub struct TrainingRow {
    pub confirmed_type: ActivityType,
    pub step_hz: f64,
    pub xy_acceleration: f64,
    pub z_acceleration: f64,
    pub moving_state: MovingState,
    pub vertical_accuracy: Option<f64>,
    pub horizontal_accuracy: f64,
    pub speed: f64,
    pub course: Option<f64>,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub heart_rate: Option<f64>,
    pub time_of_day_secs: u32,
    pub since_item_start_secs: f64,
}

impl TrainingRow {
    /// `since_item_start_secs` is the elapsed time since the owning
    /// timeline item's `startDate`, supplied by the caller (the updater has
    /// no item context of its own).
    pub fn from_sample(sample: &LocomotionSample, since_item_start_secs: f64) -> Option<Self> {
        let confirmed_type = sample.confirmed_type?;
        Some(Self {
            confirmed_type,
            step_hz: sample.step_hz.unwrap_or(0.0),
            xy_acceleration: sample.x_y_acceleration.unwrap_or(0.0),
            z_acceleration: sample.z_acceleration.unwrap_or(0.0),
            moving_state: sample.moving_state,
            vertical_accuracy: sample.vertical_accuracy,
            horizontal_accuracy: sample.horizontal_accuracy,
            speed: sample.speed.unwrap_or(0.0),
            course: sample.course,
            latitude: sample.latitude,
            longitude: sample.longitude,
            altitude: sample.altitude,
            heart_rate: sample.heart_rate,
            time_of_day_secs: sample.date.num_seconds_from_midnight(),
            since_item_start_secs,
        })
    }

    /// A synthetic stationary row at a cell's center, injected when training
    /// data contains only one non-stationary confirmed type (spec §4.G step
    /// 2) — satisfies the "at least 2 distinct types" requirement without a
    /// real stationary sample on hand.
    fn synthetic_stationary(center_latitude: f64, center_longitude: f64) -> Self {
        Self {
            confirmed_type: ActivityType::Stationary,
            step_hz: 0.0,
            xy_acceleration: 0.0,
            z_acceleration: 0.0,
            moving_state: MovingState::Stationary,
            vertical_accuracy: None,
            horizontal_accuracy: 10.0,
            speed: 0.0,
            course: None,
            latitude: center_latitude,
            longitude: center_longitude,
            altitude: None,
            heart_rate: None,
            time_of_day_secs: 0,
            since_item_start_secs: 0.0,
        }
    }
}

/// Applies spec §4.G step 2's distinct-type requirement to a training set
/// drawn for one cell: requires at least two distinct confirmed types,
/// injecting one synthetic stationary row at `cell_center` if exactly one
/// non-stationary type is otherwise present. Fails with
/// [`LocomotionError::TrainingInsufficientData`] if even that can't produce
/// two distinct types (e.g. the only confirmed type already is
/// `Stationary`).
pub fn ensure_distinct_types(mut rows: Vec<TrainingRow>, cell_center: (f64, f64)) -> Result<Vec<TrainingRow>> {
    let distinct: std::collections::HashSet<ActivityType> = rows.iter().map(|r| r.confirmed_type).collect();
    if distinct.len() >= 2 {
        return Ok(rows);
    }
    if distinct.len() == 1 && !distinct.contains(&ActivityType::Stationary) {
        let (lat, lon) = cell_center;
        rows.push(TrainingRow::synthetic_stationary(lat, lon));
        return Ok(rows);
    }
    Err(LocomotionError::TrainingInsufficientData { needed: 2, have: distinct.len() })
}

/// External training backend. The crate ships no real ML trainer; hosts wire
/// a process that reads the emitted CSV and writes a serialized
/// [`ActivityTypesModel`](crate::classifier::model::ActivityTypesModel) back out, or supply
/// [`NullTrainer`] in tests.
pub trait ModelTrainer: Send + Sync {
    fn train(&self, csv_path: &Path, target_column: &str) -> Result<PathBuf>;
}

/// A trainer that refuses to train; used where no real trainer is wired.
pub struct NullTrainer;

impl ModelTrainer for NullTrainer {
    fn train(&self, _csv_path: &Path, _target_column: &str) -> Result<PathBuf> {
        Err(LocomotionError::TrainingInsufficientData { needed: 1, have: 0 })
    }
}

pub struct ModelUpdater {
    minimum_rows: usize,
}

impl ModelUpdater {
    pub fn new(config: &Config) -> Self {
        Self { minimum_rows: config.training_minimum_rows }
    }

    pub fn write_training_csv(&self, path: &Path, rows: &[TrainingRow]) -> Result<()> {
        if rows.len() < self.minimum_rows {
            return Err(LocomotionError::TrainingInsufficientData {
                needed: self.minimum_rows,
                have: rows.len(),
            });
        }

        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record([
            "confirmedActivityType",
            "stepHz",
            "xyAcceleration",
            "zAcceleration",
            "movingState",
            "verticalAccuracy",
            "horizontalAccuracy",
            "speed",
            "course",
            "latitude",
            "longitude",
            "altitude",
            "heartRate",
            "timeOfDay",
            "sinceVisitStart",
        ])?;
        for row in rows {
            writer.write_record([
                row.confirmed_type.code().to_string(),
                row.step_hz.to_string(),
                row.xy_acceleration.to_string(),
                row.z_acceleration.to_string(),
                (row.moving_state as i16).to_string(),
                row.vertical_accuracy.map(|v| v.to_string()).unwrap_or_else(|| "-1".to_string()),
                row.horizontal_accuracy.to_string(),
                row.speed.to_string(),
                row.course.map(|v| v.to_string()).unwrap_or_else(|| "-1".to_string()),
                row.latitude.to_string(),
                row.longitude.to_string(),
                row.altitude.map(|v| v.to_string()).unwrap_or_else(|| "-1".to_string()),
                row.heart_rate.map(|v| v.to_string()).unwrap_or_else(|| "-1".to_string()),
                row.time_of_day_secs.to_string(),
                row.since_item_start_secs.to_string(),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_with(confirmed: ActivityType) -> LocomotionSample {
        let mut s = LocomotionSample::new(Utc::now(), 37.0, -122.0, 10.0);
        s.confirmed_type = Some(confirmed);
        s.speed = Some(1.2);
        s
    }

    #[test]
    fn training_row_requires_confirmed_type() {
        let sample = LocomotionSample::new(Utc::now(), 0.0, 0.0, 10.0);
        assert!(TrainingRow::from_sample(&sample, 0.0).is_none());
    }

    #[test]
    fn insufficient_rows_reports_error() {
        let config = Config::default().with_training_minimum_rows(5);
        let updater = ModelUpdater::new(&config);
        let rows: Vec<TrainingRow> =
            vec![TrainingRow::from_sample(&sample_with(ActivityType::Walking), 0.0).unwrap()];
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.csv");
        let err = updater.write_training_csv(&path, &rows).unwrap_err();
        assert!(matches!(err, LocomotionError::TrainingInsufficientData { .. }));
    }

    #[test]
    fn null_trainer_always_errors() {
        let trainer = NullTrainer;
        let dir = tempfile::tempdir().unwrap();
        assert!(trainer.train(&dir.path().join("x.csv"), "confirmed_type").is_err());
    }

    #[test]
    fn single_type_gets_a_synthetic_stationary_row_injected() {
        let rows = vec![TrainingRow::from_sample(&sample_with(ActivityType::Walking), 0.0).unwrap()];
        let rows = ensure_distinct_types(rows, (37.0, -122.0)).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().any(|r| r.confirmed_type == ActivityType::Stationary));
    }

    #[test]
    fn already_diverse_rows_pass_through_unchanged() {
        let rows = vec![
            TrainingRow::from_sample(&sample_with(ActivityType::Walking), 0.0).unwrap(),
            TrainingRow::from_sample(&sample_with(ActivityType::Stationary), 0.0).unwrap(),
        ];
        let rows = ensure_distinct_types(rows, (37.0, -122.0)).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn all_stationary_rows_cannot_be_rescued() {
        let rows = vec![TrainingRow::from_sample(&sample_with(ActivityType::Stationary), 0.0).unwrap()];
        let err = ensure_distinct_types(rows, (37.0, -122.0)).unwrap_err();
        assert!(matches!(err, LocomotionError::TrainingInsufficientData { .. }));
    }

    #[test]
    fn write_training_csv_emits_the_spec_column_order() {
        let config = Config::default().with_training_minimum_rows(1);
        let updater = ModelUpdater::new(&config);
        let rows = vec![TrainingRow::from_sample(&sample_with(ActivityType::Walking), 12.5).unwrap()];
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.csv");
        updater.write_training_csv(&path, &rows).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        let header = contents.lines().next().unwrap();
        assert_eq!(header, "confirmedActivityType,stepHz,xyAcceleration,zAcceleration,movingState,verticalAccuracy,horizontalAccuracy,speed,course,latitude,longitude,altitude,heartRate,timeOfDay,sinceVisitStart");
    }
}
