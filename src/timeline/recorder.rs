//! Stage H: appends incoming samples to the currently open timeline item,
//! opening a new item whenever the sample's moving state no longer matches
//! the open item's kind.

use crate::model::item::{TimelineItemBase, TimelineItemKind, TimelineItemTrip, TimelineItemVisit};
use crate::model::sample::{LocomotionSample, MovingState};

pub struct TimelineRecorder {
    open_item: Option<TimelineItemBase>,
    completed: Vec<TimelineItemBase>,
    last_trip_point: Option<(f64, f64)>,
}

impl Default for TimelineRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl TimelineRecorder {
    pub fn new() -> Self {
        Self { open_item: None, completed: Vec::new(), last_trip_point: None }
    }

    fn wants_visit(sample: &LocomotionSample) -> bool {
        !matches!(sample.moving_state, MovingState::Moving)
    }

    fn open_visit(&mut self, sample: &LocomotionSample) {
        let visit = TimelineItemVisit {
            place_id: None,
            confirmed_place: false,
            uncertain_place: true,
            custom_title: None,
            street_address: None,
            center_latitude: sample.latitude,
            center_longitude: sample.longitude,
            radius_mean: sample.horizontal_accuracy,
            radius_sd: 0.0,
        };
        let mut item = TimelineItemBase::new_visit(sample.date, sample.date, visit);
        item.sample_ids.push(sample.id);
        self.open_item = Some(item);
    }

    fn open_trip(&mut self, sample: &LocomotionSample) {
        let trip = TimelineItemTrip {
            classified_activity_type: sample.activity_type(),
            confirmed_type: sample.confirmed_type,
            uncertain_activity_type: Self::is_uncertain(sample),
            distance_meters: 0.0,
            speed_mean: sample.speed.unwrap_or(0.0),
        };
        let mut item = TimelineItemBase::new_trip(sample.date, sample.date, trip);
        item.sample_ids.push(sample.id);
        self.open_item = Some(item);
    }

    /// A trip sample is uncertain (spec invariant `¬uncertain ⇒ classified ∨
    /// confirmed`) while it has neither a user confirmation nor a confident
    /// classifier result — top probability below the same completeness bar
    /// the classifier tree itself uses for a "complete" model.
    fn is_uncertain(sample: &LocomotionSample) -> bool {
        if sample.confirmed_type.is_some() {
            return false;
        }
        match &sample.classifier_results {
            Some(probs) => probs.iter().cloned().fold(f32::MIN, f32::max) < 0.5,
            None => true,
        }
    }

    /// Appends one sample to the open item, closing and returning the
    /// previous item if the sample's state starts a new kind of item.
    pub fn append(&mut self, sample: &LocomotionSample) -> Option<TimelineItemBase> {
        let wants_visit = Self::wants_visit(sample);
        let mut closed = None;

        let matches_open = match &self.open_item {
            Some(item) => item.is_visit() == wants_visit,
            None => false,
        };

        if !matches_open {
            if let Some(previous) = self.open_item.take() {
                closed = Some(previous.clone_with_link_target());
                self.completed.push(previous);
            }
            if wants_visit {
                self.open_visit(sample);
            } else {
                self.open_trip(sample);
            }
        } else if let Some(item) = &mut self.open_item {
            let previous_point = self.last_trip_point;
            item.end_date = sample.date;
            item.sample_ids.push(sample.id);
            Self::accumulate_visit_stats(item, sample);
            Self::accumulate_trip_stats(item, sample, previous_point);
            Self::accumulate_rollup_stats(item, sample);
            item.samples_changed = false;
        }
        if matches!(self.open_item.as_ref().map(TimelineItemBase::is_trip), Some(true)) {
            self.last_trip_point = Some((sample.latitude, sample.longitude));
        } else {
            self.last_trip_point = None;
        }

        closed
    }

    fn accumulate_visit_stats(item: &mut TimelineItemBase, sample: &LocomotionSample) {
        if let Some(visit) = item.as_visit_mut() {
            let n = item.sample_ids.len().max(1) as f64;
            visit.center_latitude += (sample.latitude - visit.center_latitude) / n;
            visit.center_longitude += (sample.longitude - visit.center_longitude) / n;
            visit.radius_mean = visit.radius_mean.max(sample.horizontal_accuracy).min(visit.radius_mean + 10.0);
        }
    }

    /// Accumulates a trip's running distance/mean speed and re-derives
    /// `classifiedActivityType`/`uncertainActivityType` from the newest
    /// sample — the incremental counterpart of processor's full
    /// from-scratch recompute on `samplesChanged` (spec §4.I).
    fn accumulate_trip_stats(item: &mut TimelineItemBase, sample: &LocomotionSample, previous_point: Option<(f64, f64)>) {
        let n = item.sample_ids.len().max(1) as f64;
        let Some(trip) = item.as_trip_mut() else { return };

        if let Some((prev_lat, prev_lon)) = previous_point {
            let from = geo::Point::new(prev_lon, prev_lat);
            let to = geo::Point::new(sample.longitude, sample.latitude);
            trip.distance_meters += crate::spatial::distance_between(from, to, crate::spatial::DistanceMetric::Haversine);
        }

        if trip.confirmed_type.is_none() {
            if sample.confirmed_type.is_some() {
                trip.classified_activity_type = sample.activity_type();
            } else if let Some(probs) = &sample.classifier_results {
                trip.classified_activity_type = crate::model::activity::argmax(probs);
            }
        }
        trip.uncertain_activity_type = Self::is_uncertain(sample);
        if let Some(speed) = sample.speed {
            trip.speed_mean += (speed - trip.speed_mean) / n;
        }
    }

    /// Updates an item's roll-up health stats as one more sample lands:
    /// step count integrated from `stepHz` over the elapsed gap, altitude
    /// and heart-rate running means/max, and floor counts derived from
    /// accumulated altitude change crossing a 3m story height.
    fn accumulate_rollup_stats(item: &mut TimelineItemBase, sample: &LocomotionSample) {
        const FLOOR_HEIGHT_METERS: f64 = 3.0;
        const ENERGY_PER_ACCEL_SECOND: f64 = 0.02;

        let elapsed_secs = (sample.date - item.end_date).num_milliseconds().max(0) as f64 / 1000.0;
        let n = item.sample_ids.len().max(1) as f64;

        if let Some(step_hz) = sample.step_hz {
            item.step_count += step_hz * elapsed_secs;
        }

        let accel = sample.x_y_acceleration.unwrap_or(0.0).abs() + sample.z_acceleration.unwrap_or(0.0).abs();
        item.energy_kcal += accel * elapsed_secs * ENERGY_PER_ACCEL_SECOND;

        if let Some(altitude) = sample.altitude {
            let previous_mean = item.altitude_mean.unwrap_or(altitude);
            item.altitude_mean = Some(previous_mean + (altitude - previous_mean) / n);

            let delta = altitude - previous_mean;
            if delta >= FLOOR_HEIGHT_METERS {
                item.floors_ascended += (delta / FLOOR_HEIGHT_METERS) as u32;
            } else if delta <= -FLOOR_HEIGHT_METERS {
                item.floors_descended += (-delta / FLOOR_HEIGHT_METERS) as u32;
            }
        }

        if let Some(heart_rate) = sample.heart_rate {
            let previous_mean = item.heart_rate_mean.unwrap_or(heart_rate);
            item.heart_rate_mean = Some(previous_mean + (heart_rate - previous_mean) / n);
            item.heart_rate_max = Some(item.heart_rate_max.map_or(heart_rate, |max: f64| max.max(heart_rate)));
        }
    }

    /// Flushes the currently open item (e.g. at the end of a recording
    /// session) without waiting for a state transition.
    pub fn flush(&mut self) -> Option<TimelineItemBase> {
        self.open_item.take()
    }

    pub fn completed_items(&mut self) -> Vec<TimelineItemBase> {
        std::mem::take(&mut self.completed)
    }

    pub fn open_item(&self) -> Option<&TimelineItemBase> {
        self.open_item.as_ref()
    }

    pub fn open_item_id(&self) -> Option<crate::ids::ItemId> {
        self.open_item.as_ref().map(|item| item.id)
    }
}

impl TimelineItemBase {
    fn clone_with_link_target(&self) -> TimelineItemBase {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn stationary_sample(t: DateTime<Utc>) -> LocomotionSample {
        let mut s = LocomotionSample::new(t, 37.0, -122.0, 10.0);
        s.moving_state = MovingState::Stationary;
        s
    }

    fn moving_sample(t: DateTime<Utc>) -> LocomotionSample {
        let mut s = LocomotionSample::new(t, 37.0 + 0.001, -122.0, 10.0);
        s.moving_state = MovingState::Moving;
        s.speed = Some(3.0);
        s
    }

    #[test]
    fn twelve_static_fixes_become_one_visit() {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut recorder = TimelineRecorder::new();
        for i in 0..12 {
            let closed = recorder.append(&stationary_sample(base + chrono::Duration::seconds(i)));
            assert!(closed.is_none());
        }
        let item = recorder.open_item().unwrap();
        assert!(item.is_visit());
        assert_eq!(item.sample_ids.len(), 12);
        assert!(item.as_visit().unwrap().radius_mean <= 20.0);
    }

    #[test]
    fn stationary_moving_stationary_yields_three_chained_items() {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut recorder = TimelineRecorder::new();
        let mut t = 0i64;

        for _ in 0..10 {
            recorder.append(&stationary_sample(base + chrono::Duration::seconds(t)));
            t += 1;
        }
        for _ in 0..100 {
            recorder.append(&moving_sample(base + chrono::Duration::seconds(t)));
            t += 1;
        }
        for _ in 0..10 {
            recorder.append(&stationary_sample(base + chrono::Duration::seconds(t)));
            t += 1;
        }
        recorder.flush();

        let items = recorder.completed_items();
        assert_eq!(items.len(), 2);
        assert!(items[0].is_visit());
        assert!(items[1].is_trip());
        assert!(recorder.open_item().is_none());
    }

    #[test]
    fn trip_accumulates_step_count_and_heart_rate_rollups() {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut recorder = TimelineRecorder::new();

        for i in 0..5 {
            let mut s = moving_sample(base + chrono::Duration::seconds(i));
            s.step_hz = Some(2.0);
            s.heart_rate = Some(100.0 + i as f64);
            recorder.append(&s);
        }

        let item = recorder.open_item().unwrap();
        assert!(item.step_count > 0.0);
        assert_eq!(item.heart_rate_max, Some(104.0));
        assert!(item.heart_rate_mean.unwrap() > 100.0);
        assert!(!item.samples_changed);
    }
}
