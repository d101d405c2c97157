//! Stage I: the timeline processor. Runs merge and edge-heal passes over the
//! persisted item chain; a single pass commits every edge and sample
//! reassignment it makes as one atomic transaction via the store.

use rustc_hash::FxHashMap;

use crate::ids::{ItemId, SampleId};
use crate::model::activity::ActivityType;
use crate::model::item::{TimelineItemBase, TimelineItemKind};
use crate::model::sample::LocomotionSample;
use crate::spatial::{distance_between, DistanceMetric};

/// An in-memory view of the doubly-linked item chain the processor mutates.
/// The store loads this, the processor mutates it, the store commits it back
/// atomically.
pub struct ItemChain {
    items: FxHashMap<ItemId, TimelineItemBase>,
    order: Vec<ItemId>,
}

impl ItemChain {
    pub fn from_ordered(mut items: Vec<TimelineItemBase>) -> Self {
        items.sort_by_key(|i| i.start_date);
        for pair in 0..items.len().saturating_sub(1) {
            let next_id = items[pair + 1].id;
            let prev_id = items[pair].id;
            items[pair].next_item_id = Some(next_id);
            items[pair + 1].previous_item_id = Some(prev_id);
        }
        let order = items.iter().map(|i| i.id).collect();
        let map = items.into_iter().map(|i| (i.id, i)).collect();
        Self { items: map, order }
    }

    pub fn into_items(self) -> Vec<TimelineItemBase> {
        self.order.into_iter().filter_map(|id| self.items.get(&id).cloned()).collect()
    }

    pub fn get(&self, id: &ItemId) -> Option<&TimelineItemBase> {
        self.items.get(id)
    }

    fn same_kind_mergeable(a: &TimelineItemBase, b: &TimelineItemBase) -> bool {
        match (&a.kind, &b.kind) {
            (TimelineItemKind::Visit(va), TimelineItemKind::Visit(vb)) => va.place_id.is_some() && va.place_id == vb.place_id,
            (TimelineItemKind::Trip(ta), TimelineItemKind::Trip(tb)) => ta.classified_activity_type == tb.classified_activity_type,
            _ => false,
        }
    }

    fn merge_into(&mut self, keep: ItemId, drop: ItemId) {
        let dropped = self.items.remove(&drop).expect("dropped item exists");
        let next_of_dropped = dropped.next_item_id;

        let keeper = self.items.get_mut(&keep).expect("keeper item exists");
        keeper.end_date = keeper.end_date.max(dropped.end_date);
        keeper.sample_ids.extend(dropped.sample_ids);
        keeper.next_item_id = next_of_dropped;
        keeper.last_saved = chrono::Utc::now();
        // Merging changes membership, so the precise incremental stats
        // recorder.rs computed per-sample no longer reflect a single
        // contiguous item; a full recompute from samples is owed.
        keeper.samples_changed = true;
        keeper.step_count += dropped.step_count;
        keeper.floors_ascended += dropped.floors_ascended;
        keeper.floors_descended += dropped.floors_descended;
        keeper.energy_kcal += dropped.energy_kcal;
        keeper.altitude_mean = match (keeper.altitude_mean, dropped.altitude_mean) {
            (Some(a), Some(b)) => Some((a + b) / 2.0),
            (a, None) => a,
            (None, b) => b,
        };
        keeper.heart_rate_mean = match (keeper.heart_rate_mean, dropped.heart_rate_mean) {
            (Some(a), Some(b)) => Some((a + b) / 2.0),
            (a, None) => a,
            (None, b) => b,
        };
        keeper.heart_rate_max = match (keeper.heart_rate_max, dropped.heart_rate_max) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, None) => a,
            (None, b) => b,
        };

        if let Some(next_id) = next_of_dropped {
            if let Some(next) = self.items.get_mut(&next_id) {
                next.previous_item_id = Some(keep);
            }
        }

        self.order.retain(|id| *id != drop);
    }

    /// Merges adjacent items of the same kind whose gap is within
    /// `merge_window_secs` and whose content matches (same place, or same
    /// activity type).
    pub fn merge_pass(&mut self, merge_window_secs: u32) -> usize {
        let mut merged_count = 0;
        let mut i = 0;
        while i + 1 < self.order.len() {
            let current_id = self.order[i];
            let next_id = self.order[i + 1];

            let should_merge = {
                let current = self.items.get(&current_id).unwrap();
                let next = self.items.get(&next_id).unwrap();
                if current.disabled || next.disabled || current.deleted || next.deleted {
                    false
                } else {
                    let gap = (next.start_date - current.end_date).num_seconds().max(0);
                    gap <= merge_window_secs as i64 && Self::same_kind_mergeable(current, next)
                }
            };

            if should_merge {
                self.merge_into(current_id, next_id);
                merged_count += 1;
            } else {
                i += 1;
            }
        }
        merged_count
    }

    /// Re-derives every item's `previous_item_id`/`next_item_id` from chain
    /// order, restoring edge symmetry and skipping deleted items so the
    /// chain never links to a tombstone.
    pub fn edge_heal_pass(&mut self) {
        let live: Vec<ItemId> = self
            .order
            .iter()
            .copied()
            .filter(|id| self.items.get(id).is_some_and(|i| !i.deleted))
            .collect();

        for id in &self.order {
            if let Some(item) = self.items.get_mut(id) {
                item.previous_item_id = None;
                item.next_item_id = None;
            }
        }

        for pair in live.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if a == b {
                continue;
            }
            if let Some(item) = self.items.get_mut(&a) {
                item.next_item_id = Some(b);
            }
            if let Some(item) = self.items.get_mut(&b) {
                item.previous_item_id = Some(a);
            }
        }
    }

    /// Propagates `disabled` to any item whose start/end falls entirely
    /// inside a disabled neighbor's span with no samples of its own — a
    /// zero-length artifact of a merge.
    pub fn propagate_disabled(&mut self) {
        let disabled_spans: Vec<(chrono::DateTime<chrono::Utc>, chrono::DateTime<chrono::Utc>)> = self
            .items
            .values()
            .filter(|i| i.disabled)
            .map(|i| (i.start_date, i.end_date))
            .collect();

        for item in self.items.values_mut() {
            if item.disabled || !item.sample_ids.is_empty() {
                continue;
            }
            if disabled_spans.iter().any(|(s, e)| item.start_date >= *s && item.end_date <= *e) {
                item.disabled = true;
            }
        }
    }

    /// Soft-deletes `id`: detaches its samples (returned so the caller can
    /// clear their `timeline_item_id` in the store), bridges its neighbours
    /// directly to each other, and marks it `deleted`. Refuses a locked item.
    /// Does nothing and returns `None` for an unknown or already-deleted id.
    pub fn delete_item(&mut self, id: ItemId) -> Option<Vec<SampleId>> {
        let item = self.items.get(&id)?;
        if item.locked || item.deleted {
            return None;
        }
        let previous_item_id = item.previous_item_id;
        let next_item_id = item.next_item_id;

        let item = self.items.get_mut(&id).unwrap();
        let detached = std::mem::take(&mut item.sample_ids);
        item.deleted = true;
        item.previous_item_id = None;
        item.next_item_id = None;
        item.last_saved = chrono::Utc::now();

        if let Some(prev_id) = previous_item_id {
            if let Some(prev) = self.items.get_mut(&prev_id) {
                prev.next_item_id = next_item_id;
            }
        }
        if let Some(next_id) = next_item_id {
            if let Some(next) = self.items.get_mut(&next_id) {
                next.previous_item_id = previous_item_id;
            }
        }

        Some(detached)
    }

    /// Splits a contiguous run of `sample_ids` (already validated by the
    /// caller as belonging to `source` and forming a different kind/activity
    /// than the remainder) out into a new item, inserting it into the chain
    /// immediately after `source` with three edges updated: `source`'s next
    /// edge now points at the new item, the new item's `previous`/`next`
    /// bracket it, and whatever followed `source` now points back at the new
    /// item instead.
    pub fn extract_segment(&mut self, source: ItemId, extracted: TimelineItemBase) -> Option<ItemId> {
        let extracted_sample_ids: std::collections::HashSet<SampleId> = extracted.sample_ids.iter().copied().collect();
        let source_item = self.items.get_mut(&source)?;
        if source_item.locked {
            return None;
        }
        source_item.sample_ids.retain(|id| !extracted_sample_ids.contains(id));
        let old_next = source_item.next_item_id;

        let new_id = extracted.id;
        let mut extracted = extracted;
        extracted.previous_item_id = Some(source);
        extracted.next_item_id = old_next;

        let source_item = self.items.get_mut(&source).unwrap();
        source_item.next_item_id = Some(new_id);

        if let Some(next_id) = old_next {
            if let Some(next) = self.items.get_mut(&next_id) {
                next.previous_item_id = Some(new_id);
            }
        }

        let insert_at = self.order.iter().position(|i| *i == source).map(|pos| pos + 1).unwrap_or(self.order.len());
        self.order.insert(insert_at, new_id);
        self.items.insert(new_id, extracted);

        Some(new_id)
    }

    /// Runs merge, disabled-propagation and edge-heal as a single atomic
    /// processor pass. Callers owing a recompute (samples loaded from
    /// storage) should follow up with [`ItemChain::recompute_changed_items`].
    pub fn run_pass(&mut self, merge_window_secs: u32) -> usize {
        let merged = self.merge_pass(merge_window_secs);
        self.propagate_disabled();
        self.edge_heal_pass();
        merged
    }

    /// Recomputes the derived Visit/Trip fields of every item whose
    /// `samplesChanged` flag is set (e.g. because `merge_into` folded another
    /// item's samples in) from its actual samples, fetched via
    /// `load_samples`, then clears the flag. Items with no live samples are
    /// left as-is other than clearing the flag.
    pub fn recompute_changed_items(&mut self, mut load_samples: impl FnMut(&[SampleId]) -> Vec<LocomotionSample>) {
        let changed_ids: Vec<ItemId> = self
            .order
            .iter()
            .copied()
            .filter(|id| self.items.get(id).is_some_and(|i| i.samples_changed && !i.deleted))
            .collect();

        for id in changed_ids {
            let Some(item) = self.items.get(&id) else { continue };
            let samples = load_samples(&item.sample_ids);
            if let Some(item) = self.items.get_mut(&id) {
                if !samples.is_empty() {
                    Self::recompute_item(item, samples);
                }
                item.samples_changed = false;
            }
        }
    }

    fn recompute_item(item: &mut TimelineItemBase, samples: Vec<LocomotionSample>) {
        if item.is_visit() {
            Self::recompute_visit(item, &samples);
        } else {
            Self::recompute_trip(item, samples);
        }
    }

    /// Weighted center (accuracy-weighted mean position) and bounded radius
    /// (mean and standard deviation of each sample's distance from that
    /// center) recomputed from scratch over the item's live samples.
    fn recompute_visit(item: &mut TimelineItemBase, samples: &[LocomotionSample]) {
        let weights: Vec<f64> = samples.iter().map(|s| 1.0 / s.horizontal_accuracy.max(1.0).powi(2)).collect();
        let weight_sum: f64 = weights.iter().sum();

        let center_lat = samples.iter().zip(&weights).map(|(s, w)| s.latitude * w).sum::<f64>() / weight_sum;
        let center_lon = samples.iter().zip(&weights).map(|(s, w)| s.longitude * w).sum::<f64>() / weight_sum;
        let center = geo::Point::new(center_lon, center_lat);

        let distances: Vec<f64> = samples.iter().map(|s| distance_between(center, s.coordinate(), DistanceMetric::Haversine)).collect();
        let n = distances.len() as f64;
        let radius_mean = distances.iter().sum::<f64>() / n;
        let variance = distances.iter().map(|d| (d - radius_mean).powi(2)).sum::<f64>() / n;

        if let Some(visit) = item.as_visit_mut() {
            visit.center_latitude = center_lat;
            visit.center_longitude = center_lon;
            visit.radius_mean = radius_mean;
            visit.radius_sd = variance.sqrt();
        }
    }

    /// Distance (summed consecutive-sample haversine), mean speed, and the
    /// mode classified activity type recomputed from scratch over the item's
    /// live samples. A user confirmation on any sample wins outright;
    /// otherwise the trip is `uncertainActivityType` unless the winning mode
    /// accounts for at least half the samples.
    fn recompute_trip(item: &mut TimelineItemBase, mut samples: Vec<LocomotionSample>) {
        samples.sort_by_key(|s| s.date);

        let mut distance_meters = 0.0;
        for pair in samples.windows(2) {
            distance_meters += distance_between(pair[0].coordinate(), pair[1].coordinate(), DistanceMetric::Haversine);
        }

        let speeds: Vec<f64> = samples.iter().filter_map(|s| s.speed).collect();
        let speed_mean = if speeds.is_empty() { 0.0 } else { speeds.iter().sum::<f64>() / speeds.len() as f64 };

        let mut counts: FxHashMap<ActivityType, usize> = FxHashMap::default();
        for s in &samples {
            *counts.entry(s.activity_type()).or_insert(0) += 1;
        }
        let total = samples.len().max(1);
        let (mode_type, mode_count) =
            counts.into_iter().max_by_key(|(_, count)| *count).unwrap_or((ActivityType::Unknown, 0));
        let confirmed = samples.iter().find_map(|s| s.confirmed_type);

        if let Some(trip) = item.as_trip_mut() {
            trip.distance_meters = distance_meters;
            trip.speed_mean = speed_mean;
            if let Some(confirmed) = confirmed {
                trip.confirmed_type = Some(confirmed);
                trip.classified_activity_type = confirmed;
                trip.uncertain_activity_type = false;
            } else {
                trip.classified_activity_type = mode_type;
                trip.uncertain_activity_type = (mode_count as f64 / total as f64) < 0.5;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::item::{TimelineItemTrip, TimelineItemVisit};
    use crate::model::activity::ActivityType;
    use chrono::{TimeZone, Utc};

    fn trip(start_secs: i64, end_secs: i64, base: chrono::DateTime<Utc>) -> TimelineItemBase {
        trip_with_activity(start_secs, end_secs, base, ActivityType::Walking)
    }

    fn trip_with_activity(start_secs: i64, end_secs: i64, base: chrono::DateTime<Utc>, activity_type: ActivityType) -> TimelineItemBase {
        TimelineItemBase::new_trip(
            base + chrono::Duration::seconds(start_secs),
            base + chrono::Duration::seconds(end_secs),
            TimelineItemTrip {
                classified_activity_type: activity_type,
                confirmed_type: None,
                uncertain_activity_type: false,
                distance_meters: 10.0,
                speed_mean: 1.0,
            },
        )
    }

    fn visit(start_secs: i64, end_secs: i64, base: chrono::DateTime<Utc>, place: crate::ids::PlaceId) -> TimelineItemBase {
        TimelineItemBase::new_visit(
            base + chrono::Duration::seconds(start_secs),
            base + chrono::Duration::seconds(end_secs),
            TimelineItemVisit {
                place_id: Some(place),
                confirmed_place: true,
                uncertain_place: false,
                custom_title: None,
                street_address: None,
                center_latitude: 0.0,
                center_longitude: 0.0,
                radius_mean: 10.0,
                radius_sd: 0.0,
            },
        )
    }

    #[test]
    fn merge_pass_joins_adjacent_same_place_visits() {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let place = crate::ids::PlaceId::new();
        let items = vec![visit(0, 100, base, place), visit(150, 300, base, place)];
        let mut chain = ItemChain::from_ordered(items);
        let merged = chain.merge_pass(600);
        assert_eq!(merged, 1);
        let items = chain.into_items();
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn merge_pass_joins_adjacent_same_activity_trips() {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let items = vec![trip(0, 100, base), trip(150, 300, base)];
        let mut chain = ItemChain::from_ordered(items);
        let merged = chain.merge_pass(600);
        assert_eq!(merged, 1);
    }

    #[test]
    fn merge_pass_leaves_different_activities_untouched() {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let items = vec![
            trip_with_activity(0, 100, base, ActivityType::Walking),
            trip_with_activity(150, 300, base, ActivityType::Cycling),
        ];
        let mut chain = ItemChain::from_ordered(items);
        let merged = chain.merge_pass(600);
        assert_eq!(merged, 0);
        assert_eq!(chain.into_items().len(), 2);
    }

    #[test]
    fn edge_heal_pass_produces_symmetric_links() {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let items = vec![trip(0, 100, base), trip(200, 300, base), trip(400, 500, base)];
        let mut chain = ItemChain::from_ordered(items);
        chain.edge_heal_pass();
        let items = chain.into_items();
        assert_eq!(items[0].next_item_id, Some(items[1].id));
        assert_eq!(items[1].previous_item_id, Some(items[0].id));
        assert_eq!(items[1].next_item_id, Some(items[2].id));
        assert!(items[0].previous_item_id.is_none());
        assert!(items[2].next_item_id.is_none());
    }

    #[test]
    fn deleting_the_middle_trip_bridges_visits_directly() {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let place_a = crate::ids::PlaceId::new();
        let place_b = crate::ids::PlaceId::new();
        let items = vec![visit(0, 100, base, place_a), trip(150, 300, base), visit(350, 500, base, place_b)];
        let mut chain = ItemChain::from_ordered(items);
        let trip_id = chain.order[1];
        let visit_a_id = chain.order[0];
        let visit_b_id = chain.order[2];

        let detached = chain.delete_item(trip_id).unwrap();
        assert!(detached.is_empty());

        let deleted = chain.get(&trip_id).unwrap();
        assert!(deleted.deleted);
        assert!(deleted.previous_item_id.is_none());
        assert!(deleted.next_item_id.is_none());

        let a = chain.get(&visit_a_id).unwrap();
        let b = chain.get(&visit_b_id).unwrap();
        assert_eq!(a.next_item_id, Some(visit_b_id));
        assert_eq!(b.previous_item_id, Some(visit_a_id));
    }

    #[test]
    fn deleting_a_locked_item_is_refused() {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let items = vec![trip(0, 100, base), trip(200, 300, base)];
        let mut chain = ItemChain::from_ordered(items);
        let id = chain.order[0];
        chain.items.get_mut(&id).unwrap().locked = true;
        assert!(chain.delete_item(id).is_none());
        assert!(!chain.get(&id).unwrap().deleted);
    }

    #[test]
    fn extract_segment_splits_a_stationary_cluster_out_of_a_trip() {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut source = trip(0, 300, base);
        let stationary_samples: Vec<SampleId> = (0..3).map(|_| SampleId::new()).collect();
        source.sample_ids = stationary_samples.clone();
        let source_id = source.id;
        let items = vec![source, trip(400, 500, base)];
        let mut chain = ItemChain::from_ordered(items);
        let following_id = chain.order[1];

        let place = crate::ids::PlaceId::new();
        let mut extracted = visit(100, 200, base, place);
        extracted.sample_ids = stationary_samples;
        let new_id = chain.extract_segment(source_id, extracted).unwrap();

        assert!(chain.get(&source_id).unwrap().sample_ids.is_empty());
        assert_eq!(chain.get(&source_id).unwrap().next_item_id, Some(new_id));
        assert_eq!(chain.get(&new_id).unwrap().previous_item_id, Some(source_id));
        assert_eq!(chain.get(&new_id).unwrap().next_item_id, Some(following_id));
        assert_eq!(chain.get(&following_id).unwrap().previous_item_id, Some(new_id));
    }

    #[test]
    fn recompute_changed_items_derives_trip_fields_from_samples() {
        use crate::model::sample::LocomotionSample;

        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut a = trip(0, 100, base);
        let mut b = trip(150, 300, base);
        let sample_a = SampleId::new();
        let sample_b = SampleId::new();
        a.sample_ids = vec![sample_a];
        b.sample_ids = vec![sample_b];

        let mut sample_a_data = LocomotionSample::new(base, 0.0, 0.0, 5.0);
        sample_a_data.id = sample_a;
        sample_a_data.speed = Some(2.0);
        let mut sample_b_data = LocomotionSample::new(base + chrono::Duration::seconds(200), 0.0, 0.001, 5.0);
        sample_b_data.id = sample_b;
        sample_b_data.speed = Some(4.0);

        let mut chain = ItemChain::from_ordered(vec![a, b]);
        let ids: Vec<ItemId> = chain.order.clone();
        chain.merge_into(ids[0], ids[1]);
        assert!(chain.get(&ids[0]).unwrap().samples_changed);

        let samples = [sample_a_data, sample_b_data];
        chain.recompute_changed_items(|sample_ids| {
            sample_ids.iter().filter_map(|id| samples.iter().find(|s| s.id == *id).cloned()).collect()
        });

        let merged = chain.get(&ids[0]).unwrap();
        assert!(!merged.samples_changed);
        let trip = merged.as_trip().unwrap();
        assert!(trip.distance_meters > 0.0);
        assert!((trip.speed_mean - 3.0).abs() < 1e-9);
    }

    #[test]
    fn no_item_links_to_itself() {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let items = vec![trip(0, 100, base)];
        let mut chain = ItemChain::from_ordered(items);
        chain.edge_heal_pass();
        let items = chain.into_items();
        assert_ne!(items[0].next_item_id, Some(items[0].id));
        assert!(items[0].next_item_id.is_none());
    }
}
