//! Stage J: reduces the density of a closed item's retained samples by an
//! activity-aware policy. Samples outside the kept set are hard-deleted, not
//! merely detached.

use std::collections::HashSet;

use crate::ids::SampleId;
use crate::model::activity::ActivityType;
use crate::model::item::TimelineItemBase;
use crate::model::sample::{LocomotionSample, MovingState};
use crate::spatial::douglas_peucker_indices;

const VISIT_EDGE_MINUTES: i64 = 30;
const VISIT_WINDOW_SECS: i64 = 120;

struct TripPruneParams {
    epsilon_meters: f64,
    max_gap_secs: i64,
}

/// `ε`/`maxGap` vary by the trip's classified activity type: airplane gets
/// the loosest tolerance (GPS noise is large and gaps between fixes are
/// long), a human-powered "workout" the tightest, everything else
/// (motorised transport) the default.
fn trip_prune_params(activity_type: ActivityType) -> TripPruneParams {
    if activity_type == ActivityType::Airplane {
        TripPruneParams { epsilon_meters: 100.0, max_gap_secs: 15 }
    } else if activity_type.is_transport() {
        TripPruneParams { epsilon_meters: 4.0, max_gap_secs: 6 }
    } else {
        TripPruneParams { epsilon_meters: 3.0, max_gap_secs: 2 }
    }
}

/// Returns the ids of `samples` that should be hard-deleted from `item`.
/// Never prunes below two remaining samples.
pub fn prunable_samples(item: &TimelineItemBase, samples: &[LocomotionSample]) -> Vec<SampleId> {
    if samples.len() <= 2 {
        return Vec::new();
    }
    let keep = if item.is_visit() { visit_keep_set(item, samples) } else { trip_keep_set(item, samples) };
    samples.iter().filter(|s| !keep.contains(&s.id)).map(|s| s.id).collect()
}

/// Keeps all non-stationary samples, the first/last 30 minutes verbatim, and
/// from the stationary middle the lowest-horizontal-accuracy sample (ties ->
/// oldest) per rolling 2-minute window.
fn visit_keep_set(item: &TimelineItemBase, samples: &[LocomotionSample]) -> HashSet<SampleId> {
    let mut ordered: Vec<&LocomotionSample> = samples.iter().collect();
    ordered.sort_by_key(|s| s.date);

    let first_edge_end = item.start_date + chrono::Duration::minutes(VISIT_EDGE_MINUTES);
    let last_edge_start = item.end_date - chrono::Duration::minutes(VISIT_EDGE_MINUTES);

    let mut keep = HashSet::new();
    let mut middle: Vec<&LocomotionSample> = Vec::new();

    for s in ordered {
        let is_edge = s.date <= first_edge_end || s.date >= last_edge_start;
        let is_non_stationary = s.moving_state != MovingState::Stationary;
        if is_edge || is_non_stationary {
            keep.insert(s.id);
        } else {
            middle.push(s);
        }
    }

    let mut window_start = 0;
    while window_start < middle.len() {
        let window_end_date = middle[window_start].date + chrono::Duration::seconds(VISIT_WINDOW_SECS);
        let mut window_end = window_start;
        while window_end < middle.len() && middle[window_end].date < window_end_date {
            window_end += 1;
        }
        let best = middle[window_start..window_end]
            .iter()
            .min_by(|a, b| {
                a.horizontal_accuracy
                    .partial_cmp(&b.horizontal_accuracy)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.date.cmp(&b.date))
            })
            .expect("window is non-empty");
        keep.insert(best.id);
        window_start = window_end;
    }

    keep
}

/// Runs a time-aware Douglas-Peucker: the sample sequence is split into
/// segments wherever a gap exceeds `maxGap`, each segment simplified
/// independently so a long signal-loss gap never gets bridged by the
/// simplifier.
fn trip_keep_set(item: &TimelineItemBase, samples: &[LocomotionSample]) -> HashSet<SampleId> {
    let mut ordered: Vec<&LocomotionSample> = samples.iter().collect();
    ordered.sort_by_key(|s| s.date);

    let activity_type = item.as_trip().map(|t| t.classified_activity_type).unwrap_or(ActivityType::Unknown);
    let params = trip_prune_params(activity_type);

    let mut keep = HashSet::new();
    let mut segment_start = 0;
    for i in 1..ordered.len() {
        let gap = (ordered[i].date - ordered[i - 1].date).num_seconds();
        if gap > params.max_gap_secs {
            simplify_segment(&ordered[segment_start..i], params.epsilon_meters, &mut keep);
            segment_start = i;
        }
    }
    simplify_segment(&ordered[segment_start..], params.epsilon_meters, &mut keep);

    keep
}

fn simplify_segment(segment: &[&LocomotionSample], epsilon_meters: f64, keep: &mut HashSet<SampleId>) {
    if segment.len() <= 2 {
        keep.extend(segment.iter().map(|s| s.id));
        return;
    }
    let points: Vec<geo::Point<f64>> = segment.iter().map(|s| s.coordinate()).collect();
    for idx in douglas_peucker_indices(&points, epsilon_meters) {
        keep.insert(segment[idx].id);
    }
}

/// Applies pruning to an item in place, dropping the detached ids from its
/// `sample_ids` list and returning them so the caller can hard-delete the
/// underlying rows.
pub fn prune_item(item: &mut TimelineItemBase, samples: &[LocomotionSample]) -> Vec<SampleId> {
    let removable = prunable_samples(item, samples);
    if removable.is_empty() {
        return removable;
    }
    let removed: HashSet<SampleId> = removable.iter().copied().collect();
    item.sample_ids.retain(|id| !removed.contains(id));
    removable
}
