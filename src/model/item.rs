//! Timeline items: the doubly-linked chain of visits and trips produced by
//! the recorder and maintained by the processor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ItemId, PlaceId, SampleId};
use crate::model::activity::ActivityType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineItemBase {
    pub id: ItemId,
    pub previous_item_id: Option<ItemId>,
    pub next_item_id: Option<ItemId>,

    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,

    pub sample_ids: Vec<SampleId>,

    pub disabled: bool,
    pub deleted: bool,
    pub locked: bool,
    /// Set whenever a sample insert/update/delete changes this item's
    /// membership or one of its significant columns; cleared once the
    /// roll-up stats below have been recomputed from its current samples.
    pub samples_changed: bool,

    pub source: String,
    pub source_version: String,
    pub last_saved: DateTime<Utc>,

    pub kind: TimelineItemKind,

    pub step_count: f64,
    pub floors_ascended: u32,
    pub floors_descended: u32,
    pub altitude_mean: Option<f64>,
    pub energy_kcal: f64,
    pub heart_rate_mean: Option<f64>,
    pub heart_rate_max: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TimelineItemKind {
    Visit(TimelineItemVisit),
    Trip(TimelineItemTrip),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineItemVisit {
    pub place_id: Option<PlaceId>,
    pub confirmed_place: bool,
    /// Set whenever `confirmed_place` is false and no place candidate scored
    /// highly enough to assign `place_id` — spec invariant
    /// `¬uncertainPlace ⇒ placeId ≠ null`.
    pub uncertain_place: bool,
    pub custom_title: Option<String>,
    pub street_address: Option<String>,
    pub center_latitude: f64,
    pub center_longitude: f64,
    pub radius_mean: f64,
    pub radius_sd: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineItemTrip {
    /// The classifier tree's argmax over the trip's samples, or `Unknown`
    /// until at least one sample has a classification.
    pub classified_activity_type: ActivityType,
    pub confirmed_type: Option<ActivityType>,
    /// True while neither a confident classification nor a user confirmation
    /// is available — invariant: `¬uncertain ⇒ classified ∨ confirmed`,
    /// `confirmed ⇒ ¬uncertain`.
    pub uncertain_activity_type: bool,
    pub distance_meters: f64,
    pub speed_mean: f64,
}

impl TimelineItemBase {
    pub fn new_visit(start_date: DateTime<Utc>, end_date: DateTime<Utc>, visit: TimelineItemVisit) -> Self {
        Self {
            id: ItemId::new(),
            previous_item_id: None,
            next_item_id: None,
            start_date,
            end_date,
            sample_ids: Vec::new(),
            disabled: false,
            deleted: false,
            locked: false,
            samples_changed: true,
            source: "locomotion-core".to_string(),
            source_version: env!("CARGO_PKG_VERSION").to_string(),
            last_saved: Utc::now(),
            kind: TimelineItemKind::Visit(visit),
            step_count: 0.0,
            floors_ascended: 0,
            floors_descended: 0,
            altitude_mean: None,
            energy_kcal: 0.0,
            heart_rate_mean: None,
            heart_rate_max: None,
        }
    }

    pub fn new_trip(start_date: DateTime<Utc>, end_date: DateTime<Utc>, trip: TimelineItemTrip) -> Self {
        Self {
            id: ItemId::new(),
            previous_item_id: None,
            next_item_id: None,
            start_date,
            end_date,
            sample_ids: Vec::new(),
            disabled: false,
            deleted: false,
            locked: false,
            samples_changed: true,
            source: "locomotion-core".to_string(),
            source_version: env!("CARGO_PKG_VERSION").to_string(),
            last_saved: Utc::now(),
            kind: TimelineItemKind::Trip(trip),
            step_count: 0.0,
            floors_ascended: 0,
            floors_descended: 0,
            altitude_mean: None,
            energy_kcal: 0.0,
            heart_rate_mean: None,
            heart_rate_max: None,
        }
    }

    pub fn is_visit(&self) -> bool {
        matches!(self.kind, TimelineItemKind::Visit(_))
    }

    pub fn is_trip(&self) -> bool {
        matches!(self.kind, TimelineItemKind::Trip(_))
    }

    pub fn as_visit(&self) -> Option<&TimelineItemVisit> {
        match &self.kind {
            TimelineItemKind::Visit(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_visit_mut(&mut self) -> Option<&mut TimelineItemVisit> {
        match &mut self.kind {
            TimelineItemKind::Visit(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_trip(&self) -> Option<&TimelineItemTrip> {
        match &self.kind {
            TimelineItemKind::Trip(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_trip_mut(&mut self) -> Option<&mut TimelineItemTrip> {
        match &mut self.kind {
            TimelineItemKind::Trip(t) => Some(t),
            _ => None,
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        self.end_date - self.start_date
    }
}
