//! Matches stationary visits against known places: a geohash-bucketed
//! candidate index feeds a radius + histogram-weighted scorer.

use rustc_hash::FxHashMap;

use crate::ids::PlaceId;
use crate::model::place::{Place, WeekdayClass};
use crate::spatial::{distance_between, DistanceMetric};
use chrono::{DateTime, Utc};
use geo::Point;

/// Default geohash precision for the candidate bucket index; ~5km cells,
/// matching the teacher's default spatial-index precision.
pub const GEOHASH_PRECISION: usize = 5;

pub struct PlaceCandidate {
    pub place_id: PlaceId,
    pub distance_meters: f64,
    pub score: f64,
}

#[derive(Default)]
pub struct PlaceEngine {
    places: FxHashMap<PlaceId, Place>,
    buckets: FxHashMap<String, Vec<PlaceId>>,
}

impl PlaceEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, place: Place) {
        let key = geohash::encode(geo::Coord { x: place.center_longitude, y: place.center_latitude }, GEOHASH_PRECISION)
            .unwrap_or_default();
        self.buckets.entry(key).or_default().push(place.id);
        self.places.insert(place.id, place);
    }

    pub fn get(&self, id: &PlaceId) -> Option<&Place> {
        self.places.get(id)
    }

    pub fn get_mut(&mut self, id: &PlaceId) -> Option<&mut Place> {
        self.places.get_mut(id)
    }

    pub fn remove(&mut self, id: &PlaceId) -> Option<Place> {
        self.places.remove(id)
    }

    pub fn len(&self) -> usize {
        self.places.len()
    }

    pub fn is_empty(&self) -> bool {
        self.places.is_empty()
    }

    fn candidate_ids(&self, center: Point<f64>, radius_meters: f64) -> Vec<PlaceId> {
        let coord = geo::Coord { x: center.x(), y: center.y() };
        let Ok(key) = geohash::encode(coord, GEOHASH_PRECISION) else {
            return self.places.keys().copied().collect();
        };
        let mut keys = vec![key.clone()];
        if let Ok(neighbors) = geohash::neighbors(&key) {
            keys.extend([
                neighbors.n, neighbors.ne, neighbors.e, neighbors.se,
                neighbors.s, neighbors.sw, neighbors.w, neighbors.nw,
            ]);
        }

        let mut ids: Vec<PlaceId> = keys
            .iter()
            .filter_map(|k| self.buckets.get(k))
            .flatten()
            .copied()
            .collect();

        if radius_meters > 2000.0 {
            ids = self.places.keys().copied().collect();
        }
        ids
    }

    /// Finds places whose radius-plus-margin contains `center`, scored by
    /// proximity and by how well `arrival` matches the place's arrival-time
    /// histogram.
    pub fn search_nearby(&self, center: Point<f64>, arrival: DateTime<Utc>, margin_meters: f64) -> Vec<PlaceCandidate> {
        let mut out = Vec::new();
        for id in self.candidate_ids(center, margin_meters.max(200.0)) {
            let Some(place) = self.places.get(&id) else { continue };
            let distance = distance_between(place.center(), center, DistanceMetric::Haversine);
            if distance > place.radius_mean + margin_meters {
                continue;
            }
            let class = WeekdayClass::of(arrival);
            let bucket = crate::model::place::TimeOfDayHistogram::bucket_of(arrival);
            let time_weight = 1.0 + place.arrival_times.probability(class, bucket);
            let proximity = 1.0 / (1.0 + distance);
            out.push(PlaceCandidate { place_id: id, distance_meters: distance, score: proximity * time_weight });
        }
        out.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_nearby_finds_enclosing_place() {
        let mut engine = PlaceEngine::new();
        let place = Place::new(37.0, -122.0, 50.0);
        let id = place.id;
        engine.insert(place);

        let results = engine.search_nearby(Point::new(-122.0001, 37.0001), Utc::now(), 20.0);
        assert!(results.iter().any(|c| c.place_id == id));
    }

    #[test]
    fn search_nearby_excludes_far_places() {
        let mut engine = PlaceEngine::new();
        engine.insert(Place::new(37.0, -122.0, 20.0));

        let results = engine.search_nearby(Point::new(-120.0, 39.0), Utc::now(), 20.0);
        assert!(results.is_empty());
    }
}
