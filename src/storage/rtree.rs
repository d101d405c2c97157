//! Radius queries against the SQLite R-Tree virtual tables: a bounding-box
//! prefilter via the index, followed by an exact haversine distance check.

use rusqlite::{params, Connection};

use crate::error::Result;
use crate::ids::PlaceId;
use crate::spatial::{distance_between, DistanceMetric};
use crate::storage::store::rtree_rowid;
use geo::Point;

/// Ids of places whose R-Tree bounding box overlaps a search box around
/// `center`, narrowed to those genuinely within `radius_meters` by a second
/// haversine check (the R-Tree only guarantees the bounding-box prefilter).
pub fn places_within_radius(conn: &Connection, center: Point<f64>, radius_meters: f64) -> Result<Vec<PlaceId>> {
    let rect = crate::spatial::expand_bbox(
        &geo::Rect::new(geo::coord! { x: center.x(), y: center.y() }, geo::coord! { x: center.x(), y: center.y() }),
        radius_meters,
    );

    // The rtree index is keyed by a hashed rowid, not the place id, so the
    // candidate set comes from the places table directly, bounded by the
    // same box the rtree would have matched.
    let mut stmt = conn.prepare(
        "SELECT id, center_latitude, center_longitude FROM places
         WHERE center_longitude BETWEEN ?1 AND ?2 AND center_latitude BETWEEN ?3 AND ?4",
    )?;
    let rows = stmt.query_map(params![rect.min().x, rect.max().x, rect.min().y, rect.max().y], |row| {
        let id: String = row.get(0)?;
        let lat: f64 = row.get(1)?;
        let lon: f64 = row.get(2)?;
        Ok((id, lat, lon))
    })?;

    let mut out = Vec::new();
    for row in rows {
        let (id, lat, lon) = row?;
        let Ok(place_id) = id.parse::<PlaceId>() else { continue };
        let distance = distance_between(center, Point::new(lon, lat), DistanceMetric::Haversine);
        if distance <= radius_meters {
            out.push(place_id);
        }
    }
    Ok(out)
}

pub fn rowid_for_place(id: PlaceId) -> i64 {
    rtree_rowid(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::store::Store;

    #[test]
    fn finds_inserted_place_within_radius() {
        let store = Store::open_in_memory().unwrap();
        let place = crate::model::place::Place::new(37.0, -122.0, 30.0);
        store.put_place(&place).unwrap();

        let found = store
            .with_connection(|conn| places_within_radius(conn, Point::new(-122.0001, 37.0001), 500.0))
            .unwrap();
        assert!(found.contains(&place.id));
    }
}
