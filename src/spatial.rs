//! Spatial operations and utilities leveraging the geo crate.
//!
//! This module wraps and extends the `geo` crate, making it easier to work
//! with geographic data across the sampling, place-matching and classifier
//! subsystems.

use crate::error::{LocomotionError, Result};
use geo::{
    BoundingRect, ChamberlainDuquetteArea, Contains, ConvexHull, Distance, Euclidean, Geodesic,
    GeodesicArea, Haversine, Intersects, Point, Polygon, Rect, Rhumb,
};

/// Distance metrics for spatial calculations.
///
/// Different metrics are appropriate for different use cases:
/// - **Haversine**: Fast spherical distance, good for most lon/lat calculations
/// - **Geodesic**: More accurate ellipsoidal distance (Karney 2013), slower
/// - **Rhumb**: Constant bearing distance, useful for navigation
/// - **Euclidean**: Planar distance, only for projected coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DistanceMetric {
    /// Haversine formula - assumes spherical Earth, fast and accurate enough for most uses
    #[default]
    Haversine,
    /// Geodesic distance using Karney (2013) - more accurate, accounts for Earth's ellipsoid
    Geodesic,
    /// Rhumb line (loxodrome) - maintains constant bearing
    Rhumb,
    /// Euclidean distance - for planar/projected coordinates only
    Euclidean,
}

/// Calculate the distance between two points using the specified metric, in
/// meters.
pub fn distance_between(point1: Point, point2: Point, metric: DistanceMetric) -> f64 {
    match metric {
        DistanceMetric::Haversine => Haversine.distance(point1, point2),
        DistanceMetric::Geodesic => Geodesic.distance(point1, point2),
        DistanceMetric::Rhumb => Rhumb.distance(point1, point2),
        DistanceMetric::Euclidean => Euclidean.distance(point1, point2),
    }
}

/// Find the K nearest neighbors from a set of points. Brute-force; callers
/// with a large candidate set should pre-filter with a spatial index first.
pub fn knn<T: Clone>(center: &Point, points: &[(Point, T)], k: usize, metric: DistanceMetric) -> Vec<(Point, f64, T)> {
    let mut distances: Vec<(Point, f64, T)> = points
        .iter()
        .map(|(pt, data)| (*pt, distance_between(*center, *pt, metric), data.clone()))
        .collect();

    distances.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    distances.into_iter().take(k).collect()
}

/// Create a bounding box (Rect) from min/max coordinates.
pub fn bounding_box(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Result<Rect> {
    if min_lon > max_lon {
        return Err(LocomotionError::InvalidInput(format!(
            "min_lon ({min_lon}) must be <= max_lon ({max_lon})"
        )));
    }
    if min_lat > max_lat {
        return Err(LocomotionError::InvalidInput(format!(
            "min_lat ({min_lat}) must be <= max_lat ({max_lat})"
        )));
    }

    Ok(Rect::new(
        geo::coord! { x: min_lon, y: min_lat },
        geo::coord! { x: max_lon, y: max_lat },
    ))
}

pub fn point_in_polygon(polygon: &Polygon, point: &Point) -> bool {
    polygon.contains(point)
}

pub fn point_in_bbox(bbox: &Rect, point: &Point) -> bool {
    bbox.contains(point)
}

/// Area of a polygon in square meters, via the Chamberlain-Duquette
/// spherical approximation.
pub fn polygon_area(polygon: &Polygon) -> f64 {
    polygon.chamberlain_duquette_unsigned_area()
}

/// Area of a polygon in square meters, via Karney (2013) geodesic area.
pub fn geodesic_polygon_area(polygon: &Polygon) -> f64 {
    polygon.geodesic_area_unsigned()
}

pub fn convex_hull(points: &[Point]) -> Option<Polygon> {
    if points.is_empty() {
        return None;
    }
    let multi_point = geo::MultiPoint::new(points.to_vec());
    Some(multi_point.convex_hull())
}

pub fn bounding_rect_for_points(points: &[Point]) -> Option<Rect> {
    if points.is_empty() {
        return None;
    }
    let multi_point = geo::MultiPoint::new(points.to_vec());
    multi_point.bounding_rect()
}

pub fn bboxes_intersect(bbox1: &Rect, bbox2: &Rect) -> bool {
    bbox1.intersects(bbox2)
}

/// Expand a bounding box by a distance in meters (approximation: 1 degree ~
/// 111km at the equator, longitude scaled by the box's mean latitude).
pub fn expand_bbox(bbox: &Rect, distance_meters: f64) -> Rect {
    let lat_offset = distance_meters / 111_000.0;
    let avg_lat = (bbox.min().y + bbox.max().y) / 2.0;
    let lon_offset = distance_meters / (111_000.0 * avg_lat.to_radians().cos());

    Rect::new(
        geo::coord! { x: bbox.min().x - lon_offset, y: bbox.min().y - lat_offset },
        geo::coord! { x: bbox.max().x + lon_offset, y: bbox.max().y + lat_offset },
    )
}

/// Perpendicular distance, in meters, from `point` to the segment `a`-`b`,
/// via a local planar projection centred on `a` (the same degrees-to-meters
/// approximation [`expand_bbox`] uses). Good enough for simplification
/// decisions over the short segments a single trip covers.
pub fn point_to_segment_distance(point: Point, a: Point, b: Point) -> f64 {
    let meters_per_lat = 111_320.0;
    let meters_per_lon = 111_320.0 * a.y().to_radians().cos();
    let to_xy = |p: Point| ((p.x() - a.x()) * meters_per_lon, (p.y() - a.y()) * meters_per_lat);

    let (bx, by) = to_xy(b);
    let (px, py) = to_xy(point);

    let len_sq = bx * bx + by * by;
    if len_sq < 1e-9 {
        return (px * px + py * py).sqrt();
    }
    let t = ((px * bx + py * by) / len_sq).clamp(0.0, 1.0);
    let (proj_x, proj_y) = (t * bx, t * by);
    ((px - proj_x).powi(2) + (py - proj_y).powi(2)).sqrt()
}

/// Douglas-Peucker polyline simplification. Returns the indices into
/// `points` to keep, ascending, always including the first and last.
pub fn douglas_peucker_indices(points: &[Point], epsilon_meters: f64) -> Vec<usize> {
    if points.len() < 3 {
        return (0..points.len()).collect();
    }

    fn simplify(points: &[Point], start: usize, end: usize, epsilon: f64, keep: &mut [bool]) {
        if end <= start + 1 {
            return;
        }
        let (mut farthest_index, mut farthest_dist) = (start, 0.0);
        for i in start + 1..end {
            let d = point_to_segment_distance(points[i], points[start], points[end]);
            if d > farthest_dist {
                farthest_dist = d;
                farthest_index = i;
            }
        }
        if farthest_dist > epsilon {
            keep[farthest_index] = true;
            simplify(points, start, farthest_index, epsilon, keep);
            simplify(points, farthest_index, end, epsilon, keep);
        }
    }

    let mut keep = vec![false; points.len()];
    keep[0] = true;
    *keep.last_mut().unwrap() = true;
    simplify(points, 0, points.len() - 1, epsilon_meters, &mut keep);
    keep.into_iter().enumerate().filter_map(|(i, k)| k.then_some(i)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_between_nyc_and_la() {
        let p1 = Point::new(-74.0060, 40.7128);
        let p2 = Point::new(-118.2437, 34.0522);

        let dist_haversine = distance_between(p1, p2, DistanceMetric::Haversine);
        let dist_geodesic = distance_between(p1, p2, DistanceMetric::Geodesic);

        assert!(dist_haversine > 3_900_000.0 && dist_haversine < 4_000_000.0);
        assert!((dist_haversine - dist_geodesic).abs() < 10_000.0);
    }

    #[test]
    fn knn_excludes_far_points() {
        let center = Point::new(-74.0060, 40.7128);
        let candidates = vec![
            (Point::new(-73.9442, 40.6782), "Brooklyn"),
            (Point::new(-73.9356, 40.7306), "Queens"),
            (Point::new(-118.2437, 34.0522), "LA"),
            (Point::new(-73.9712, 40.7831), "Upper West Side"),
        ];

        let nearest = knn(&center, &candidates, 2, DistanceMetric::Haversine);
        assert_eq!(nearest.len(), 2);
        assert_ne!(nearest[0].2, "LA");
        assert_ne!(nearest[1].2, "LA");
    }

    #[test]
    fn bounding_box_rejects_inverted_bounds() {
        assert!(bounding_box(-73.9, 40.7, -74.0, 40.8).is_err());
    }

    #[test]
    fn point_in_bbox_checks_containment() {
        let bbox = bounding_box(-74.0, 40.7, -73.9, 40.8).unwrap();
        assert!(point_in_bbox(&bbox, &Point::new(-73.95, 40.75)));
        assert!(!point_in_bbox(&bbox, &Point::new(-73.85, 40.75)));
    }

    #[test]
    fn bboxes_intersect_detects_overlap() {
        let bbox1 = bounding_box(-74.0, 40.7, -73.9, 40.8).unwrap();
        let bbox2 = bounding_box(-73.95, 40.75, -73.85, 40.85).unwrap();
        let bbox3 = bounding_box(-73.0, 40.0, -72.9, 40.1).unwrap();

        assert!(bboxes_intersect(&bbox1, &bbox2));
        assert!(!bboxes_intersect(&bbox1, &bbox3));
    }

    #[test]
    fn point_to_segment_distance_is_zero_on_the_line() {
        let a = Point::new(-122.0, 37.0);
        let b = Point::new(-122.0, 37.01);
        let midpoint = Point::new(-122.0, 37.005);
        assert!(point_to_segment_distance(midpoint, a, b) < 1.0);
    }

    #[test]
    fn douglas_peucker_drops_nearly_collinear_points() {
        let points = vec![
            Point::new(-122.0, 37.0),
            Point::new(-122.0, 37.0005),
            Point::new(-122.0, 37.001),
        ];
        let kept = douglas_peucker_indices(&points, 5.0);
        assert_eq!(kept, vec![0, 2]);
    }

    #[test]
    fn douglas_peucker_keeps_a_sharp_detour() {
        let points = vec![
            Point::new(-122.0, 37.0),
            Point::new(-121.95, 37.05),
            Point::new(-122.0, 37.001),
        ];
        let kept = douglas_peucker_indices(&points, 5.0);
        assert_eq!(kept, vec![0, 1, 2]);
    }

    #[test]
    fn expand_bbox_grows_in_all_directions() {
        let bbox = bounding_box(-74.0, 40.7, -73.9, 40.8).unwrap();
        let expanded = expand_bbox(&bbox, 1000.0);
        assert!(expanded.min().x < bbox.min().x);
        assert!(expanded.min().y < bbox.min().y);
        assert!(expanded.max().x > bbox.max().x);
        assert!(expanded.max().y > bbox.max().y);
    }
}
