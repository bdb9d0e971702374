//! # Geographic Utilities
//!
//! Pure distance and speed math used by the recorder, the GPX codec and the
//! grid generator. Nothing in here holds state or fails: every function is total
//! over its domain and returns `0.0` for empty input.
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`haversine_distance`] | Great-circle distance between two lon/lat pairs |
//! | [`point_distance`] | Same, for two [`Coordinate`]s |
//! | [`total_distance`] | Length of a recorded track in meters |
//! | [`average_speed_kmh`] | Speed from meters and milliseconds |
//! | [`meters_to_degree_offsets`] | Latitude/longitude degree spans of a metric length |
//! | [`compute_bounds`] | Bounding box of a set of coordinates |
//!
//! ## Example
//!
//! ```rust
//! use route_recorder::geo_utils;
//!
//! // ~20 m east along the 52nd parallel
//! let d = geo_utils::haversine_distance(5.0, 52.0, 5.0003, 52.0);
//! assert!((d - 20.5).abs() < 1.0);
//! ```
//!
//! ## Earth model
//!
//! Distances assume a spherical Earth of radius [`EARTH_RADIUS_METERS`]. Degree
//! conversions use the equatorial length of one degree, [`METERS_PER_DEGREE`].

use geo::{BoundingRect, Coord, LineString};

use crate::{Bounds, Coordinate, RoutePoint};

/// Spherical Earth radius used for all distance math.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Length of one degree of latitude (and of longitude at the equator).
pub const METERS_PER_DEGREE: f64 = 111_320.0;

// =============================================================================
// Distance Functions
// =============================================================================

/// Great-circle distance in meters between `(lon1, lat1)` and `(lon2, lat2)`.
///
/// Symmetric, and zero for identical points.
///
/// ```rust
/// use route_recorder::geo_utils::haversine_distance;
///
/// let there = haversine_distance(-0.1278, 51.5074, 2.3522, 48.8566);
/// let back = haversine_distance(2.3522, 48.8566, -0.1278, 51.5074);
/// assert!((there - 343_500.0).abs() < 1_000.0); // London to Paris
/// assert_eq!(there, back);
/// ```
#[inline]
pub fn haversine_distance(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).max(0.0).sqrt());

    EARTH_RADIUS_METERS * c
}

/// Great-circle distance in meters between two coordinates.
#[inline]
pub fn point_distance(a: &Coordinate, b: &Coordinate) -> f64 {
    haversine_distance(a.longitude, a.latitude, b.longitude, b.latitude)
}

/// Total length of a track in meters.
///
/// Sums the haversine distance between consecutive points. Empty or single-point
/// tracks return 0.0.
pub fn total_distance(points: &[RoutePoint]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }

    points
        .windows(2)
        .map(|w| point_distance(&w[0].coordinates, &w[1].coordinates))
        .sum()
}

/// Average speed in km/h for a distance covered in a duration.
///
/// Returns 0.0 when the duration is zero or negative.
pub fn average_speed_kmh(distance_meters: f64, duration_ms: i64) -> f64 {
    if duration_ms <= 0 {
        return 0.0;
    }
    (distance_meters / 1000.0) / (duration_ms as f64 / 3_600_000.0)
}

// =============================================================================
// Degree Conversion
// =============================================================================

/// Convert a metric length into `(lat_offset, lon_offset)` degree spans at `latitude`.
///
/// The longitude span widens with `1 / cos(latitude)`; callers must keep the
/// latitude away from the poles.
#[inline]
pub fn meters_to_degree_offsets(meters: f64, latitude: f64) -> (f64, f64) {
    let lat_offset = meters / METERS_PER_DEGREE;
    let lon_offset = meters / (METERS_PER_DEGREE * latitude.to_radians().cos());
    (lat_offset, lon_offset)
}

// =============================================================================
// Bounding Box Functions
// =============================================================================

/// Bounding box of a set of coordinates, `None` when empty.
pub fn compute_bounds<'a, I>(coords: I) -> Option<Bounds>
where
    I: IntoIterator<Item = &'a Coordinate>,
{
    let line: LineString<f64> = coords.into_iter().map(|c| Coord::from(*c)).collect();
    line.bounding_rect().map(|rect| Bounds {
        min_lat: rect.min().y,
        max_lat: rect.max().y,
        min_lng: rect.min().x,
        max_lng: rect.max().x,
    })
}
