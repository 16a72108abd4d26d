//! Flat-Earth helpers for the local tangent plane.
//!
//! x points east, y points north, both in metres relative to an origin
//! latitude/longitude. Valid over the short ranges between two fixes.

pub const EARTH_RADIUS: f64 = 6_371_000.0; // meters

// Below this cos(lat) the east-west scale blows up (poles).
const MIN_COS_LAT: f64 = 1e-9;

/// Project `(lat, lon)` onto the plane centred at `(origin_lat, origin_lon)`.
pub fn latlon_to_meters(lat: f64, lon: f64, origin_lat: f64, origin_lon: f64) -> (f64, f64) {
    let d_lat = (lat - origin_lat).to_radians();
    let d_lon = (lon - origin_lon).to_radians();
    let x = EARTH_RADIUS * d_lon * origin_lat.to_radians().cos();
    let y = EARTH_RADIUS * d_lat;
    (x, y)
}

/// Inverse of [`latlon_to_meters`]. `None` when the result would not be
/// finite, e.g. at the poles.
pub fn meters_to_latlon(x: f64, y: f64, origin_lat: f64, origin_lon: f64) -> Option<(f64, f64)> {
    let cos_lat = origin_lat.to_radians().cos();
    if cos_lat.abs() < MIN_COS_LAT {
        return None;
    }
    let d_lat = y / EARTH_RADIUS;
    let d_lon = x / (EARTH_RADIUS * cos_lat);
    let lat = origin_lat + d_lat.to_degrees();
    let lon = origin_lon + d_lon.to_degrees();
    (lat.is_finite() && lon.is_finite()).then_some((lat, lon))
}

/// Planar velocity (east, north) for a speed and a compass bearing.
pub fn bearing_to_velocity(speed: f64, bearing_deg: f64) -> (f64, f64) {
    let bearing = bearing_deg.to_radians();
    (speed * bearing.sin(), speed * bearing.cos())
}

/// Compass bearing of a planar (east, north) vector, in `[0, 360)`.
pub fn velocity_to_bearing(vx: f64, vy: f64) -> f64 {
    wrap_degrees(90.0 - vy.atan2(vx).to_degrees())
}

/// Wrap any angle into `[0, 360)`.
pub fn wrap_degrees(deg: f64) -> f64 {
    let wrapped = deg.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Wrap an angle difference into `(-π, π]`.
pub fn wrap_pi(rad: f64) -> f64 {
    use std::f64::consts::PI;
    let wrapped = (rad + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped <= -PI {
        wrapped + 2.0 * PI
    } else {
        wrapped
    }
}
