//! Dead reckoning between fixes.
//!
//! Advances a known position along its bearing at its speed. Bearing,
//! speed and accuracy are carried over unchanged.

use crate::geodesy::{bearing_to_velocity, EARTH_RADIUS};
use crate::types::PositionFix;

/// Dead-reckon `from` forward by `dt` seconds and stamp the result with
/// `timestamp`.
///
/// Negative `dt` is clamped to zero. Returns `None` when the result is not
/// finite (polar latitudes), in which case the caller keeps its prior value.
pub fn extrapolate(from: &PositionFix, dt: f64, timestamp: f64) -> Option<PositionFix> {
    let dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };

    // Displacement in meters
    let (vx, vy) = bearing_to_velocity(from.speed, from.bearing);
    let dx = vx * dt;
    let dy = vy * dt;

    let cos_lat = from.latitude.to_radians().cos();
    if cos_lat.abs() < 1e-9 {
        return None;
    }

    // To lat, lon
    let d_lat = (dy / EARTH_RADIUS).to_degrees();
    let d_lon = (dx / (EARTH_RADIUS * cos_lat)).to_degrees();

    let next = PositionFix {
        timestamp,
        latitude: from.latitude + d_lat,
        longitude: from.longitude + d_lon,
        ..*from
    };
    next.is_finite().then_some(next)
}
