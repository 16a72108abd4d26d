//! Heading-drift tracker.
//!
//! Turns the rotation-vector (or gyroscope) stream into incremental bearing
//! deltas. It owns only its own orientation cache; the caller applies the
//! delta to whatever bearing it keeps.

use nalgebra::{Quaternion, UnitQuaternion};

use crate::config::HeadingSource;
use crate::geodesy::{wrap_degrees, wrap_pi};
use crate::types::{InertialSample, SensorKind};

/// Compass azimuth (radians, clockwise from north, in `(-π, π]`) of the
/// device described by a rotation vector.
///
/// A missing scalar part is reconstructed from the unit-norm constraint.
/// Returns `None` for a degenerate quaternion.
pub fn azimuth_from_rotation_vector(x: f64, y: f64, z: f64, w: Option<f64>) -> Option<f64> {
    let w = w.unwrap_or_else(|| (1.0 - x * x - y * y - z * z).max(0.0).sqrt());
    let q = UnitQuaternion::try_new(Quaternion::new(w, x, y, z), 1e-9)?;
    let r = q.to_rotation_matrix();
    let m = r.matrix();
    let azimuth = m[(0, 1)].atan2(m[(1, 1)]);
    azimuth.is_finite().then_some(azimuth)
}

/// Add a heading delta to a bearing, result in `[0, 360)`.
pub fn apply_heading_delta(bearing_deg: f64, delta_deg: f64) -> f64 {
    wrap_degrees(bearing_deg + delta_deg)
}

#[derive(Clone, Debug)]
pub struct HeadingTracker {
    source: HeadingSource,
    last_azimuth: Option<f64>,
    last_gyro_timestamp: Option<f64>,
    updates: u64,
}

impl HeadingTracker {
    pub fn new(source: HeadingSource) -> Self {
        Self {
            source,
            last_azimuth: None,
            last_gyro_timestamp: None,
            updates: 0,
        }
    }

    /// Whether samples of `kind` drive this tracker.
    pub fn accepts(&self, kind: SensorKind) -> bool {
        matches!(
            (self.source, kind),
            (HeadingSource::RotationVector, SensorKind::RotationVector)
                | (HeadingSource::Gyroscope, SensorKind::Gyroscope)
        )
    }

    /// Feed one sample. Returns the bearing change in degrees
    /// (clockwise-positive) since the previous accepted sample, or `None`
    /// for the first sample, an ignored kind or a degenerate reading.
    pub fn update(&mut self, sample: &InertialSample) -> Option<f64> {
        if !self.accepts(sample.kind) {
            return None;
        }
        let delta = match self.source {
            HeadingSource::RotationVector => {
                let azimuth = azimuth_from_rotation_vector(sample.x, sample.y, sample.z, sample.w)?;
                let delta = self.last_azimuth.map(|prev| wrap_pi(azimuth - prev).to_degrees());
                self.last_azimuth = Some(azimuth);
                delta
            }
            HeadingSource::Gyroscope => {
                if !(sample.z.is_finite() && sample.timestamp.is_finite()) {
                    return None;
                }
                // Yaw rate is counter-clockwise positive around the up axis
                let delta = self
                    .last_gyro_timestamp
                    .map(|prev| (-sample.z * (sample.timestamp - prev).max(0.0)).to_degrees());
                self.last_gyro_timestamp = Some(sample.timestamp);
                delta
            }
        };
        if delta.is_some() {
            self.updates += 1;
        }
        delta
    }

    /// Forget the cached orientation; the next sample only primes the tracker.
    pub fn reset(&mut self) {
        self.last_azimuth = None;
        self.last_gyro_timestamp = None;
    }

    pub fn updates(&self) -> u64 {
        self.updates
    }
}
