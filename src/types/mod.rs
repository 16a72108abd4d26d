pub mod linalg;

pub use linalg::*;

use serde::{Deserialize, Serialize};

/// Absolute position fix (GPS or the fused estimate, same shape).
///
/// A missing fix is always `Option::None`; every `PositionFix` value that
/// exists carries meaningful fields.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    /// Seconds, monotonic per stream
    pub timestamp: f64,
    pub latitude: f64,
    pub longitude: f64,
    /// Degrees, 0 = north, clockwise-positive
    pub bearing: f64,
    /// m/s
    pub speed: f64,
    /// Metres, smaller is better
    pub accuracy: f64,
}

impl PositionFix {
    pub fn new(
        timestamp: f64,
        latitude: f64,
        longitude: f64,
        bearing: f64,
        speed: f64,
        accuracy: f64,
    ) -> Self {
        Self {
            timestamp,
            latitude,
            longitude,
            bearing,
            speed,
            accuracy,
        }
    }

    /// True when every field is a finite number.
    pub fn is_finite(&self) -> bool {
        self.timestamp.is_finite()
            && self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.bearing.is_finite()
            && self.speed.is_finite()
            && self.accuracy.is_finite()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Accelerometer,
    Gyroscope,
    Gravity,
    LinearAcceleration,
    RotationVector,
}

/// Inertial sample from the device IMU.
///
/// Axis values are in the sensor's native units: m/s² for acceleration,
/// rad/s for the gyroscope, unit-quaternion components for the rotation
/// vector (with `w` as the optional scalar part).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct InertialSample {
    pub timestamp: f64,
    pub kind: SensorKind,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: Option<f64>,
}

impl InertialSample {
    pub fn new(timestamp: f64, kind: SensorKind, x: f64, y: f64, z: f64) -> Self {
        Self {
            timestamp,
            kind,
            x,
            y,
            z,
            w: None,
        }
    }

    pub fn rotation_vector(timestamp: f64, x: f64, y: f64, z: f64, w: f64) -> Self {
        Self {
            timestamp,
            kind: SensorKind::RotationVector,
            x,
            y,
            z,
            w: Some(w),
        }
    }
}
