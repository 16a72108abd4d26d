use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

// ─── Estimator selection ─────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorKind {
    /// GPS only, dead-reckoned between fixes
    Extrapolation,
    /// GPS + linear acceleration Kalman filter with heading correction
    Fused,
}

impl EstimatorKind {
    pub fn default_interval(self) -> Duration {
        match self {
            EstimatorKind::Extrapolation => Duration::from_millis(1000),
            EstimatorKind::Fused => Duration::from_millis(20),
        }
    }
}

/// Which inertial stream drives heading-drift correction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeadingSource {
    RotationVector,
    Gyroscope,
}

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct KalmanConfig {
    /// Assumed acceleration variance σa² for the process noise [m²/s⁴]
    pub accel_variance: f64,
    /// Fixes older than this are not used for correction [s]
    pub stale_fix_secs: f64,
    /// Position measurement variance growth per second of fix age [m²/s]
    pub position_variance_per_sec: f64,
    /// Floor for the position measurement variance [m²]
    pub min_position_variance: f64,
    /// Velocity measurement variance [m²/s²]
    pub velocity_variance: f64,
    /// Diagonal of the covariance prior at seeding
    pub initial_covariance: f64,
    pub heading_source: HeadingSource,
}

impl Default for KalmanConfig {
    fn default() -> Self {
        Self {
            accel_variance: 0.1,
            stale_fix_secs: 1.5,
            position_variance_per_sec: 1.0,
            min_position_variance: 0.001,
            velocity_variance: 0.5,
            initial_covariance: 0.1,
            heading_source: HeadingSource::RotationVector,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub estimator: EstimatorKind,
    /// Sample-and-hold period of the fused stream; `None` picks the
    /// estimator's default.
    pub fused_interval_ms: Option<u64>,
    /// Broadcast slot size of every source
    pub channel_capacity: usize,
    /// Fused mode ignores fixes with a worse accuracy than this [m]
    pub max_fix_accuracy_m: f64,
    pub kalman: KalmanConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            estimator: EstimatorKind::Fused,
            fused_interval_ms: None,
            channel_capacity: 16,
            max_fix_accuracy_m: 20.0,
            kalman: KalmanConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn extrapolation() -> Self {
        Self {
            estimator: EstimatorKind::Extrapolation,
            ..Self::default()
        }
    }

    pub fn fused() -> Self {
        Self::default()
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn fused_interval(&self) -> Duration {
        self.fused_interval_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.estimator.default_interval())
    }

    pub fn validate(&self) -> Result<()> {
        if self.fused_interval_ms == Some(0) {
            return Err(invalid("fused_interval_ms must be > 0"));
        }
        if self.channel_capacity == 0 {
            return Err(invalid("channel_capacity must be > 0"));
        }
        if !(self.max_fix_accuracy_m > 0.0) {
            return Err(invalid("max_fix_accuracy_m must be > 0"));
        }

        let k = &self.kalman;
        let positive = [
            ("kalman.accel_variance", k.accel_variance),
            ("kalman.stale_fix_secs", k.stale_fix_secs),
            ("kalman.min_position_variance", k.min_position_variance),
            ("kalman.velocity_variance", k.velocity_variance),
            ("kalman.initial_covariance", k.initial_covariance),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(invalid(&format!("{name} must be finite and > 0, got {value}")));
            }
        }
        if !(k.position_variance_per_sec.is_finite() && k.position_variance_per_sec >= 0.0) {
            return Err(invalid("kalman.position_variance_per_sec must be finite and >= 0"));
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> EngineError {
    EngineError::InvalidConfig(msg.to_string())
}
