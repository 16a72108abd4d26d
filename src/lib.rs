//! GPS + inertial location fusion.
//!
//! Absolute fixes and inertial samples are fed into a [`LocationEngine`],
//! which runs one of two estimators in the background and publishes fused
//! position estimates:
//!
//! - [`EstimatorKind::Extrapolation`]: dead reckoning from the last fix at
//!   its reported speed and bearing.
//! - [`EstimatorKind::Fused`]: constant-velocity Kalman filter driven by
//!   linear acceleration, with heading-drift correction from a rotation
//!   vector or gyroscope.

pub mod config;
pub mod engine;
pub mod error;
pub mod estimator;
pub mod filters;
pub mod geodesy;
pub mod source;
pub mod throttle;
pub mod types;

pub use config::{EngineConfig, EstimatorKind, HeadingSource, KalmanConfig};
pub use engine::LocationEngine;
pub use error::{EngineError, Result};
pub use source::{FusedLocationSource, LocationSource, SensorSource, Source};
pub use types::{InertialSample, PositionFix, SensorKind};
