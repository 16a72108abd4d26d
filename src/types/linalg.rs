//! Linear algebra type system for the location filter
//!
//! Provides compile-time dimension checking and clean type aliases
//! for the constant-velocity Kalman filter.

use nalgebra::{SMatrix, SVector};

// ===== State Dimensions =====
pub const STATE_DIM: usize = 4; // [x, y, vx, vy]
pub const CONTROL_DIM: usize = 2; // [ax, ay]

// ===== Filter Types =====
pub type StateVec = SVector<f64, STATE_DIM>;
pub type StateMat = SMatrix<f64, STATE_DIM, STATE_DIM>;

// Control input (planar acceleration, east/north)
pub type ControlVec = SVector<f64, CONTROL_DIM>;
pub type ControlMat = SMatrix<f64, STATE_DIM, CONTROL_DIM>; // 4×2

// Measurement is a full state observation, so H, R, S and K are all 4×4
pub type MeasurementVec = StateVec;
pub type ObservationMat = StateMat;
pub type KalmanGain = StateMat;
