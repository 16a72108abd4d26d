//! Constant-velocity linear Kalman filter on a local tangent plane
//!
//! State Vector (4D):
//! [0-1]: Position (x = East, y = North) relative to the plane origin (meters)
//! [2-3]: Velocity (vx, vy) (m/s)
//!
//! The plane origin is re-centred on every accepted fix. Control input is the
//! planar acceleration rotated out of the IMU frame with the current bearing.
//! Heading is NOT part of the state: the published bearing always comes from
//! the measurement source (GPS or heading-corrected fused estimate).

use nalgebra::Matrix4;

use crate::config::KalmanConfig;
use crate::geodesy::{bearing_to_velocity, latlon_to_meters, meters_to_latlon};
use crate::types::{
    ControlMat, ControlVec, KalmanGain, MeasurementVec, ObservationMat, PositionFix, StateMat,
    StateVec,
};

/// A full-state observation and how old the underlying fix is.
#[derive(Clone, Copy, Debug)]
pub struct Measurement {
    pub z: MeasurementVec,
    /// Seconds between the fix and the cycle's event time
    pub age_secs: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// Predict and correct both applied
    Corrected,
    /// Predict only (no measurement, or measurement too old)
    Predicted,
    /// Innovation covariance was singular, prediction kept
    SingularInnovation,
    /// Result was not finite, prior state kept untouched
    Rejected,
}

#[derive(Clone, Debug)]
pub struct ConstantVelocityKalman {
    state: StateVec,
    covariance: StateMat,
    /// (lat, lon) of the plane centre
    origin: (f64, f64),
    config: KalmanConfig,
    step_count: u64,
    correction_count: u64,
}

impl ConstantVelocityKalman {
    /// Seed the filter directly from a fix: position at the plane origin,
    /// velocity from speed/bearing, moderate diagonal prior.
    pub fn seed(fix: &PositionFix, config: &KalmanConfig) -> Self {
        let (vx, vy) = bearing_to_velocity(fix.speed, fix.bearing);
        Self {
            state: StateVec::new(0.0, 0.0, vx, vy),
            covariance: StateMat::identity() * config.initial_covariance,
            origin: (fix.latitude, fix.longitude),
            config: config.clone(),
            step_count: 0,
            correction_count: 0,
        }
    }

    pub fn state(&self) -> &StateVec {
        &self.state
    }

    pub fn covariance(&self) -> &StateMat {
        &self.covariance
    }

    pub fn covariance_trace(&self) -> f64 {
        self.covariance.trace()
    }

    pub fn origin(&self) -> (f64, f64) {
        self.origin
    }

    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    pub fn correction_count(&self) -> u64 {
        self.correction_count
    }

    /// Move the plane centre to `(lat, lon)` keeping the absolute position.
    ///
    /// Returns false (and changes nothing) if the conversion is degenerate.
    pub fn recenter(&mut self, lat: f64, lon: f64) -> bool {
        let Some((abs_lat, abs_lon)) =
            meters_to_latlon(self.state[0], self.state[1], self.origin.0, self.origin.1)
        else {
            return false;
        };
        let (x, y) = latlon_to_meters(abs_lat, abs_lon, lat, lon);
        if !(x.is_finite() && y.is_finite()) {
            return false;
        }
        self.state[0] = x;
        self.state[1] = y;
        self.origin = (lat, lon);
        true
    }

    /// Express a fix in the filter's current plane.
    pub fn measurement_from_fix(&self, fix: &PositionFix, age_secs: f64) -> Measurement {
        let (x, y) = latlon_to_meters(fix.latitude, fix.longitude, self.origin.0, self.origin.1);
        let (vx, vy) = bearing_to_velocity(fix.speed, fix.bearing);
        Measurement {
            z: MeasurementVec::new(x, y, vx, vy),
            age_secs,
        }
    }

    fn build_transition(dt: f64) -> StateMat {
        Matrix4::new(
            1.0, 0.0, dt, 0.0, //
            0.0, 1.0, 0.0, dt, //
            0.0, 0.0, 1.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        )
    }

    fn build_control(dt: f64) -> ControlMat {
        let half_dt2 = 0.5 * dt * dt;
        ControlMat::new(
            half_dt2, 0.0, //
            0.0, half_dt2, //
            dt, 0.0, //
            0.0, dt,
        )
    }

    fn build_process_noise(dt: f64, accel_variance: f64) -> StateMat {
        let q_pos = dt.powi(4) * accel_variance / 4.0;
        let q_cross = dt.powi(3) * accel_variance / 2.0;
        let q_vel = dt.powi(2) * accel_variance;
        Matrix4::new(
            q_pos, 0.0, q_cross, 0.0, //
            0.0, q_pos, 0.0, q_cross, //
            q_cross, 0.0, q_vel, 0.0, //
            0.0, q_cross, 0.0, q_vel,
        )
    }

    /// Identity for a fresh fix, zero (predict only) for a stale one.
    fn observation_matrix(&self, age_secs: f64) -> ObservationMat {
        if age_secs > self.config.stale_fix_secs {
            ObservationMat::zeros()
        } else {
            ObservationMat::identity()
        }
    }

    /// Position variance grows with fix age, velocity variance is fixed.
    fn measurement_noise(&self, age_secs: f64) -> StateMat {
        let pos_var = (self.config.position_variance_per_sec * age_secs.max(0.0))
            .max(self.config.min_position_variance);
        let vel_var = self.config.velocity_variance;
        StateMat::from_diagonal(&StateVec::new(pos_var, pos_var, vel_var, vel_var))
    }

    /// Time update: `x' = A·x + B·u`, `P' = A·P·Aᵗ + Q`.
    pub fn predict(&self, dt: f64, control: &ControlVec) -> (StateVec, StateMat) {
        let a = Self::build_transition(dt);
        let b = Self::build_control(dt);
        let q = Self::build_process_noise(dt, self.config.accel_variance);

        let x_pred = a * self.state + b * control;
        let p_pred = a * self.covariance * a.transpose() + q;
        (x_pred, p_pred)
    }

    /// Run one predict/correct cycle. Negative `dt` is clamped to zero.
    ///
    /// The state is only committed when every entry stays finite.
    pub fn step(
        &mut self,
        dt: f64,
        control: &ControlVec,
        measurement: Option<&Measurement>,
    ) -> StepOutcome {
        let dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };
        let (x_pred, p_pred) = self.predict(dt, control);

        let (x_new, p_new, outcome) = match measurement {
            Some(m) => {
                let h = self.observation_matrix(m.age_secs);
                let r = self.measurement_noise(m.age_secs);
                let observed = h != ObservationMat::zeros();
                match correct(&x_pred, &p_pred, &m.z, &h, &r) {
                    Some((x, p)) if observed => (x, p, StepOutcome::Corrected),
                    Some(_) => (x_pred, p_pred, StepOutcome::Predicted),
                    None => (x_pred, p_pred, StepOutcome::SingularInnovation),
                }
            }
            None => (x_pred, p_pred, StepOutcome::Predicted),
        };

        if !(x_new.iter().all(|v| v.is_finite()) && p_new.iter().all(|v| v.is_finite())) {
            return StepOutcome::Rejected;
        }

        self.state = x_new;
        self.covariance = p_new;
        self.step_count += 1;
        if outcome == StepOutcome::Corrected {
            self.correction_count += 1;
        }
        outcome
    }

    /// Convert the state back to a geographic estimate.
    ///
    /// `bearing` is supplied by the caller; the filter's velocity direction
    /// is never published as heading.
    pub fn to_fix(&self, timestamp: f64, bearing: f64) -> Option<PositionFix> {
        let (lat, lon) = meters_to_latlon(self.state[0], self.state[1], self.origin.0, self.origin.1)?;
        let speed = self.state[2].hypot(self.state[3]);
        let accuracy = (self.covariance[(0, 0)] + self.covariance[(1, 1)]).max(0.0).sqrt();
        let fix = PositionFix::new(timestamp, lat, lon, bearing, speed, accuracy);
        fix.is_finite().then_some(fix)
    }
}

/// Measurement update.
///
/// `y = z − H·x'`, `S = H·P'·Hᵗ + R`, `K = P'·Hᵗ·S⁻¹`,
/// `x = x' + K·y`, `P = P' − K·H·P'`. Returns `None` for a singular `S`.
pub(crate) fn correct(
    x_pred: &StateVec,
    p_pred: &StateMat,
    z: &MeasurementVec,
    h: &ObservationMat,
    r: &StateMat,
) -> Option<(StateVec, StateMat)> {
    let h_t = h.transpose();
    let innovation = z - h * x_pred;
    let s = h * p_pred * h_t + r;
    let s_inv = s.try_inverse()?;
    let k: KalmanGain = p_pred * h_t * s_inv;

    let x = x_pred + k * innovation;
    let p = p_pred - k * h * p_pred;
    // Keep P symmetric against round-off
    let p = (p + p.transpose()) * 0.5;
    Some((x, p))
}

/// Planar acceleration (east, north) from a linear-acceleration sample.
///
/// The device's forward axis is −z; it is rotated onto the plane with the
/// current bearing.
pub fn control_from_accel(forward_neg_z: f64, bearing_deg: f64) -> ControlVec {
    let bearing = bearing_deg.to_radians();
    ControlVec::new(-forward_neg_z * bearing.sin(), -forward_neg_z * bearing.cos())
}
