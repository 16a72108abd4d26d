//! GPS-only estimator: dead-reckons between fixes on every
//! linear-acceleration sample.

use std::sync::Arc;

use log::{debug, info, warn};
use tokio::runtime::Handle;
use tokio::sync::broadcast::Receiver;
use tokio::task::JoinHandle;

use crate::filters::extrapolate;
use crate::source::{recv_latest, FusedLocationSource};
use crate::types::{InertialSample, PositionFix, SensorKind};

/// Pure state machine behind [`ExtrapolationEstimator`].
#[derive(Clone, Debug, Default)]
pub struct ExtrapolationCore {
    /// Last published estimate, or the fix it started from
    base: Option<PositionFix>,
    last_fix_timestamp: Option<f64>,
    samples_processed: u64,
}

impl ExtrapolationCore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new fix restarts dead reckoning from itself and is published as-is.
    pub fn on_fix(&mut self, fix: PositionFix) -> Option<PositionFix> {
        if !fix.is_finite() {
            warn!("[extrapolation] ignoring non-finite fix {fix:?}");
            return None;
        }
        if self.last_fix_timestamp == Some(fix.timestamp) {
            debug!("[extrapolation] repeated fix at t={}, nothing new", fix.timestamp);
            return None;
        }
        self.last_fix_timestamp = Some(fix.timestamp);
        self.base = Some(fix);
        Some(fix)
    }

    pub fn on_sample(&mut self, sample: &InertialSample) -> Option<PositionFix> {
        if sample.kind != SensorKind::LinearAcceleration {
            return None;
        }
        let base = self.base?;

        let dt = sample.timestamp - base.timestamp;
        let timestamp = sample.timestamp.max(base.timestamp);
        match extrapolate(&base, dt, timestamp) {
            Some(next) => {
                debug!(
                    "[extrapolation] dt={:.3}s -> lat={:.7} lon={:.7}",
                    dt.max(0.0),
                    next.latitude,
                    next.longitude
                );
                self.base = Some(next);
                self.samples_processed += 1;
                Some(next)
            }
            None => {
                warn!(
                    "[extrapolation] degenerate update at lat={:.5}, keeping previous estimate",
                    base.latitude
                );
                None
            }
        }
    }

    pub fn samples_processed(&self) -> u64 {
        self.samples_processed
    }
}

/// Background task wiring [`ExtrapolationCore`] to the sources.
#[derive(Debug)]
pub struct ExtrapolationEstimator {
    task: JoinHandle<()>,
}

impl ExtrapolationEstimator {
    pub fn spawn(
        handle: &Handle,
        fixes: Receiver<PositionFix>,
        samples: Receiver<InertialSample>,
        fused: Arc<FusedLocationSource>,
    ) -> Self {
        let task = handle.spawn(run(fixes, samples, fused));
        info!("[extrapolation] estimator started");
        Self { task }
    }

    pub fn shutdown(&self) {
        self.task.abort();
    }
}

async fn run(
    mut fixes: Receiver<PositionFix>,
    mut samples: Receiver<InertialSample>,
    fused: Arc<FusedLocationSource>,
) {
    let mut core = ExtrapolationCore::new();
    loop {
        // Fixes first so a fix and a sample arriving together pair correctly
        let update = tokio::select! {
            biased;
            fix = recv_latest(&mut fixes, "extrapolation/fix") => match fix {
                Some(fix) => core.on_fix(fix),
                None => break,
            },
            sample = recv_latest(&mut samples, "extrapolation/sensor") => match sample {
                Some(sample) => core.on_sample(&sample),
                None => break,
            },
        };
        if let Some(estimate) = update {
            fused.set(estimate);
        }
    }
    info!(
        "[extrapolation] estimator stopped after {} samples",
        core.samples_processed()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn fix(t: f64) -> PositionFix {
        PositionFix::new(t, 59.7, 17.8, 0.0, 10.0, 5.0)
    }

    fn accel(t: f64) -> InertialSample {
        InertialSample::new(t, SensorKind::LinearAcceleration, 0.0, 0.0, 0.0)
    }

    #[test]
    fn test_no_fix_no_output() {
        let mut core = ExtrapolationCore::new();
        assert!(core.on_sample(&accel(1.0)).is_none());
    }

    #[test]
    fn test_fix_published_unchanged() {
        let mut core = ExtrapolationCore::new();
        assert_eq!(core.on_fix(fix(0.0)), Some(fix(0.0)));
    }

    #[test]
    fn test_constant_velocity_north() {
        let mut core = ExtrapolationCore::new();
        core.on_fix(fix(0.0));
        let out = core.on_sample(&accel(1.0)).unwrap();
        assert_abs_diff_eq!(out.latitude, 59.70009, epsilon = 1e-6);
        assert_abs_diff_eq!(out.longitude, 17.8, epsilon = 1e-9);
        assert_eq!(out.timestamp, 1.0);
    }

    #[test]
    fn test_integrates_between_samples() {
        let mut core = ExtrapolationCore::new();
        core.on_fix(fix(0.0));
        core.on_sample(&accel(0.5));
        let out = core.on_sample(&accel(1.0)).unwrap();
        // Same 10 m as a single 1 s step
        assert_abs_diff_eq!(out.latitude, 59.70009, epsilon = 1e-6);
        assert_eq!(core.samples_processed(), 2);
    }

    #[test]
    fn test_repeated_sample_timestamp_is_idempotent() {
        let mut core = ExtrapolationCore::new();
        core.on_fix(fix(0.0));
        let a = core.on_sample(&accel(1.0)).unwrap();
        let b = core.on_sample(&accel(1.0)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_out_of_order_sample_does_not_move_backwards() {
        let mut core = ExtrapolationCore::new();
        core.on_fix(fix(0.0));
        let a = core.on_sample(&accel(1.0)).unwrap();
        let b = core.on_sample(&accel(0.5)).unwrap();
        assert_eq!(a.latitude, b.latitude);
        assert_eq!(b.timestamp, 1.0);
    }

    #[test]
    fn test_other_sensor_kinds_ignored() {
        let mut core = ExtrapolationCore::new();
        core.on_fix(fix(0.0));
        let gyro = InertialSample::new(1.0, SensorKind::Gyroscope, 0.0, 0.0, 1.0);
        assert!(core.on_sample(&gyro).is_none());
    }

    #[test]
    fn test_repeated_fix_ignored() {
        let mut core = ExtrapolationCore::new();
        core.on_fix(fix(0.0));
        core.on_sample(&accel(1.0));
        assert!(core.on_fix(fix(0.0)).is_none());
        // Still extrapolating from the last estimate, not the stale fix
        let out = core.on_sample(&accel(2.0)).unwrap();
        assert_abs_diff_eq!(out.latitude, 59.70018, epsilon = 1e-6);
    }

    #[test]
    fn test_polar_fix_skips_updates() {
        let mut core = ExtrapolationCore::new();
        core.on_fix(PositionFix::new(0.0, 90.0, 0.0, 90.0, 10.0, 5.0));
        assert!(core.on_sample(&accel(1.0)).is_none());
    }
}
