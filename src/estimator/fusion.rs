// fusion.rs — GPS + linear acceleration Kalman estimator with heading correction
//
// Two long-lived tasks feed one `FusionCore`:
//   - position task: combine-latest of fixes and linear-acceleration samples,
//     runs the constant-velocity Kalman cycle against the freshest estimate
//   - heading task: rotation-vector (or gyroscope) samples, nudges only the
//     bearing of the fused estimate
//
// Both tasks lock the same mutex for the whole read → compute → publish step,
// so the core is the single writer of the fused source.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};
use tokio::runtime::Handle;
use tokio::sync::broadcast::Receiver;
use tokio::task::JoinHandle;

use crate::config::{EngineConfig, KalmanConfig};
use crate::filters::heading::{apply_heading_delta, HeadingTracker};
use crate::filters::kalman::{control_from_accel, ConstantVelocityKalman, StepOutcome};
use crate::source::{recv_latest, FusedLocationSource};
use crate::types::{ControlVec, InertialSample, PositionFix, SensorKind};

// ─── Pure core ───────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct FusionCore {
    config: KalmanConfig,
    max_fix_accuracy: f64,

    /// `None` until the first accepted fix
    filter: Option<ConstantVelocityKalman>,
    /// Last accepted fix (bearing follows heading corrections)
    cached_fix: Option<PositionFix>,
    latest_accel: Option<InertialSample>,
    heading: HeadingTracker,
    /// Event time of the last Kalman cycle
    last_update: f64,
    last_fused: Option<PositionFix>,

    fixes_accepted: u64,
    fixes_rejected: u64,
}

impl FusionCore {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            config: config.kalman.clone(),
            max_fix_accuracy: config.max_fix_accuracy_m,
            filter: None,
            cached_fix: None,
            latest_accel: None,
            heading: HeadingTracker::new(config.kalman.heading_source),
            last_update: f64::NEG_INFINITY,
            last_fused: None,
            fixes_accepted: 0,
            fixes_rejected: 0,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.filter.is_some()
    }

    pub fn filter(&self) -> Option<&ConstantVelocityKalman> {
        self.filter.as_ref()
    }

    pub fn last_fused(&self) -> Option<PositionFix> {
        self.last_fused
    }

    pub fn fixes_accepted(&self) -> u64 {
        self.fixes_accepted
    }

    pub fn fixes_rejected(&self) -> u64 {
        self.fixes_rejected
    }

    pub fn accepts_heading(&self, kind: SensorKind) -> bool {
        self.heading.accepts(kind)
    }

    /// Handle a new absolute fix. Returns the estimate to publish, if any.
    pub fn on_fix(&mut self, fix: PositionFix) -> Option<PositionFix> {
        if !fix.is_finite() {
            warn!("[fusion] ignoring non-finite fix {fix:?}");
            self.fixes_rejected += 1;
            return None;
        }
        if fix.accuracy > self.max_fix_accuracy {
            debug!(
                "[fusion] fix accuracy {:.1} m worse than {:.1} m, ignored",
                fix.accuracy, self.max_fix_accuracy
            );
            self.fixes_rejected += 1;
            return None;
        }

        if self.filter.is_none() {
            self.filter = Some(ConstantVelocityKalman::seed(&fix, &self.config));
            self.cached_fix = Some(fix);
            self.last_update = fix.timestamp;
            self.last_fused = Some(fix);
            self.fixes_accepted += 1;
            info!(
                "[fusion] filter seeded at lat={:.6} lon={:.6}",
                fix.latitude, fix.longitude
            );
            return Some(fix);
        }

        if self.cached_fix.map(|c| c.timestamp) == Some(fix.timestamp) {
            // No new absolute information
            debug!("[fusion] repeated fix at t={}, predict only", fix.timestamp);
            return self.predict_only(fix.timestamp);
        }

        let event_time = fix.timestamp.max(self.last_update);
        let dt = fix.timestamp - self.last_update;
        let age = event_time - fix.timestamp;
        let control = self.control(fix.bearing);

        let filter = self.filter.as_ref()?;
        let mut next = filter.clone();
        if !next.recenter(fix.latitude, fix.longitude) {
            warn!("[fusion] cannot re-centre plane at lat={:.5}, fix skipped", fix.latitude);
            self.fixes_rejected += 1;
            return None;
        }
        let measurement = next.measurement_from_fix(&fix, age);
        let outcome = next.step(dt, &control, Some(&measurement));

        // Fix is consumed even if the correction was skipped
        self.cached_fix = Some(fix);
        self.fixes_accepted += 1;
        match outcome {
            StepOutcome::Corrected => {}
            StepOutcome::Predicted => debug!("[fusion] fix {:.2}s old is stale, predict only", age),
            StepOutcome::SingularInnovation => {
                warn!("[fusion] singular innovation covariance, correction skipped")
            }
            StepOutcome::Rejected => {
                warn!("[fusion] non-finite filter state after fix, update skipped");
                return None;
            }
        }
        self.commit(next, event_time, fix.bearing)
    }

    /// Handle a linear-acceleration sample: one Kalman cycle measured
    /// against the last fused estimate. Corrects while the cached fix is
    /// fresh, predicts only once it is stale.
    pub fn on_accel(&mut self, sample: InertialSample) -> Option<PositionFix> {
        if sample.kind != SensorKind::LinearAcceleration {
            return None;
        }
        if !(sample.timestamp.is_finite() && sample.z.is_finite()) {
            warn!("[fusion] ignoring non-finite sample {sample:?}");
            return None;
        }
        self.latest_accel = Some(sample);
        if self.filter.is_none() {
            debug!("[fusion] skipping state update as state not initialized yet");
            return None;
        }
        self.sample_cycle(sample.timestamp)
    }

    /// Handle a heading sample: adjust only the bearing of the fused
    /// estimate and of the cached fix.
    pub fn on_heading(&mut self, sample: InertialSample) -> Option<PositionFix> {
        let mut fused = self.last_fused?;
        let delta = self.heading.update(&sample)?;

        fused.bearing = apply_heading_delta(fused.bearing, delta);
        if let Some(cached) = self.cached_fix.as_mut() {
            cached.bearing = apply_heading_delta(cached.bearing, delta);
        }
        debug!("[fusion] heading delta {:+.3}° -> bearing {:.2}°", delta, fused.bearing);
        self.last_fused = Some(fused);
        Some(fused)
    }

    /// Sample cycle. The fused estimate is the measurement (its bearing
    /// carries heading corrections), aged by the time since the cached fix.
    fn sample_cycle(&mut self, timestamp: f64) -> Option<PositionFix> {
        let source = self.last_fused.or(self.cached_fix)?;
        let cached = self.cached_fix?;
        let event_time = timestamp.max(self.last_update);
        let dt = timestamp - self.last_update;
        let since_fix = event_time - cached.timestamp;

        let control = self.control(source.bearing);
        let mut next = self.filter.as_ref()?.clone();
        let measurement = next.measurement_from_fix(&source, since_fix);
        match next.step(dt, &control, Some(&measurement)) {
            StepOutcome::Corrected => {}
            StepOutcome::Predicted => {
                debug!("[fusion] no fix for {:.2}s, dead reckoning on the filter", since_fix)
            }
            StepOutcome::SingularInnovation => {
                warn!("[fusion] singular innovation covariance, correction skipped")
            }
            StepOutcome::Rejected => {
                warn!("[fusion] non-finite filter state, sample skipped");
                return None;
            }
        }
        self.commit(next, event_time, source.bearing)
    }

    /// Repeated fix: predict only, bearing from the last fused estimate.
    fn predict_only(&mut self, timestamp: f64) -> Option<PositionFix> {
        let source = self.last_fused.or(self.cached_fix)?;
        let event_time = timestamp.max(self.last_update);
        let dt = timestamp - self.last_update;

        let control = self.control(source.bearing);
        let mut next = self.filter.as_ref()?.clone();
        if next.step(dt, &control, None) == StepOutcome::Rejected {
            warn!("[fusion] non-finite filter state, sample skipped");
            return None;
        }
        self.commit(next, event_time, source.bearing)
    }

    fn control(&self, bearing: f64) -> ControlVec {
        self.latest_accel
            .map(|a| control_from_accel(a.z, bearing))
            .unwrap_or_else(ControlVec::zeros)
    }

    fn commit(
        &mut self,
        next: ConstantVelocityKalman,
        event_time: f64,
        bearing: f64,
    ) -> Option<PositionFix> {
        let Some(estimate) = next.to_fix(event_time, bearing) else {
            warn!("[fusion] estimate not representable as lat/lon, update skipped");
            return None;
        };
        self.filter = Some(next);
        self.last_update = event_time;
        self.last_fused = Some(estimate);
        Some(estimate)
    }
}

// ─── Async wiring ────────────────────────────────────────────────────────────

/// Kalman fusion estimator: two tasks over one shared [`FusionCore`].
#[derive(Debug)]
pub struct FusionEstimator {
    core: Arc<Mutex<FusionCore>>,
    position_task: JoinHandle<()>,
    heading_task: JoinHandle<()>,
}

impl FusionEstimator {
    pub fn spawn(
        handle: &Handle,
        config: &EngineConfig,
        fixes: Receiver<PositionFix>,
        position_samples: Receiver<InertialSample>,
        heading_samples: Receiver<InertialSample>,
        fused: Arc<FusedLocationSource>,
    ) -> Self {
        let core = Arc::new(Mutex::new(FusionCore::new(config)));
        let position_task = handle.spawn(position_loop(
            core.clone(),
            fixes,
            position_samples,
            fused.clone(),
        ));
        let heading_task = handle.spawn(heading_loop(core.clone(), heading_samples, fused));
        info!(
            "[fusion] estimator started (heading from {:?})",
            config.kalman.heading_source
        );
        Self {
            core,
            position_task,
            heading_task,
        }
    }

    /// Snapshot of the shared core.
    pub fn core(&self) -> FusionCore {
        lock(&self.core).clone()
    }

    pub fn shutdown(&self) {
        self.position_task.abort();
        self.heading_task.abort();
    }
}

fn lock(core: &Mutex<FusionCore>) -> MutexGuard<'_, FusionCore> {
    core.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn position_loop(
    core: Arc<Mutex<FusionCore>>,
    mut fixes: Receiver<PositionFix>,
    mut samples: Receiver<InertialSample>,
    fused: Arc<FusedLocationSource>,
) {
    loop {
        tokio::select! {
            biased;
            fix = recv_latest(&mut fixes, "fusion/fix") => {
                let Some(fix) = fix else { break };
                let mut core = lock(&core);
                if let Some(estimate) = core.on_fix(fix) {
                    fused.set(estimate);
                }
            }
            sample = recv_latest(&mut samples, "fusion/accel") => {
                let Some(sample) = sample else { break };
                if sample.kind != SensorKind::LinearAcceleration {
                    continue;
                }
                let mut core = lock(&core);
                if let Some(estimate) = core.on_accel(sample) {
                    fused.set(estimate);
                }
            }
        }
    }
    let state = lock(&core);
    info!(
        "[fusion] position task stopped: {} fixes accepted, {} rejected, {} filter steps",
        state.fixes_accepted(),
        state.fixes_rejected(),
        state.filter().map_or(0, |f| f.step_count())
    );
}

async fn heading_loop(
    core: Arc<Mutex<FusionCore>>,
    mut samples: Receiver<InertialSample>,
    fused: Arc<FusedLocationSource>,
) {
    while let Some(sample) = recv_latest(&mut samples, "fusion/heading").await {
        let mut core = lock(&core);
        if !core.accepts_heading(sample.kind) {
            continue;
        }
        if let Some(estimate) = core.on_heading(sample) {
            fused.set(estimate);
        }
    }
    info!("[fusion] heading task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geodesy::latlon_to_meters;
    use approx::assert_abs_diff_eq;

    fn core() -> FusionCore {
        FusionCore::new(&EngineConfig::fused())
    }

    fn fix(t: f64, lat: f64, bearing: f64, speed: f64) -> PositionFix {
        PositionFix::new(t, lat, 17.8, bearing, speed, 5.0)
    }

    fn accel(t: f64, z: f64) -> InertialSample {
        InertialSample::new(t, SensorKind::LinearAcceleration, 0.0, 0.0, z)
    }

    fn yaw(t: f64, yaw_deg: f64) -> InertialSample {
        let half = yaw_deg.to_radians() / 2.0;
        InertialSample::rotation_vector(t, 0.0, 0.0, half.sin(), half.cos())
    }

    #[test]
    fn test_nothing_before_first_fix() {
        let mut core = core();
        assert!(core.on_accel(accel(0.0, 1.0)).is_none());
        assert!(core.on_heading(yaw(0.0, 0.0)).is_none());
        assert!(core.on_heading(yaw(0.1, -10.0)).is_none());
        assert!(!core.is_initialized());
        assert!(core.last_fused().is_none());
    }

    #[test]
    fn test_first_fix_published_unchanged() {
        let mut core = core();
        let first = fix(0.0, 59.7, 45.0, 3.0);
        assert_eq!(core.on_fix(first), Some(first));
        assert!(core.is_initialized());
    }

    #[test]
    fn test_inaccurate_fix_ignored() {
        let mut core = core();
        let mut bad = fix(0.0, 59.7, 0.0, 0.0);
        bad.accuracy = 50.0;
        assert!(core.on_fix(bad).is_none());
        assert!(!core.is_initialized());
        assert_eq!(core.fixes_rejected(), 1);
    }

    #[test]
    fn test_samples_correct_while_fix_is_fresh() {
        let mut core = core();
        core.on_fix(fix(0.0, 59.7, 0.0, 10.0));
        let mut last = None;
        for i in 1..=5 {
            last = core.on_accel(accel(i as f64 * 0.1, 0.0));
        }
        assert_eq!(core.filter().unwrap().correction_count(), 5);

        let out = last.unwrap();
        assert_eq!(out.timestamp, 0.5);
        // Measured against the previous estimate, so it trails pure dead reckoning
        assert!(out.latitude > 59.7);
        assert!(out.latitude < 59.7 + (5.0f64 / 6_371_000.0).to_degrees());
    }

    #[test]
    fn test_heading_turn_reaches_position_before_next_fix() {
        let mut core = core();
        core.on_fix(fix(0.0, 59.7, 0.0, 10.0));
        core.on_heading(yaw(0.0, 0.0));
        let turned = core.on_heading(yaw(0.01, -90.0)).unwrap();
        assert_abs_diff_eq!(turned.bearing, 90.0, epsilon = 1e-6);

        let mut last = None;
        for i in 1..=10 {
            last = core.on_accel(accel(i as f64 * 0.1, 0.0));
        }
        let out = last.unwrap();
        assert_eq!(out.bearing, 90.0);
        assert_eq!(core.filter().unwrap().correction_count(), 10);

        // Velocity swung east, so the track bends east within the first second
        let (east, north) = latlon_to_meters(out.latitude, out.longitude, 59.7, 17.8);
        assert!(east > 1.0, "east displacement {east:.3} m");
        assert!(north < 10.0);
        let velocity = core.filter().unwrap().state();
        assert!(velocity[2] > 1.0);
    }

    #[test]
    fn test_new_fix_corrects() {
        let mut core = core();
        core.on_fix(fix(0.0, 59.7, 0.0, 0.0));
        core.on_accel(accel(0.5, 0.0));
        assert_eq!(core.filter().unwrap().correction_count(), 1);
        let out = core.on_fix(fix(1.0, 59.7001, 0.0, 0.0)).unwrap();
        assert_abs_diff_eq!(out.latitude, 59.7001, epsilon = 1e-5);
        assert_eq!(core.filter().unwrap().correction_count(), 2);
        assert_eq!(core.filter().unwrap().step_count(), 2);
        assert_eq!(core.fixes_accepted(), 2);
        assert_eq!(core.filter().unwrap().origin(), (59.7001, 17.8));
    }

    #[test]
    fn test_repeated_fix_is_predict_only() {
        let mut core = core();
        core.on_fix(fix(0.0, 59.7, 0.0, 10.0));
        let moved = core.on_accel(accel(1.0, 0.0)).unwrap();
        let before = core.filter().unwrap().correction_count();
        let out = core.on_fix(fix(0.0, 59.7, 0.0, 10.0)).unwrap();
        assert_eq!(core.filter().unwrap().correction_count(), before);
        // The stale fix is not re-injected
        assert_eq!(out.latitude, moved.latitude);
        assert_eq!(out.timestamp, 1.0);
    }

    #[test]
    fn test_late_fix_beyond_staleness_not_applied() {
        let mut core = core();
        core.on_fix(fix(0.0, 59.7, 0.0, 10.0));
        core.on_accel(accel(5.0, 0.0));
        // Fix stamped 3 s before the filter's current time
        let out = core.on_fix(fix(2.0, 59.8, 0.0, 10.0)).unwrap();
        assert_eq!(core.filter().unwrap().correction_count(), 0);
        assert!(out.latitude < 59.71);
    }

    #[test]
    fn test_output_bearing_comes_from_measurement_source() {
        let mut core = core();
        // Velocity points north, reported bearing east
        core.on_fix(fix(0.0, 59.7, 90.0, 0.0));
        let out = core.on_accel(accel(0.5, 0.0)).unwrap();
        assert_eq!(out.bearing, 90.0);
    }

    #[test]
    fn test_heading_updates_only_bearing() {
        let mut core = core();
        core.on_fix(fix(0.0, 59.7, 350.0, 10.0));
        let before = *core.filter().unwrap().state();
        assert!(core.on_heading(yaw(0.0, 0.0)).is_none()); // primes
        let out = core.on_heading(yaw(0.1, -20.0)).unwrap();
        assert_abs_diff_eq!(out.bearing, 10.0, epsilon = 1e-6);
        assert_eq!(out.latitude, 59.7);
        assert_eq!(*core.filter().unwrap().state(), before);

        // Next predict keeps the corrected bearing
        let next = core.on_accel(accel(0.2, 0.0)).unwrap();
        assert_abs_diff_eq!(next.bearing, 10.0, epsilon = 1e-6);
    }

    #[test]
    fn test_staleness_keeps_publishing() {
        let mut core = core();
        core.on_fix(fix(0.0, 59.7, 0.0, 10.0));
        let mut outputs = Vec::new();
        let mut corrections_at_2s = 0;
        for i in 1..=100 {
            outputs.push(core.on_accel(accel(i as f64 * 0.05, 0.0)).unwrap());
            if i == 40 {
                corrections_at_2s = core.filter().unwrap().correction_count();
            }
        }
        assert!(corrections_at_2s > 0);
        // Nothing corrected past the staleness threshold
        assert_eq!(core.filter().unwrap().correction_count(), corrections_at_2s);

        assert!(outputs.iter().all(|f| f.is_finite()));
        assert!(outputs.windows(2).all(|w| w[1].latitude > w[0].latitude));
        assert_eq!(outputs.last().unwrap().timestamp, 5.0);
    }

    #[test]
    fn test_measurement_variance_grows_with_fix_age() {
        // North distance covered 0.2 s after the fix
        let advance = |position_variance_per_sec: f64| {
            let mut config = EngineConfig::fused();
            config.kalman.position_variance_per_sec = position_variance_per_sec;
            let mut core = FusionCore::new(&config);
            core.on_fix(fix(0.0, 59.7, 0.0, 10.0));
            core.on_accel(accel(0.1, 0.0));
            let out = core.on_accel(accel(0.2, 0.0)).unwrap();
            latlon_to_meters(out.latitude, out.longitude, 59.7, 17.8).1
        };
        // Age-independent, near-exact measurement pins the estimate back
        let rigid = advance(0.0);
        let aging = advance(1.0);
        assert!(aging > 2.0 * rigid, "rigid {rigid:.3} m, aging {aging:.3} m");
        assert!(aging < 2.0);
    }

    #[test]
    fn test_out_of_order_sample_clamped() {
        let mut core = core();
        core.on_fix(fix(0.0, 59.7, 0.0, 10.0));
        let a = core.on_accel(accel(1.0, 0.0)).unwrap();
        let b = core.on_accel(accel(0.5, 0.0)).unwrap();
        assert_abs_diff_eq!(a.latitude, b.latitude, epsilon = 1e-9);
        assert_eq!(b.timestamp, 1.0);
    }
}
