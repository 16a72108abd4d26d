//! Engine facade: feed fixes and samples in, read or subscribe to estimates.

use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use log::info;
use tokio::runtime::Handle;

use crate::config::{EngineConfig, EstimatorKind};
use crate::error::{EngineError, Result};
use crate::estimator::{Estimator, EstimatorSources};
use crate::source::{FusedLocationSource, LocationSource, SensorSource};
use crate::throttle::sample_and_hold;
use crate::types::{InertialSample, PositionFix};

/// Location engine. Owns the three sources and the active estimator; the
/// estimator's tasks stop when the engine is dropped.
///
/// Must be created inside a Tokio runtime.
#[derive(Debug)]
pub struct LocationEngine {
    locations: Arc<LocationSource>,
    sensors: Arc<SensorSource>,
    fused: Arc<FusedLocationSource>,
    estimator: Estimator,
    fused_interval: Duration,
}

impl LocationEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let handle = Handle::try_current().map_err(|_| EngineError::NoRuntime)?;

        let sources = EstimatorSources {
            locations: Arc::new(LocationSource::new(config.channel_capacity)),
            sensors: Arc::new(SensorSource::new(config.channel_capacity)),
            fused: Arc::new(FusedLocationSource::new(config.channel_capacity)),
        };
        let estimator = Estimator::spawn(&handle, &config, &sources);
        let fused_interval = config.fused_interval();
        info!(
            "Location engine ready: {:?} estimator, fused updates every {} ms",
            estimator.kind(),
            fused_interval.as_millis()
        );

        Ok(Self {
            locations: sources.locations,
            sensors: sources.sensors,
            fused: sources.fused,
            estimator,
            fused_interval,
        })
    }

    /// Ingest an absolute fix. Never blocks.
    pub fn feed_fix(&self, fix: PositionFix) {
        self.locations.set(fix);
    }

    /// Ingest an inertial sample. Never blocks.
    pub fn feed_sample(&self, sample: InertialSample) {
        self.sensors.set(sample);
    }

    /// Fused estimates, at most one per configured interval.
    pub fn fused_stream(&self) -> impl Stream<Item = PositionFix> + Send + 'static {
        sample_and_hold(self.fused.subscribe(), self.fused_interval)
            .filter(|fix| futures::future::ready(fix.is_finite()))
    }

    /// Every accepted fix, unfiltered.
    pub fn raw_stream(&self) -> impl Stream<Item = PositionFix> + Send + 'static {
        self.locations.stream("raw")
    }

    /// Latest fused estimate, `None` until the estimator produced one.
    pub fn last_known(&self) -> Option<PositionFix> {
        self.fused.get()
    }

    /// Latest raw fix, `None` before the first one.
    pub fn last_fix(&self) -> Option<PositionFix> {
        self.locations.get()
    }

    pub fn estimator_kind(&self) -> EstimatorKind {
        self.estimator.kind()
    }

    pub fn fused_interval(&self) -> Duration {
        self.fused_interval
    }
}

impl Drop for LocationEngine {
    fn drop(&mut self) {
        self.estimator.shutdown();
    }
}
