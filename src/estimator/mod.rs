pub mod extrapolation;
pub mod fusion;

use std::sync::Arc;

use tokio::runtime::Handle;

use crate::config::{EngineConfig, EstimatorKind};
use crate::source::{FusedLocationSource, LocationSource, SensorSource};

pub use extrapolation::{ExtrapolationCore, ExtrapolationEstimator};
pub use fusion::{FusionCore, FusionEstimator};

/// The sources an estimator reads from and writes to.
#[derive(Clone, Debug)]
pub struct EstimatorSources {
    pub locations: Arc<LocationSource>,
    pub sensors: Arc<SensorSource>,
    pub fused: Arc<FusedLocationSource>,
}

/// Active estimation strategy, chosen by [`EngineConfig::estimator`].
#[derive(Debug)]
pub enum Estimator {
    Extrapolation(ExtrapolationEstimator),
    Fused(FusionEstimator),
}

impl Estimator {
    /// Subscribe to the sources and start the strategy's background tasks.
    ///
    /// Subscriptions are taken before returning, so every value fed after
    /// this call reaches the estimator.
    pub fn spawn(handle: &Handle, config: &EngineConfig, sources: &EstimatorSources) -> Self {
        match config.estimator {
            EstimatorKind::Extrapolation => Estimator::Extrapolation(ExtrapolationEstimator::spawn(
                handle,
                sources.locations.subscribe(),
                sources.sensors.subscribe(),
                sources.fused.clone(),
            )),
            EstimatorKind::Fused => Estimator::Fused(FusionEstimator::spawn(
                handle,
                config,
                sources.locations.subscribe(),
                sources.sensors.subscribe(),
                sources.sensors.subscribe(),
                sources.fused.clone(),
            )),
        }
    }

    pub fn kind(&self) -> EstimatorKind {
        match self {
            Estimator::Extrapolation(_) => EstimatorKind::Extrapolation,
            Estimator::Fused(_) => EstimatorKind::Fused,
        }
    }

    /// Stop processing further stream values. An update already running
    /// completes, since tasks only yield while waiting for input.
    pub fn shutdown(&self) {
        match self {
            Estimator::Extrapolation(e) => e.shutdown(),
            Estimator::Fused(e) => e.shutdown(),
        }
    }
}
