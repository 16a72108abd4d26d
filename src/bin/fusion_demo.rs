//! Simulated drive through the location engine.
//!
//! A vehicle accelerates north, cruises, then takes a long right-hand curve.
//! Fixes arrive at 1 Hz with a few metres of jitter, linear acceleration and
//! rotation vector at 50 Hz. Each fused estimate is printed as a JSON line.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use futures::StreamExt;
use log::{info, warn};
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};

use location_fusion::geodesy::meters_to_latlon;
use location_fusion::{EngineConfig, EstimatorKind, InertialSample, LocationEngine, PositionFix, SensorKind};

const ORIGIN: (f64, f64) = (59.3293, 18.0686);
const SENSOR_HZ: u32 = 50;
const FIX_EVERY: u32 = SENSOR_HZ; // 1 Hz

#[derive(Parser, Debug)]
#[command(name = "fusion_demo")]
#[command(about = "Feed a simulated drive through the location engine", long_about = None)]
struct Args {
    /// Estimator (extrapolation, fused)
    #[arg(long, default_value = "fused")]
    estimator: String,

    /// Simulated drive length in seconds
    #[arg(long, default_value = "60")]
    duration: u64,

    /// Fused stream interval in ms (estimator default when omitted)
    #[arg(long)]
    interval_ms: Option<u64>,

    /// JSON engine config; CLI flags override it
    #[arg(long)]
    config: Option<PathBuf>,
}

/// Ground truth of the simulated vehicle on the local plane.
#[derive(Debug, Default)]
struct Vehicle {
    x: f64,
    y: f64,
    speed: f64,
    /// Compass bearing [deg]
    bearing: f64,
}

impl Vehicle {
    /// Advance by `dt` and return the forward acceleration applied.
    fn advance(&mut self, t: f64, dt: f64) -> f64 {
        let accel = if t < 10.0 { 1.0 } else { 0.0 };
        let turn_rate = if (20.0..50.0).contains(&t) { 3.0 } else { 0.0 };

        self.speed += accel * dt;
        self.bearing = (self.bearing + turn_rate * dt).rem_euclid(360.0);
        let heading = self.bearing.to_radians();
        self.x += self.speed * heading.sin() * dt;
        self.y += self.speed * heading.cos() * dt;
        accel
    }

    fn fix(&self, t: f64) -> Option<PositionFix> {
        // Deterministic few-metre jitter
        let jitter_x = 3.0 * (t * 1.7).sin();
        let jitter_y = 3.0 * (t * 2.3).cos();
        let (lat, lon) = meters_to_latlon(self.x + jitter_x, self.y + jitter_y, ORIGIN.0, ORIGIN.1)?;
        Some(PositionFix::new(t, lat, lon, self.bearing, self.speed, 4.0))
    }

    fn samples(&self, t: f64, accel: f64) -> [InertialSample; 2] {
        // Device z axis points backwards along the direction of travel
        let linear = InertialSample::new(t, SensorKind::LinearAcceleration, 0.0, 0.0, -accel);
        // Azimuth grows clockwise, yaw counter-clockwise
        let half_yaw = -self.bearing.to_radians() / 2.0;
        let rotation = InertialSample::rotation_vector(t, 0.0, 0.0, half_yaw.sin(), half_yaw.cos());
        [linear, rotation]
    }
}

fn load_config(args: &Args) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => EngineConfig::default(),
    };
    config.estimator = match args.estimator.as_str() {
        "extrapolation" => EstimatorKind::Extrapolation,
        "fused" => EstimatorKind::Fused,
        other => bail!("unknown estimator '{other}' (expected extrapolation or fused)"),
    };
    if args.interval_ms.is_some() {
        config.fused_interval_ms = args.interval_ms;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let config = load_config(&args)?;

    info!("[{}] Fusion demo starting", ts_now());
    info!("  Estimator: {:?}", config.estimator);
    info!("  Duration: {} s", args.duration);
    info!("  Fused interval: {} ms", config.fused_interval().as_millis());

    let engine = LocationEngine::new(config)?;
    let mut fused = Box::pin(engine.fused_stream());
    let printer = tokio::spawn(async move {
        while let Some(estimate) = fused.next().await {
            match serde_json::to_string(&estimate) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!("[{}] cannot serialise estimate: {e}", ts_now()),
            }
        }
    });

    let dt = 1.0 / SENSOR_HZ as f64;
    let mut vehicle = Vehicle::default();
    let mut ticker = interval(Duration::from_secs_f64(dt));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let steps = args.duration * SENSOR_HZ as u64;
    for step in 0..steps {
        ticker.tick().await;
        let t = step as f64 * dt;
        let accel = vehicle.advance(t, dt);

        if step % FIX_EVERY as u64 == 0 {
            if let Some(fix) = vehicle.fix(t) {
                engine.feed_fix(fix);
            }
        }
        for sample in vehicle.samples(t, accel) {
            engine.feed_sample(sample);
        }
    }

    // Let the last interval flush before tearing down
    sleep(engine.fused_interval() * 2).await;
    let last = engine.last_known();
    drop(engine);
    printer.abort();

    match last {
        Some(estimate) => info!(
            "[{}] Done. Last estimate lat={:.6} lon={:.6} bearing={:.1} accuracy={:.2} m",
            ts_now(),
            estimate.latitude,
            estimate.longitude,
            estimate.bearing,
            estimate.accuracy
        ),
        None => info!("[{}] Done. No estimate produced", ts_now()),
    }
    info!(
        "  Truth: x={:.1} m y={:.1} m speed={:.1} m/s bearing={:.1}",
        vehicle.x, vehicle.y, vehicle.speed, vehicle.bearing
    );
    Ok(())
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}
