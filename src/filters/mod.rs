pub mod extrapolation;
pub mod heading;
pub mod kalman;

pub use extrapolation::extrapolate;
pub use heading::HeadingTracker;
pub use kalman::{ConstantVelocityKalman, Measurement, StepOutcome};
