//! Health evaluation: probes, the per-process failure tracker and the
//! periodic loop tying them together.

mod probe;
mod runner;
mod tracker;

pub use probe::{HealthProbe, ProbeOutcome, SystemProbe};
pub(crate) use runner::HealthProbeLoop;
pub use tracker::HealthTracker;
