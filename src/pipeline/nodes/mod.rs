//! Built-in stage implementations.

pub mod latency_probe;
pub mod passthrough;
pub mod simulated;

pub use latency_probe::LatencyProbe;
pub use passthrough::PassthroughStage;
pub use simulated::SimulatedWork;
