//! # framepipe: thread-per-node streaming pipelines
//!
//! Moves a sequence of frames from one rate-paced source through a tree of
//! processing stages with bounded latency. Every node runs on its own OS
//! thread; every edge owns one buffer.
//!
//! ## Architecture
//!
//! - **Graph**: arena of nodes wired with `attach` / `branch`, validated and
//!   consumed by `start`
//! - **Nodes**: Source (paced), Relay (push), Sampler (pull at its own rate),
//!   Fanout (broadcast)
//! - **Buffers**: lossless blocking FIFOs on push edges, latest-value rings on
//!   sampling edges
//! - **Shutdown**: a terminal envelope walks the tree; no timeouts
//! - **Latency**: every node stamps enter/exit times onto each envelope
//!
//! ## Configuration
//!
//! Graphs can also be described in TOML files (see [`config`]), stored by
//! default in the platform config directory under `framepipe/graph.toml`.
//!
//! ## Example
//!
//! ```ignore
//! use framepipe::pipeline::{Graph, SimulatedWork, SourceSettings};
//! use std::time::Duration;
//!
//! fn main() -> framepipe::PipeResult<()> {
//!     let mut graph = Graph::new("camera");
//!     let capture = graph.add_source("capture", SourceSettings::fps(30.0))?;
//!     let detect = graph.add_relay("detect")?;
//!     let fan = graph.add_fanout("broadcast")?;
//!     let display = graph.add_sampler("display", Duration::from_millis(40))?;
//!     let encode = graph.add_relay("encode")?;
//!
//!     graph.set_stage(detect, SimulatedWork::from_millis(19))?;
//!     graph.attach(capture, detect)?;
//!     graph.attach(detect, fan)?;
//!     graph.branch(fan, display)?;
//!     graph.branch(fan, encode)?;
//!     println!("{}", graph.render());
//!
//!     let running = graph.start()?;
//!     std::thread::sleep(Duration::from_secs(1));
//!     let report = running.stop()?;
//!     println!("{}", report);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod pipeline;

// Re-export commonly used types
pub use config::{GraphConfig, NodeConfig, StageSpec};
pub use error::{PipeError, PipeResult, ResultExt};
pub use pipeline::{
    AnyStage, BranchKind, Envelope, Graph, NodeId, NodeKind, RunningGraph, SourceSettings, Stage,
    StageContext, StopReport,
};
