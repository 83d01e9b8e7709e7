//! framepipe demo runner
//!
//! Runs the graph file given as the first argument, or the one at the default
//! config path, or else the built-in broadcast demo. Logs the topology, the
//! per-node stop report and the latency report of every probe.

use anyhow::Context;
use framepipe::config::{default_config_path, GraphConfig, DEFAULT_RUN_SECS};
use framepipe::pipeline::{EngineEvent, RunningGraph};
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How often the supervisor wakes up to check the graph
const POLL_INTERVAL: Duration = Duration::from_millis(100);

fn load_config() -> anyhow::Result<GraphConfig> {
    if let Some(path) = std::env::args_os().nth(1) {
        tracing::info!("Loading graph from {:?}", path);
        return GraphConfig::load(&path).with_context(|| format!("loading {:?}", path));
    }

    match default_config_path() {
        Some(path) if path.exists() => {
            tracing::info!("Loading graph from {:?}", path);
            Ok(GraphConfig::load_or_demo(path))
        }
        _ => {
            tracing::info!("No graph file found, running the built-in broadcast demo");
            Ok(GraphConfig::demo())
        }
    }
}

/// Watch engine events until the deadline passes, the graph finishes on its
/// own, or a stage fails.
fn supervise(running: &RunningGraph, run_for: Option<Duration>) {
    let deadline = run_for.map(|d| Instant::now() + d);
    loop {
        if running.is_finished() {
            break;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        match running.events().recv_timeout(POLL_INTERVAL) {
            Some(EngineEvent::Fatal { node, message }) => {
                tracing::warn!("Stopping early, {} failed: {}", node, message);
                break;
            }
            Some(event) => tracing::trace!("{:?}", event),
            None => {}
        }
    }
}

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,framepipe=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load_config()?;
    let bounded = config.source().is_some_and(|s| s.limit.is_some());
    let run_for = match config.graph.run_duration() {
        Some(duration) => Some(duration),
        None if bounded => None,
        None => Some(Duration::from_secs_f64(DEFAULT_RUN_SECS)),
    };

    let built = config.build().context("building graph")?;
    tracing::info!("Topology:\n{}", built.graph.render());

    let running = built.graph.start().context("starting graph")?;
    supervise(&running, run_for);

    let dropped = running.events().dropped();
    let report = running.stop().context("stopping graph")?;
    tracing::info!("{}", report);
    if dropped > 0 {
        tracing::warn!("{} engine events were dropped", dropped);
    }

    for monitor in &built.monitors {
        let latency = monitor.report();
        tracing::info!("{}", latency);
        tracing::debug!("{}", latency.to_json()?);
    }

    report.into_result()?;
    Ok(())
}
