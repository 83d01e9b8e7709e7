//! Graph files for framepipe
//!
//! A graph can be described in TOML instead of code:
//!
//! ```toml
//! [graph]
//! name = "broadcast"
//! queue_capacity = 4
//! run_secs = 10.0
//!
//! [[node]]
//! name = "capture"
//! kind = "source"
//! fps = 30.0
//! stage = { type = "simulated", work_ms = 19 }
//!
//! [[node]]
//! name = "display"
//! kind = "sampler"
//! parent = "capture"
//! period_ms = 40
//! ```
//!
//! # Config Location
//!
//! Without an explicit path the demo binary looks for `graph.toml` in the
//! platform-appropriate config directory:
//! - **Linux**: `~/.config/framepipe/`
//! - **macOS**: `~/Library/Application Support/framepipe/`
//! - **Windows**: `%APPDATA%\framepipe\`

pub mod settings;

pub use settings::*;

use crate::error::{PipeError, PipeResult, ResultExt};
use crate::pipeline::diagnostics::LatencyMonitor;
use crate::pipeline::graph::Graph;
use crate::pipeline::node::{AnyStage, SourceSettings};
use crate::pipeline::nodes::{LatencyProbe, PassthroughStage, SimulatedWork};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application identifier for config directories
pub const APP_ID: &str = "framepipe";

/// Graph config filename
pub const CONFIG_FILE: &str = "graph.toml";

/// Default latency report interval, in frames
pub const DEFAULT_REPORT_EVERY: u64 = 100;

/// Get the default graph file path
pub fn default_config_path() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID).join(CONFIG_FILE))
}

// ==================== Node Config ====================

/// Kind of a configured node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKindConfig {
    Source,
    Relay,
    Sampler,
    Fanout,
}

/// Built-in stage to install on a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageSpec {
    Passthrough,
    Simulated {
        work_ms: u64,
        #[serde(default)]
        payload_bytes: usize,
    },
    LatencyProbe {
        #[serde(default = "default_report_every")]
        report_every: u64,
    },
}

fn default_report_every() -> u64 {
    DEFAULT_REPORT_EVERY
}

/// One `[[node]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub name: String,

    pub kind: NodeKindConfig,

    /// Predecessor; every node but the source has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    /// Source only: target frames per second (unthrottled when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,

    /// Source only: stop on its own after this many frames
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,

    /// Sampler only: polling period
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_ms: Option<u64>,

    /// Capacity of the inbound buffer, overriding the graph default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<StageSpec>,
}

impl NodeConfig {
    fn new(name: &str, kind: NodeKindConfig, parent: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            kind,
            parent: parent.map(str::to_string),
            fps: None,
            limit: None,
            period_ms: None,
            capacity: None,
            stage: None,
        }
    }

    pub fn source(name: &str, fps: f64) -> Self {
        Self {
            fps: Some(fps),
            ..Self::new(name, NodeKindConfig::Source, None)
        }
    }

    pub fn relay(name: &str, parent: &str) -> Self {
        Self::new(name, NodeKindConfig::Relay, Some(parent))
    }

    pub fn sampler(name: &str, parent: &str, period_ms: u64) -> Self {
        Self {
            period_ms: Some(period_ms),
            ..Self::new(name, NodeKindConfig::Sampler, Some(parent))
        }
    }

    pub fn fanout(name: &str, parent: &str) -> Self {
        Self::new(name, NodeKindConfig::Fanout, Some(parent))
    }

    pub fn with_stage(mut self, stage: StageSpec) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    fn simulated(self, work_ms: u64) -> Self {
        self.with_stage(StageSpec::Simulated {
            work_ms,
            payload_bytes: 0,
        })
    }

    fn probe(self) -> Self {
        self.with_stage(StageSpec::LatencyProbe {
            report_every: DEFAULT_REPORT_EVERY,
        })
    }
}

// ==================== Stage Factory ====================

/// Creates built-in stages from their specs.
///
/// Probe stages need a shared [`LatencyMonitor`] so that their statistics can
/// be read after the graph has started; the factory keeps those handles.
#[derive(Debug, Default)]
pub struct StageFactory {
    monitors: Vec<LatencyMonitor>,
}

impl StageFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the stage for node `node_name`.
    pub fn create(&mut self, node_name: &str, spec: &StageSpec) -> AnyStage {
        match spec {
            StageSpec::Passthrough => PassthroughStage::new().into(),
            StageSpec::Simulated {
                work_ms,
                payload_bytes,
            } => SimulatedWork::from_millis(*work_ms)
                .with_payload(*payload_bytes)
                .into(),
            StageSpec::LatencyProbe { report_every } => {
                let monitor = LatencyMonitor::new(node_name);
                self.monitors.push(monitor.clone());
                LatencyProbe::new(monitor, *report_every).into()
            }
        }
    }

    pub fn monitors(&self) -> &[LatencyMonitor] {
        &self.monitors
    }

    pub fn into_monitors(self) -> Vec<LatencyMonitor> {
        self.monitors
    }
}

/// A graph built from a config, plus handles onto its probes.
pub struct BuiltGraph {
    pub graph: Graph,
    pub monitors: Vec<LatencyMonitor>,
}

// ==================== Graph Config ====================

/// Complete graph description, as stored in a graph file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GraphConfig {
    #[serde(default)]
    pub graph: GraphSettings,

    #[serde(default, rename = "node")]
    pub nodes: Vec<NodeConfig>,
}

impl GraphConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            graph: GraphSettings::named(name),
            nodes: Vec::new(),
        }
    }

    pub fn with_node(mut self, node: NodeConfig) -> Self {
        self.nodes.push(node);
        self
    }

    /// Load a graph file from disk
    pub fn load(path: impl AsRef<Path>) -> PipeResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipeError::Config(format!("Failed to read graph file {:?}: {}", path, e))
        })?;
        Self::from_toml_str(&content).with_context(|| format!("Invalid graph file {:?}", path))
    }

    /// Load a graph file, falling back to the demo topology on any error
    pub fn load_or_demo(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load graph file: {}", e);
                Self::demo()
            }
        }
    }

    /// Save the graph file to disk as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> PipeResult<()> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                PipeError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = self.to_toml_string()?;
        std::fs::write(path, content).map_err(|e| {
            PipeError::Config(format!("Failed to write graph file {:?}: {}", path, e))
        })
    }

    pub fn from_toml_str(content: &str) -> PipeResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> PipeResult<String> {
        toml::to_string_pretty(self).map_err(|e| PipeError::Serialization(e.to_string()))
    }

    fn node(&self, name: &str) -> Option<&NodeConfig> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn source(&self) -> Option<&NodeConfig> {
        self.nodes.iter().find(|n| n.kind == NodeKindConfig::Source)
    }

    /// Check the description without building anything.
    pub fn validate(&self) -> PipeResult<()> {
        if self.graph.queue_capacity == 0 || self.graph.slot_capacity == 0 {
            return Err(PipeError::Config(
                "default capacities must be at least 1".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for node in &self.nodes {
            if node.name.contains('\0') {
                return Err(PipeError::InvalidName(node.name.clone()));
            }
            if !names.insert(node.name.as_str()) {
                return Err(PipeError::DuplicateName(node.name.clone()));
            }
        }

        let sources = self
            .nodes
            .iter()
            .filter(|n| n.kind == NodeKindConfig::Source)
            .count();
        match sources {
            0 => return Err(PipeError::NoSource),
            1 => {}
            _ => {
                return Err(PipeError::Config(format!(
                    "{} sources configured, expected exactly one",
                    sources
                )))
            }
        }

        for node in &self.nodes {
            let context = |msg: &str| PipeError::Config(format!("node '{}': {}", node.name, msg));

            match (node.kind, &node.parent) {
                (NodeKindConfig::Source, Some(_)) => {
                    return Err(context("a source cannot have a parent"))
                }
                (NodeKindConfig::Source, None) => {}
                (_, None) => return Err(PipeError::Detached(node.name.clone())),
                (_, Some(parent)) => match self.node(parent) {
                    None => return Err(PipeError::UnknownNodeName(parent.clone())),
                    Some(p) if p.kind != NodeKindConfig::Fanout => {
                        let siblings = self
                            .nodes
                            .iter()
                            .filter(|n| n.parent.as_deref() == Some(parent.as_str()))
                            .count();
                        if siblings > 1 {
                            return Err(context(&format!(
                                "'{}' is not a fanout and already has a successor",
                                parent
                            )));
                        }
                    }
                    Some(_) => {}
                },
            }

            if node.kind != NodeKindConfig::Source && (node.fps.is_some() || node.limit.is_some()) {
                return Err(context("only a source takes fps or limit"));
            }
            match (node.kind, node.period_ms) {
                (NodeKindConfig::Sampler, None) | (NodeKindConfig::Sampler, Some(0)) => {
                    return Err(PipeError::InvalidPeriod(node.name.clone()))
                }
                (NodeKindConfig::Sampler, Some(_)) | (_, None) => {}
                (_, Some(_)) => return Err(context("only a sampler takes period_ms")),
            }
            match (node.kind, node.capacity) {
                (NodeKindConfig::Source, Some(_)) => {
                    return Err(context("a source has no inbound buffer"))
                }
                (_, Some(0)) => {
                    return Err(PipeError::InvalidCapacity {
                        what: format!("inbound buffer of '{}'", node.name),
                        capacity: 0,
                    })
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Build the described graph.
    pub fn build(&self) -> PipeResult<BuiltGraph> {
        self.validate()?;

        let mut factory = StageFactory::new();
        let mut graph = Graph::new(self.graph.name.clone());
        graph.set_default_capacities(self.graph.queue_capacity, self.graph.slot_capacity)?;
        graph.set_event_capacity(self.graph.event_capacity);

        let mut ids = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            let id = match node.kind {
                NodeKindConfig::Source => graph.add_source(
                    &node.name,
                    SourceSettings {
                        fps: node.fps.unwrap_or(0.0),
                        limit: node.limit,
                    },
                )?,
                NodeKindConfig::Relay => graph.add_relay(&node.name)?,
                NodeKindConfig::Sampler => graph.add_sampler(
                    &node.name,
                    Duration::from_millis(node.period_ms.unwrap_or_default()),
                )?,
                NodeKindConfig::Fanout => graph.add_fanout(&node.name)?,
            };
            if let Some(capacity) = node.capacity {
                graph.set_capacity(id, capacity)?;
            }
            if let Some(spec) = &node.stage {
                graph.set_stage(id, factory.create(&node.name, spec))?;
            }
            ids.push(id);
        }

        for (node, &id) in self.nodes.iter().zip(&ids) {
            let Some(parent_name) = &node.parent else {
                continue;
            };
            let parent = graph.node_id(parent_name)?;
            let is_fanout = self
                .node(parent_name)
                .is_some_and(|p| p.kind == NodeKindConfig::Fanout);
            if is_fanout {
                graph.branch(parent, id)?;
            } else {
                graph.attach(parent, id)?;
            }
        }

        tracing::debug!(
            "Built graph '{}' with {} nodes from config",
            self.graph.name,
            self.nodes.len()
        );
        Ok(BuiltGraph {
            graph,
            monitors: factory.into_monitors(),
        })
    }

    /// Camera broadcast topology: capture, preprocess and detect, then fan out
    /// to a display branch and an encode branch that fans out again to
    /// recording and streaming. Each leaf ends in a latency probe.
    pub fn demo() -> Self {
        let mut config = Self::new("broadcast");
        config.graph.run_secs = Some(DEFAULT_RUN_SECS);
        config
            .with_node(NodeConfig::source("capture", 30.0).with_stage(StageSpec::Simulated {
                work_ms: 19,
                payload_bytes: 4096,
            }))
            .with_node(NodeConfig::relay("preproc", "capture").simulated(19))
            .with_node(NodeConfig::relay("detect", "preproc").simulated(19))
            .with_node(NodeConfig::fanout("vi_broadcast", "detect"))
            // display branch
            .with_node(NodeConfig::sampler("vo_rate", "vi_broadcast", 40))
            .with_node(NodeConfig::relay("vo_pre", "vo_rate").simulated(19))
            .with_node(NodeConfig::relay("vo", "vo_pre").simulated(19))
            .with_node(NodeConfig::relay("vo_latency", "vo").probe())
            // encode branch
            .with_node(NodeConfig::sampler("venc_rate", "vi_broadcast", 33))
            .with_node(NodeConfig::relay("venc", "venc_rate").simulated(25))
            .with_node(NodeConfig::fanout("venc_broadcast", "venc"))
            .with_node(NodeConfig::sampler("record_rate", "venc_broadcast", 40))
            .with_node(NodeConfig::relay("record", "record_rate").simulated(25))
            .with_node(NodeConfig::relay("record_latency", "record").probe())
            .with_node(NodeConfig::sampler("rtsp_rate", "venc_broadcast", 40))
            .with_node(NodeConfig::relay("rtsp", "rtsp_rate").simulated(25))
            .with_node(NodeConfig::relay("rtsp_latency", "rtsp").probe())
    }
}
