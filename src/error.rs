//! Error handling for framepipe
//!
//! Construction-time problems (bad capacities, illegal attachments, invalid
//! topologies) are reported through [`PipeError`] as soon as they are made,
//! never at runtime. Failures inside stage computations are not errors of the
//! engine API; they are converted into a fatal stop of the running graph and
//! surface in the [`StopReport`](crate::pipeline::StopReport).

use crate::pipeline::id::NodeId;
use thiserror::Error;

/// Main error type for framepipe operations
#[derive(Error, Debug)]
pub enum PipeError {
    /// A buffer was configured with a capacity of zero
    #[error("Invalid capacity {capacity} for {what}: must be at least 1")]
    InvalidCapacity { what: String, capacity: usize },

    /// A sampler was configured without a positive period
    #[error("Invalid sampling period for '{0}': must be greater than zero")]
    InvalidPeriod(String),

    /// The node handle does not belong to this graph
    #[error("Unknown node {0}")]
    UnknownNode(NodeId),

    /// No node with this name exists (configuration lookups)
    #[error("Unknown node name '{0}'")]
    UnknownNodeName(String),

    /// Two nodes share a name
    #[error("Duplicate node name '{0}'")]
    DuplicateName(String),

    /// Node names double as thread names, which cannot hold NUL bytes
    #[error("Invalid node name {0:?}: names may not contain NUL bytes")]
    InvalidName(String),

    /// The child already has a predecessor
    #[error("Node '{child}' is already attached to '{parent}'")]
    AlreadyAttached { child: String, parent: String },

    /// `branch` was called on a node that is not a fan-out
    #[error("Node '{0}' is not a fanout and cannot take branches")]
    NotAFanout(String),

    /// The requested edge is structurally invalid (source as child, self-loop, ...)
    #[error("Invalid edge: {0}")]
    InvalidEdge(String),

    /// Attaching would close a cycle
    #[error("Attaching '{child}' under '{parent}' would create a cycle")]
    CycleDetected { parent: String, child: String },

    /// The graph has no source node to act as root
    #[error("Graph has no source node")]
    NoSource,

    /// A second source was added
    #[error("Graph already has source '{0}'")]
    DuplicateSource(String),

    /// A node cannot be reached from the root
    #[error("Node '{0}' is not reachable from the source")]
    Detached(String),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// A node thread could not be spawned
    #[error("Failed to spawn thread for '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// A node thread panicked outside of stage code
    #[error("Thread for '{0}' panicked")]
    ThreadPanicked(String),

    /// A stage computation failed
    #[error("Stage '{node}' failed: {message}")]
    Stage { node: String, message: String },

    /// Errors related to channel communication
    #[error("Channel send error")]
    ChannelSend,

    /// Errors related to channel communication
    #[error("Channel receive error")]
    ChannelRecv,

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse errors
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<PipeError>,
    },
}

impl PipeError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        PipeError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether this error was raised while building or validating a topology
    pub fn is_configuration(&self) -> bool {
        match self {
            PipeError::InvalidCapacity { .. }
            | PipeError::InvalidPeriod(_)
            | PipeError::UnknownNode(_)
            | PipeError::UnknownNodeName(_)
            | PipeError::DuplicateName(_)
            | PipeError::InvalidName(_)
            | PipeError::AlreadyAttached { .. }
            | PipeError::NotAFanout(_)
            | PipeError::InvalidEdge(_)
            | PipeError::CycleDetected { .. }
            | PipeError::NoSource
            | PipeError::DuplicateSource(_)
            | PipeError::Detached(_)
            | PipeError::Config(_) => true,
            PipeError::WithContext { source, .. } => source.is_configuration(),
            _ => false,
        }
    }
}

/// Result type alias for framepipe operations
pub type PipeResult<T> = std::result::Result<T, PipeError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> PipeResult<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> PipeResult<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for PipeResult<T> {
    fn context(self, context: impl Into<String>) -> PipeResult<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> PipeResult<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PipeError::InvalidCapacity {
            what: "queue of 'node_cap'".to_string(),
            capacity: 0,
        };
        assert_eq!(
            err.to_string(),
            "Invalid capacity 0 for queue of 'node_cap': must be at least 1"
        );
    }

    #[test]
    fn test_error_with_context() {
        let err = PipeError::NotAFanout("node_cap".to_string());
        let with_ctx = err.with_context("Failed to build graph");
        assert!(with_ctx.to_string().contains("Failed to build graph"));
        assert!(with_ctx.is_configuration());
    }

    #[test]
    fn test_result_ext_context() {
        let res: PipeResult<()> = Err(PipeError::NoSource);
        let err = res.context("start").unwrap_err();
        assert_eq!(err.to_string(), "start: Graph has no source node");
    }

    #[test]
    fn test_runtime_errors_are_not_configuration() {
        assert!(!PipeError::ThreadPanicked("x".into()).is_configuration());
        assert!(!PipeError::ChannelSend.is_configuration());
    }
}
