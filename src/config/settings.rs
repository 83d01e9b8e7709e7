//! Graph-wide settings, the `[graph]` table of a graph file.

use crate::pipeline::bridge::EVENT_CHANNEL_CAPACITY;
use crate::pipeline::graph::{DEFAULT_QUEUE_CAPACITY, DEFAULT_SLOT_CAPACITY};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How long the demo binary runs a graph without a frame limit.
pub const DEFAULT_RUN_SECS: f64 = 10.0;

/// Settings shared by every node of a graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSettings {
    /// Graph name, used in logs and reports
    #[serde(default = "default_graph_name")]
    pub name: String,

    /// Capacity of push edges without an explicit capacity
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Capacity of sampling edges without an explicit capacity
    #[serde(default = "default_slot_capacity")]
    pub slot_capacity: usize,

    /// Capacity of the engine event channel
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Run time before stopping. `None` lets a bounded source finish on its own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_secs: Option<f64>,
}

fn default_graph_name() -> String {
    "graph".to_string()
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_slot_capacity() -> usize {
    DEFAULT_SLOT_CAPACITY
}

fn default_event_capacity() -> usize {
    EVENT_CHANNEL_CAPACITY
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            name: default_graph_name(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            slot_capacity: DEFAULT_SLOT_CAPACITY,
            event_capacity: EVENT_CHANNEL_CAPACITY,
            run_secs: None,
        }
    }
}

impl GraphSettings {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Configured run time, if any and positive.
    pub fn run_duration(&self) -> Option<Duration> {
        self.run_secs
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(Duration::from_secs_f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let settings: GraphSettings = toml::from_str("name = \"cam\"").unwrap();
        assert_eq!(settings.name, "cam");
        assert_eq!(settings.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(settings.slot_capacity, DEFAULT_SLOT_CAPACITY);
        assert_eq!(settings.run_secs, None);
    }

    #[test]
    fn test_run_duration() {
        let mut settings = GraphSettings::named("g");
        assert_eq!(settings.run_duration(), None);
        settings.run_secs = Some(1.5);
        assert_eq!(settings.run_duration(), Some(Duration::from_millis(1500)));
        settings.run_secs = Some(-1.0);
        assert_eq!(settings.run_duration(), None);
    }
}
