//! Graph file loading, saving and building

use framepipe::config::{GraphConfig, NodeConfig, StageSpec};
use framepipe::PipeError;
use std::path::PathBuf;

fn demo_file() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("demos/broadcast.toml")
}

#[test]
fn test_shipped_demo_matches_builtin() {
    let loaded = GraphConfig::load(demo_file()).unwrap();
    assert_eq!(loaded, GraphConfig::demo());
}

#[test]
fn test_save_load_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("graph.toml");

    let config = GraphConfig::new("roundtrip")
        .with_node(NodeConfig::source("cam", 15.0).with_limit(30))
        .with_node(NodeConfig::relay("work", "cam").with_stage(StageSpec::Simulated {
            work_ms: 3,
            payload_bytes: 64,
        }))
        .with_node(NodeConfig::sampler("view", "work", 50));

    config.save(&path).unwrap();
    assert!(path.exists());
    assert_eq!(GraphConfig::load(&path).unwrap(), config);
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");

    let err = GraphConfig::load(&path).unwrap_err();
    assert!(matches!(err, PipeError::Config(_)));
    assert_eq!(GraphConfig::load_or_demo(&path), GraphConfig::demo());
}

#[test]
fn test_invalid_file_reports_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(
        &path,
        r#"
[[node]]
name = "orphan"
kind = "relay"
parent = "nobody"
"#,
    )
    .unwrap();

    let err = GraphConfig::load(&path).unwrap_err();
    assert!(err.is_configuration());
    assert!(err.to_string().contains("broken.toml"));
}

#[test]
fn test_bounded_file_runs_to_completion() {
    let config = GraphConfig::from_toml_str(
        r#"
[graph]
name = "bounded"
queue_capacity = 2

[[node]]
name = "src"
kind = "source"
limit = 20

[[node]]
name = "work"
kind = "relay"
parent = "src"
stage = { type = "simulated", work_ms = 1 }

[[node]]
name = "probe"
kind = "relay"
parent = "work"
stage = { type = "latency_probe", report_every = 5 }
"#,
    )
    .unwrap();

    let built = config.build().unwrap();
    assert_eq!(built.monitors.len(), 1);

    let report = built.graph.start().unwrap().wait().unwrap();
    assert!(report.is_clean());
    assert_eq!(report.node("probe").unwrap().terminals, 1);

    let stats = built.monitors[0].stats();
    assert_eq!(stats.frames(), 20);
    assert_eq!(built.monitors[0].report().stages.len(), 2);
}
