//! Integration tests for graph lifecycle
//!
//! These tests run real graphs on real threads:
//! - Ordering along FIFO chains
//! - Terminal propagation through fanouts and samplers
//! - Stop and teardown, including stage failures

mod common;

use common::builders::ChainBuilder;
use common::stages::{FailAt, Recorder};
use common::{assert_non_decreasing, wait_for_processed};
use framepipe::pipeline::{
    AnyStage, EngineEvent, Graph, NodeState, SimulatedWork, SourceSettings, Stage, StageContext,
};
use framepipe::{Envelope, PipeError};
use std::time::{Duration, Instant};

#[test]
fn test_fifo_chain_delivers_in_order() {
    const FRAMES: u64 = 300;
    let recorder = Recorder::new();
    let chain = ChainBuilder::new("chain", SourceSettings::unthrottled().with_limit(FRAMES))
        .relay("r1", None)
        .relay("r2", None)
        .relay("r3", None)
        .relay("r4", None)
        .relay("sink", Some(AnyStage::plugin(recorder.clone())));

    let report = chain.build().start().unwrap().wait().unwrap();

    // exact order, no duplicates, no gaps
    assert_eq!(recorder.ids(), (0..FRAMES).collect::<Vec<_>>());
    for name in ["r1", "r2", "r3", "r4", "sink"] {
        let node = report.node(name).unwrap();
        assert_eq!(node.terminals, 1, "{} terminal count", name);
        assert_eq!(node.processed, FRAMES, "{} processed", name);
        assert_eq!(node.state, NodeState::Stopped);
    }
    assert!(report.is_clean());
}

#[test]
fn test_tiny_queues_apply_backpressure_without_loss() {
    let recorder = Recorder::new();
    let chain = ChainBuilder::new("backpressure", SourceSettings::unthrottled().with_limit(40))
        .relay("slow", Some(SimulatedWork::from_millis(1).into()))
        .relay("sink", Some(AnyStage::plugin(recorder.clone())));
    let slow = chain.relays()[0];
    let mut graph = chain.build();
    graph.set_capacity(slow, 1).unwrap();

    graph.start().unwrap().wait().unwrap();
    assert_eq!(recorder.ids(), (0..40).collect::<Vec<_>>());
}

#[test]
fn test_fanout_samplers_each_see_one_terminal() {
    let mut graph = Graph::new("samplers");
    let src = graph.add_source("src", SourceSettings::fps(200.0)).unwrap();
    let fan = graph.add_fanout("fan").unwrap();
    graph.attach(src, fan).unwrap();

    let mut recorders = Vec::new();
    for i in 0..3 {
        let sampler = graph
            .add_sampler(&format!("s{}", i), Duration::from_millis(5 + 5 * i))
            .unwrap();
        let recorder = Recorder::new();
        graph
            .set_stage(sampler, AnyStage::plugin(recorder.clone()))
            .unwrap();
        graph.branch(fan, sampler).unwrap();
        recorders.push(recorder);
    }

    let running = graph.start().unwrap();
    std::thread::sleep(Duration::from_millis(200));
    let report = running.stop().unwrap();

    for i in 0..3 {
        let node = report.node(&format!("s{}", i)).unwrap();
        assert_eq!(node.terminals, 1);
        assert!(node.is_leaf);
    }
    for recorder in &recorders {
        assert!(!recorder.ids().is_empty());
        assert_non_decreasing(&recorder.ids());
    }
}

#[test]
fn test_stop_joins_depth_three_width_three() {
    let mut graph = Graph::new("tree");
    let src = graph.add_source("src", SourceSettings::fps(500.0)).unwrap();
    let fan = graph.add_fanout("fan").unwrap();
    let sampled = graph.add_sampler("sampled", Duration::from_millis(100)).unwrap();
    let sampled_leaf = graph.add_relay("sampled_leaf").unwrap();
    let pushed = graph.add_relay("pushed").unwrap();
    let pushed_leaf = graph.add_relay("pushed_leaf").unwrap();
    let direct = graph.add_relay("direct").unwrap();

    graph.attach(src, fan).unwrap();
    graph.branch(fan, sampled).unwrap();
    graph.attach(sampled, sampled_leaf).unwrap();
    graph.branch(fan, pushed).unwrap();
    graph.attach(pushed, pushed_leaf).unwrap();
    graph.branch(fan, direct).unwrap();
    assert_eq!(graph.topology().max_depth(), 3);

    let running = graph.start().unwrap();
    wait_for_processed(&running, pushed_leaf, 50);
    let report = running.stop().unwrap();

    assert_eq!(report.leaves().count(), 3);
    for leaf in report.leaves() {
        assert_eq!(leaf.terminals, 1, "leaf {}", leaf.name);
    }
    assert!(report.nodes.iter().all(|n| n.state == NodeState::Stopped));
    assert!(report.node("pushed_leaf").unwrap().processed >= 50);
    // lossless branches see every frame the fanout forwarded
    assert_eq!(
        report.node("pushed_leaf").unwrap().processed,
        report.node("fan").unwrap().processed
    );
}

#[test]
fn test_sampler_never_backpressures_source() {
    const FRAMES: u64 = 1000;
    let mut graph = Graph::new("lossy");
    let src = graph
        .add_source("src", SourceSettings::unthrottled().with_limit(FRAMES))
        .unwrap();
    let sampler = graph.add_sampler("slow", Duration::from_millis(20)).unwrap();
    let recorder = Recorder::new();
    graph
        .set_stage(sampler, AnyStage::plugin(recorder.clone()))
        .unwrap();
    graph.set_capacity(sampler, 1).unwrap();
    graph.attach(src, sampler).unwrap();

    let report = graph.start().unwrap().wait().unwrap();

    assert_eq!(report.node("src").unwrap().processed, FRAMES);
    assert!(report.node("slow").unwrap().processed < FRAMES);
    assert_eq!(report.node("slow").unwrap().terminals, 1);
    assert_non_decreasing(&recorder.ids());
}

#[test]
fn test_stage_error_tears_down_graph() {
    let mut graph = Graph::new("failing");
    let src = graph.add_source("src", SourceSettings::fps(200.0)).unwrap();
    let fan = graph.add_fanout("fan").unwrap();
    let bad = graph.add_relay("bad").unwrap();
    let after_bad = graph.add_relay("after_bad").unwrap();
    let good = graph.add_relay("good").unwrap();
    graph.set_stage(bad, AnyStage::plugin(FailAt::error(10))).unwrap();

    graph.attach(src, fan).unwrap();
    graph.branch(fan, bad).unwrap();
    graph.attach(bad, after_bad).unwrap();
    graph.branch(fan, good).unwrap();

    let running = graph.start().unwrap();
    // No stop request: the failure alone must end the graph
    let report = running.wait().unwrap();

    let failed = report.fatal().unwrap();
    assert_eq!(failed.name, "bad");
    assert!(failed.fatal.as_deref().unwrap().contains("corrupt frame 10"));

    for leaf in report.leaves() {
        assert_eq!(leaf.terminals, 1, "leaf {}", leaf.name);
    }
    // downstream of the failure nothing past the failing frame arrives
    assert_eq!(report.node("after_bad").unwrap().processed, 10);
    assert!(report.node("good").unwrap().processed >= 10);

    let err = report.into_result().unwrap_err();
    assert!(matches!(err, PipeError::Stage { node, .. } if node == "bad"));
}

#[test]
fn test_stage_panic_is_fatal_not_a_crash() {
    let recorder = Recorder::new();
    let chain = ChainBuilder::new("panicking", SourceSettings::fps(200.0))
        .relay("decoder", Some(AnyStage::plugin(FailAt::panic(5))))
        .relay("sink", Some(AnyStage::plugin(recorder.clone())));

    let running = chain.build().start().unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut saw_fatal = false;
    while !saw_fatal && Instant::now() < deadline {
        if let Some(EngineEvent::Fatal { message, .. }) =
            running.events().recv_timeout(Duration::from_millis(50))
        {
            assert!(message.contains("decoder crashed on frame 5"));
            saw_fatal = true;
        }
    }
    assert!(saw_fatal);
    assert!(running.quit_requested());

    let report = running.wait().unwrap();
    assert_eq!(recorder.ids(), (0..5).collect::<Vec<_>>());
    assert_eq!(report.node("sink").unwrap().terminals, 1);
    assert_eq!(report.node("decoder").unwrap().state, NodeState::Stopped);
}

#[test]
fn test_failing_source_stage() {
    let mut graph = Graph::new("bad-capture");
    let src = graph.add_source("capture", SourceSettings::fps(100.0)).unwrap();
    let sink = graph.add_relay("sink").unwrap();
    graph.set_stage(src, AnyStage::plugin(FailAt::error(3))).unwrap();
    graph.attach(src, sink).unwrap();

    let report = graph.start().unwrap().wait().unwrap();
    assert_eq!(report.fatal().unwrap().name, "capture");
    assert_eq!(report.node("sink").unwrap().processed, 3);
    assert_eq!(report.node("sink").unwrap().terminals, 1);
}

mockall::mock! {
    pub CountingStage {}

    impl Stage for CountingStage {
        fn on_start(&mut self, ctx: &StageContext);
        fn process(&mut self, envelope: &mut Envelope, ctx: &StageContext) -> anyhow::Result<()>;
        fn on_stop(&mut self, ctx: &StageContext);
    }
}

#[test]
fn test_stage_hooks_called_once_per_run() {
    let mut stage = MockCountingStage::new();
    stage.expect_on_start().times(1).return_const(());
    stage.expect_process().times(25).returning(|_, _| Ok(()));
    stage.expect_on_stop().times(1).return_const(());

    let chain = ChainBuilder::new("hooks", SourceSettings::unthrottled().with_limit(25))
        .relay("mocked", Some(AnyStage::plugin(stage)));

    // expectations are verified when the node thread drops the stage;
    // a violation panics that thread and surfaces as an error here
    let report = chain.build().start().unwrap().wait().unwrap();
    assert!(report.into_result().is_ok());
}

#[test]
fn test_engine_events_cover_lifecycle() {
    let chain = ChainBuilder::new("events", SourceSettings::unthrottled().with_limit(3))
        .relay("a", None);
    let a = chain.tail();
    let running = chain.build().start().unwrap();

    // wait() consumes the graph, so collect events first
    let mut events = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    while events
        .iter()
        .filter(|e| matches!(e, EngineEvent::NodeStopped { .. }))
        .count()
        < 2
    {
        assert!(Instant::now() < deadline, "events so far: {:?}", events);
        if let Some(event) = running.events().recv_timeout(Duration::from_millis(20)) {
            events.push(event);
        }
    }
    running.wait().unwrap();

    assert!(events.contains(&EngineEvent::TerminalObserved {
        node: a,
        sequence_id: 3
    }));
    assert!(events.contains(&EngineEvent::NodeStopped {
        node: a,
        processed: 3
    }));
    assert!(events
        .iter()
        .any(|e| matches!(e, EngineEvent::NodeStarted { name, .. } if name == "a")));
}

#[test]
fn test_running_graph_keeps_render() {
    let chain = ChainBuilder::new("rendered", SourceSettings::fps(100.0)).relay("a", None);
    let graph = chain.build();
    let expected = graph.render();

    let running = graph.start().unwrap();
    assert_eq!(running.render(), expected);
    assert_eq!(running.topology().node("a").unwrap().depth, 1);
    assert!(matches!(
        running.node_id("missing"),
        Err(PipeError::UnknownNodeName(_))
    ));
    running.stop().unwrap();
}
