//! Graph execution: one thread per node, terminal-envelope shutdown.
//!
//! [`Graph::start`] consumes the graph, builds one buffer per edge and starts
//! the node threads children-first, so that every consumer is waiting before
//! its producer emits anything. The returned [`RunningGraph`] owns the
//! threads.
//!
//! Shutdown is cooperative. `stop` raises the graph's quit flag; the source
//! notices it at its next cycle, emits the terminal envelope and exits. Every
//! other node forwards the terminal envelope to all of its successors and
//! exits in turn, so each leaf observes exactly one. There are no timeouts:
//! terminal propagation alone ends the graph.
//!
//! A failing stage (error or panic) stops the whole graph. The failing node
//! raises the quit flag, sends a terminal envelope downstream at once, and
//! keeps discarding its inbound envelopes until the upstream terminal arrives.

use crate::error::{PipeError, PipeResult};
use crate::pipeline::active::{ActiveThread, NodeState, NodeStatus};
use crate::pipeline::bridge::{EngineEvent, EngineEvents, EventBridge};
use crate::pipeline::clock::{Clock, Pacer};
use crate::pipeline::edge::{Inbox, Outlet};
use crate::pipeline::envelope::{Envelope, StageTrace};
use crate::pipeline::fifo::BlockingQueue;
use crate::pipeline::graph::{Graph, TopologySnapshot};
use crate::pipeline::id::NodeId;
use crate::pipeline::node::{AnyStage, NodeKind, SourceSettings, StageContext};
use crate::pipeline::slot::LatestValueSlot;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Everything one node thread owns while it runs.
struct Worker {
    ctx: StageContext,
    kind: NodeKind,
    stage: Option<AnyStage>,
    inbox: Option<Inbox>,
    outlets: Vec<Outlet>,
    status: Arc<NodeStatus>,
    events: EventBridge,
    quit: Arc<AtomicBool>,
    /// Set after a fatal stage failure; the node only drains from then on.
    failed: bool,
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

impl Worker {
    fn run(mut self) {
        tracing::info!(
            "Node '{}' started ({}, depth {})",
            self.ctx.name,
            self.kind.label(),
            self.ctx.depth
        );
        self.events.emit(EngineEvent::NodeStarted {
            node: self.ctx.node,
            name: self.ctx.name.to_string(),
        });

        if let Err(message) = self.run_hook(AnyStage::on_start) {
            self.fail(Envelope::terminal(0), message);
        }

        match (self.kind.clone(), self.inbox.take()) {
            (NodeKind::Source(settings), None) => self.run_source(settings),
            (NodeKind::Relay, Some(Inbox::Fifo(queue)))
            | (NodeKind::Fanout, Some(Inbox::Fifo(queue))) => self.run_push(&queue),
            (NodeKind::Sampler { period }, Some(Inbox::Slot(slot))) => {
                self.run_sampler(&slot, period)
            }
            (kind, _) => {
                tracing::error!(
                    "Node '{}' ({}) has no matching inbound buffer",
                    self.ctx.name,
                    kind.label()
                );
            }
        }

        if let Err(message) = self.run_hook(AnyStage::on_stop) {
            tracing::error!("Stage '{}' failed while stopping: {}", self.ctx.name, message);
            self.status.set_fatal(message);
        }

        let processed = self.status.processed();
        tracing::info!(
            "Node '{}' stopped after {} envelopes",
            self.ctx.name,
            processed
        );
        self.events.emit(EngineEvent::NodeStopped {
            node: self.ctx.node,
            processed,
        });
    }

    // --- Per-kind loops ---

    fn run_source(&mut self, settings: SourceSettings) {
        let mut pacer = Pacer::from_fps(settings.fps);
        let mut seq = 0u64;

        while !self.failed {
            let cycle = Instant::now();
            let limit_reached = settings.limit.is_some_and(|limit| seq >= limit);

            if limit_reached || self.quit.load(Ordering::SeqCst) {
                let mut terminal = Envelope::terminal(seq);
                self.observe_terminal(&mut terminal);
                tracing::info!(
                    "Source '{}' emitting terminal envelope {} ({})",
                    self.ctx.name,
                    seq,
                    if limit_reached {
                        "frame limit reached"
                    } else {
                        "stop requested"
                    }
                );
                self.forward(terminal);
                break;
            }

            let mut envelope = Envelope::new(seq);
            match self.process(&mut envelope) {
                Ok(()) => self.forward(envelope),
                Err(message) => {
                    self.fail(envelope.to_terminal(), message);
                    break;
                }
            }

            seq += 1;
            pacer.pace(cycle);
        }

        if pacer.overruns() > 0 {
            tracing::debug!(
                "Source '{}' overran its period {} times",
                self.ctx.name,
                pacer.overruns()
            );
        }
    }

    /// Relay and fanout loop: pop, process, forward to every successor.
    fn run_push(&mut self, queue: &BlockingQueue<Envelope>) {
        loop {
            let mut envelope = match queue.pop() {
                Ok(envelope) => envelope,
                Err(err) => {
                    tracing::error!("Node '{}' lost its inbound queue: {}", self.ctx.name, err);
                    break;
                }
            };

            if envelope.is_terminal() {
                self.observe_terminal(&mut envelope);
                if !self.failed {
                    self.forward(envelope);
                }
                break;
            }

            if self.failed {
                tracing::trace!(
                    "Node '{}' discarding envelope {} while draining",
                    self.ctx.name,
                    envelope.sequence_id()
                );
                continue;
            }

            match self.process(&mut envelope) {
                Ok(()) => self.forward(envelope),
                Err(message) => self.fail(envelope.to_terminal(), message),
            }
        }
    }

    /// Once per period, take the newest envelope in the slot.
    fn run_sampler(&mut self, slot: &LatestValueSlot<Envelope>, period: Duration) {
        let mut pacer = Pacer::from_period(period);
        loop {
            let cycle = Instant::now();
            let mut envelope = slot.get_latest_nonblocking();

            if envelope.is_terminal() {
                self.observe_terminal(&mut envelope);
                if !self.failed {
                    self.forward(envelope);
                }
                break;
            }

            if !self.failed {
                match self.process(&mut envelope) {
                    Ok(()) => self.forward(envelope),
                    Err(message) => self.fail(envelope.to_terminal(), message),
                }
            }

            pacer.pace(cycle);
        }
    }

    // --- Stage invocation ---

    /// Run the stage on one envelope and append this node's trace.
    fn process(&mut self, envelope: &mut Envelope) -> Result<(), String> {
        let clock = self.ctx.clock;
        let mut trace = StageTrace::begin(Arc::clone(&self.ctx.name), envelope.sequence_id(), &clock);

        let result = match self.stage.as_mut() {
            Some(stage) => {
                let ctx = &self.ctx;
                match panic::catch_unwind(AssertUnwindSafe(|| stage.process(envelope, ctx))) {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(err)) => Err(format!("{:#}", err)),
                    Err(payload) => Err(panic_message(payload)),
                }
            }
            None => Ok(()),
        };

        trace.record(&clock);
        envelope.push_trace(trace);
        self.status.record_processed();
        tracing::trace!(
            "Node '{}' processed envelope {}",
            self.ctx.name,
            envelope.sequence_id()
        );
        result
    }

    fn run_hook(&mut self, hook: fn(&mut AnyStage, &StageContext)) -> Result<(), String> {
        let Some(stage) = self.stage.as_mut() else {
            return Ok(());
        };
        let ctx = &self.ctx;
        panic::catch_unwind(AssertUnwindSafe(|| hook(stage, ctx))).map_err(panic_message)
    }

    // --- Terminal handling ---

    fn observe_terminal(&mut self, envelope: &mut Envelope) {
        self.status.record_terminal();
        self.status.set_state(NodeState::Draining);
        self.events.emit(EngineEvent::TerminalObserved {
            node: self.ctx.node,
            sequence_id: envelope.sequence_id(),
        });
        tracing::debug!(
            "Node '{}' observed terminal envelope {}",
            self.ctx.name,
            envelope.sequence_id()
        );

        if !self.failed {
            let mut trace = StageTrace::begin(
                Arc::clone(&self.ctx.name),
                envelope.sequence_id(),
                &self.ctx.clock,
            );
            trace.record(&self.ctx.clock);
            envelope.push_trace(trace);
        }
    }

    /// Fatal stop: raise the quit flag and terminate everything downstream.
    fn fail(&mut self, terminal: Envelope, message: String) {
        tracing::error!(
            "Stage '{}' failed on envelope {}: {}",
            self.ctx.name,
            terminal.sequence_id(),
            message
        );
        self.status.set_fatal(message.clone());
        self.quit.store(true, Ordering::SeqCst);
        self.failed = true;
        self.events.emit(EngineEvent::Fatal {
            node: self.ctx.node,
            message,
        });
        self.status.set_state(NodeState::Draining);
        self.forward(terminal);
    }

    // --- Delivery ---

    fn forward(&self, envelope: Envelope) {
        let Some((last, rest)) = self.outlets.split_last() else {
            return;
        };
        for outlet in rest {
            self.deliver(outlet, envelope.clone());
        }
        self.deliver(last, envelope);
    }

    fn deliver(&self, outlet: &Outlet, envelope: Envelope) {
        let seq = envelope.sequence_id();
        let terminal = envelope.is_terminal();
        match outlet.inbox.deliver(envelope) {
            Ok(()) if terminal => tracing::debug!(
                "Node '{}' forwarded terminal envelope {} to '{}' ({})",
                self.ctx.name,
                seq,
                outlet.child_name,
                outlet.inbox.kind()
            ),
            Ok(()) => {}
            Err(err) => tracing::error!(
                "Node '{}' could not deliver envelope {} to '{}': {}",
                self.ctx.name,
                seq,
                outlet.child_name,
                err
            ),
        }
    }
}

/// Owner-side handle of one node thread.
struct NodeHandle {
    name: Arc<str>,
    predecessor: Option<NodeId>,
    is_leaf: bool,
    thread: ActiveThread,
    status: Arc<NodeStatus>,
}

impl Graph {
    /// Validate the graph, build its buffers and start every node.
    ///
    /// Consumes the graph: the topology cannot change once it runs. If a
    /// thread fails to spawn, the nodes already running are terminated and
    /// joined before the error is returned.
    pub fn start(mut self) -> PipeResult<RunningGraph> {
        let source = self.validate()?;
        let topology = self.topology();
        let rendered = self.render();
        let order = self.postorder(source);

        let clock = Clock::new();
        let quit = Arc::new(AtomicBool::new(false));
        let (bridge, events) = EventBridge::new(self.event_capacity);

        // One buffer per edge, owned by the node it feeds
        let mut inboxes = Vec::with_capacity(self.nodes.len());
        for (index, slot) in self.nodes.iter().enumerate() {
            let capacity = self.capacity(NodeId::from_index(index))?;
            let inbox = match (slot.kind.inbound(), capacity) {
                (Some(kind), Some(capacity)) => Some(
                    Inbox::for_kind(kind, capacity).map_err(|e| {
                        e.with_context(format!("building inbound buffer of '{}'", slot.name))
                    })?,
                ),
                _ => None,
            };
            inboxes.push(inbox);
        }

        let names: Vec<Arc<str>> = self.nodes.iter().map(|n| Arc::clone(&n.name)).collect();
        let mut workers = Vec::with_capacity(self.nodes.len());
        let mut handles = Vec::with_capacity(self.nodes.len());

        for (index, slot) in self.nodes.drain(..).enumerate() {
            let id = NodeId::from_index(index);
            let outlets = slot
                .successors
                .iter()
                .filter_map(|&child| {
                    inboxes[child.index()].clone().map(|inbox| Outlet {
                        child,
                        child_name: Arc::clone(&names[child.index()]),
                        inbox,
                    })
                })
                .collect();

            let status = Arc::new(NodeStatus::new());
            handles.push(NodeHandle {
                name: Arc::clone(&slot.name),
                predecessor: slot.predecessor,
                is_leaf: slot.successors.is_empty(),
                thread: ActiveThread::new(slot.name.to_string(), Arc::clone(&status)),
                status: Arc::clone(&status),
            });
            workers.push(Some(Worker {
                ctx: StageContext {
                    node: id,
                    name: slot.name,
                    depth: slot.depth,
                    clock,
                },
                kind: slot.kind,
                stage: slot.stage,
                inbox: inboxes[index].clone(),
                outlets,
                status,
                events: bridge.clone(),
                quit: Arc::clone(&quit),
                failed: false,
            }));
        }

        // Children first: every consumer is running before its producer
        let mut started: Vec<NodeId> = Vec::with_capacity(order.len());
        for &id in &order {
            let Some(worker) = workers[id.index()].take() else {
                continue;
            };
            let handle = &mut handles[id.index()];
            if let Err(err) = handle.thread.start(move || worker.run()) {
                tracing::error!("Failed to start node '{}': {}", handle.name, err);
                abort_partial(&mut handles, &started, &inboxes, &quit);
                return Err(err);
            }
            started.push(id);
        }

        tracing::info!(
            "Graph '{}' started with {} nodes",
            self.name(),
            handles.len()
        );

        Ok(RunningGraph {
            name: self.name().to_string(),
            source,
            nodes: handles,
            order,
            quit,
            events,
            topology,
            rendered,
            started_at: Instant::now(),
            finished: false,
        })
    }
}

/// Terminate and join the nodes started before a spawn failure.
fn abort_partial(
    handles: &mut [NodeHandle],
    started: &[NodeId],
    inboxes: &[Option<Inbox>],
    quit: &AtomicBool,
) {
    quit.store(true, Ordering::SeqCst);

    // Started nodes form whole subtrees; feed a terminal into each subtree root
    for &id in started {
        let parent_running = handles[id.index()]
            .predecessor
            .is_some_and(|p| started.contains(&p));
        if parent_running {
            continue;
        }
        if let Some(inbox) = &inboxes[id.index()] {
            if let Err(err) = inbox.deliver(Envelope::terminal(0)) {
                tracing::error!(
                    "Could not terminate '{}' after failed start: {}",
                    handles[id.index()].name,
                    err
                );
            }
        }
    }

    for &id in started {
        if let Err(err) = handles[id.index()].thread.join() {
            tracing::error!("{}", err);
        }
    }
}

/// Final state of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeReport {
    pub id: NodeId,
    pub name: String,
    pub state: NodeState,
    pub is_leaf: bool,
    pub processed: u64,
    pub terminals: u64,
    pub fatal: Option<String>,
}

/// Outcome of running a graph to completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopReport {
    pub graph: String,
    pub elapsed: Duration,
    pub nodes: Vec<NodeReport>,
}

impl StopReport {
    pub fn node(&self, name: &str) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn leaves(&self) -> impl Iterator<Item = &NodeReport> {
        self.nodes.iter().filter(|n| n.is_leaf)
    }

    /// First node that recorded a fatal failure.
    pub fn fatal(&self) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.fatal.is_some())
    }

    pub fn is_clean(&self) -> bool {
        self.fatal().is_none()
    }

    /// Turn a recorded stage failure into an error.
    pub fn into_result(self) -> PipeResult<Self> {
        match self.fatal() {
            Some(node) => Err(PipeError::Stage {
                node: node.name.clone(),
                message: node.fatal.clone().unwrap_or_default(),
            }),
            None => Ok(self),
        }
    }
}

impl std::fmt::Display for StopReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "graph '{}' ran for {:.2?}", self.graph, self.elapsed)?;
        for node in &self.nodes {
            write!(
                f,
                "\n  {:<20} {:<9} processed {:>6}  terminals {}",
                node.name, node.state, node.processed, node.terminals
            )?;
            if let Some(fatal) = &node.fatal {
                write!(f, "  FATAL: {}", fatal)?;
            }
        }
        Ok(())
    }
}

/// A started graph. Dropping it stops the graph.
pub struct RunningGraph {
    name: String,
    source: NodeId,
    nodes: Vec<NodeHandle>,
    /// Join order: children before parents.
    order: Vec<NodeId>,
    quit: Arc<AtomicBool>,
    events: EngineEvents,
    topology: TopologySnapshot,
    rendered: String,
    started_at: Instant,
    finished: bool,
}

impl RunningGraph {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> NodeId {
        self.source
    }

    /// Ask the source to emit the terminal envelope, without waiting.
    pub fn request_stop(&self) {
        if !self.quit.swap(true, Ordering::SeqCst) {
            tracing::info!("Stop requested for graph '{}'", self.name);
        }
    }

    /// Whether a stop was requested (by the owner or by a failing stage).
    pub fn quit_requested(&self) -> bool {
        self.quit.load(Ordering::SeqCst)
    }

    /// Request a stop and join every node, children first.
    pub fn stop(mut self) -> PipeResult<StopReport> {
        self.request_stop();
        self.join_all()
    }

    /// Join every node without requesting a stop, for sources with a frame
    /// limit or graphs expected to fail.
    pub fn wait(mut self) -> PipeResult<StopReport> {
        self.join_all()
    }

    fn join_all(&mut self) -> PipeResult<StopReport> {
        let mut first_err = None;
        for &id in &self.order {
            if let Err(err) = self.nodes[id.index()].thread.join() {
                tracing::error!("Graph '{}': {}", self.name, err);
                first_err.get_or_insert(err);
            }
        }
        self.finished = true;

        let report = self.report();
        tracing::info!("Graph '{}' stopped after {:.2?}", self.name, report.elapsed);
        match first_err {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    /// Snapshot of every node, in arena order.
    pub fn report(&self) -> StopReport {
        StopReport {
            graph: self.name.clone(),
            elapsed: self.started_at.elapsed(),
            nodes: self
                .nodes
                .iter()
                .enumerate()
                .map(|(index, handle)| NodeReport {
                    id: NodeId::from_index(index),
                    name: handle.name.to_string(),
                    state: handle.status.state(),
                    is_leaf: handle.is_leaf,
                    processed: handle.status.processed(),
                    terminals: handle.status.terminals(),
                    fatal: handle.status.fatal(),
                })
                .collect(),
        }
    }

    fn handle(&self, id: NodeId) -> PipeResult<&NodeHandle> {
        self.nodes.get(id.index()).ok_or(PipeError::UnknownNode(id))
    }

    pub fn node_id(&self, name: &str) -> PipeResult<NodeId> {
        self.nodes
            .iter()
            .position(|n| n.name.as_ref() == name)
            .map(NodeId::from_index)
            .ok_or_else(|| PipeError::UnknownNodeName(name.to_string()))
    }

    pub fn state(&self, id: NodeId) -> PipeResult<NodeState> {
        Ok(self.handle(id)?.status.state())
    }

    pub fn is_running(&self, id: NodeId) -> bool {
        self.handle(id).map(|h| h.thread.is_running()).unwrap_or(false)
    }

    pub fn processed(&self, id: NodeId) -> PipeResult<u64> {
        Ok(self.handle(id)?.status.processed())
    }

    /// Whether every node thread has left its loop.
    pub fn is_finished(&self) -> bool {
        self.nodes
            .iter()
            .all(|n| n.status.state() == NodeState::Stopped)
    }

    pub fn events(&self) -> &EngineEvents {
        &self.events
    }

    /// The graph rendering taken at start.
    pub fn render(&self) -> &str {
        &self.rendered
    }

    pub fn topology(&self) -> &TopologySnapshot {
        &self.topology
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl Drop for RunningGraph {
    fn drop(&mut self) {
        if !self.finished {
            self.request_stop();
            if let Err(err) = self.join_all() {
                tracing::error!("Graph '{}' did not stop cleanly: {}", self.name, err);
            }
        }
    }
}
