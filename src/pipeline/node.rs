//! Node abstraction for the pipeline.
//!
//! Each node owns a bounded input queue and a set of worker threads that
//! drain it. Nodes are chained through the [`MessageSink`] trait: a node's
//! downstream neighbour is just something it can push messages into.
//!
//! - **`MessageSink`** - what the pipeline and upstream nodes see.
//! - **`NodeBase`** - shared plumbing every node embeds (input queue, sink,
//!   lifecycle state, fatal error slot).
//! - **`WorkerPool`** - named OS threads joined together on termination.
//!
//! # Termination
//!
//! Terminating a node terminates its input queue. Workers drain what is left,
//! flush any held state, and exit. The node does not terminate its sink; the
//! pipeline does that next, in upstream-to-downstream order.
//!
//! # Fatal errors
//!
//! A worker that hits an unrecoverable error calls [`NodeBase::fail`]. The
//! error is kept for [`MessageSink::terminate`] to return, and the input queue
//! is terminated so that the upstream node's next push fails too. The failure
//! therefore travels to the head of the pipeline.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::message::Message;
use crate::pipeline::queue::BoundedQueue;
use crate::stats::{Counter, NamedStats};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

/// Lifecycle of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeState {
    #[default]
    Stopped,
    Running,
    /// Input terminated, workers still finishing.
    Draining,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeState::Stopped => write!(f, "stopped"),
            NodeState::Running => write!(f, "running"),
            NodeState::Draining => write!(f, "draining"),
        }
    }
}

/// Anything that accepts pipeline messages.
pub trait MessageSink: Send + Sync {
    /// Human-readable name of this node.
    fn name(&self) -> &str;

    /// Enqueue a message, blocking while the node's input is full.
    ///
    /// Fails with [`PipelineError::SinkTerminated`] once the node has been
    /// terminated or has failed.
    fn push_message(&self, msg: Message) -> PipelineResult<()>;

    /// Stop accepting input, drain, and join all workers.
    ///
    /// Returns the first fatal error any worker recorded.
    fn terminate(&self) -> PipelineResult<()>;

    /// Reset internal state and start accepting input again.
    fn restart(&self) -> PipelineResult<()>;

    fn state(&self) -> NodeState;

    fn sample_stats(&self) -> NamedStats;
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared plumbing embedded by every node.
pub struct NodeBase {
    name: String,
    input: BoundedQueue<Message>,
    sink: Option<Arc<dyn MessageSink>>,
    state: Mutex<NodeState>,
    error: Mutex<Option<PipelineError>>,
    messages_received: Counter,
    messages_sent: Counter,
}

impl NodeBase {
    pub fn new(
        name: impl Into<String>,
        capacity: usize,
        sink: Option<Arc<dyn MessageSink>>,
    ) -> Self {
        Self {
            name: name.into(),
            input: BoundedQueue::new(capacity),
            sink,
            state: Mutex::new(NodeState::Stopped),
            error: Mutex::new(None),
            messages_received: Counter::new(),
            messages_sent: Counter::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn input(&self) -> &BoundedQueue<Message> {
        &self.input
    }

    pub fn has_sink(&self) -> bool {
        self.sink.is_some()
    }

    pub fn state(&self) -> NodeState {
        *lock(&self.state)
    }

    pub fn set_state(&self, state: NodeState) {
        let mut current = lock(&self.state);
        if *current != state {
            tracing::trace!("Node '{}': {} -> {}", self.name, *current, state);
            *current = state;
        }
    }

    /// Enqueue into this node's input queue.
    pub fn push_message(&self, msg: Message) -> PipelineResult<()> {
        self.input
            .push(msg)
            .map_err(|_| PipelineError::SinkTerminated(self.name.clone()))?;
        self.messages_received.inc();
        Ok(())
    }

    /// Blocking pop from the input queue. `None` once terminated and drained.
    pub fn get_input_message(&self) -> Option<Message> {
        self.input.pop()
    }

    /// Forward a message downstream. A node without a sink discards it.
    pub fn send_message_to_sink(&self, msg: Message) -> PipelineResult<()> {
        match &self.sink {
            Some(sink) => {
                sink.push_message(msg)?;
                self.messages_sent.inc();
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Record a fatal error and stop accepting input.
    ///
    /// Only the first error is kept; later ones are logged and dropped.
    pub fn fail(&self, err: PipelineError) {
        {
            let mut slot = lock(&self.error);
            if slot.is_none() {
                tracing::error!("Node '{}' failed: {}", self.name, err);
                *slot = Some(err);
            } else {
                tracing::debug!("Node '{}' additional error ignored: {}", self.name, err);
            }
        }
        self.input.terminate();
    }

    pub fn has_failed(&self) -> bool {
        lock(&self.error).is_some()
    }

    pub fn take_error(&self) -> Option<PipelineError> {
        lock(&self.error).take()
    }

    /// Finish a worker: a returned error becomes the node's fatal error.
    pub fn finish_worker(&self, result: PipelineResult<()>) {
        if let Err(err) = result {
            self.fail(err);
        }
    }

    /// Terminate the input queue and mark the node as draining.
    pub fn begin_termination(&self) {
        self.input.terminate();
        if self.state() == NodeState::Running {
            self.set_state(NodeState::Draining);
        }
    }

    /// Combine the worker join result with any recorded fatal error and
    /// mark the node stopped.
    pub fn end_termination(&self, joined: PipelineResult<()>) -> PipelineResult<()> {
        self.set_state(NodeState::Stopped);
        match self.take_error() {
            Some(err) => Err(err),
            None => joined,
        }
    }

    /// Clear the input queue and error slot ahead of a restart.
    pub fn reset(&self) {
        self.input.restart();
        lock(&self.error).take();
    }

    /// Queue depth and message counters shared by every node.
    pub fn base_stats(&self) -> NamedStats {
        let mut stats = NamedStats::new();
        stats.insert("input_queue_depth".into(), self.input.len() as f64);
        stats.insert("input_queue_capacity".into(), self.input.capacity() as f64);
        stats.insert(
            "messages_received".into(),
            self.messages_received.get() as f64,
        );
        stats.insert("messages_sent".into(), self.messages_sent.get() as f64);
        stats
    }
}

impl fmt::Debug for NodeBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeBase")
            .field("name", &self.name)
            .field("input", &self.input)
            .field("has_sink", &self.sink.is_some())
            .field("state", &self.state())
            .finish()
    }
}

/// Named worker threads joined as a group.
#[derive(Default)]
pub struct WorkerPool {
    handles: Vec<(String, JoinHandle<()>)>,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a named worker thread.
    pub fn spawn<F>(&mut self, name: impl Into<String>, f: F) -> PipelineResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let name = name.into();
        let handle = thread::Builder::new().name(name.clone()).spawn(f)?;
        self.handles.push((name, handle));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Join every worker. A panicked worker is reported as
    /// [`PipelineError::WorkerPanicked`]; the first one wins.
    pub fn join_all(&mut self) -> PipelineResult<()> {
        let mut first_err = None;
        for (name, handle) in self.handles.drain(..) {
            if handle.join().is_err() {
                tracing::error!("Worker '{}' panicked", name);
                first_err.get_or_insert(PipelineError::WorkerPanicked(name));
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Read;

    #[test]
    fn test_push_after_fail_reports_sink_terminated() {
        let base = NodeBase::new("test", 4, None);
        base.push_message(Message::from(Read::new("r1", "A"))).unwrap();
        base.fail(PipelineError::Runner("boom".into()));
        base.fail(PipelineError::Runner("second".into()));

        let err = base
            .push_message(Message::from(Read::new("r2", "A")))
            .unwrap_err();
        assert!(matches!(err, PipelineError::SinkTerminated(name) if name == "test"));

        // Queued input is still drainable after a failure.
        assert!(base.get_input_message().is_some());
        assert!(base.get_input_message().is_none());

        match base.end_termination(Ok(())) {
            Err(PipelineError::Runner(msg)) => assert_eq!(msg, "boom"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(!base.has_failed());
    }

    #[test]
    fn test_node_without_sink_discards() {
        let base = NodeBase::new("null", 1, None);
        assert!(!base.has_sink());
        base.send_message_to_sink(Message::from(Read::new("r1", "A")))
            .unwrap();
        assert_eq!(base.base_stats()["messages_sent"], 0.0);
    }

    #[test]
    fn test_state_transitions() {
        let base = NodeBase::new("n", 1, None);
        assert_eq!(base.state(), NodeState::Stopped);
        base.set_state(NodeState::Running);
        base.begin_termination();
        assert_eq!(base.state(), NodeState::Draining);
        base.end_termination(Ok(())).unwrap();
        assert_eq!(base.state(), NodeState::Stopped);

        base.reset();
        assert!(!base.input().is_terminated());
    }

    #[test]
    fn test_worker_pool_reports_panics() {
        let mut pool = WorkerPool::new();
        pool.spawn("ok", || {}).unwrap();
        pool.spawn("bad", || panic!("worker blew up")).unwrap();
        assert_eq!(pool.len(), 2);

        let err = pool.join_all().unwrap_err();
        assert!(matches!(err, PipelineError::WorkerPanicked(name) if name == "bad"));
        assert!(pool.is_empty());
        assert!(pool.join_all().is_ok());
    }
}
