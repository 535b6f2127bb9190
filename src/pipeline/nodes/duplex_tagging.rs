//! DuplexReadTagging node - releases simplex parent reads alongside their
//! duplex offspring.
//!
//! Duplex reads and their two simplex parents can arrive in either order.
//! The node forwards every read exactly once:
//!
//! - Plain reads pass straight through.
//! - A duplex read is forwarded immediately. Each parent named in its id is
//!   released right away if already held, otherwise remembered as wanted.
//! - A parent read is forwarded immediately if a duplex already asked for it,
//!   otherwise held until one does.
//!
//! At end of stream every parent still held never met its duplex. Its
//! `is_duplex_parent` flag is cleared and it is forwarded.
//!
//! A parent referenced by two different duplex reads is only forwarded once.
//! Nothing upstream rules that case out, so the node tracks processed parents.

use crate::pipeline::error::PipelineResult;
use crate::pipeline::message::Message;
use crate::pipeline::node::{lock, MessageSink, NodeBase, NodeState, WorkerPool};
use crate::stats::{Counter, NamedStats};
use crate::types::Read;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

/// Default input queue capacity.
pub const DEFAULT_INPUT_CAPACITY: usize = 1000;

/// Pairing state for duplex tagging, independent of any threading.
#[derive(Debug, Default)]
pub struct ParentTracker {
    /// Parent ids requested by a duplex read that have not arrived yet.
    wanted: HashSet<String>,
    /// Parent reads that arrived before any duplex asked for them.
    available: BTreeMap<String, Arc<Read>>,
    /// Parent ids already forwarded.
    processed: HashSet<String>,
}

impl ParentTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one read and return the reads to forward, in forwarding order.
    ///
    /// Fails only for a duplex read whose id does not name two parents.
    pub fn process(&mut self, read: Arc<Read>) -> PipelineResult<Vec<Arc<Read>>> {
        if read.is_duplex {
            let (template, complement) = read.duplex_parent_ids()?;
            let parent_ids = [template.to_owned(), complement.to_owned()];

            let mut out = Vec::with_capacity(3);
            out.push(read);
            for id in parent_ids {
                if self.processed.contains(&id) {
                    continue;
                }
                if let Some(parent) = self.available.remove(&id) {
                    out.push(parent);
                    self.processed.insert(id);
                } else {
                    self.wanted.insert(id);
                }
            }
            return Ok(out);
        }

        if !read.is_duplex_parent() {
            return Ok(vec![read]);
        }

        if self.wanted.remove(&read.read_id) {
            self.processed.insert(read.read_id.clone());
            Ok(vec![read])
        } else {
            self.available.insert(read.read_id.clone(), read);
            Ok(Vec::new())
        }
    }

    /// Release every parent whose duplex never arrived, clearing its parent flag.
    /// Reads come out sorted by id.
    pub fn drain_orphans(&mut self) -> Vec<Arc<Read>> {
        let orphans: Vec<_> = std::mem::take(&mut self.available).into_values().collect();
        for read in &orphans {
            read.set_duplex_parent(false);
        }
        orphans
    }

    pub fn clear(&mut self) {
        self.wanted.clear();
        self.available.clear();
        self.processed.clear();
    }

    /// Parents held waiting for their duplex.
    pub fn waiting(&self) -> usize {
        self.available.len()
    }

    pub fn wanted(&self) -> usize {
        self.wanted.len()
    }

    pub fn processed(&self) -> usize {
        self.processed.len()
    }
}

struct TaggingInner {
    base: NodeBase,
    tracker: Mutex<ParentTracker>,
    orphans_released: Counter,
}

impl TaggingInner {
    fn worker_thread(&self) -> PipelineResult<()> {
        while let Some(message) = self.base.get_input_message() {
            let read = match message {
                Message::Read(read) => read,
                other => {
                    self.base.send_message_to_sink(other)?;
                    continue;
                }
            };

            let ready = lock(&self.tracker).process(read)?;
            for read in ready {
                self.base.send_message_to_sink(Message::Read(read))?;
            }
        }

        let orphans = lock(&self.tracker).drain_orphans();
        if !orphans.is_empty() {
            tracing::debug!(
                "{}: releasing {} parent reads without a duplex",
                self.base.name(),
                orphans.len()
            );
        }
        for read in orphans {
            self.orphans_released.inc();
            self.base.send_message_to_sink(Message::Read(read))?;
        }
        Ok(())
    }
}

/// Single-worker node that pairs duplex reads with their simplex parents.
pub struct DuplexReadTaggingNode {
    inner: Arc<TaggingInner>,
    workers: Mutex<WorkerPool>,
}

impl DuplexReadTaggingNode {
    pub const NAME: &'static str = "duplex_tagging";

    pub fn new(sink: Arc<dyn MessageSink>) -> PipelineResult<Self> {
        Self::with_capacity(sink, DEFAULT_INPUT_CAPACITY)
    }

    pub fn with_capacity(sink: Arc<dyn MessageSink>, capacity: usize) -> PipelineResult<Self> {
        let node = Self {
            inner: Arc::new(TaggingInner {
                base: NodeBase::new(Self::NAME, capacity, Some(sink)),
                tracker: Mutex::new(ParentTracker::new()),
                orphans_released: Counter::new(),
            }),
            workers: Mutex::new(WorkerPool::new()),
        };
        node.start_threads()?;
        Ok(node)
    }

    fn start_threads(&self) -> PipelineResult<()> {
        let inner = self.inner.clone();
        lock(&self.workers).spawn(format!("{}-worker", Self::NAME), move || {
            inner.base.finish_worker(inner.worker_thread());
        })?;
        self.inner.base.set_state(NodeState::Running);
        tracing::info!("{} started", Self::NAME);
        Ok(())
    }
}

impl MessageSink for DuplexReadTaggingNode {
    fn name(&self) -> &str {
        self.inner.base.name()
    }

    fn push_message(&self, msg: Message) -> PipelineResult<()> {
        self.inner.base.push_message(msg)
    }

    fn terminate(&self) -> PipelineResult<()> {
        self.inner.base.begin_termination();
        let joined = lock(&self.workers).join_all();
        let result = self.inner.base.end_termination(joined);
        tracing::info!("{} stopped", Self::NAME);
        result
    }

    fn restart(&self) -> PipelineResult<()> {
        if self.state() != NodeState::Stopped {
            self.terminate()?;
        }
        self.inner.base.reset();
        lock(&self.inner.tracker).clear();
        self.inner.orphans_released.reset();
        self.start_threads()
    }

    fn state(&self) -> NodeState {
        self.inner.base.state()
    }

    fn sample_stats(&self) -> NamedStats {
        let mut stats = self.inner.base.base_stats();
        let tracker = lock(&self.inner.tracker);
        stats.insert("parents_waiting".into(), tracker.waiting() as f64);
        stats.insert("parents_wanted".into(), tracker.wanted() as f64);
        stats.insert("parents_processed".into(), tracker.processed() as f64);
        stats.insert(
            "orphan_parents_released".into(),
            self.inner.orphans_released.get() as f64,
        );
        stats
    }
}

impl Drop for DuplexReadTaggingNode {
    fn drop(&mut self) {
        if self.state() != NodeState::Stopped {
            if let Err(err) = self.terminate() {
                tracing::warn!("{} terminated with error on drop: {}", Self::NAME, err);
            }
        }
    }
}
