//! NullNode - terminal node that drains and discards everything it receives.

use crate::pipeline::error::PipelineResult;
use crate::pipeline::message::Message;
use crate::pipeline::node::{lock, MessageSink, NodeBase, NodeState, WorkerPool};
use crate::stats::{Counter, NamedStats};
use std::sync::{Arc, Mutex};

const DEFAULT_CAPACITY: usize = 1000;
const DEFAULT_WORKERS: usize = 4;

struct NullInner {
    base: NodeBase,
    reads_discarded: Counter,
}

impl NullInner {
    fn worker_thread(&self) -> PipelineResult<()> {
        while let Some(message) = self.base.get_input_message() {
            if let Message::Read(_) = &message {
                self.reads_discarded.inc();
            }
            // No sink: forwarding is a no-op.
            self.base.send_message_to_sink(message)?;
        }
        Ok(())
    }
}

/// Sink-less node used to terminate a pipeline when the output is not needed.
pub struct NullNode {
    inner: Arc<NullInner>,
    num_workers: usize,
    workers: Mutex<WorkerPool>,
}

impl NullNode {
    pub const NAME: &'static str = "null";

    pub fn new() -> PipelineResult<Self> {
        Self::with_workers(DEFAULT_WORKERS)
    }

    pub fn with_workers(num_workers: usize) -> PipelineResult<Self> {
        let node = Self {
            inner: Arc::new(NullInner {
                base: NodeBase::new(Self::NAME, DEFAULT_CAPACITY, None),
                reads_discarded: Counter::new(),
            }),
            num_workers: num_workers.max(1),
            workers: Mutex::new(WorkerPool::new()),
        };
        node.start_threads()?;
        Ok(node)
    }

    fn start_threads(&self) -> PipelineResult<()> {
        let mut workers = lock(&self.workers);
        for i in 0..self.num_workers {
            let inner = self.inner.clone();
            workers.spawn(format!("{}-worker-{i}", Self::NAME), move || {
                inner.base.finish_worker(inner.worker_thread());
            })?;
        }
        self.inner.base.set_state(NodeState::Running);
        Ok(())
    }
}

impl MessageSink for NullNode {
    fn name(&self) -> &str {
        self.inner.base.name()
    }

    fn push_message(&self, msg: Message) -> PipelineResult<()> {
        self.inner.base.push_message(msg)
    }

    fn terminate(&self) -> PipelineResult<()> {
        self.inner.base.begin_termination();
        let joined = lock(&self.workers).join_all();
        self.inner.base.end_termination(joined)
    }

    fn restart(&self) -> PipelineResult<()> {
        if self.state() != NodeState::Stopped {
            self.terminate()?;
        }
        self.inner.base.reset();
        self.start_threads()
    }

    fn state(&self) -> NodeState {
        self.inner.base.state()
    }

    fn sample_stats(&self) -> NamedStats {
        let mut stats = self.inner.base.base_stats();
        stats.insert(
            "reads_discarded".into(),
            self.inner.reads_discarded.get() as f64,
        );
        stats
    }
}

impl Drop for NullNode {
    fn drop(&mut self) {
        if self.state() != NodeState::Stopped {
            let _ = self.terminate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::message::ControlMessage;
    use crate::types::Read;

    #[test]
    fn test_discards_everything() {
        let node = NullNode::with_workers(2).unwrap();
        for i in 0..50 {
            node.push_message(Read::new(format!("r{i}"), "A").into())
                .unwrap();
        }
        node.push_message(ControlMessage::Annotation("x".into()).into())
            .unwrap();
        node.terminate().unwrap();

        let stats = node.sample_stats();
        assert_eq!(stats["reads_discarded"], 50.0);
        assert_eq!(stats["messages_received"], 51.0);
        assert_eq!(stats["messages_sent"], 0.0);
        assert_eq!(node.state(), NodeState::Stopped);
    }

    #[test]
    fn test_restart_accepts_input_again() {
        let node = NullNode::with_workers(1).unwrap();
        node.terminate().unwrap();
        assert!(node.push_message(Read::new("r", "A").into()).is_err());
        node.restart().unwrap();
        node.push_message(Read::new("r", "A").into()).unwrap();
        node.terminate().unwrap();
    }
}
