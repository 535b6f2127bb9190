//! ChannelSink - hands messages to a consumer thread via crossbeam channel.
//!
//! The channel is bounded, so a slow consumer stalls the pipeline the same
//! way a full node input queue would. The consumer sees the channel
//! disconnect once every handle to the sink has been dropped.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::message::Message;
use crate::pipeline::node::{MessageSink, NodeState};
use crate::stats::{Counter, NamedStats};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};

pub struct ChannelSink {
    tx: Sender<Message>,
    open: AtomicBool,
    reads_sent: Counter,
    control_sent: Counter,
}

impl ChannelSink {
    pub const NAME: &'static str = "channel_sink";

    pub fn new(tx: Sender<Message>) -> Self {
        Self {
            tx,
            open: AtomicBool::new(true),
            reads_sent: Counter::new(),
            control_sent: Counter::new(),
        }
    }

    /// Create a sink together with the receiving end of a channel of `capacity`.
    pub fn with_capacity(capacity: usize) -> (Self, Receiver<Message>) {
        let (tx, rx) = bounded(capacity.max(1));
        (Self::new(tx), rx)
    }
}

impl MessageSink for ChannelSink {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn push_message(&self, msg: Message) -> PipelineResult<()> {
        if !self.open.load(Ordering::Acquire) {
            return Err(PipelineError::SinkTerminated(Self::NAME.into()));
        }
        let is_read = msg.is_read();
        self.tx.send(msg).map_err(|_| {
            tracing::warn!("{}: consumer hung up", Self::NAME);
            PipelineError::SinkTerminated(Self::NAME.into())
        })?;
        if is_read {
            self.reads_sent.inc();
        } else {
            self.control_sent.inc();
        }
        Ok(())
    }

    fn terminate(&self) -> PipelineResult<()> {
        self.open.store(false, Ordering::Release);
        Ok(())
    }

    fn restart(&self) -> PipelineResult<()> {
        self.open.store(true, Ordering::Release);
        Ok(())
    }

    fn state(&self) -> NodeState {
        if self.open.load(Ordering::Acquire) {
            NodeState::Running
        } else {
            NodeState::Stopped
        }
    }

    fn sample_stats(&self) -> NamedStats {
        let mut stats = NamedStats::new();
        stats.insert("reads_sent".into(), self.reads_sent.get() as f64);
        stats.insert("control_sent".into(), self.control_sent.get() as f64);
        stats.insert("channel_depth".into(), self.tx.len() as f64);
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::message::ControlMessage;
    use crate::types::Read;

    #[test]
    fn test_forwards_in_order() {
        let (sink, rx) = ChannelSink::with_capacity(8);
        sink.push_message(Read::new("a", "A").into()).unwrap();
        sink.push_message(ControlMessage::BatchBoundary { batch_id: 1 }.into())
            .unwrap();

        assert_eq!(rx.recv().unwrap().into_read().unwrap().read_id, "a");
        assert!(matches!(
            rx.recv().unwrap(),
            Message::Control(ControlMessage::BatchBoundary { batch_id: 1 })
        ));
        let stats = sink.sample_stats();
        assert_eq!(stats["reads_sent"], 1.0);
        assert_eq!(stats["control_sent"], 1.0);
    }

    #[test]
    fn test_rejects_after_terminate() {
        let (sink, _rx) = ChannelSink::with_capacity(1);
        sink.terminate().unwrap();
        assert_eq!(sink.state(), NodeState::Stopped);
        assert!(sink.push_message(Read::new("a", "A").into()).is_err());
        sink.restart().unwrap();
        sink.push_message(Read::new("a", "A").into()).unwrap();
    }

    #[test]
    fn test_dropped_receiver_is_an_error() {
        let (sink, rx) = ChannelSink::with_capacity(1);
        drop(rx);
        let err = sink.push_message(Read::new("a", "A").into()).unwrap_err();
        assert!(matches!(err, PipelineError::SinkTerminated(_)));
    }
}
