//! Messages carried between pipeline nodes.

use crate::types::Read;
use std::sync::Arc;

/// Out-of-band notifications that travel alongside reads.
///
/// Processing nodes never inspect these; they are forwarded unchanged to the
/// next sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Marks the end of an upstream input batch.
    BatchBoundary { batch_id: u64 },
    /// Free-form annotation, e.g. a run identifier.
    Annotation(String),
}

/// Unit of work flowing through node input queues.
#[derive(Debug, Clone)]
pub enum Message {
    Read(Arc<Read>),
    Control(ControlMessage),
}

impl Message {
    pub fn as_read(&self) -> Option<&Arc<Read>> {
        match self {
            Message::Read(read) => Some(read),
            Message::Control(_) => None,
        }
    }

    pub fn into_read(self) -> Option<Arc<Read>> {
        match self {
            Message::Read(read) => Some(read),
            Message::Control(_) => None,
        }
    }

    pub fn is_read(&self) -> bool {
        matches!(self, Message::Read(_))
    }
}

impl From<Arc<Read>> for Message {
    fn from(read: Arc<Read>) -> Self {
        Message::Read(read)
    }
}

impl From<Read> for Message {
    fn from(read: Read) -> Self {
        Message::Read(Arc::new(read))
    }
}

impl From<ControlMessage> for Message {
    fn from(msg: ControlMessage) -> Self {
        Message::Control(msg)
    }
}
