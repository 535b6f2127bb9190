//! Node-based read processing pipeline.
//!
//! Reads flow through a chain of nodes, each with its own bounded input
//! queue and worker threads. A node forwards what it produces to the next
//! node's input; the last node hands reads to a terminal sink.
//!
//! # Architecture
//!
//! ```text
//! [DuplexReadTagging] ──► [ModBaseCaller] ──► [ChannelSink | NullNode]
//! ```
//!
//! # Design
//!
//! - **Bounded queues everywhere** - a full queue blocks its producer; that is
//!   the only backpressure.
//! - **Shared reads** - reads travel as `Arc<Read>`; per-read results are
//!   written through interior mutability.
//! - **Passthrough** - control messages are forwarded untouched by every node.
//! - **Cooperative shutdown** - terminating a node terminates its input queue
//!   and joins its workers once they have drained.

pub mod error;
pub mod executor;
pub mod id;
pub mod message;
pub mod node;
pub mod nodes;
pub mod queue;

pub use error::{PipelineError, PipelineResult};
pub use executor::{Pipeline, PipelineBuilder, PipelineNodeIds};
pub use id::NodeId;
pub use message::{ControlMessage, Message};
pub use node::{MessageSink, NodeBase, NodeState, WorkerPool};
pub use queue::{BoundedQueue, QueueStatus, QueueTerminated};
