//! Built-in pipeline node implementations.

pub mod channel_sink;
pub mod duplex_tagging;
pub mod modbase_caller;
pub mod null_sink;

pub use channel_sink::ChannelSink;
pub use duplex_tagging::{DuplexReadTaggingNode, ParentTracker};
pub use modbase_caller::{ModBaseCallerNode, ModBaseCallerOptions, ModBaseChunk, FORCE_TIMEOUT};
pub use null_sink::NullNode;
