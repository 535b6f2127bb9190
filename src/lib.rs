//! # readpipe: threaded read processing for nanopore basecalling
//!
//! Basecalled reads are pushed through a chain of nodes, each with a bounded
//! input queue and its own worker threads:
//!
//! ```text
//! reads ──► [DuplexReadTagging] ──► [ModBaseCaller] ──► sink
//! ```
//!
//! ## Architecture
//!
//! - **Pipeline**: `pipeline` holds the queue, node plumbing, built-in nodes
//!   and the executor that drives them
//! - **Modified bases**: `modbase` turns reads into context chunks and packs
//!   the scores back into per-read probability buffers
//! - **Runners**: `runner` is the seam to an inference backend; batches of
//!   chunks are handed to a [`runner::Runner`] and scored
//! - **Communication**: crossbeam channels carry finished reads out of the
//!   pipeline
//!
//! ## Example
//!
//! ```ignore
//! use readpipe::{config::PipelineConfig, pipeline::{nodes::ChannelSink, PipelineBuilder}};
//! use std::sync::Arc;
//!
//! let config = PipelineConfig::load("readpipe.toml")?;
//! let (sink, output) = ChannelSink::with_capacity(1000);
//! let (pipeline, _ids) = PipelineBuilder::new(config).build_with_prior_runners(Arc::new(sink))?;
//!
//! for read in reads {
//!     pipeline.push_message(read.into())?;
//! }
//! pipeline.terminate()?;
//! for message in output.try_iter() {
//!     // ...
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod modbase;
pub mod pipeline;
pub mod runner;
pub mod stats;
pub mod types;

// Re-export commonly used types
pub use config::PipelineConfig;
pub use error::{ReadPipeError, Result};
pub use pipeline::{Message, MessageSink, Pipeline, PipelineBuilder, PipelineError};
pub use runner::{PriorRunner, Runner};
pub use types::{BaseModInfo, Read, ReadRecord};
