//! Inference runner capability.
//!
//! The modbase caller node never computes scores itself. It stages chunks
//! into a [`Runner`] slot by slot and asks it to score a batch. Anything that
//! can do that (a GPU model, a remote service, the [`PriorRunner`] used by
//! the CLI and tests) plugs in here.
//!
//! A runner exposes one or more callers. Every runner handed to the same node
//! must expose the same callers in the same order; only the first runner's
//! parameters are consulted.

mod prior_runner;

pub use prior_runner::PriorRunner;

pub use crate::modbase::ModBaseParams;
use crate::pipeline::error::PipelineResult;
use crate::stats::NamedStats;

/// Opaque inference capability consumed by the modbase caller node.
///
/// Calls for a given `caller_id` on one runner come from a single batch
/// worker, so `accept_chunk` and `call_chunks` for that caller never race.
#[cfg_attr(test, mockall::automock)]
pub trait Runner: Send + Sync {
    fn caller_count(&self) -> usize;

    /// Maximum number of chunks per `call_chunks`.
    fn batch_size(&self) -> usize;

    fn caller_params(&self, caller_id: usize) -> ModBaseParams;

    /// Scale the raw signal for this caller's model. The result is indexed
    /// by the same sample positions as `raw`.
    fn scale_signal(
        &self,
        caller_id: usize,
        raw: &[f32],
        seq_ints: &[u8],
        seq_to_sig_map: &[usize],
    ) -> Vec<f32>;

    /// Sequence positions this caller should score, ascending.
    fn motif_hits(&self, caller_id: usize, seq: &str) -> Vec<usize>;

    /// Stage one chunk's inputs into batch slot `slot`.
    fn accept_chunk(&self, caller_id: usize, slot: usize, signal: &[f32], encoded_kmers: &[f32]);

    /// Score slots `0..count`. Returns one row per slot; each row holds the
    /// canonical state followed by this caller's modifications.
    fn call_chunks(&self, caller_id: usize, count: usize) -> PipelineResult<Vec<Vec<f32>>>;

    /// Drop any staged state ahead of a new input batch.
    fn restart(&self);

    fn sample_stats(&self) -> NamedStats;
}
