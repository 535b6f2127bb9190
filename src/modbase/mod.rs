//! Modified-base calling support.
//!
//! - [`encoder`] - signal/sequence maps, context windows, probability bytes.
//! - [`motif`] - motif search and the motif context string.
//! - [`ModBaseParams`] - what a caller model declares about itself.
//! - [`ModBaseLayout`] - how every caller's states are packed into a read's
//!   `base_mod_probs` buffer.
//!
//! # Probability layout
//!
//! Each sequence position owns `num_states` bytes. The canonical bases are
//! laid out in `ACGT` order, each followed by the modifications called on
//! it, so with a single 5mC caller (`C` + `m`) the layout per position is
//! `[A, C, m, G, T]` and `num_states == 5`.

pub mod encoder;
pub mod motif;

use crate::modbase::encoder::{base_id, encode_probability, BASES, NUM_BASES};
use crate::modbase::motif::ModBaseContext;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::types::{BaseModInfo, Read};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Probability byte written for the canonical base at every position before
/// any chunk is called.
pub const CANONICAL_PRIOR: u8 = u8::MAX;

/// Model metadata for one modification caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModBaseParams {
    /// Sequence motif the caller is run on, e.g. `"CG"`.
    pub motif: String,
    /// Index into `motif` of the base that may be modified.
    pub motif_offset: usize,
    /// Single-letter modification codes, e.g. `"m"` or `"hm"`.
    pub mod_bases: String,
    pub mod_long_names: Vec<String>,
    /// Number of modifications called (normally `mod_bases.len()`).
    pub base_mod_count: usize,
    /// Signal samples before the modified base in each chunk.
    pub context_before: usize,
    /// Signal samples from the modified base onwards in each chunk.
    pub context_after: usize,
    /// Bases before the current base in each encoded k-mer.
    pub bases_before: usize,
    /// Bases after the current base in each encoded k-mer.
    pub bases_after: usize,
}

impl Default for ModBaseParams {
    fn default() -> Self {
        Self {
            motif: "CG".into(),
            motif_offset: 0,
            mod_bases: "m".into(),
            mod_long_names: vec!["5mC".into()],
            base_mod_count: 1,
            context_before: 50,
            context_after: 50,
            bases_before: 2,
            bases_after: 2,
        }
    }
}

impl ModBaseParams {
    /// The canonical base this caller modifies.
    pub fn canonical_base(&self) -> PipelineResult<u8> {
        self.motif
            .as_bytes()
            .get(self.motif_offset)
            .copied()
            .filter(|&b| base_id(b).is_some())
            .ok_or_else(|| {
                PipelineError::InvalidConfig(format!(
                    "invalid base in modbase model metadata: motif '{}' offset {}",
                    self.motif, self.motif_offset
                ))
            })
    }

    /// Width of one chunk in signal samples.
    pub fn context_samples(&self) -> usize {
        self.context_before + self.context_after
    }
}

/// Packing of modification states into per-read probability buffers.
#[derive(Debug, Clone)]
pub struct ModBaseLayout {
    info: Arc<BaseModInfo>,
    base_prob_offsets: [usize; NUM_BASES],
    num_states: usize,
}

impl ModBaseLayout {
    /// Derive the layout from every caller's parameters.
    ///
    /// Fails if a caller's motif does not put a canonical base at its offset.
    pub fn from_params(params: &[ModBaseParams]) -> PipelineResult<Self> {
        let mut alphabets: [String; NUM_BASES] = BASES.map(|b| (b as char).to_string());
        let mut long_names: [Vec<String>; NUM_BASES] = Default::default();
        let mut base_counts = [1usize; NUM_BASES];
        let mut context = ModBaseContext::new();
        let mut num_states = NUM_BASES;

        for p in params {
            let base = p.canonical_base()?;
            // canonical_base only returns ACGT.
            let id = base_id(base).unwrap_or_default();
            alphabets[id].push_str(&p.mod_bases);
            long_names[id] = p.mod_long_names.clone();
            base_counts[id] = p.base_mod_count + 1;
            num_states += p.base_mod_count;
            context.set_context(&p.motif, p.motif_offset)?;
        }

        let mut base_prob_offsets = [0usize; NUM_BASES];
        for b in 1..NUM_BASES {
            base_prob_offsets[b] = base_prob_offsets[b - 1] + base_counts[b - 1];
        }

        let info = BaseModInfo {
            alphabet: alphabets.concat(),
            long_names: long_names.concat().join(" "),
            context: context.encode(),
        };

        Ok(Self {
            info: Arc::new(info),
            base_prob_offsets,
            num_states,
        })
    }

    pub fn info(&self) -> &Arc<BaseModInfo> {
        &self.info
    }

    pub fn num_states(&self) -> usize {
        self.num_states
    }

    pub fn base_prob_offsets(&self) -> [usize; NUM_BASES] {
        self.base_prob_offsets
    }

    /// States available to `base`: the canonical state plus its modifications.
    fn span(&self, id: usize) -> usize {
        let next = self
            .base_prob_offsets
            .get(id + 1)
            .copied()
            .unwrap_or(self.num_states);
        next - self.base_prob_offsets[id]
    }

    /// Reset `read`'s probabilities to "all canonical" and attach the alphabet.
    ///
    /// Fails on any base outside `ACGT`.
    pub fn init_read(&self, read: &Read) -> PipelineResult<()> {
        let num_states = self.num_states;
        read.with_base_mod_probs(|probs| {
            probs.clear();
            probs.resize(read.seq.len() * num_states, 0);
            for (i, base) in read.seq.bytes().enumerate() {
                let id = base_id(base).ok_or_else(|| PipelineError::InvalidSequence {
                    read_id: read.read_id.clone(),
                    position: i,
                    base: base as char,
                })?;
                probs[i * num_states + self.base_prob_offsets[id]] = CANONICAL_PRIOR;
            }
            Ok::<(), PipelineError>(())
        })?;
        read.set_base_mod_info(self.info.clone());
        Ok(())
    }

    /// Write one chunk's scores for position `pos` of `read`.
    ///
    /// Scores beyond the states available to the base at `pos` are ignored.
    /// Returns the number of bytes written.
    pub fn write_scores(&self, read: &Read, pos: usize, scores: &[f32]) -> usize {
        let Some(id) = read.seq.as_bytes().get(pos).copied().and_then(base_id) else {
            return 0;
        };
        let start = self.num_states * pos + self.base_prob_offsets[id];
        let n = scores.len().min(self.span(id));
        read.with_base_mod_probs(|probs| {
            let Some(dst) = probs.get_mut(start..start + n) else {
                return 0;
            };
            for (byte, &score) in dst.iter_mut().zip(scores) {
                *byte = encode_probability(score);
            }
            n
        })
    }
}
