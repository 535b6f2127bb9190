//! Model-free runner that scores every chunk with a fixed prior.
//!
//! Useful for exercising the pipeline without an inference backend: chunk
//! generation, batching and reconciliation all run for real, and the
//! resulting probabilities are predictable.

use super::{ModBaseParams, Runner};
use crate::modbase::motif::find_motif_hits;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::node::lock;
use crate::stats::{Counter, NamedStats};
use std::sync::Mutex;

/// Scale factor turning a median absolute deviation into a standard deviation
/// estimate for normally distributed data.
const MAD_TO_SD: f32 = 1.4826;

pub struct PriorRunner {
    callers: Vec<ModBaseParams>,
    batch_size: usize,
    mod_probability: f32,
    /// Per caller, which batch slots hold a staged chunk.
    slots: Vec<Mutex<Vec<bool>>>,
    chunks_accepted: Counter,
    batches_called: Counter,
}

impl PriorRunner {
    pub fn new(callers: Vec<ModBaseParams>, batch_size: usize) -> PipelineResult<Self> {
        if callers.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "runner needs at least one caller".into(),
            ));
        }
        if batch_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "runner batch size must be positive".into(),
            ));
        }
        for params in &callers {
            params.canonical_base()?;
        }

        let slots = callers
            .iter()
            .map(|_| Mutex::new(vec![false; batch_size]))
            .collect();
        Ok(Self {
            callers,
            batch_size,
            mod_probability: 0.0,
            slots,
            chunks_accepted: Counter::new(),
            batches_called: Counter::new(),
        })
    }

    /// Total modification probability reported for every chunk, split evenly
    /// across the caller's modifications. Clamped to `[0, 1]`.
    pub fn with_mod_probability(mut self, p: f32) -> Self {
        self.mod_probability = if p.is_nan() { 0.0 } else { p.clamp(0.0, 1.0) };
        self
    }

    fn params(&self, caller_id: usize) -> PipelineResult<&ModBaseParams> {
        self.callers
            .get(caller_id)
            .ok_or_else(|| PipelineError::Runner(format!("unknown caller {caller_id}")))
    }

    fn score_row(&self, params: &ModBaseParams) -> Vec<f32> {
        let mods = params.base_mod_count;
        let mut row = Vec::with_capacity(mods + 1);
        if mods == 0 {
            row.push(1.0);
            return row;
        }
        row.push(1.0 - self.mod_probability);
        row.extend(std::iter::repeat(self.mod_probability / mods as f32).take(mods));
        row
    }
}

fn median(values: &mut [f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_unstable_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// Median/MAD normalisation.
fn scale_median_mad(raw: &[f32]) -> Vec<f32> {
    let mut scratch = raw.to_vec();
    let shift = median(&mut scratch);
    for v in &mut scratch {
        *v = (*v - shift).abs();
    }
    let scale = median(&mut scratch) * MAD_TO_SD;
    if scale > f32::EPSILON {
        raw.iter().map(|v| (v - shift) / scale).collect()
    } else {
        raw.iter().map(|v| v - shift).collect()
    }
}

impl Runner for PriorRunner {
    fn caller_count(&self) -> usize {
        self.callers.len()
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn caller_params(&self, caller_id: usize) -> ModBaseParams {
        self.callers.get(caller_id).cloned().unwrap_or_default()
    }

    fn scale_signal(
        &self,
        _caller_id: usize,
        raw: &[f32],
        _seq_ints: &[u8],
        _seq_to_sig_map: &[usize],
    ) -> Vec<f32> {
        scale_median_mad(raw)
    }

    fn motif_hits(&self, caller_id: usize, seq: &str) -> Vec<usize> {
        match self.callers.get(caller_id) {
            Some(params) => find_motif_hits(seq, &params.motif, params.motif_offset),
            None => Vec::new(),
        }
    }

    fn accept_chunk(&self, caller_id: usize, slot: usize, _signal: &[f32], _encoded_kmers: &[f32]) {
        let Some(slots) = self.slots.get(caller_id) else {
            tracing::warn!("PriorRunner: chunk for unknown caller {}", caller_id);
            return;
        };
        match lock(slots).get_mut(slot) {
            Some(filled) => {
                *filled = true;
                self.chunks_accepted.inc();
            }
            None => tracing::warn!("PriorRunner: slot {} beyond batch size", slot),
        }
    }

    fn call_chunks(&self, caller_id: usize, count: usize) -> PipelineResult<Vec<Vec<f32>>> {
        let params = self.params(caller_id)?;
        if count > self.batch_size {
            return Err(PipelineError::Runner(format!(
                "batch of {count} exceeds batch size {}",
                self.batch_size
            )));
        }

        let mut slots = lock(&self.slots[caller_id]);
        if let Some(empty) = slots[..count].iter().position(|filled| !filled) {
            return Err(PipelineError::Runner(format!(
                "caller {caller_id}: slot {empty} called before a chunk was accepted"
            )));
        }
        slots[..count].fill(false);
        drop(slots);

        self.batches_called.inc();
        let row = self.score_row(params);
        Ok(vec![row; count])
    }

    fn restart(&self) {
        for slots in &self.slots {
            lock(slots).fill(false);
        }
    }

    fn sample_stats(&self) -> NamedStats {
        let mut stats = NamedStats::new();
        stats.insert(
            "chunks_accepted".into(),
            self.chunks_accepted.get() as f64,
        );
        stats.insert(
            "batches_called".into(),
            self.batches_called.get() as f64,
        );
        stats
    }
}
