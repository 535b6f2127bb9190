//! Runner and channel helpers shared by the integration tests

use crossbeam_channel::{bounded, Receiver, Sender};
use readpipe::modbase::motif::find_motif_hits;
use readpipe::modbase::ModBaseParams;
use readpipe::pipeline::PipelineError;
use readpipe::stats::NamedStats;
use readpipe::Runner;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};

/// Probability of modification reported by [`RecordingRunner`]
pub const MOD_PROBABILITY: f32 = 0.75;

/// Create test channels with default size
pub fn create_test_channels<T>() -> (Sender<T>, Receiver<T>) {
    bounded(16)
}

/// Caller parameters with a small signal context
pub fn small_caller(motif: &str, offset: usize, mod_bases: &str, long_name: &str) -> ModBaseParams {
    ModBaseParams {
        motif: motif.to_string(),
        motif_offset: offset,
        mod_bases: mod_bases.to_string(),
        mod_long_names: vec![long_name.to_string()],
        base_mod_count: mod_bases.len(),
        context_before: 4,
        context_after: 4,
        bases_before: 1,
        bases_after: 1,
    }
}

pub fn cpg_caller() -> ModBaseParams {
    small_caller("CG", 0, "m", "5mC")
}

/// Runner that records every batch it is asked to score.
///
/// Each call checks that exactly `count` chunks were staged since the last
/// call, so a batch worker that stages a slot twice or skips one fails.
pub struct RecordingRunner {
    callers: Vec<ModBaseParams>,
    batch_size: usize,
    staged: Vec<AtomicUsize>,
    calls: Mutex<Vec<(usize, usize)>>,
    fail_on_call: Option<usize>,
    num_calls: AtomicUsize,
    held: Mutex<bool>,
    released: Condvar,
}

impl RecordingRunner {
    pub fn new(batch_size: usize) -> Self {
        Self::with_callers(vec![cpg_caller()], batch_size)
    }

    pub fn with_callers(callers: Vec<ModBaseParams>, batch_size: usize) -> Self {
        let staged = callers.iter().map(|_| AtomicUsize::new(0)).collect();
        Self {
            callers,
            batch_size,
            staged,
            calls: Mutex::new(Vec::new()),
            fail_on_call: None,
            num_calls: AtomicUsize::new(0),
            held: Mutex::new(false),
            released: Condvar::new(),
        }
    }

    /// Block every `call_chunks` until [`RecordingRunner::release`]
    pub fn hold(&self) {
        *self.held.lock().unwrap() = true;
    }

    pub fn release(&self) {
        *self.held.lock().unwrap() = false;
        self.released.notify_all();
    }

    /// Fail the `n`th call (0-based) and every call after it.
    pub fn fail_on_call(mut self, n: usize) -> Self {
        self.fail_on_call = Some(n);
        self
    }

    /// `(caller_id, count)` for every successful call, in call order
    pub fn calls(&self) -> Vec<(usize, usize)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn chunks_called(&self) -> usize {
        self.calls().iter().map(|(_, n)| n).sum()
    }
}

impl Runner for RecordingRunner {
    fn caller_count(&self) -> usize {
        self.callers.len()
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn caller_params(&self, caller_id: usize) -> ModBaseParams {
        self.callers[caller_id].clone()
    }

    fn scale_signal(&self, _: usize, raw: &[f32], _: &[u8], _: &[usize]) -> Vec<f32> {
        raw.to_vec()
    }

    fn motif_hits(&self, caller_id: usize, seq: &str) -> Vec<usize> {
        let params = &self.callers[caller_id];
        find_motif_hits(seq, &params.motif, params.motif_offset)
    }

    fn accept_chunk(&self, caller_id: usize, slot: usize, _: &[f32], _: &[f32]) {
        assert!(slot < self.batch_size, "slot {slot} beyond batch size");
        self.staged[caller_id].fetch_add(1, Ordering::SeqCst);
    }

    fn call_chunks(&self, caller_id: usize, count: usize) -> Result<Vec<Vec<f32>>, PipelineError> {
        let mut held = self.held.lock().unwrap();
        while *held {
            held = self.released.wait(held).unwrap();
        }
        drop(held);

        let n = self.num_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on_call.is_some_and(|fail| n >= fail) {
            return Err(PipelineError::Runner(format!("injected failure on call {n}")));
        }
        let staged = self.staged[caller_id].swap(0, Ordering::SeqCst);
        if staged != count || count == 0 || count > self.batch_size {
            return Err(PipelineError::Runner(format!(
                "caller {caller_id}: {staged} chunks staged, {count} called"
            )));
        }
        self.calls.lock().unwrap().push((caller_id, count));

        let mods = self.callers[caller_id].base_mod_count.max(1);
        let mut row = vec![1.0 - MOD_PROBABILITY];
        row.extend(std::iter::repeat(MOD_PROBABILITY / mods as f32).take(mods));
        Ok(vec![row; count])
    }

    fn restart(&self) {
        for staged in &self.staged {
            staged.store(0, Ordering::SeqCst);
        }
    }

    fn sample_stats(&self) -> NamedStats {
        let mut stats = NamedStats::new();
        stats.insert("calls".into(), self.calls.lock().unwrap().len() as f64);
        stats
    }
}
