//! ModBaseCaller node - splits reads into per-motif chunks, batches them
//! through a [`Runner`], and writes the scores back onto each read.
//!
//! # Workers
//!
//! ```text
//!                 ┌─► chunk queue (caller 0) ─► batch worker(s) ─┐
//! input ─► input ─┤                                               ├─► processed ─► output ─► sink
//!        workers  └─► chunk queue (caller 1) ─► batch worker(s) ─┘     chunks      worker
//! ```
//!
//! - **Input workers** reset each read's probabilities to the canonical prior,
//!   cut one chunk per motif hit per caller, record the expected chunk count,
//!   park the read in the working set and only then enqueue its chunks. Reads
//!   without any hit skip the working set and go straight to the sink.
//! - **Batch workers**, one per (runner, caller), fill a batch of
//!   `batch_size` chunks. A partial batch is called once no chunk has arrived
//!   for the force timeout, or when the chunk queue is terminated.
//! - **The output worker** writes every scored chunk into its read, then
//!   forwards each working read whose chunks have all been reconciled.
//!
//! Chunks only hold a `Weak` reference to their read. The working set and
//! the sink own reads.
//!
//! # Shutdown
//!
//! The last input worker to finish terminates every chunk queue; the last
//! batch worker to finish terminates the processed queue; the output worker
//! then exits after a final sweep of the working set.

use crate::modbase::encoder::{moves_to_map, sequence_to_ints, ContextEncoder};
use crate::modbase::{ModBaseLayout, ModBaseParams};
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::message::Message;
use crate::pipeline::node::{lock, MessageSink, NodeBase, NodeState, WorkerPool};
use crate::pipeline::queue::{BoundedQueue, QueueStatus};
use crate::runner::Runner;
use crate::stats::{merge_prefixed, Counter, DurationCounter, NamedStats, Timer};
use crate::types::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

/// Longest a partial batch waits for more chunks.
pub const FORCE_TIMEOUT: Duration = Duration::from_millis(100);

/// Per-caller chunk queue capacity, in batches.
const CHUNK_QUEUE_BATCHES: usize = 5;

/// Processed chunk queue capacity, per unit of `max_reads`.
const PROCESSED_QUEUE_FACTOR: usize = 10;

/// One unit of inference work: the context window around a single motif hit.
pub struct ModBaseChunk {
    pub source_read: Weak<Read>,
    /// Scaled signal window, zero padded to the caller's width.
    pub signal: Vec<f32>,
    pub encoded_kmers: Vec<f32>,
    /// Sequence position the scores belong to.
    pub context_hit: usize,
    /// Filled in by the batch worker.
    pub scores: Vec<f32>,
}

/// Construction options for [`ModBaseCallerNode`].
#[derive(Debug, Clone)]
pub struct ModBaseCallerOptions {
    pub input_threads: usize,
    /// Signal samples per move table entry.
    pub block_stride: usize,
    /// Input queue capacity; the processed queue holds ten times as many chunks.
    pub max_reads: usize,
    pub force_timeout: Duration,
}

impl Default for ModBaseCallerOptions {
    fn default() -> Self {
        Self {
            input_threads: 4,
            block_stride: 5,
            max_reads: 1000,
            force_timeout: FORCE_TIMEOUT,
        }
    }
}

#[derive(Default)]
struct ModBaseStats {
    batches_called: Counter,
    partial_batches_called: Counter,
    call_chunks: DurationCounter,
    context_hits: Counter,
    mod_base_reads_pushed: Counter,
    non_mod_base_reads_pushed: Counter,
    chunk_generation: DurationCounter,
}

struct ModBaseInner {
    base: NodeBase,
    runners: Vec<Arc<dyn Runner>>,
    caller_params: Vec<ModBaseParams>,
    layout: ModBaseLayout,
    block_stride: usize,
    batch_size: usize,
    force_timeout: Duration,
    chunk_queues: Vec<BoundedQueue<ModBaseChunk>>,
    processed_chunks: BoundedQueue<ModBaseChunk>,
    working_reads: Mutex<Vec<Arc<Read>>>,
    num_active_input_workers: AtomicUsize,
    num_active_batch_workers: AtomicUsize,
    stats: ModBaseStats,
}

impl ModBaseInner {
    /// Record a fatal error and unblock every internal queue so all workers exit.
    fn abort(&self, err: PipelineError) {
        self.base.fail(err);
        for queue in &self.chunk_queues {
            queue.terminate();
        }
        self.processed_chunks.terminate();
    }

    fn finish(&self, result: PipelineResult<()>) {
        if let Err(err) = result {
            self.abort(err);
        }
    }

    // ── Input workers ──

    fn input_worker_thread(&self) -> PipelineResult<()> {
        let result = self.input_loop();
        if self.num_active_input_workers.fetch_sub(1, Ordering::AcqRel) == 1 {
            tracing::debug!("{}: input drained, closing chunk queues", self.base.name());
            for queue in &self.chunk_queues {
                queue.terminate();
            }
        }
        result
    }

    fn input_loop(&self) -> PipelineResult<()> {
        while let Some(message) = self.base.get_input_message() {
            if self.base.has_failed() {
                break;
            }
            let read = match message {
                Message::Read(read) => read,
                other => {
                    self.base.send_message_to_sink(other)?;
                    continue;
                }
            };

            let timer = Timer::start();
            let per_caller = self.generate_chunks(&read)?;
            let total: usize = per_caller.iter().map(Vec::len).sum();
            read.reset_modbase_chunks(total);
            self.stats.chunk_generation.add(timer.elapsed());

            if total == 0 {
                self.base.send_message_to_sink(Message::Read(read))?;
                self.stats.non_mod_base_reads_pushed.inc();
                continue;
            }

            lock(&self.working_reads).push(read);
            for (queue, chunks) in self.chunk_queues.iter().zip(per_caller) {
                for chunk in chunks {
                    if queue.push(chunk).is_err() {
                        // Only an abort terminates chunk queues while inputs run.
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }

    /// Initialise `read`'s probabilities and cut its chunks, grouped by caller.
    fn generate_chunks(&self, read: &Arc<Read>) -> PipelineResult<Vec<Vec<ModBaseChunk>>> {
        self.layout.init_read(read)?;

        let seq_ints =
            sequence_to_ints(&read.seq).map_err(|(position, base)| PipelineError::InvalidSequence {
                read_id: read.read_id.clone(),
                position,
                base: base as char,
            })?;
        let seq_to_sig_map = moves_to_map(
            &read.moves,
            self.block_stride,
            read.raw_data.len(),
            read.seq.len() + 1,
        );

        // Every runner exposes the same callers, so the first one is used
        // for chunk generation.
        let runner = &self.runners[0];
        let mut per_caller = Vec::with_capacity(self.caller_params.len());
        for (caller_id, params) in self.caller_params.iter().enumerate() {
            let scaled = runner.scale_signal(caller_id, &read.raw_data, &seq_ints, &seq_to_sig_map);

            let mut encoder = ContextEncoder::new(
                params.context_before,
                params.context_after,
                params.bases_before,
                params.bases_after,
            );
            encoder.init(&seq_ints, &seq_to_sig_map);

            let hits: Vec<usize> = runner
                .motif_hits(caller_id, &read.seq)
                .into_iter()
                .filter(|&hit| hit < read.seq.len())
                .collect();
            self.stats.context_hits.add(hits.len() as u64);

            let chunks = hits
                .into_iter()
                .map(|hit| {
                    let window = encoder.get_context(hit);
                    ModBaseChunk {
                        source_read: Arc::downgrade(read),
                        signal: window.slice_signal(&scaled),
                        encoded_kmers: window.encoded_kmers,
                        context_hit: hit,
                        scores: Vec::new(),
                    }
                })
                .collect();
            per_caller.push(chunks);
        }
        Ok(per_caller)
    }

    // ── Batch workers ──

    fn batch_worker_thread(&self, worker_id: usize, caller_id: usize) -> PipelineResult<()> {
        let result = self.batch_loop(worker_id, caller_id);
        if self.num_active_batch_workers.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.processed_chunks.terminate();
        }
        result
    }

    fn batch_loop(&self, worker_id: usize, caller_id: usize) -> PipelineResult<()> {
        let runner = &self.runners[worker_id];
        let queue = &self.chunk_queues[caller_id];

        let mut batch = Vec::with_capacity(self.batch_size);
        let mut staged = 0;
        let mut last_pop = Instant::now();

        loop {
            let status = queue.pop_batch_or_timeout(
                self.batch_size - batch.len(),
                last_pop + self.force_timeout,
                &mut batch,
            );
            last_pop = Instant::now();

            for (slot, chunk) in batch.iter().enumerate().skip(staged) {
                runner.accept_chunk(caller_id, slot, &chunk.signal, &chunk.encoded_kmers);
            }
            staged = batch.len();

            let flush = match status {
                QueueStatus::Terminated => break,
                QueueStatus::Success => batch.len() == self.batch_size,
                QueueStatus::Timeout => !batch.is_empty(),
            };
            if flush {
                staged = 0;
                if !self.call_current_batch(worker_id, caller_id, &mut batch)? {
                    return Ok(());
                }
            }
        }

        if !batch.is_empty() {
            self.call_current_batch(worker_id, caller_id, &mut batch)?;
        }
        Ok(())
    }

    /// Score `batch` and hand its chunks to the output worker.
    ///
    /// Returns `false` if the node was aborted while pushing results.
    fn call_current_batch(
        &self,
        worker_id: usize,
        caller_id: usize,
        batch: &mut Vec<ModBaseChunk>,
    ) -> PipelineResult<bool> {
        let count = batch.len();
        let timer = Timer::start();
        let results = self.runners[worker_id].call_chunks(caller_id, count)?;
        self.stats.call_chunks.add(timer.elapsed());

        if results.len() != count {
            return Err(PipelineError::Runner(format!(
                "caller {caller_id} returned {} score rows for {count} chunks",
                results.len()
            )));
        }

        self.stats.batches_called.inc();
        if count < self.batch_size {
            self.stats.partial_batches_called.inc();
        }
        tracing::trace!(
            "{}: runner {} caller {} scored {} chunks in {:.2} ms",
            self.base.name(),
            worker_id,
            caller_id,
            count,
            timer.elapsed_ms()
        );

        for (mut chunk, scores) in batch.drain(..).zip(results) {
            chunk.scores = scores;
            if self.processed_chunks.push(chunk).is_err() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    // ── Output worker ──

    fn output_worker_thread(&self) -> PipelineResult<()> {
        let mut processed = Vec::new();
        while self
            .processed_chunks
            .pop_n(self.processed_chunks.capacity(), &mut processed)
            == QueueStatus::Success
        {
            for chunk in processed.drain(..) {
                let Some(read) = chunk.source_read.upgrade() else {
                    tracing::trace!(
                        "{}: dropping chunk for a released read",
                        self.base.name()
                    );
                    continue;
                };
                self.layout.write_scores(&read, chunk.context_hit, &chunk.scores);
                read.increment_modbase_chunks_called();
            }
            self.forward_completed_reads()?;
        }

        self.forward_completed_reads()?;
        let leftover = lock(&self.working_reads).len();
        if leftover > 0 && !self.base.has_failed() {
            tracing::warn!(
                "{}: {} reads still waiting on chunks at shutdown",
                self.base.name(),
                leftover
            );
        }
        Ok(())
    }

    /// Move every fully reconciled read out of the working set and forward it.
    fn forward_completed_reads(&self) -> PipelineResult<()> {
        let completed: Vec<Arc<Read>> = {
            let mut working = lock(&self.working_reads);
            let (done, pending) = std::mem::take(&mut *working)
                .into_iter()
                .partition(|read| read.is_modbase_complete());
            *working = pending;
            done
        };

        for read in completed {
            self.base.send_message_to_sink(Message::Read(read))?;
            self.stats.mod_base_reads_pushed.inc();
        }
        Ok(())
    }
}

/// Multi-pool node that calls modified bases through one or more runners.
pub struct ModBaseCallerNode {
    inner: Arc<ModBaseInner>,
    input_threads: usize,
    workers: Mutex<WorkerPool>,
}

impl ModBaseCallerNode {
    pub const NAME: &'static str = "modbase_caller";

    pub fn new(
        sink: Arc<dyn MessageSink>,
        runners: Vec<Arc<dyn Runner>>,
        input_threads: usize,
        block_stride: usize,
        max_reads: usize,
    ) -> PipelineResult<Self> {
        Self::with_options(
            sink,
            runners,
            ModBaseCallerOptions {
                input_threads,
                block_stride,
                max_reads,
                force_timeout: FORCE_TIMEOUT,
            },
        )
    }

    pub fn with_options(
        sink: Arc<dyn MessageSink>,
        runners: Vec<Arc<dyn Runner>>,
        options: ModBaseCallerOptions,
    ) -> PipelineResult<Self> {
        let first = runners.first().ok_or_else(|| {
            PipelineError::InvalidConfig("modbase caller needs at least one runner".into())
        })?;
        let num_callers = first.caller_count();
        if num_callers == 0 {
            return Err(PipelineError::InvalidConfig(
                "modbase runner exposes no callers".into(),
            ));
        }
        if let Some(idx) = runners.iter().position(|r| r.caller_count() != num_callers) {
            return Err(PipelineError::InvalidConfig(format!(
                "runner {idx} exposes a different number of callers than runner 0"
            )));
        }
        let batch_size = first.batch_size();
        if batch_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "runner batch size must be positive".into(),
            ));
        }
        if options.block_stride == 0 {
            return Err(PipelineError::InvalidConfig(
                "block stride must be positive".into(),
            ));
        }

        let caller_params: Vec<_> = (0..num_callers).map(|id| first.caller_params(id)).collect();
        let layout = ModBaseLayout::from_params(&caller_params)?;
        tracing::info!(
            "{}: {} callers, alphabet {}, batch size {}",
            Self::NAME,
            num_callers,
            layout.info().alphabet,
            batch_size
        );

        let max_reads = options.max_reads.max(1);
        let chunk_queues = (0..num_callers)
            .map(|_| BoundedQueue::new(CHUNK_QUEUE_BATCHES * batch_size))
            .collect();

        let node = Self {
            inner: Arc::new(ModBaseInner {
                base: NodeBase::new(Self::NAME, max_reads, Some(sink)),
                runners,
                caller_params,
                layout,
                block_stride: options.block_stride,
                batch_size,
                force_timeout: options.force_timeout,
                chunk_queues,
                processed_chunks: BoundedQueue::new(PROCESSED_QUEUE_FACTOR * max_reads),
                working_reads: Mutex::new(Vec::new()),
                num_active_input_workers: AtomicUsize::new(0),
                num_active_batch_workers: AtomicUsize::new(0),
                stats: ModBaseStats::default(),
            }),
            input_threads: options.input_threads.max(1),
            workers: Mutex::new(WorkerPool::new()),
        };
        node.start_threads()?;
        Ok(node)
    }

    fn start_threads(&self) -> PipelineResult<()> {
        let inner = &self.inner;
        let num_callers = inner.chunk_queues.len();
        inner
            .num_active_input_workers
            .store(self.input_threads, Ordering::Release);
        inner
            .num_active_batch_workers
            .store(inner.runners.len() * num_callers, Ordering::Release);

        let mut workers = lock(&self.workers);

        let output = inner.clone();
        workers.spawn(format!("{}-output", Self::NAME), move || {
            output.finish(output.output_worker_thread());
        })?;

        for worker_id in 0..inner.runners.len() {
            for caller_id in 0..num_callers {
                let batch = inner.clone();
                workers.spawn(
                    format!("{}-runner{worker_id}-caller{caller_id}", Self::NAME),
                    move || batch.finish(batch.batch_worker_thread(worker_id, caller_id)),
                )?;
            }
        }

        for i in 0..self.input_threads {
            let input = inner.clone();
            workers.spawn(format!("{}-input-{i}", Self::NAME), move || {
                input.finish(input.input_worker_thread());
            })?;
        }

        inner.base.set_state(NodeState::Running);
        tracing::info!(
            "{} started: {} input, {} batch workers",
            Self::NAME,
            self.input_threads,
            inner.runners.len() * num_callers
        );
        Ok(())
    }

    /// Alphabet metadata attached to every processed read.
    pub fn layout(&self) -> &ModBaseLayout {
        &self.inner.layout
    }

    pub fn batch_size(&self) -> usize {
        self.inner.batch_size
    }
}

impl MessageSink for ModBaseCallerNode {
    fn name(&self) -> &str {
        self.inner.base.name()
    }

    fn push_message(&self, msg: Message) -> PipelineResult<()> {
        self.inner.base.push_message(msg)
    }

    fn terminate(&self) -> PipelineResult<()> {
        self.inner.base.begin_termination();
        let joined = lock(&self.workers).join_all();
        let result = self.inner.base.end_termination(joined);
        tracing::info!(
            "{} stopped: {} batches ({} partial), {} reads with calls",
            Self::NAME,
            self.inner.stats.batches_called.get(),
            self.inner.stats.partial_batches_called.get(),
            self.inner.stats.mod_base_reads_pushed.get()
        );
        result
    }

    fn restart(&self) -> PipelineResult<()> {
        if self.state() != NodeState::Stopped {
            self.terminate()?;
        }
        let inner = &self.inner;
        for runner in &inner.runners {
            runner.restart();
        }
        for queue in &inner.chunk_queues {
            queue.restart();
        }
        inner.processed_chunks.restart();
        inner.base.reset();
        lock(&inner.working_reads).clear();
        self.start_threads()
    }

    fn state(&self) -> NodeState {
        self.inner.base.state()
    }

    fn sample_stats(&self) -> NamedStats {
        let inner = &self.inner;
        let mut stats = inner.base.base_stats();
        for (i, runner) in inner.runners.iter().enumerate() {
            merge_prefixed(&mut stats, &format!("runner_{i}"), runner.sample_stats());
        }
        let s = &inner.stats;
        stats.insert("batches_called".into(), s.batches_called.get() as f64);
        stats.insert(
            "partial_batches_called".into(),
            s.partial_batches_called.get() as f64,
        );
        stats.insert("call_chunks_ms".into(), s.call_chunks.as_millis_f64());
        stats.insert("context_hits".into(), s.context_hits.get() as f64);
        stats.insert(
            "mod_base_reads_pushed".into(),
            s.mod_base_reads_pushed.get() as f64,
        );
        stats.insert(
            "non_mod_base_reads_pushed".into(),
            s.non_mod_base_reads_pushed.get() as f64,
        );
        stats.insert(
            "chunk_generation_ms".into(),
            s.chunk_generation.as_millis_f64(),
        );
        stats.insert(
            "working_reads".into(),
            lock(&inner.working_reads).len() as f64,
        );
        for (i, queue) in inner.chunk_queues.iter().enumerate() {
            stats.insert(format!("chunk_queue_{i}_depth"), queue.len() as f64);
        }
        stats.insert(
            "processed_queue_depth".into(),
            inner.processed_chunks.len() as f64,
        );
        stats
    }
}

impl Drop for ModBaseCallerNode {
    fn drop(&mut self) {
        if self.state() != NodeState::Stopped {
            if let Err(err) = self.terminate() {
                tracing::warn!("{} terminated with error on drop: {}", Self::NAME, err);
            }
        }
    }
}
