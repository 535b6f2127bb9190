//! Signal and sequence encoding for modbase chunks.
//!
//! A chunk is a fixed-width window of scaled signal centred on one base, plus
//! a one-hot encoding of the k-mer under every sample of that window. Windows
//! that run past either end of the signal are zero padded so every chunk of a
//! caller has the same width.

/// Canonical bases in id order.
pub const BASES: [u8; 4] = *b"ACGT";

/// Number of distinct canonical bases.
pub const NUM_BASES: usize = BASES.len();

/// Id of a canonical base (`A=0, C=1, G=2, T=3`), `None` for anything else.
#[inline]
pub fn base_id(base: u8) -> Option<usize> {
    match base {
        b'A' => Some(0),
        b'C' => Some(1),
        b'G' => Some(2),
        b'T' => Some(3),
        _ => None,
    }
}

/// Convert a sequence to base ids.
///
/// On failure returns the position and byte of the first non-canonical base.
pub fn sequence_to_ints(seq: &str) -> Result<Vec<u8>, (usize, u8)> {
    seq.bytes()
        .enumerate()
        .map(|(pos, b)| base_id(b).map(|id| id as u8).ok_or((pos, b)))
        .collect()
}

/// Map each base to the first signal sample of the block where it starts.
///
/// Every set entry of `moves` starts a new base; entry `i` covers samples
/// `i * block_stride .. (i + 1) * block_stride`. The returned vector ends with
/// `signal_len`, so base `b` spans `map[b]..map[b + 1]`. `reserve` is a
/// capacity hint (normally `seq_len + 1`).
pub fn moves_to_map(moves: &[u8], block_stride: usize, signal_len: usize, reserve: usize) -> Vec<usize> {
    let mut map = Vec::with_capacity(reserve);
    map.extend(
        moves
            .iter()
            .enumerate()
            .filter(|(_, &mv)| mv == 1)
            .map(|(i, _)| (i * block_stride).min(signal_len)),
    );
    map.push(signal_len);
    map
}

/// Probability to fixed-point byte: `min(floor(p * 256), 255)`.
///
/// Negative values and NaN encode as 0.
#[inline]
pub fn encode_probability(p: f32) -> u8 {
    if p.is_nan() || p <= 0.0 {
        return 0;
    }
    (p * 256.0).floor().min(255.0) as u8
}

/// Signal window and k-mer encoding for one context hit.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextWindow {
    /// First in-range sample of the window.
    pub first_sample: usize,
    /// Number of in-range samples.
    pub num_samples: usize,
    /// Zero samples to prepend.
    pub lead_samples_needed: usize,
    /// Zero samples to append.
    pub tail_samples_needed: usize,
    /// `window_len * kmer_len * 4` one-hot values, sample major.
    pub encoded_kmers: Vec<f32>,
}

impl ContextWindow {
    /// Total window width, padding included.
    pub fn len(&self) -> usize {
        self.lead_samples_needed + self.num_samples + self.tail_samples_needed
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cut this window out of `signal`, zero padding both ends.
    pub fn slice_signal(&self, signal: &[f32]) -> Vec<f32> {
        let end = (self.first_sample + self.num_samples).min(signal.len());
        let start = self.first_sample.min(end);
        let in_range = &signal[start..end];

        let mut out = Vec::with_capacity(self.len());
        out.resize(self.lead_samples_needed, 0.0);
        out.extend_from_slice(in_range);
        // A short scaled signal is padded out to the full width too.
        out.resize(self.len(), 0.0);
        out
    }
}

/// Builds [`ContextWindow`]s for one read and one caller.
#[derive(Debug, Clone)]
pub struct ContextEncoder {
    context_before: usize,
    context_after: usize,
    bases_before: usize,
    bases_after: usize,
    seq_ints: Vec<u8>,
    seq_to_sig_map: Vec<usize>,
}

impl ContextEncoder {
    pub fn new(context_before: usize, context_after: usize, bases_before: usize, bases_after: usize) -> Self {
        Self {
            context_before,
            context_after,
            bases_before,
            bases_after,
            seq_ints: Vec::new(),
            seq_to_sig_map: Vec::new(),
        }
    }

    pub fn init(&mut self, seq_ints: &[u8], seq_to_sig_map: &[usize]) {
        self.seq_ints = seq_ints.to_vec();
        self.seq_to_sig_map = seq_to_sig_map.to_vec();
    }

    pub fn kmer_len(&self) -> usize {
        self.bases_before + self.bases_after + 1
    }

    pub fn window_len(&self) -> usize {
        self.context_before + self.context_after
    }

    fn signal_len(&self) -> usize {
        self.seq_to_sig_map.last().copied().unwrap_or(0)
    }

    /// Index of the base whose block covers `sample`.
    fn base_at_sample(&self, sample: usize) -> Option<usize> {
        let num_bases = self.seq_ints.len().min(self.seq_to_sig_map.len().saturating_sub(1));
        if num_bases == 0 {
            return None;
        }
        // Last base starting at or before `sample`.
        let starts = &self.seq_to_sig_map[..num_bases];
        let idx = starts.partition_point(|&start| start <= sample);
        idx.checked_sub(1)
    }

    /// Window centred on the first sample of base `seq_pos`.
    pub fn get_context(&self, seq_pos: usize) -> ContextWindow {
        let signal_len = self.signal_len();
        let centre = self
            .seq_to_sig_map
            .get(seq_pos)
            .copied()
            .unwrap_or(signal_len)
            .min(signal_len);

        let window_start = centre as isize - self.context_before as isize;
        let window_end = centre + self.context_after;

        let lead_samples_needed = (-window_start).max(0) as usize;
        let first_sample = window_start.max(0) as usize;
        let last_sample = window_end.min(signal_len);
        let num_samples = last_sample.saturating_sub(first_sample);
        let tail_samples_needed = window_end.saturating_sub(signal_len.max(first_sample));

        let kmer_len = self.kmer_len();
        let stride = kmer_len * NUM_BASES;
        let width = lead_samples_needed + num_samples + tail_samples_needed;
        let mut encoded_kmers = vec![0.0f32; width * stride];

        for (i, sample) in (first_sample..last_sample).enumerate() {
            let Some(base) = self.base_at_sample(sample) else {
                continue;
            };
            let row = &mut encoded_kmers[(lead_samples_needed + i) * stride..][..stride];
            for k in 0..kmer_len {
                let Some(pos) = (base + k).checked_sub(self.bases_before) else {
                    continue;
                };
                if let Some(&id) = self.seq_ints.get(pos) {
                    row[k * NUM_BASES + id as usize] = 1.0;
                }
            }
        }

        ContextWindow {
            first_sample,
            num_samples,
            lead_samples_needed,
            tail_samples_needed,
            encoded_kmers,
        }
    }
}
