//! Test data builders for creating test reads

use readpipe::Read;
use std::sync::Arc;

/// Samples per move table entry used by every built read
pub const BLOCK_STRIDE: usize = 5;

/// Builder for creating test Reads
///
/// Reads get one move per base, so base `i` starts at sample
/// `i * BLOCK_STRIDE`.
pub struct ReadBuilder {
    id: String,
    seq: String,
    duplex: bool,
    duplex_parent: bool,
    signal_level: f32,
}

impl ReadBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            seq: "ACGTACGTAC".to_string(),
            duplex: false,
            duplex_parent: false,
            signal_level: 1.0,
        }
    }

    /// Duplex read named after its two parents
    pub fn duplex(template: &str, complement: &str) -> Self {
        let mut builder = Self::new(&format!("{template};{complement}"));
        builder.duplex = true;
        builder
    }

    pub fn seq(mut self, seq: &str) -> Self {
        self.seq = seq.to_string();
        self
    }

    pub fn parent(mut self) -> Self {
        self.duplex_parent = true;
        self
    }

    pub fn signal_level(mut self, level: f32) -> Self {
        self.signal_level = level;
        self
    }

    pub fn build(self) -> Read {
        let signal = (0..self.seq.len() * BLOCK_STRIDE)
            .map(|i| self.signal_level + (i % 7) as f32 * 0.1)
            .collect();
        let moves = vec![1; self.seq.len()];
        Read::new(self.id, self.seq)
            .with_signal(signal, moves)
            .with_duplex(self.duplex)
            .with_duplex_parent(self.duplex_parent)
    }

    pub fn shared(self) -> Arc<Read> {
        self.build().into_shared()
    }
}

/// Sequence of `len` bases holding a CpG every `spacing` bases
pub fn cpg_sequence(len: usize, spacing: usize) -> String {
    let spacing = spacing.max(2);
    (0..len)
        .map(|i| match i % spacing {
            0 => 'C',
            1 => 'G',
            _ => 'T',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_builder() {
        let read = ReadBuilder::duplex("a", "b").seq("ACGT").build();
        assert_eq!(read.read_id, "a;b");
        assert!(read.is_duplex);
        assert_eq!(read.raw_data.len(), 4 * BLOCK_STRIDE);
        assert_eq!(read.moves, vec![1; 4]);
    }

    #[test]
    fn test_cpg_sequence() {
        assert_eq!(cpg_sequence(7, 3), "CGTCGTC");
    }
}
