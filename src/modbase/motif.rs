//! Motif search and the per-base motif context string.

use crate::modbase::encoder::{base_id, NUM_BASES};
use crate::pipeline::error::{PipelineError, PipelineResult};

/// Whether a motif symbol matches a sequence base. `N` matches anything.
#[inline]
fn symbol_matches(symbol: u8, base: u8) -> bool {
    symbol == b'N' || symbol == base
}

/// Positions in `seq` of the base at `motif_offset` of every motif occurrence.
///
/// Hits are returned in ascending order. Overlapping occurrences are all
/// reported.
pub fn find_motif_hits(seq: &str, motif: &str, motif_offset: usize) -> Vec<usize> {
    let seq = seq.as_bytes();
    let motif = motif.as_bytes();
    if motif.is_empty() || motif_offset >= motif.len() || seq.len() < motif.len() {
        return Vec::new();
    }

    seq.windows(motif.len())
        .enumerate()
        .filter(|(_, window)| {
            window
                .iter()
                .zip(motif)
                .all(|(&base, &symbol)| symbol_matches(symbol, base))
        })
        .map(|(start, _)| start + motif_offset)
        .collect()
}

/// Motif for each canonical base that has a modification caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModBaseContext {
    motifs: [Option<String>; NUM_BASES],
}

impl ModBaseContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `motif`, whose modified base sits at `offset`.
    pub fn set_context(&mut self, motif: &str, offset: usize) -> PipelineResult<()> {
        let base = motif
            .as_bytes()
            .get(offset)
            .copied()
            .and_then(base_id)
            .ok_or_else(|| {
                PipelineError::InvalidConfig(format!(
                    "motif '{motif}' has no canonical base at offset {offset}"
                ))
            })?;
        self.motifs[base] = Some(motif.to_owned());
        Ok(())
    }

    /// Colon-separated motifs in `ACGT` order, `_` for bases without one.
    pub fn encode(&self) -> String {
        self.motifs
            .iter()
            .map(|entry| entry.as_deref().unwrap_or("_"))
            .collect::<Vec<_>>()
            .join(":")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpg_hits() {
        assert_eq!(find_motif_hits("ACGTCGCG", "CG", 0), vec![1, 4, 6]);
        assert_eq!(find_motif_hits("ACGTCGCG", "CG", 1), vec![2, 5, 7]);
    }

    #[test]
    fn test_single_base_motif_and_wildcard() {
        assert_eq!(find_motif_hits("AACA", "A", 0), vec![0, 1, 3]);
        assert_eq!(find_motif_hits("GATC", "NA", 1), vec![1]);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert!(find_motif_hits("ACGT", "", 0).is_empty());
        assert!(find_motif_hits("AC", "ACG", 0).is_empty());
        assert!(find_motif_hits("ACGT", "CG", 2).is_empty());
    }

    #[test]
    fn test_context_encoding() {
        let mut ctx = ModBaseContext::new();
        assert_eq!(ctx.encode(), "_:_:_:_");
        ctx.set_context("CG", 0).unwrap();
        ctx.set_context("A", 0).unwrap();
        assert_eq!(ctx.encode(), "A:CG:_:_");
    }

    #[test]
    fn test_context_rejects_bad_offset() {
        let mut ctx = ModBaseContext::new();
        assert!(ctx.set_context("CG", 5).is_err());
        assert!(ctx.set_context("NG", 0).is_err());
    }
}
