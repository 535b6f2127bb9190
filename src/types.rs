//! Core data types for readpipe
//!
//! # Main Types
//!
//! - [`Read`] - One sequencing read as it travels through the pipeline. Always
//!   shared as `Arc<Read>`; fields written by pipeline stages use interior
//!   mutability so that stages never need exclusive ownership.
//! - [`BaseModInfo`] - Modified-base alphabet metadata shared by every read a
//!   modbase caller has processed.
//! - [`ReadRecord`] - Plain serde form of a read, used for JSON-lines I/O.
//!
//! # Duplex Identifiers
//!
//! A duplex read is named after its two simplex parents, joined by
//! [`DUPLEX_ID_SEPARATOR`]: `"<template>;<complement>"`.

use crate::pipeline::error::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Separator between the parent read ids inside a duplex read id.
pub const DUPLEX_ID_SEPARATOR: char = ';';

/// Alphabet metadata for modified-base probabilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseModInfo {
    /// Canonical bases each followed by their modification codes, e.g. `"AC5mGT"`.
    pub alphabet: String,
    /// Space-separated long names of the modifications.
    pub long_names: String,
    /// Motif context per canonical base, e.g. `"_:CG:_:_"`.
    pub context: String,
}

/// A sequencing read.
pub struct Read {
    pub read_id: String,
    /// Raw signal samples.
    pub raw_data: Vec<f32>,
    /// Called sequence.
    pub seq: String,
    /// Basecaller move table: one entry per `block_stride` samples, 1 where a new base starts.
    pub moves: Vec<u8>,
    pub is_duplex: bool,
    is_duplex_parent: AtomicBool,
    base_mod_probs: Mutex<Vec<u8>>,
    base_mod_info: Mutex<Option<Arc<BaseModInfo>>>,
    num_modbase_chunks: AtomicUsize,
    num_modbase_chunks_called: AtomicUsize,
}

impl Read {
    pub fn new(read_id: impl Into<String>, seq: impl Into<String>) -> Self {
        Self {
            read_id: read_id.into(),
            raw_data: Vec::new(),
            seq: seq.into(),
            moves: Vec::new(),
            is_duplex: false,
            is_duplex_parent: AtomicBool::new(false),
            base_mod_probs: Mutex::new(Vec::new()),
            base_mod_info: Mutex::new(None),
            num_modbase_chunks: AtomicUsize::new(0),
            num_modbase_chunks_called: AtomicUsize::new(0),
        }
    }

    pub fn with_signal(mut self, raw_data: Vec<f32>, moves: Vec<u8>) -> Self {
        self.raw_data = raw_data;
        self.moves = moves;
        self
    }

    pub fn with_duplex(mut self, is_duplex: bool) -> Self {
        self.is_duplex = is_duplex;
        self
    }

    pub fn with_duplex_parent(self, is_duplex_parent: bool) -> Self {
        self.is_duplex_parent.store(is_duplex_parent, Ordering::Relaxed);
        self
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    // ── Duplex tagging ──

    pub fn is_duplex_parent(&self) -> bool {
        self.is_duplex_parent.load(Ordering::Acquire)
    }

    pub fn set_duplex_parent(&self, value: bool) {
        self.is_duplex_parent.store(value, Ordering::Release);
    }

    /// Split a duplex read id into its `(template, complement)` parent ids.
    pub fn duplex_parent_ids(&self) -> PipelineResult<(&str, &str)> {
        match self.read_id.split_once(DUPLEX_ID_SEPARATOR) {
            Some((template, complement)) if !template.is_empty() && !complement.is_empty() => {
                Ok((template, complement))
            }
            _ => Err(PipelineError::MalformedDuplexId(self.read_id.clone())),
        }
    }

    // ── Modified bases ──

    fn probs(&self) -> MutexGuard<'_, Vec<u8>> {
        self.base_mod_probs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the per-base modification probabilities.
    pub fn base_mod_probs(&self) -> Vec<u8> {
        self.probs().clone()
    }

    /// Run `f` with exclusive access to the probability buffer.
    pub fn with_base_mod_probs<R>(&self, f: impl FnOnce(&mut Vec<u8>) -> R) -> R {
        f(&mut self.probs())
    }

    pub fn base_mod_info(&self) -> Option<Arc<BaseModInfo>> {
        self.base_mod_info
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_base_mod_info(&self, info: Arc<BaseModInfo>) {
        *self
            .base_mod_info
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(info);
    }

    /// Number of modbase chunks this read was split into.
    pub fn num_modbase_chunks(&self) -> usize {
        self.num_modbase_chunks.load(Ordering::Acquire)
    }

    /// Set the expected chunk count and reset the completed count.
    pub fn reset_modbase_chunks(&self, expected: usize) {
        self.num_modbase_chunks_called.store(0, Ordering::Release);
        self.num_modbase_chunks.store(expected, Ordering::Release);
    }

    pub fn num_modbase_chunks_called(&self) -> usize {
        self.num_modbase_chunks_called.load(Ordering::Acquire)
    }

    /// Record one reconciled chunk. Returns the new completed count.
    pub fn increment_modbase_chunks_called(&self) -> usize {
        self.num_modbase_chunks_called.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn is_modbase_complete(&self) -> bool {
        self.num_modbase_chunks_called() == self.num_modbase_chunks()
    }
}

impl fmt::Debug for Read {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Read")
            .field("read_id", &self.read_id)
            .field("seq_len", &self.seq.len())
            .field("samples", &self.raw_data.len())
            .field("is_duplex", &self.is_duplex)
            .field("is_duplex_parent", &self.is_duplex_parent())
            .field("num_modbase_chunks", &self.num_modbase_chunks())
            .field("num_modbase_chunks_called", &self.num_modbase_chunks_called())
            .finish()
    }
}

/// Serializable form of a read (one JSON object per line in the CLI).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadRecord {
    pub read_id: String,
    pub seq: String,
    #[serde(default)]
    pub signal: Vec<f32>,
    #[serde(default)]
    pub moves: Vec<u8>,
    #[serde(default)]
    pub is_duplex: bool,
    #[serde(default)]
    pub is_duplex_parent: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub base_mod_probs: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_mod_alphabet: Option<String>,
}

impl ReadRecord {
    pub fn from_read(read: &Read) -> Self {
        Self {
            read_id: read.read_id.clone(),
            seq: read.seq.clone(),
            signal: read.raw_data.clone(),
            moves: read.moves.clone(),
            is_duplex: read.is_duplex,
            is_duplex_parent: read.is_duplex_parent(),
            base_mod_probs: read.base_mod_probs(),
            base_mod_alphabet: read.base_mod_info().map(|info| info.alphabet.clone()),
        }
    }

    pub fn into_read(self) -> Read {
        let read = Read::new(self.read_id, self.seq)
            .with_signal(self.signal, self.moves)
            .with_duplex(self.is_duplex)
            .with_duplex_parent(self.is_duplex_parent);
        if !self.base_mod_probs.is_empty() {
            read.with_base_mod_probs(|probs| *probs = self.base_mod_probs);
        }
        read
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplex_parent_ids() {
        let read = Read::new("tmpl;comp", "ACGT").with_duplex(true);
        assert_eq!(read.duplex_parent_ids().unwrap(), ("tmpl", "comp"));
    }

    #[test]
    fn test_duplex_parent_ids_malformed() {
        for id in ["noseparator", ";comp", "tmpl;", ";"] {
            let read = Read::new(id, "A").with_duplex(true);
            assert!(
                matches!(read.duplex_parent_ids(), Err(PipelineError::MalformedDuplexId(_))),
                "{id} should be rejected"
            );
        }
    }

    #[test]
    fn test_duplex_parent_flag_is_mutable_when_shared() {
        let read = Read::new("r1", "A").with_duplex_parent(true).into_shared();
        let other = read.clone();
        assert!(other.is_duplex_parent());
        read.set_duplex_parent(false);
        assert!(!other.is_duplex_parent());
    }

    #[test]
    fn test_chunk_counters() {
        let read = Read::new("r1", "ACGT");
        read.reset_modbase_chunks(2);
        assert!(!read.is_modbase_complete());
        assert_eq!(read.increment_modbase_chunks_called(), 1);
        assert_eq!(read.increment_modbase_chunks_called(), 2);
        assert!(read.is_modbase_complete());

        read.reset_modbase_chunks(1);
        assert_eq!(read.num_modbase_chunks_called(), 0);
    }

    #[test]
    fn test_record_round_trip_keeps_flags() {
        let record = ReadRecord {
            read_id: "a;b".into(),
            seq: "ACGT".into(),
            signal: vec![1.0, 2.0],
            moves: vec![1, 0],
            is_duplex: true,
            is_duplex_parent: false,
            base_mod_probs: vec![255, 0],
            base_mod_alphabet: None,
        };
        let read = record.clone().into_read();
        assert!(read.is_duplex);
        assert_eq!(read.base_mod_probs(), vec![255, 0]);
        assert_eq!(ReadRecord::from_read(&read), record);
    }

    #[test]
    fn test_record_json_defaults() {
        let record: ReadRecord = serde_json::from_str(r#"{"read_id":"r","seq":"AC"}"#).unwrap();
        assert!(record.signal.is_empty());
        assert!(!record.is_duplex);
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("base_mod_probs"));
    }
}
