//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use crossbeam_channel::Receiver;
use readpipe::pipeline::Message;
use readpipe::Read;
use std::sync::Arc;
use std::time::Duration;

/// Force timeout long enough that partial batches only flush on termination
pub fn no_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Assert two floats are approximately equal
pub fn assert_float_eq(a: f64, b: f64, epsilon: f64) {
    assert!(
        (a - b).abs() < epsilon,
        "Expected {} to be approximately equal to {} (epsilon: {})",
        a,
        b,
        epsilon
    );
}

/// Every read currently buffered in the channel, in arrival order
pub fn drain_reads(rx: &Receiver<Message>) -> Vec<Arc<Read>> {
    rx.try_iter().filter_map(Message::into_read).collect()
}

/// Read ids of `reads`, sorted
pub fn sorted_ids(reads: &[Arc<Read>]) -> Vec<String> {
    let mut ids: Vec<_> = reads.iter().map(|r| r.read_id.clone()).collect();
    ids.sort();
    ids
}
