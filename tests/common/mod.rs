//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod stages;

use framepipe::pipeline::{NodeId, RunningGraph};
use std::time::{Duration, Instant};

/// Upper bound for anything a test waits on
pub fn test_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Poll until `node` has processed at least `count` envelopes.
pub fn wait_for_processed(running: &RunningGraph, node: NodeId, count: u64) {
    let deadline = Instant::now() + test_timeout();
    while running.processed(node).unwrap() < count {
        assert!(
            Instant::now() < deadline,
            "node {} processed only {} of {} envelopes",
            node,
            running.processed(node).unwrap(),
            count
        );
        std::thread::sleep(Duration::from_millis(2));
    }
}

/// Assert that `ids` never goes backwards.
pub fn assert_non_decreasing(ids: &[u64]) {
    for pair in ids.windows(2) {
        assert!(
            pair[0] <= pair[1],
            "sequence went backwards: {} then {}",
            pair[0],
            pair[1]
        );
    }
}
