//! Scheduling knobs for the background controllers.

use std::time::Duration;

/// When the checkpointer wakes up and flushes. A forced checkpoint (via
/// `Checkpointer::force`) always runs regardless of `interval`.
#[derive(Debug, Clone, Copy)]
pub struct CheckpointPolicy {
    pub interval: Duration,
}

impl CheckpointPolicy {
    pub fn with_interval(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Default for CheckpointPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
        }
    }
}

/// How often the reader-slot reclaimer sweeps.
#[derive(Debug, Clone, Copy)]
pub struct DeadlockDetectorPolicy {
    pub interval: Duration,
}

impl DeadlockDetectorPolicy {
    pub fn with_interval(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Default for DeadlockDetectorPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}
