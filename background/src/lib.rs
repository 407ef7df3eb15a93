//! Background maintenance controllers (spec §2 component C8): a
//! checkpointer and a stale-reader-slot reclaimer, each its own
//! `std::thread` (no cooperative event loop, per spec §5), parked on a
//! condvar for interruptible sleep.

mod worker;

pub mod checkpointer;
pub mod deadlock;
pub mod policy;

pub use checkpointer::Checkpointer;
pub use deadlock::DeadlockDetector;
pub use policy::{CheckpointPolicy, DeadlockDetectorPolicy};
