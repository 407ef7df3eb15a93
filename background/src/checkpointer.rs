//! Periodic/forced checkpoint controller (spec §4.5, folded into C8).
//!
//! Holds only a `Weak<KvEnv>`, not a strong reference to the repository
//! that owns it: the repository outlives its background controllers during
//! shutdown (it joins them before dropping its environment), but the
//! controller must never be the thing keeping the environment alive on its
//! own. A strong `Arc<Repository>` isn't used at all — `repository` depends
//! on `background`, not the other way around, so this crate only ever sees
//! the engine handle it actually needs to checkpoint.

use std::sync::{Arc, Weak};

use tracing::{info, warn};

use kv_engine::KvEnv;

use crate::policy::CheckpointPolicy;
use crate::worker::Worker;

pub struct Checkpointer {
    worker: Worker,
}

impl Checkpointer {
    /// Spawns the checkpoint thread. `env` is a weak reference: once every
    /// strong `Arc<KvEnv>` is dropped, the next tick observes an expired
    /// weak reference and the thread exits on its own.
    pub fn spawn(env: Weak<KvEnv>, policy: CheckpointPolicy) -> Self {
        let worker = Worker::spawn("checkpointer", policy.interval, move |forced| {
            let Some(env) = env.upgrade() else {
                return false;
            };
            match env.sync(forced) {
                Ok(()) => info!(forced, "checkpoint flushed"),
                Err(e) => warn!(forced, error = %e, "checkpoint failed"),
            }
            true
        });
        Self { worker }
    }

    /// Blocks until the checkpointer is idle, then suspends it for `ms`
    /// milliseconds (spec §4.5 `suspend(ms)`).
    pub fn suspend(&self, ms: u64) {
        self.worker.suspend(ms);
    }

    pub fn resume(&self) {
        self.worker.resume();
    }

    /// Requests an out-of-cycle checkpoint on the next wake-up, bypassing
    /// `suspend` and not waiting for `interval` to elapse.
    pub fn force(&self) {
        self.worker.force();
    }

    /// Stops the checkpoint thread and waits for it to exit. Also runs on
    /// `Drop`, so an explicit call is only needed when the caller wants to
    /// block until the thread has actually stopped.
    pub fn shutdown(&mut self) {
        self.worker.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use kv_engine::env::EnvBuilder;

    use super::*;

    #[test]
    fn forced_checkpoint_runs_promptly() {
        let dir = tempfile::tempdir().unwrap();
        let env = Arc::new(EnvBuilder::new(dir.path()).open().unwrap());
        let mut checkpointer = Checkpointer::spawn(
            Arc::downgrade(&env),
            CheckpointPolicy::with_interval(Duration::from_secs(3600)),
        );
        checkpointer.force();
        std::thread::sleep(Duration::from_millis(100));
        checkpointer.shutdown();
    }

    #[test]
    fn checkpointer_exits_once_env_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let env = Arc::new(EnvBuilder::new(dir.path()).open().unwrap());
        let mut checkpointer = Checkpointer::spawn(
            Arc::downgrade(&env),
            CheckpointPolicy::with_interval(Duration::from_millis(10)),
        );
        drop(env);
        std::thread::sleep(Duration::from_millis(100));
        checkpointer.shutdown();
    }
}
