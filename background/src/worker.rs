//! Shared interruptible-sleep thread loop used by both the checkpointer
//! and the deadlock detector (spec §4.5). Neither controller runs on an
//! async runtime — each owns one dedicated `std::thread`, parked on a
//! `Condvar` so `suspend`/`resume`/`force`/shutdown take effect immediately
//! instead of waiting out a sleep. Grounded on the teacher's own
//! `std::thread::spawn` + `Arc`-shared-state idiom (`mdbx-base`'s
//! concurrent-reader tests), generalized from a one-shot test thread to a
//! long-lived periodic worker.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

/// A century is long enough to stand in for "the maximum representable
/// instant" without risking `Instant` arithmetic overflow on any platform,
/// and is what `suspend`'s overflow clamp (spec §4.5, §8 boundary test)
/// saturates to.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

#[derive(Default)]
struct ControlState {
    suspend_until: Option<Instant>,
    force: bool,
    in_progress: bool,
    shutdown: bool,
}

struct Shared {
    state: Mutex<ControlState>,
    cvar: Condvar,
}

/// One periodic background thread. `tick` runs once per wake-up (skipped
/// while suspended, unless forced) and returns `false` to signal the
/// resource it depends on has gone away, ending the loop early.
pub(crate) struct Worker {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn spawn(
        name: &'static str,
        interval: Duration,
        mut tick: impl FnMut(bool) -> bool + Send + 'static,
    ) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(ControlState::default()),
            cvar: Condvar::new(),
        });
        let worker_shared = shared.clone();

        let handle = std::thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                loop {
                    let forced;
                    {
                        let mut state = worker_shared.state.lock();
                        if !state.shutdown && !state.force {
                            worker_shared.cvar.wait_for(&mut state, interval);
                        }
                        if state.shutdown {
                            debug!(worker = name, "shutting down");
                            return;
                        }
                        forced = std::mem::take(&mut state.force);
                        let suspended = state.suspend_until.is_some_and(|until| Instant::now() < until);
                        if suspended && !forced {
                            trace!(worker = name, "suspended, skipping tick");
                            continue;
                        }
                        state.in_progress = true;
                    }

                    let alive = tick(forced);

                    {
                        let mut state = worker_shared.state.lock();
                        state.in_progress = false;
                        worker_shared.cvar.notify_all();
                    }
                    if !alive {
                        debug!(worker = name, "target dropped, exiting");
                        return;
                    }
                }
            })
            .expect("spawn background worker thread");

        Self {
            shared,
            handle: Some(handle),
        }
    }

    /// Blocks until no tick is currently running, then sets `suspend_until
    /// = now + ms`, clamped to `FAR_FUTURE` if the addition would overflow
    /// `Instant`'s representable range (spec §4.5, §8's literal
    /// `suspendCheckpointer(Long.MAX-1ms)` boundary test).
    pub fn suspend(&self, ms: u64) {
        let mut state = self.shared.state.lock();
        while state.in_progress {
            self.shared.cvar.wait(&mut state);
        }
        let now = Instant::now();
        let deadline = now
            .checked_add(Duration::from_millis(ms))
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now);
        state.suspend_until = Some(deadline);
    }

    pub fn resume(&self) {
        let mut state = self.shared.state.lock();
        state.suspend_until = None;
        drop(state);
        self.shared.cvar.notify_all();
    }

    /// Blocks until no tick is currently running, requests one out of
    /// cycle (bypassing suspension and not waiting for `interval` to
    /// elapse), then blocks again until that tick has actually completed
    /// (spec §8 testable property 8).
    pub fn force(&self) {
        let mut state = self.shared.state.lock();
        while state.in_progress {
            self.shared.cvar.wait(&mut state);
        }
        state.force = true;
        self.shared.cvar.notify_all();
        while state.force || state.in_progress {
            self.shared.cvar.wait(&mut state);
        }
    }

    pub fn shutdown(&mut self) {
        self.shared.state.lock().shutdown = true;
        self.shared.cvar.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn force_blocks_until_tick_completes() {
        let ticks = Arc::new(AtomicU32::new(0));
        let counted = ticks.clone();
        let mut worker = Worker::spawn("test", Duration::from_secs(3600), move |_forced| {
            std::thread::sleep(Duration::from_millis(50));
            counted.fetch_add(1, Ordering::SeqCst);
            true
        });
        worker.force();
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
        worker.shutdown();
    }

    #[test]
    fn suspend_overflow_is_clamped_not_negative() {
        let worker = Worker::spawn("test", Duration::from_secs(3600), |_| true);
        worker.suspend(u64::MAX - 1);
        let until = worker.shared.state.lock().suspend_until.expect("suspend_until set");
        assert!(until > Instant::now());
    }
}
