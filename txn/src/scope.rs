//! Thread-attached transaction scope (spec §4.2, component C4).
//!
//! The original system this spec distills from leans on implicit
//! thread-local state to track "the current transaction frame for this
//! thread" the way a `ThreadLocal` would. Rust has no equivalent implicit
//! object graph, so this is modeled explicitly: a registry keyed by
//! `std::thread::ThreadId` mapping to that thread's frame stack, guarded
//! by a `parking_lot::Mutex` (mirroring the teacher's preference for
//! `parking_lot` over `std::sync` throughout `storage`/`indexing`).
//!
//! MDBX ties a write transaction to the OS thread that opened it — it has
//! no BDB-style explicit thread hand-off for an in-flight write
//! transaction. `detach`/`attach` therefore only suspend and resume
//! read-only frames across threads; moving a frame holding an open write
//! transaction is rejected with `StoreError::NotSupported`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

use parking_lot::Mutex;
use tracing::{trace, warn};

use common::{IsolationLevel, StoreError, StoreResult};
use kv_engine::KvEnv;

use crate::frame::{Frame, FrameId, FrameState};

type CursorCloser = Box<dyn FnMut() + Send>;

struct SuspendedFrame {
    frame: Frame,
}

/// Owns every live frame for a repository and the per-thread stacks that
/// reference them.
pub struct Scope {
    env: Arc<KvEnv>,
    frames: Mutex<HashMap<FrameId, Frame>>,
    thread_stacks: Mutex<HashMap<ThreadId, Vec<FrameId>>>,
    suspended: Mutex<HashMap<FrameId, SuspendedFrame>>,
    cursor_closers: Mutex<HashMap<FrameId, Vec<CursorCloser>>>,
    next_id: AtomicU64,
}

impl Scope {
    pub fn new(env: Arc<KvEnv>) -> Self {
        Self {
            env,
            frames: Mutex::new(HashMap::new()),
            thread_stacks: Mutex::new(HashMap::new()),
            suspended: Mutex::new(HashMap::new()),
            cursor_closers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn alloc_id(&self) -> FrameId {
        FrameId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn current_thread_top(&self) -> Option<FrameId> {
        let stacks = self.thread_stacks.lock();
        stacks
            .get(&std::thread::current().id())
            .and_then(|s| s.last().copied())
    }

    /// Opens a new frame nested under the current thread's top frame (or a
    /// fresh top-level frame if the thread has none). Effective isolation
    /// is never weaker than the parent's, matching spec §4.2's rule that a
    /// nested scope can only tighten, not loosen, its enclosing isolation.
    pub fn enter(&self, isolation: IsolationLevel, for_update: bool) -> FrameId {
        let parent = self.current_thread_top();
        let effective_isolation = match parent {
            Some(p) => {
                let frames = self.frames.lock();
                let parent_isolation = frames.get(&p).map(|f| f.isolation).unwrap_or(isolation);
                isolation.max(parent_isolation)
            }
            None => isolation,
        };

        let id = self.alloc_id();
        let frame = Frame::new(id, parent, parent, effective_isolation, for_update);
        self.frames.lock().insert(id, frame);
        self.link_child(parent, id);

        let mut stacks = self.thread_stacks.lock();
        stacks.entry(std::thread::current().id()).or_default().push(id);

        trace!(frame = id.0, ?parent, "entered nested frame");
        id
    }

    /// Opens a frame that is a genuine MDBX-level nested transaction when
    /// the calling thread already holds one open (required by the engine)
    /// but behaves as a logically independent top-level scope: its
    /// isolation is exactly what the caller asked for, it doesn't inherit
    /// the enclosing frame's for-update flag, and committing it doesn't
    /// require the enclosing frame to commit too — so it carries an engine
    /// nesting parent (for the raw MDBX parent pointer) but no *logical*
    /// parent, and is never linked into any frame's cascade-commit child
    /// slot.
    pub fn enter_top(&self, isolation: IsolationLevel, for_update: bool) -> FrameId {
        let id = self.alloc_id();
        let engine_parent = self.current_thread_top();
        let frame = Frame::new(id, engine_parent, None, isolation, for_update);
        self.frames.lock().insert(id, frame);

        let mut stacks = self.thread_stacks.lock();
        stacks.entry(std::thread::current().id()).or_default().push(id);

        trace!(frame = id.0, "entered top-level frame");
        id
    }

    /// Records `child` as `parent`'s logical child (invariant S1: frames
    /// form a single stack per thread, so a frame has at most one open
    /// logical child at a time).
    fn link_child(&self, parent: Option<FrameId>, child: FrameId) {
        if let Some(parent_id) = parent {
            if let Some(parent_frame) = self.frames.lock().get_mut(&parent_id) {
                parent_frame.child = Some(child);
            }
        }
    }

    /// Clears `frame`'s logical parent's child link once `frame` has
    /// committed, exited, or detached, so a later cascade on the parent
    /// doesn't try to act on a frame that is already gone.
    fn unlink_child(&self, frame: &Frame) {
        if let Some(parent_id) = frame.logical_parent {
            if let Some(parent_frame) = self.frames.lock().get_mut(&parent_id) {
                if parent_frame.child == Some(frame.id) {
                    parent_frame.child = None;
                }
            }
        }
    }

    /// Lazily materializes (if not already) and returns the frame's
    /// transaction, nesting under its parent's transaction when one
    /// exists and is itself materialized.
    pub fn get_txn(&self, frame_id: FrameId) -> StoreResult<()> {
        // Pre-materializes the parent chain (innermost last) so each
        // `get_txn` call only ever needs one frame borrowed mutably at a
        // time — avoids taking two `&mut Frame` out of the same map.
        let mut chain = Vec::new();
        {
            let frames = self.frames.lock();
            let mut cur = Some(frame_id);
            while let Some(id) = cur {
                let Some(f) = frames.get(&id) else { break };
                if f.is_materialized() {
                    break;
                }
                chain.push(id);
                cur = f.parent;
            }
        }
        chain.reverse();

        for id in chain {
            let parent_ptr = {
                let frames = self.frames.lock();
                frames
                    .get(&id)
                    .and_then(|f| f.parent)
                    .and_then(|pid| frames.get(&pid))
                    .and_then(|p| p.txn())
                    .map(|t| t.raw_ptr())
            };
            let mut frames = self.frames.lock();
            let frame = frames
                .get_mut(&id)
                .ok_or_else(|| StoreError::Engine("frame not found".into()))?;
            frame.get_txn(&self.env, parent_ptr).map_err(|e| {
                StoreError::Engine(format!("failed to materialize transaction: {e}"))
            })?;
        }
        Ok(())
    }

    /// Materializes `frame_id`'s transaction if needed, then hands `f` a
    /// borrowed reference to it while the frame map stays locked. Every
    /// call into `kv-engine` from a higher layer goes through this rather
    /// than handing out a bare `&Txn`, since the frame map can't lend one
    /// out past the lock guard's lifetime.
    pub fn with_txn<R>(&self, frame_id: FrameId, f: impl FnOnce(&kv_engine::Txn) -> R) -> StoreResult<R> {
        self.get_txn(frame_id)?;
        let frames = self.frames.lock();
        let frame = frames
            .get(&frame_id)
            .ok_or_else(|| StoreError::Engine("frame not found".into()))?;
        let txn = frame
            .txn()
            .ok_or_else(|| StoreError::Engine("frame transaction not materialized".into()))?;
        Ok(f(txn))
    }

    pub fn set_for_update(&self, frame_id: FrameId) {
        if let Some(frame) = self.frames.lock().get_mut(&frame_id) {
            frame.set_for_update();
        }
    }

    pub fn register_cursor_closer(&self, frame_id: FrameId, closer: CursorCloser) {
        self.cursor_closers.lock().entry(frame_id).or_default().push(closer);
        if let Some(frame) = self.frames.lock().get_mut(&frame_id) {
            frame.cursor_count += 1;
        }
    }

    fn close_cursors(&self, frame_id: FrameId) {
        if let Some(mut closers) = self.cursor_closers.lock().remove(&frame_id) {
            for closer in closers.iter_mut() {
                closer();
            }
        }
    }

    fn pop_from_thread_stack(&self, frame_id: FrameId) {
        let mut stacks = self.thread_stacks.lock();
        if let Some(stack) = stacks.get_mut(&std::thread::current().id()) {
            stack.retain(|id| *id != frame_id);
        }
    }

    /// Two-phase commit hook (spec §4.2 `pre_commit`): cascades a full
    /// commit of the frame's logical child first (invariant S2 — a parent
    /// never commits its own engine txn until every descendant has),
    /// closes this frame's registered cursors, then marks it
    /// `PreCommitted`. Idempotent: calling it again (as `commit` itself
    /// does) on an already-pre-committed or already-exited frame is a
    /// no-op, so callers may invoke it explicitly ahead of `commit` to
    /// hold the frame locked across both phases without double-running
    /// the cascade.
    pub fn pre_commit(&self, frame_id: FrameId) -> StoreResult<()> {
        let state = self
            .frames
            .lock()
            .get(&frame_id)
            .map(|f| f.state)
            .ok_or_else(|| StoreError::Engine("frame not found".into()))?;
        if state != FrameState::Ready {
            return Ok(());
        }

        let child = self.frames.lock().get(&frame_id).and_then(|f| f.child);
        if let Some(child_id) = child {
            self.commit(child_id)?;
        }

        self.close_cursors(frame_id);
        if let Some(frame) = self.frames.lock().get_mut(&frame_id) {
            frame.state = FrameState::PreCommitted;
        }
        Ok(())
    }

    /// Runs `pre_commit` (cascading the child and closing cursors) then
    /// commits the frame's own engine transaction, if one was ever
    /// materialized, and removes the frame. A no-op transaction (never
    /// touched the engine) simply disappears.
    pub fn commit(&self, frame_id: FrameId) -> StoreResult<()> {
        self.pre_commit(frame_id)?;

        let mut frame = {
            let mut frames = self.frames.lock();
            frames
                .remove(&frame_id)
                .ok_or_else(|| StoreError::Engine("frame not found".into()))?
        };
        self.pop_from_thread_stack(frame_id);
        self.unlink_child(&frame);

        if let Some(engine_txn) = frame.take_txn() {
            engine_txn
                .commit()
                .map_err(|e| StoreError::Engine(format!("commit failed: {e}")))?;
        }
        frame.state = FrameState::Exited;
        Ok(())
    }

    /// Exits the frame, cascading to its logical child first (invariant
    /// S2's mirror image for abort) and always completing its own
    /// cleanup even if the child's exit failed. Propagates the first
    /// captured error; a failure in the child's exit is logged and
    /// suppressed in favor of it so this frame's own resources are still
    /// released.
    pub fn exit(&self, frame_id: FrameId) -> StoreResult<()> {
        let child = self.frames.lock().get(&frame_id).and_then(|f| f.child);
        let mut first_err = None;
        if let Some(child_id) = child {
            if let Err(e) = self.exit(child_id) {
                warn!(frame = child_id.0, error = %e, "child frame exit failed, continuing parent cleanup");
                first_err = Some(e);
            }
        }

        self.close_cursors(frame_id);

        let mut frame = match {
            let mut frames = self.frames.lock();
            frames.remove(&frame_id)
        } {
            Some(f) => f,
            None => return first_err.map_or(Err(StoreError::Engine("frame not found".into())), Err),
        };
        self.pop_from_thread_stack(frame_id);
        self.unlink_child(&frame);

        let own_result = if let Some(engine_txn) = frame.take_txn() {
            engine_txn.abort().map_err(|e| StoreError::Engine(format!("abort failed: {e}")))
        } else {
            Ok(())
        };
        frame.state = FrameState::Exited;

        match first_err {
            Some(e) => Err(e),
            None => own_result,
        }
    }

    /// Suspends a frame so it no longer belongs to any thread's active
    /// stack, returning it for later `attach`. Only legal for frames that
    /// have not materialized a read-write transaction, since MDBX write
    /// transactions cannot change owning threads.
    pub fn detach(&self, frame_id: FrameId) -> StoreResult<()> {
        let is_writable_and_open = self
            .frames
            .lock()
            .get(&frame_id)
            .map(|f| f.is_materialized() && f.for_update)
            .unwrap_or(false);
        if is_writable_and_open {
            return Err(StoreError::NotSupported(
                "cannot detach a frame holding an open write transaction".into(),
            ));
        }

        self.pop_from_thread_stack(frame_id);
        let frame = self
            .frames
            .lock()
            .remove(&frame_id)
            .ok_or_else(|| StoreError::Engine("frame not found".into()))?;
        self.unlink_child(&frame);
        self.suspended.lock().insert(frame_id, SuspendedFrame { frame });
        Ok(())
    }

    /// Resumes a previously detached frame onto the calling thread's
    /// stack.
    pub fn attach(&self, frame_id: FrameId) -> StoreResult<()> {
        let suspended = self
            .suspended
            .lock()
            .remove(&frame_id)
            .ok_or_else(|| StoreError::Engine("no such suspended frame".into()))?;
        self.frames.lock().insert(frame_id, suspended.frame);
        self.thread_stacks
            .lock()
            .entry(std::thread::current().id())
            .or_default()
            .push(frame_id);
        Ok(())
    }

    /// Suspends and discards a frame permanently, aborting its engine
    /// transaction if one was open, cascading to its child first. Used
    /// when a background controller needs to guarantee a scope never
    /// resumes (spec §4.2 `close`).
    pub fn close(&self, frame_id: FrameId) -> StoreResult<()> {
        let child = self.frames.lock().get(&frame_id).and_then(|f| f.child);
        if let Some(child_id) = child {
            let _ = self.close(child_id);
        }

        self.close_cursors(frame_id);

        let frame = self
            .frames
            .lock()
            .remove(&frame_id)
            .or_else(|| self.suspended.lock().remove(&frame_id).map(|s| s.frame));
        let Some(mut frame) = frame else {
            warn!(frame = frame_id.0, "close called on unknown frame");
            return Ok(());
        };
        self.unlink_child(&frame);
        if let Some(engine_txn) = frame.take_txn() {
            engine_txn.abort().map_err(|e| StoreError::Engine(format!("abort failed: {e}")))?;
        }
        frame.state = FrameState::Exited;
        Ok(())
    }

    /// Closes every still-open frame, root-first through `close`'s own
    /// child cascade. Used by `Repository::shutdown` (spec §4.6 step 2) to
    /// guarantee no dangling transaction survives the environment being
    /// torn down, regardless of which thread opened it or whether that
    /// thread ever came back to commit or exit it.
    pub fn close_all(&self) {
        let roots: Vec<FrameId> = {
            let frames = self.frames.lock();
            let suspended = self.suspended.lock();
            frames
                .values()
                .filter(|f| f.logical_parent.is_none() && f.parent.is_none())
                .map(|f| f.id)
                .chain(suspended.values().filter(|s| s.frame.logical_parent.is_none() && s.frame.parent.is_none()).map(|s| s.frame.id))
                .collect()
        };
        for root in roots {
            let _ = self.close(root);
        }
    }
}
