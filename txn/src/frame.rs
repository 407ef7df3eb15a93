//! A single transaction scope level: a lazily-materialized engine
//! transaction plus the cursors opened against it.
//!
//! Lazy materialization matters because most scopes in a request path
//! never touch a writable table directly (they delegate to a nested
//! scope, or only read through an already-open cursor inherited from a
//! parent); opening a real MDBX transaction for each one would be pure
//! overhead.

use kv_engine::{KvEnv, KvResult, Txn, TxnMode};

use common::IsolationLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(pub u64);

/// Spec §3 data model: `state ∈ {READY, PRE_COMMITTED, EXITED}`.
/// `PreCommitted` is only ever observed transiently inside `Scope::commit`,
/// between the child-cascade/cursor-close phase and the engine-txn commit;
/// a frame never outlives its own commit call once it reaches that state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrameState {
    Ready,
    PreCommitted,
    Exited,
}

pub(crate) struct Frame {
    pub id: FrameId,
    /// Engine-nesting parent: whatever frame's transaction this frame's
    /// transaction must nest under to satisfy MDBX, regardless of whether
    /// the two are logically related (`enter_top` sets this but not
    /// `logical_parent`).
    pub parent: Option<FrameId>,
    /// Logical parent for isolation inheritance and cascade commit/exit
    /// (spec invariant S2). `None` for frames opened via `enter_top`, which
    /// are logically independent even though they still nest physically.
    pub logical_parent: Option<FrameId>,
    /// The most recently entered logical child, if any and still open.
    /// Cleared when that child is committed, exited, or detached.
    pub child: Option<FrameId>,
    pub isolation: IsolationLevel,
    pub for_update: bool,
    txn: Option<Txn>,
    read_only: bool,
    pub cursor_count: usize,
    pub state: FrameState,
}

impl Frame {
    pub fn new(
        id: FrameId,
        parent: Option<FrameId>,
        logical_parent: Option<FrameId>,
        isolation: IsolationLevel,
        for_update: bool,
    ) -> Self {
        Self {
            id,
            parent,
            logical_parent,
            child: None,
            isolation,
            for_update,
            txn: None,
            read_only: !for_update,
            cursor_count: 0,
            state: FrameState::Ready,
        }
    }

    pub fn is_materialized(&self) -> bool {
        self.txn.is_some()
    }

    /// Promotes a read-only frame to read-write the first time a caller
    /// asks for a writable engine transaction. Has no effect once the
    /// engine transaction has already been opened — the frame's mode is
    /// then fixed for its lifetime.
    pub fn set_for_update(&mut self) {
        if !self.is_materialized() {
            self.for_update = true;
            self.read_only = false;
        }
    }

    /// Returns the materialized engine transaction, opening it against
    /// `env` (nested under `parent_txn` when this frame isn't top-level)
    /// the first time it's needed.
    pub fn get_txn<'a>(
        &'a mut self,
        env: &KvEnv,
        parent_txn: Option<*mut mdbx_sys::MDBX_txn>,
    ) -> KvResult<&'a Txn> {
        if self.txn.is_none() {
            let mode = if self.read_only {
                TxnMode::ReadOnly
            } else {
                TxnMode::ReadWrite
            };
            let txn = Txn::begin(env, parent_txn, mode)?;
            self.txn = Some(txn);
        }
        Ok(self.txn.as_ref().unwrap())
    }

    pub fn txn(&self) -> Option<&Txn> {
        self.txn.as_ref()
    }

    pub fn take_txn(&mut self) -> Option<Txn> {
        self.txn.take()
    }
}
