//! Transaction primitives: begin (optionally nested under a parent),
//! commit, abort.
//!
//! Grounded on `mdbx-base::txn_helpers::{with_read_txn, with_write_txn}`,
//! generalized from their hard-coded `ptr::null_mut()` parent argument to a
//! real optional parent so C4 (the `txn` crate's scope/frame stack) can
//! open genuine MDBX nested write transactions instead of emulating them.

use std::ptr;

use crate::env::KvEnv;
use crate::error::{KvError, KvResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnMode {
    ReadOnly,
    ReadWrite,
}

/// A raw MDBX transaction handle. `commit`/`abort` consume `self`; if
/// neither is called explicitly, `Drop` aborts, matching the teacher's
/// "always abort on the way out" discipline in `with_read_txn`.
pub struct Txn {
    raw: *mut mdbx_sys::MDBX_txn,
    mode: TxnMode,
    done: bool,
}

impl Txn {
    /// The raw MDBX transaction pointer, exposed so a caller managing many
    /// transactions at once (the `txn` crate's frame stack) can pass it as
    /// another transaction's parent without needing two live `&Txn`
    /// borrows into the same table at once.
    pub fn raw_ptr(&self) -> *mut mdbx_sys::MDBX_txn {
        self.raw
    }

    /// Begins a transaction. `parent`, when given, must be the raw pointer
    /// of a live read-write transaction opened against the same
    /// environment; this opens a real MDBX nested transaction (the parent
    /// is frozen until the child commits or aborts). `None` opens a
    /// top-level transaction.
    pub fn begin(
        env: &KvEnv,
        parent: Option<*mut mdbx_sys::MDBX_txn>,
        mode: TxnMode,
    ) -> KvResult<Self> {
        let parent_ptr = parent.unwrap_or(ptr::null_mut());
        let flags = match mode {
            TxnMode::ReadOnly => mdbx_sys::MDBX_TXN_RDONLY,
            TxnMode::ReadWrite => 0,
        };
        let mut raw: *mut mdbx_sys::MDBX_txn = ptr::null_mut();
        let rc = unsafe {
            mdbx_sys::mdbx_txn_begin_ex(env.as_ptr(), parent_ptr, flags, &mut raw, ptr::null_mut())
        };
        if rc != mdbx_sys::MDBX_SUCCESS {
            return Err(KvError::from_rc("mdbx_txn_begin_ex", rc));
        }
        Ok(Txn {
            raw,
            mode,
            done: false,
        })
    }

    pub fn mode(&self) -> TxnMode {
        self.mode
    }

    pub fn as_ptr(&self) -> *mut mdbx_sys::MDBX_txn {
        self.raw
    }

    pub fn commit(mut self) -> KvResult<()> {
        let rc = unsafe {
            mdbx_sys::mdbx_txn_commit_ex(self.raw, ptr::null_mut())
        };
        self.done = true;
        if rc != mdbx_sys::MDBX_SUCCESS {
            return Err(KvError::from_rc("mdbx_txn_commit_ex", rc));
        }
        Ok(())
    }

    pub fn abort(mut self) -> KvResult<()> {
        let rc = unsafe { mdbx_sys::mdbx_txn_abort(self.raw) };
        self.done = true;
        if rc != mdbx_sys::MDBX_SUCCESS {
            return Err(KvError::from_rc("mdbx_txn_abort", rc));
        }
        Ok(())
    }
}

impl Drop for Txn {
    fn drop(&mut self) {
        if !self.done {
            unsafe {
                mdbx_sys::mdbx_txn_abort(self.raw);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::EnvBuilder;

    #[test]
    fn nested_write_txn_is_native() {
        let dir = tempfile::tempdir().unwrap();
        let env = EnvBuilder::new(dir.path()).open().unwrap();
        let parent = Txn::begin(&env, None, TxnMode::ReadWrite).unwrap();
        let child = Txn::begin(&env, Some(parent.raw_ptr()), TxnMode::ReadWrite).unwrap();
        child.commit().unwrap();
        parent.commit().unwrap();
    }

    #[test]
    fn abort_on_drop_is_safe() {
        let dir = tempfile::tempdir().unwrap();
        let env = EnvBuilder::new(dir.path()).open().unwrap();
        {
            let _txn = Txn::begin(&env, None, TxnMode::ReadWrite).unwrap();
        }
        let txn = Txn::begin(&env, None, TxnMode::ReadWrite).unwrap();
        txn.commit().unwrap();
    }
}
