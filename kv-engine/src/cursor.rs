//! Raw cursor primitives: open/close, first/last/next/prev/prev-no-dup,
//! get-current, and `search_key_range` — the engine's one native seek
//! primitive ("position at the first key >= K"), which `range-cursor` (C5)
//! uses to emulate the "<=K" seek the spec needs but the engine doesn't
//! offer directly.
//!
//! The teacher's `storage::engine::mdbx_engine` reaches for the safe
//! `libmdbx` crate's cursor and works around its borrow shape with an
//! `unsafe { transmute }`. This adapter instead drives `mdbx_sys`'s cursor
//! FFI directly, which needs no such workaround.

use std::os::raw::c_void;

use crate::database::Dbi;
use crate::error::{KvError, KvResult};
use crate::txn::Txn;

fn as_val(bytes: &[u8]) -> mdbx_sys::MDBX_val {
    mdbx_sys::MDBX_val {
        iov_base: bytes.as_ptr() as *mut c_void,
        iov_len: bytes.len(),
    }
}

fn empty_val() -> mdbx_sys::MDBX_val {
    mdbx_sys::MDBX_val {
        iov_base: std::ptr::null_mut(),
        iov_len: 0,
    }
}

unsafe fn val_to_vec(v: &mdbx_sys::MDBX_val) -> Vec<u8> {
    if v.iov_base.is_null() {
        return Vec::new();
    }
    std::slice::from_raw_parts(v.iov_base as *const u8, v.iov_len).to_vec()
}

pub struct Cursor {
    raw: *mut mdbx_sys::MDBX_cursor,
}

/// The raw cursor-get directions this adapter exposes. Mirrors the subset
/// of `MDBX_cursor_op` that spec §4.1 names explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seek {
    First,
    Last,
    Next,
    Prev,
    PrevNoDup,
    GetCurrent,
}

impl Cursor {
    pub fn open(txn: &Txn, dbi: Dbi) -> KvResult<Self> {
        let mut raw: *mut mdbx_sys::MDBX_cursor = std::ptr::null_mut();
        let rc = unsafe { mdbx_sys::mdbx_cursor_open(txn.as_ptr(), dbi.0, &mut raw) };
        if rc != mdbx_sys::MDBX_SUCCESS {
            return Err(KvError::from_rc("mdbx_cursor_open", rc));
        }
        Ok(Cursor { raw })
    }

    fn op(&mut self, op: mdbx_sys::MDBX_cursor_op) -> KvResult<Option<(Vec<u8>, Vec<u8>)>> {
        let mut k = empty_val();
        let mut v = empty_val();
        let rc = unsafe { mdbx_sys::mdbx_cursor_get(self.raw, &mut k, &mut v, op) };
        if rc == mdbx_sys::MDBX_NOTFOUND {
            return Ok(None);
        }
        if rc != mdbx_sys::MDBX_SUCCESS {
            return Err(KvError::from_rc("mdbx_cursor_get", rc));
        }
        Ok(Some(unsafe { (val_to_vec(&k), val_to_vec(&v)) }))
    }

    pub fn seek(&mut self, seek: Seek) -> KvResult<Option<(Vec<u8>, Vec<u8>)>> {
        let op = match seek {
            Seek::First => mdbx_sys::MDBX_cursor_op::MDBX_FIRST,
            Seek::Last => mdbx_sys::MDBX_cursor_op::MDBX_LAST,
            Seek::Next => mdbx_sys::MDBX_cursor_op::MDBX_NEXT,
            Seek::Prev => mdbx_sys::MDBX_cursor_op::MDBX_PREV,
            Seek::PrevNoDup => mdbx_sys::MDBX_cursor_op::MDBX_PREV_NODUP,
            Seek::GetCurrent => mdbx_sys::MDBX_cursor_op::MDBX_GET_CURRENT,
        };
        self.op(op)
    }

    /// Positions the cursor at the first key `>= key` — the engine's one
    /// native directional seek (spec §4.1 `cursor_search_key_range`). The
    /// range-cursor crate builds the reverse "<=K" emulation on top of
    /// this plus `Seek::Prev`.
    pub fn search_key_range(&mut self, key: &[u8]) -> KvResult<Option<(Vec<u8>, Vec<u8>)>> {
        let mut k = as_val(key);
        let mut v = empty_val();
        let rc = unsafe {
            mdbx_sys::mdbx_cursor_get(self.raw, &mut k, &mut v, mdbx_sys::MDBX_cursor_op::MDBX_SET_RANGE)
        };
        if rc == mdbx_sys::MDBX_NOTFOUND {
            return Ok(None);
        }
        if rc != mdbx_sys::MDBX_SUCCESS {
            return Err(KvError::from_rc("mdbx_cursor_get(set_range)", rc));
        }
        Ok(Some(unsafe { (val_to_vec(&k), val_to_vec(&v)) }))
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        unsafe { mdbx_sys::mdbx_cursor_close(self.raw) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::open_db;
    use crate::env::EnvBuilder;
    use crate::ops::put;
    use crate::txn::{Txn, TxnMode};

    #[test]
    fn search_key_range_finds_next_key() {
        let dir = tempfile::tempdir().unwrap();
        let env = EnvBuilder::new(dir.path()).open().unwrap();
        let txn = Txn::begin(&env, None, TxnMode::ReadWrite).unwrap();
        let dbi = open_db(&txn, Some("t"), true).unwrap();
        put(&txn, dbi, b"a", b"1").unwrap();
        put(&txn, dbi, b"c", b"3").unwrap();

        let mut cursor = Cursor::open(&txn, dbi).unwrap();
        let (k, v) = cursor.search_key_range(b"b").unwrap().unwrap();
        assert_eq!(k, b"c");
        assert_eq!(v, b"3");

        assert_eq!(cursor.seek(Seek::First).unwrap().unwrap().0, b"a");
        assert_eq!(cursor.seek(Seek::Last).unwrap().unwrap().0, b"c");
        txn.commit().unwrap();
    }
}
