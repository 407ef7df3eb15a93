//! Point operations: exists, get, put, put-no-overwrite, delete, is_empty.
//!
//! Grounded on the CRUD section of the teacher's `storage::engine::mdbx_engine`
//! module (`txn.get`, `txn.put`, `txn.del`) but expressed against the raw
//! `mdbx_sys` FFI to stay consistent with `env.rs`/`txn.rs`/`cursor.rs`
//! rather than mixing in the high-level safe `libmdbx` crate's own
//! transaction type.

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

unsafe fn val_to_vec(v: &mdbx_sys::MDBX_val) -> Vec<u8> {
    std::slice::from_raw_parts(v.iov_base as *const u8, v.iov_len).to_vec()
}

pub fn exists(txn: &Txn, dbi: Dbi, key: &[u8]) -> KvResult<bool> {
    match get(txn, dbi, key)? {
        Some(_) => Ok(true),
        None => Ok(false),
    }
}

pub fn get(txn: &Txn, dbi: Dbi, key: &[u8]) -> KvResult<Option<Vec<u8>>> {
    let mut k = as_val(key);
    let mut v = mdbx_sys::MDBX_val {
        iov_base: std::ptr::null_mut(),
        iov_len: 0,
    };
    let rc = unsafe { mdbx_sys::mdbx_get(txn.as_ptr(), dbi.0, &mut k, &mut v) };
    if rc == mdbx_sys::MDBX_NOTFOUND {
        return Ok(None);
    }
    if rc != mdbx_sys::MDBX_SUCCESS {
        return Err(KvError::from_rc("mdbx_get", rc));
    }
    Ok(Some(unsafe { val_to_vec(&v) }))
}

/// Upserts `key -> value`, overwriting any existing value.
pub fn put(txn: &Txn, dbi: Dbi, key: &[u8], value: &[u8]) -> KvResult<()> {
    let mut k = as_val(key);
    let mut v = as_val(value);
    let rc = unsafe { mdbx_sys::mdbx_put(txn.as_ptr(), dbi.0, &mut k, &mut v, 0) };
    if rc != mdbx_sys::MDBX_SUCCESS {
        return Err(KvError::from_rc("mdbx_put", rc));
    }
    Ok(())
}

/// Inserts `key -> value` only if `key` is absent; returns `KeyExists`
/// otherwise. Backs spec §4.1 `put_no_overwrite`, the primitive beneath
/// unique-index enforcement.
pub fn put_no_overwrite(txn: &Txn, dbi: Dbi, key: &[u8], value: &[u8]) -> KvResult<()> {
    let mut k = as_val(key);
    let mut v = as_val(value);
    let rc = unsafe {
        mdbx_sys::mdbx_put(txn.as_ptr(), dbi.0, &mut k, &mut v, mdbx_sys::MDBX_NOOVERWRITE)
    };
    if rc == mdbx_sys::MDBX_KEYEXIST {
        return Err(KvError::KeyExists);
    }
    if rc != mdbx_sys::MDBX_SUCCESS {
        return Err(KvError::from_rc("mdbx_put(no_overwrite)", rc));
    }
    Ok(())
}

/// Deletes `key`. Returns `Ok(false)` rather than an error when the key is
/// already absent, since spec-level callers treat a missing-key delete as
/// a no-op, not a fault.
pub fn delete(txn: &Txn, dbi: Dbi, key: &[u8]) -> KvResult<bool> {
    let mut k = as_val(key);
    let rc = unsafe { mdbx_sys::mdbx_del(txn.as_ptr(), dbi.0, &mut k, std::ptr::null()) };
    if rc == mdbx_sys::MDBX_NOTFOUND {
        return Ok(false);
    }
    if rc != mdbx_sys::MDBX_SUCCESS {
        return Err(KvError::from_rc("mdbx_del", rc));
    }
    Ok(true)
}

pub fn is_empty(txn: &Txn, dbi: Dbi) -> KvResult<bool> {
    let mut stat = unsafe { std::mem::zeroed::<mdbx_sys::MDBX_stat>() };
    let rc = unsafe {
        mdbx_sys::mdbx_dbi_stat(
            txn.as_ptr(),
            dbi.0,
            &mut stat,
            std::mem::size_of::<mdbx_sys::MDBX_stat>(),
        )
    };
    if rc != mdbx_sys::MDBX_SUCCESS {
        return Err(KvError::from_rc("mdbx_dbi_stat", rc));
    }
    Ok(stat.ms_entries == 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::open_db;
    use crate::env::EnvBuilder;
    use crate::txn::{Txn, TxnMode};

    #[test]
    fn put_get_delete_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let env = EnvBuilder::new(dir.path()).open().unwrap();
        let txn = Txn::begin(&env, None, TxnMode::ReadWrite).unwrap();
        let dbi = open_db(&txn, Some("t"), true).unwrap();

        assert!(is_empty(&txn, dbi).unwrap());
        put(&txn, dbi, b"k1", b"v1").unwrap();
        assert_eq!(get(&txn, dbi, b"k1").unwrap(), Some(b"v1".to_vec()));
        assert!(exists(&txn, dbi, b"k1").unwrap());
        assert!(!is_empty(&txn, dbi).unwrap());

        let err = put_no_overwrite(&txn, dbi, b"k1", b"v2").unwrap_err();
        assert_eq!(err, crate::error::KvError::KeyExists);

        assert!(delete(&txn, dbi, b"k1").unwrap());
        assert!(!delete(&txn, dbi, b"k1").unwrap());
        assert_eq!(get(&txn, dbi, b"k1").unwrap(), None);
        txn.commit().unwrap();
    }
}
