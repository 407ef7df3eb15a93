//! Table (DBI) lifecycle: open, remove. Grounded on
//! `mdbx-base::txn_helpers::open_dbi`, generalized to take an explicit
//! create flag instead of always passing `MDBX_CREATE`.

use std::ffi::CString;

use crate::error::{KvError, KvResult};
use crate::txn::Txn;

/// An opened MDBX table handle. Valid only for the lifetime of the
/// environment that produced it; MDBX table handles are environment-scoped
/// so this is `Copy` and safe to cache across transactions.
#[derive(Debug, Clone, Copy)]
pub struct Dbi(pub mdbx_sys::MDBX_dbi);

/// Opens (creating if requested and absent) the table named `name`.
/// `None` opens the environment's unnamed default table.
pub fn open_db(txn: &Txn, name: Option<&str>, create: bool) -> KvResult<Dbi> {
    let name_c = name.map(|n| CString::new(n)).transpose().map_err(|_| KvError::Other {
        call: "open_db",
        code: -1,
    })?;
    let name_ptr = name_c.as_ref().map(|c| c.as_ptr()).unwrap_or(std::ptr::null());

    let mut flags = 0u32;
    if create {
        flags |= mdbx_sys::MDBX_CREATE;
    }

    let mut dbi: mdbx_sys::MDBX_dbi = 0;
    let rc = unsafe { mdbx_sys::mdbx_dbi_open(txn.as_ptr(), name_ptr, flags, &mut dbi) };
    if rc != mdbx_sys::MDBX_SUCCESS {
        return Err(KvError::from_rc("mdbx_dbi_open", rc));
    }
    Ok(Dbi(dbi))
}

/// Deletes the table's contents (`del = false`) or the table itself
/// (`del = true`), backing spec §4.1 `truncate_db` / `remove_db`.
pub fn drop_db(txn: &Txn, dbi: Dbi, del: bool) -> KvResult<()> {
    let rc = unsafe { mdbx_sys::mdbx_drop(txn.as_ptr(), dbi.0, del) };
    if rc != mdbx_sys::MDBX_SUCCESS {
        return Err(KvError::from_rc("mdbx_drop", rc));
    }
    Ok(())
}
