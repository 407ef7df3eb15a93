//! Hot backup mode: pin the current snapshot with a long-lived read
//! transaction so writers may continue while `backup_files` copies a
//! consistent view, then release the pin. MDBX's actual backup primitive
//! is `mdbx_env_copy`, which already reads from a stable snapshot; the
//! pinning transaction exists only to give the repository (C9) a
//! `backupActive` marker it can serialize `enter`/`exit` calls against —
//! matching spec §4.1's enter/exit pairing, not an MDBX requirement.

use crate::env::KvEnv;
use crate::error::KvResult;
use crate::txn::{Txn, TxnMode};

/// Holds a read transaction open for the duration of a backup. Dropping
/// (or calling `exit`) releases it.
pub struct BackupGuard<'a> {
    _pin: Txn,
    env: &'a KvEnv,
}

pub fn enter_backup_mode(env: &KvEnv) -> KvResult<BackupGuard<'_>> {
    let pin = Txn::begin(env, None, TxnMode::ReadOnly)?;
    Ok(BackupGuard { _pin: pin, env })
}

impl<'a> BackupGuard<'a> {
    pub fn backup_files(&self, dest_dir: &std::path::Path, compact: bool) -> KvResult<Vec<std::path::PathBuf>> {
        self.env.copy_to(dest_dir, compact)
    }

    pub fn exit(self) {
        // Dropping `_pin` aborts the pinning read transaction, releasing
        // the oldest-snapshot hold.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::EnvBuilder;

    #[test]
    fn backup_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let env = EnvBuilder::new(dir.path()).open().unwrap();
        let guard = enter_backup_mode(&env).unwrap();
        let dest = tempfile::tempdir().unwrap();
        let files = guard.backup_files(dest.path(), true).unwrap();
        assert_eq!(files.len(), 1);
        guard.exit();
    }
}
