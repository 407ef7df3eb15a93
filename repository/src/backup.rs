//! Hot-backup handle: pins a snapshot and registers against the
//! repository's shutdown-blocker latch for the handle's lifetime (spec
//! §4.6 hot-backup counter).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::{StoreError, StoreResult};
use kv_engine::{KvEnv, Txn, TxnMode};

use crate::latch::ShutdownLatch;

pub struct HotBackupHandle {
    env: Arc<KvEnv>,
    pin: Option<Txn>,
    latch: Arc<ShutdownLatch>,
}

impl HotBackupHandle {
    pub(crate) fn begin(env: Arc<KvEnv>, latch: Arc<ShutdownLatch>) -> StoreResult<Self> {
        latch.acquire();
        let pin = Txn::begin(&env, None, TxnMode::ReadOnly).map_err(|e| {
            latch.release();
            StoreError::Engine(format!("begin backup pin: {e}"))
        })?;
        Ok(Self {
            env,
            pin: Some(pin),
            latch,
        })
    }

    pub fn backup_files(&self, dest_dir: &Path, compact: bool) -> StoreResult<Vec<PathBuf>> {
        self.env
            .copy_to(dest_dir, compact)
            .map_err(|e| StoreError::Engine(e.to_string()))
    }

    /// Releases the pin and the shutdown latch explicitly. Also happens on
    /// `Drop`; kept as a named operation to mirror spec §4.1's
    /// `exit_backup_mode`.
    pub fn exit(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(pin) = self.pin.take() {
            let _ = pin.abort();
            self.latch.release();
        }
    }
}

impl Drop for HotBackupHandle {
    fn drop(&mut self) {
        self.release();
    }
}
