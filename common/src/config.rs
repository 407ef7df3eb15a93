//! Configuration contract (spec §6). One builder-style struct covering every
//! row of the table, following the `with_*` builder pattern of the teacher's
//! `storage::config::DbConfig`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{StoreError, StoreResult};

/// A user callback run around `Repository::shutdown` (spec §4.6 steps 3
/// and 8). Wrapped so `RepositoryConfig` can still derive `Clone`; errors
/// are the caller's to handle internally — a hook that panics or returns
/// early doesn't get a second chance to run.
#[derive(Clone)]
pub struct ShutdownHook(pub Arc<dyn Fn() + Send + Sync>);

impl ShutdownHook {
    pub fn new(f: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn run(&self) {
        (self.0)()
    }
}

impl std::fmt::Debug for ShutdownHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ShutdownHook(..)")
    }
}

/// Which KV engine flavor backs a repository. Stands in for spec §9's
/// reflection-based product selection: a real registry mapping
/// `EngineKind -> constructor` lives in the `repository` crate, and a new
/// engine is added by extending this enum plus that table, never by adding
/// call-site branching elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    Libmdbx,
}

/// Per-type physical file grouping (spec §6 "single database per type,
/// optionally merged into one physical file").
#[derive(Debug, Clone, Default)]
pub struct FileNameMap {
    /// `None` key means "default file for unmapped types".
    entries: HashMap<Option<String>, String>,
}

impl FileNameMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mapping(mut self, type_name: impl Into<String>, file_name: impl Into<String>) -> Self {
        self.entries.insert(Some(type_name.into()), file_name.into());
        self
    }

    pub fn with_default(mut self, file_name: impl Into<String>) -> Self {
        self.entries.insert(None, file_name.into());
        self
    }

    pub fn file_for(&self, type_name: &str) -> Option<&str> {
        self.entries
            .get(&Some(type_name.to_string()))
            .or_else(|| self.entries.get(&None))
            .map(String::as_str)
    }
}

/// Full configuration contract for a repository (spec §6 table).
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    pub product: EngineKind,
    pub env_home: PathBuf,
    pub data_home: Option<PathBuf>,
    pub single_file_name: Option<String>,
    pub file_name_map: FileNameMap,
    pub read_only: bool,
    pub cache_size: Option<u64>,
    pub cache_percent: Option<u8>,
    pub lock_timeout: Duration,
    pub transaction_timeout: Duration,
    pub transaction_no_sync: bool,
    pub transaction_write_no_sync: bool,
    pub databases_transactional: bool,
    pub database_page_size: Option<u32>,
    pub private: bool,
    pub multiversion: bool,
    pub log_in_memory: bool,
    pub log_file_max_size: Option<u64>,
    pub keep_old_log_files: bool,
    pub run_full_recovery: bool,
    pub run_checkpointer: bool,
    pub checkpoint_interval: Duration,
    pub checkpoint_threshold_kb: u64,
    pub checkpoint_threshold_minutes: u64,
    pub run_deadlock_detector: bool,
    pub checksum_enabled: bool,
    pub index_support: bool,
    pub index_repair_enabled: bool,
    pub index_repair_throttle: f64,
    pub pre_shutdown_hook: Option<ShutdownHook>,
    pub post_shutdown_hook: Option<ShutdownHook>,
}

impl RepositoryConfig {
    /// Starts a builder requiring only the mandatory `envHome`.
    pub fn new(env_home: impl Into<PathBuf>) -> Self {
        Self {
            product: EngineKind::Libmdbx,
            env_home: env_home.into(),
            data_home: None,
            single_file_name: None,
            file_name_map: FileNameMap::new(),
            read_only: false,
            cache_size: None,
            cache_percent: None,
            lock_timeout: Duration::from_millis(500),
            transaction_timeout: Duration::from_secs(300),
            transaction_no_sync: false,
            transaction_write_no_sync: false,
            databases_transactional: true,
            database_page_size: None,
            private: false,
            multiversion: false,
            log_in_memory: false,
            log_file_max_size: None,
            keep_old_log_files: false,
            run_full_recovery: false,
            run_checkpointer: true,
            checkpoint_interval: Duration::from_millis(10_000),
            checkpoint_threshold_kb: 1024,
            checkpoint_threshold_minutes: 5,
            run_deadlock_detector: true,
            checksum_enabled: true,
            index_support: true,
            index_repair_enabled: false,
            index_repair_throttle: 1.0,
            pre_shutdown_hook: None,
            post_shutdown_hook: None,
        }
    }

    pub fn with_data_home(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_home = Some(path.into());
        self
    }

    pub fn with_read_only(mut self, v: bool) -> Self {
        self.read_only = v;
        // Read-only repositories never run the checkpointer and never
        // write index descriptors (spec §6 "readOnly" row).
        if v {
            self.run_checkpointer = false;
        }
        self
    }

    pub fn with_lock_timeout(mut self, d: Duration) -> Self {
        self.lock_timeout = d;
        self
    }

    pub fn with_transaction_timeout(mut self, d: Duration) -> Self {
        self.transaction_timeout = d;
        self
    }

    pub fn with_checkpoint_interval(mut self, d: Duration) -> Self {
        self.checkpoint_interval = d;
        self
    }

    pub fn with_checkpoint_thresholds(mut self, kb: u64, minutes: u64) -> Self {
        self.checkpoint_threshold_kb = kb;
        self.checkpoint_threshold_minutes = minutes;
        self
    }

    pub fn with_run_deadlock_detector(mut self, v: bool) -> Self {
        self.run_deadlock_detector = v;
        self
    }

    pub fn with_multiversion(mut self, v: bool) -> Self {
        self.multiversion = v;
        self
    }

    pub fn with_file_name_map(mut self, map: FileNameMap) -> Self {
        self.file_name_map = map;
        self
    }

    pub fn with_index_repair_throttle(mut self, v: f64) -> Self {
        self.index_repair_throttle = v.clamp(0.0, 1.0);
        self
    }

    /// Runs once shutdown has stopped accepting new work but before any
    /// table or the environment is torn down (spec §4.6 step 3).
    pub fn with_pre_shutdown_hook(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.pre_shutdown_hook = Some(ShutdownHook::new(hook));
        self
    }

    /// Runs after the environment has been closed (spec §4.6 step 8).
    pub fn with_post_shutdown_hook(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.post_shutdown_hook = Some(ShutdownHook::new(hook));
        self
    }

    /// The directory that actually holds data files: `dataHome` if set,
    /// else `envHome` (spec §6).
    pub fn effective_data_home(&self) -> &std::path::Path {
        self.data_home.as_deref().unwrap_or(&self.env_home)
    }

    /// Validates the configuration at build time (spec §7
    /// `ConfigurationError`).
    pub fn validate(&self) -> StoreResult<()> {
        if self.env_home.as_os_str().is_empty() {
            return Err(StoreError::Configuration("envHome is required".into()));
        }
        if !(0.0..=1.0).contains(&self.index_repair_throttle) {
            return Err(StoreError::Configuration(
                "indexRepairThrottle must be within 0.0..=1.0".into(),
            ));
        }
        if self.read_only && self.run_checkpointer {
            return Err(StoreError::Configuration(
                "runCheckpointer cannot be enabled on a read-only repository".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let cfg = RepositoryConfig::new("/tmp/db");
        assert_eq!(cfg.lock_timeout, Duration::from_millis(500));
        assert_eq!(cfg.transaction_timeout, Duration::from_secs(300));
        assert_eq!(cfg.checkpoint_interval, Duration::from_millis(10_000));
        assert_eq!(cfg.checkpoint_threshold_kb, 1024);
        assert_eq!(cfg.checkpoint_threshold_minutes, 5);
        assert!(cfg.run_checkpointer);
        assert!(cfg.index_support);
    }

    #[test]
    fn read_only_disables_checkpointer() {
        let cfg = RepositoryConfig::new("/tmp/db").with_read_only(true);
        assert!(!cfg.run_checkpointer);
    }

    #[test]
    fn validate_rejects_empty_env_home() {
        let cfg = RepositoryConfig::new("");
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn file_name_map_falls_back_to_default() {
        let map = FileNameMap::new()
            .with_mapping("Orders", "orders.db")
            .with_default("shared.db");
        assert_eq!(map.file_for("Orders"), Some("orders.db"));
        assert_eq!(map.file_for("Customers"), Some("shared.db"));
    }

    #[test]
    fn throttle_is_clamped() {
        let cfg = RepositoryConfig::new("/tmp/db").with_index_repair_throttle(5.0);
        assert_eq!(cfg.index_repair_throttle, 1.0);
    }
}
