//! Adapter over an ordered byte-keyed KV engine (spec §2 component C1).
//!
//! Everything above this crate talks to the engine only through the types
//! re-exported here: `KvEnv`, `Txn`, `Dbi`, `Cursor`. No other crate in the
//! workspace depends on `mdbx-sys` or `libmdbx` directly, mirroring the
//! teacher's `mdbx-base` crate comment ("ONLY place with these deps!").

pub mod backup;
pub mod cursor;
pub mod database;
pub mod env;
pub mod error;
pub mod ops;
pub mod txn;

pub use backup::{enter_backup_mode, BackupGuard};
pub use cursor::{Cursor, Seek};
pub use database::{drop_db, open_db, Dbi};
pub use env::{EnvBuilder, KvEnv};
pub use error::{KvError, KvResult};
pub use ops::{delete, exists, get, is_empty, put, put_no_overwrite};
pub use txn::{Txn, TxnMode};
