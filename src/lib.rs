//! Safe handles over the LMDB engine.
//!
//! The engine owns page layout, B+tree balancing and the commit protocol.
//! This crate owns the lifetimes around it: an [`Environment`] is opened
//! once from an [`EnvironmentBuilder`], hands out [`Transaction`]s (read,
//! write, or nested under a write), and those open [`Database`] handles
//! that survive only if the opening transaction commits.
//!
//! Reads come back through the environment's [`BufferProxy`]: the default
//! [`SliceProxy`] gives zero-copy [`Value`] views borrowed from the
//! transaction, [`CopyProxy`] gives owned buffers.
//!
//! ```no_run
//! use lumodb::{DbFlags, EnvFlags, Environment, WriteFlags};
//!
//! # fn main() -> lumodb::Result<()> {
//! let env = Environment::builder()
//!     .set_map_size(10 * 1024 * 1024)?
//!     .set_max_dbs(2)?
//!     .open("/tmp/store", EnvFlags::empty())?;
//! let db = env.open_database(None, DbFlags::CREATE)?;
//!
//! let mut txn = env.txn_write()?;
//! txn.put(&db, b"a", b"1", WriteFlags::empty())?;
//! txn.commit()?;
//!
//! let txn = env.txn_read()?;
//! assert_eq!(txn.get(&db, b"a")?.as_deref(), Some(&b"1"[..]));
//! # Ok(())
//! # }
//! ```

mod builder;
mod checks;
mod constants;
mod database;
mod env;
mod error;
mod proxy;
mod transaction;
mod types;
mod value;

pub(crate) use lmdb_sys as ffi;

pub use builder::{EnvConfig, EnvironmentBuilder};
pub use checks::{checks_enabled, DISABLE_CHECKS_VAR};
pub use constants::{
    CopyFlags, DbFlags, EnvFlags, TxnFlags, WriteFlags, DEFAULT_MAP_SIZE, DEFAULT_MAX_DBS,
    DEFAULT_MAX_READERS, DEFAULT_MODE,
};
pub use database::Database;
pub use env::Environment;
pub use error::{CopyDestinationCause, Error, Result};
pub use proxy::{BufferProxy, CopyProxy, DefaultProxy, ProxyKind, RawBuf, SliceProxy};
pub use transaction::{Transaction, TxnState};
pub use types::{version, EnvInfo, Stat, Version};
pub use value::Value;
