use std::sync::Arc;

use crate::constants::DbFlags;
use crate::ffi;

/// Handle to a named (or the default) keyspace inside an environment.
///
/// Handles are cheap to clone. A handle opened in a transaction becomes
/// usable from later transactions only once that transaction commits.
///
/// The engine recycles the slot of a handle whose open was rolled back, so a
/// handle is identified by its slot and the generation of the open that
/// first produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Database {
    dbi: ffi::MDB_dbi,
    generation: u64,
    env_id: u64,
    name: Option<Arc<str>>,
    flags: DbFlags,
}

impl Database {
    pub(crate) fn new(
        dbi: ffi::MDB_dbi,
        generation: u64,
        env_id: u64,
        name: Option<&str>,
        flags: DbFlags,
    ) -> Self {
        Database {
            dbi,
            generation,
            env_id,
            name: name.map(Arc::from),
            flags,
        }
    }

    /// Name given at open, `None` for the default keyspace
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Flags requested when the handle was opened
    pub fn flags(&self) -> DbFlags {
        self.flags
    }

    /// Engine-assigned slot number
    pub fn dbi(&self) -> u32 {
        self.dbi as u32
    }

    pub(crate) fn raw(&self) -> ffi::MDB_dbi {
        self.dbi
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn env_id(&self) -> u64 {
        self.env_id
    }
}
