use std::cell::{Cell, RefCell};
use std::ffi::CString;
use std::fmt;
use std::ptr::{self, NonNull};
use std::slice;

use log::{debug, trace, warn};
use parking_lot::MutexGuard;

use crate::checks::checks_enabled;
use crate::constants::{codes, DbFlags, TxnFlags, WriteFlags};
use crate::database::Database;
use crate::env::Environment;
use crate::error::{Error, IntoResult, Result};
use crate::ffi;
use crate::proxy::{BufferProxy, DefaultProxy, RawBuf};
use crate::types::{zeroed_stat, Stat};

/// The main database slot; dropping it only empties it
const MAIN_DBI: ffi::MDB_dbi = 1;

/// Lifecycle of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Active,
    /// Read-only transaction released its snapshot; `renew` reactivates it
    Reset,
    Committed,
    Aborted,
}

impl TxnState {
    pub fn is_finished(self) -> bool {
        matches!(self, TxnState::Committed | TxnState::Aborted)
    }
}

/// Bookkeeping shared with child transactions
struct Scope<'a> {
    parent: Option<&'a Scope<'a>>,
    /// Children begun and not yet resolved
    children: Cell<usize>,
    /// Slots opened here or by committed children, with their generation
    opened: RefCell<Vec<(ffi::MDB_dbi, u64)>>,
    /// Slots deleted here or by committed children
    dropped: RefCell<Vec<ffi::MDB_dbi>>,
}

enum SlotRecord {
    Opened(u64),
    Dropped,
}

impl<'a> Scope<'a> {
    fn new(parent: Option<&'a Scope<'a>>) -> Self {
        Scope {
            parent,
            children: Cell::new(0),
            opened: RefCell::new(Vec::new()),
            dropped: RefCell::new(Vec::new()),
        }
    }

    /// Nearest record of `dbi` up the chain; `None` defers to the environment
    fn record(&self, dbi: ffi::MDB_dbi) -> Option<SlotRecord> {
        let mut scope = Some(self);
        while let Some(current) = scope {
            if let Some(&(_, generation)) =
                current.opened.borrow().iter().rev().find(|(d, _)| *d == dbi)
            {
                return Some(SlotRecord::Opened(generation));
            }
            if current.dropped.borrow().contains(&dbi) {
                return Some(SlotRecord::Dropped);
            }
            scope = current.parent;
        }
        None
    }
}

/// Database transaction
///
/// A transaction ends with exactly one `commit` or `abort`; dropping one
/// that is still live aborts it. Reads return views of type
/// `P::View<'txn>` which the compiler keeps from outliving the transaction.
///
/// A child mutably borrows its parent: the parent is unusable until the child
/// is dropped, and no view read from the parent can still be alive while the
/// child writes. A nested commit may free the parent's dirty pages.
///
/// ```compile_fail
/// # use lumodb::{DbFlags, EnvFlags, Environment, SliceProxy, TxnFlags, WriteFlags};
/// # fn main() -> lumodb::Result<()> {
/// # let env = Environment::<SliceProxy>::builder_with_proxy().open("/tmp/db", EnvFlags::empty())?;
/// # let db = env.open_database(None, DbFlags::empty())?;
/// let mut parent = env.txn_write()?;
/// let view = parent.get(&db, b"k")?;
/// let mut child = parent.child(TxnFlags::empty())?;
/// child.put(&db, b"k", b"v", WriteFlags::empty())?;
/// drop(view);
/// # Ok(())
/// # }
/// ```
pub struct Transaction<'env, P: BufferProxy = DefaultProxy> {
    env: &'env Environment<P>,
    raw: NonNull<ffi::MDB_txn>,
    scope: Scope<'env>,
    read_only: bool,
    state: TxnState,
    /// Held by root write transactions only
    writer: Option<MutexGuard<'env, ()>>,
}

impl<'env, P: BufferProxy> Transaction<'env, P> {
    pub(crate) fn begin(
        env: &'env Environment<P>,
        parent: Option<&'env mut Transaction<'_, P>>,
        flags: TxnFlags,
    ) -> Result<Self> {
        env.ensure_open()?;
        if env.is_read_only() && !flags.contains(TxnFlags::RDONLY) {
            return Err(Error::EnvReadOnly);
        }
        let read_only = flags.contains(TxnFlags::RDONLY);

        // The exclusive borrow is held for 'env; only shared access is needed here
        let parent: Option<&'env Transaction<'_, P>> = parent.map(|p| &*p);
        let parent_raw = match parent {
            Some(p) => {
                if p.env.id() != env.id() {
                    return Err(Error::ForeignTransaction);
                }
                p.ensure_active()?;
                p.raw.as_ptr()
            }
            None => ptr::null_mut(),
        };

        // Serialize root writers sharing this environment
        let writer = if !read_only && parent.is_none() {
            Some(env.lock_writer())
        } else {
            None
        };

        let mut raw: *mut ffi::MDB_txn = ptr::null_mut();
        unsafe { ffi::mdb_txn_begin(env.raw(), parent_raw, flags.bits(), &mut raw) }
            .into_result()?;
        let raw = NonNull::new(raw).ok_or(Error::BadTxn)?;

        env.txn_started();
        if let Some(p) = parent {
            p.scope.children.set(p.scope.children.get() + 1);
        }
        debug!(
            "begin {} transaction (nested: {})",
            if read_only { "read" } else { "write" },
            parent.is_some()
        );

        Ok(Transaction {
            env,
            raw,
            scope: Scope::new(parent.map(|p| &p.scope)),
            read_only,
            state: TxnState::Active,
            writer,
        })
    }

    /// Begin a nested transaction under this one
    pub fn child(&mut self, flags: TxnFlags) -> Result<Transaction<'_, P>> {
        let env = self.env;
        Transaction::begin(env, Some(self), flags)
    }

    pub fn env(&self) -> &'env Environment<P> {
        self.env
    }

    pub fn state(&self) -> TxnState {
        self.state
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn is_nested(&self) -> bool {
        self.scope.parent.is_some()
    }

    /// Commit the transaction
    ///
    /// Database handles opened here become visible to later transactions
    /// (or to the parent, for a child). On failure the engine has already
    /// discarded the transaction and it is left aborted.
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_active()?;
        let rc = unsafe { ffi::mdb_txn_commit(self.raw.as_ptr()) };
        match rc.into_result() {
            Ok(()) => {
                self.hand_over_databases();
                self.finish(TxnState::Committed);
                debug!("transaction committed");
                Ok(())
            }
            Err(err) => {
                self.finish(TxnState::Aborted);
                debug!("transaction commit failed: {}", err);
                Err(err)
            }
        }
    }

    /// Abort the transaction, discarding its writes and those of any child.
    ///
    /// Aborting a finished transaction does nothing.
    pub fn abort(&mut self) {
        if self.state.is_finished() {
            return;
        }
        unsafe { ffi::mdb_txn_abort(self.raw.as_ptr()) };
        self.finish(TxnState::Aborted);
        debug!("transaction aborted");
    }

    /// Release the snapshot of a read-only transaction, keeping its slot
    pub fn reset(&mut self) -> Result<()> {
        self.ensure_active()?;
        if !self.read_only {
            return Err(Error::TxnNotReadOnly);
        }
        unsafe { ffi::mdb_txn_reset(self.raw.as_ptr()) };
        self.state = TxnState::Reset;
        trace!("transaction reset");
        Ok(())
    }

    /// Take a fresh snapshot after `reset`
    pub fn renew(&mut self) -> Result<()> {
        match self.state {
            TxnState::Reset => {}
            TxnState::Active => return Err(Error::TxnNotReset),
            _ => return Err(Error::TxnFinished),
        }
        unsafe { ffi::mdb_txn_renew(self.raw.as_ptr()) }.into_result()?;
        self.state = TxnState::Active;
        trace!("transaction renewed");
        Ok(())
    }

    /// Open a database inside this transaction.
    ///
    /// The handle outlives the transaction only if it commits.
    pub fn open_db(&mut self, name: Option<&str>, flags: DbFlags) -> Result<Database> {
        self.ensure_active()?;
        let c_name = match name {
            Some(n) => Some(CString::new(n).map_err(|_| Error::InvalidDatabaseName(n.to_owned()))?),
            None => None,
        };
        let name_ptr = c_name.as_ref().map_or(ptr::null(), |n| n.as_ptr());

        let mut dbi: ffi::MDB_dbi = 0;
        {
            let _guard = self.env.lock_dbi_open();
            unsafe { ffi::mdb_dbi_open(self.raw.as_ptr(), name_ptr, flags.bits(), &mut dbi) }
                .into_result()?;
        }
        // A slot already live in this chain is the same database; anything
        // else is a fresh (possibly recycled) slot
        let generation = self
            .live_generation(dbi)
            .unwrap_or_else(|| self.env.next_generation());
        self.scope.opened.borrow_mut().push((dbi, generation));
        trace!("opened database {:?} as dbi {} (generation {})", name, dbi, generation);
        Ok(Database::new(dbi, generation, self.env.id(), name, flags))
    }

    /// Get a value by key, `None` if absent
    pub fn get<K: AsRef<[u8]>>(&self, db: &Database, key: K) -> Result<Option<P::View<'_>>> {
        self.ensure_active()?;
        self.check_db(db)?;
        let key = key.as_ref();
        self.check_key(key)?;

        let mut key_val = P::encode(key).to_mdb();
        let mut data_val = ffi::MDB_val {
            mv_size: 0,
            mv_data: ptr::null_mut(),
        };
        let rc = unsafe {
            ffi::mdb_get(self.raw.as_ptr(), db.raw(), &mut key_val, &mut data_val)
        };
        match rc {
            0 => {
                // SAFETY: the engine keeps the page mapped until this transaction ends,
                // and writes need `&mut self`
                let raw = unsafe { RawBuf::from_mdb(&data_val) };
                Ok(Some(P::view(raw)))
            }
            codes::NOTFOUND => Ok(None),
            rc => Err(Error::from_code(rc)),
        }
    }

    /// Put a key/value pair
    pub fn put<K, V>(&mut self, db: &Database, key: K, value: V, flags: WriteFlags) -> Result<()>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        self.ensure_writable(db, key.as_ref())?;
        let mut key_val = P::encode(key.as_ref()).to_mdb();
        let mut data_val = P::encode(value.as_ref()).to_mdb();
        trace!("put {} bytes into dbi {}", value.as_ref().len(), db.raw());
        unsafe {
            ffi::mdb_put(
                self.raw.as_ptr(),
                db.raw(),
                &mut key_val,
                &mut data_val,
                (flags - WriteFlags::RESERVE).bits(),
            )
        }
        .into_result()
    }

    /// Reserve `len` bytes for `key` and return them for in-place writing.
    ///
    /// The buffer lives in the engine's dirty pages; fill it before the next
    /// write or the commit.
    pub fn reserve<K: AsRef<[u8]>>(
        &mut self,
        db: &Database,
        key: K,
        len: usize,
        flags: WriteFlags,
    ) -> Result<&mut [u8]> {
        self.ensure_writable(db, key.as_ref())?;
        let mut key_val = P::encode(key.as_ref()).to_mdb();
        let mut data_val = ffi::MDB_val {
            mv_size: len,
            mv_data: ptr::null_mut(),
        };
        unsafe {
            ffi::mdb_put(
                self.raw.as_ptr(),
                db.raw(),
                &mut key_val,
                &mut data_val,
                (flags | WriteFlags::RESERVE).bits(),
            )
        }
        .into_result()?;
        if len == 0 || data_val.mv_data.is_null() {
            return Ok(&mut []);
        }
        // SAFETY: the engine reserved `len` writable bytes owned by this transaction
        Ok(unsafe { slice::from_raw_parts_mut(data_val.mv_data as *mut u8, len) })
    }

    /// Delete a key (or one duplicate when `value` is given).
    ///
    /// Returns `false` if nothing matched.
    pub fn del<K: AsRef<[u8]>>(
        &mut self,
        db: &Database,
        key: K,
        value: Option<&[u8]>,
    ) -> Result<bool> {
        self.ensure_writable(db, key.as_ref())?;
        let mut key_val = P::encode(key.as_ref()).to_mdb();
        let mut data_val = value.map(|v| P::encode(v).to_mdb());
        let data_ptr = data_val
            .as_mut()
            .map_or(ptr::null_mut(), |v| v as *mut ffi::MDB_val);
        let rc = unsafe { ffi::mdb_del(self.raw.as_ptr(), db.raw(), &mut key_val, data_ptr) };
        match rc {
            0 => Ok(true),
            codes::NOTFOUND => Ok(false),
            rc => Err(Error::from_code(rc)),
        }
    }

    /// Statistics for one database
    pub fn stat(&self, db: &Database) -> Result<Stat> {
        self.ensure_active()?;
        self.check_db(db)?;
        let mut stat = zeroed_stat();
        unsafe { ffi::mdb_stat(self.raw.as_ptr(), db.raw(), &mut stat) }.into_result()?;
        Ok(Stat::from(stat))
    }

    /// Remove every entry from a database, keeping the handle
    pub fn clear_db(&mut self, db: &Database) -> Result<()> {
        self.ensure_active()?;
        self.check_db(db)?;
        self.check_write_mode()?;
        unsafe { ffi::mdb_drop(self.raw.as_ptr(), db.raw(), 0) }.into_result()
    }

    /// Delete a database from the environment.
    ///
    /// The handle stops being retained once this transaction commits. The
    /// main database can only be emptied.
    pub fn drop_db(&mut self, db: Database) -> Result<()> {
        self.ensure_active()?;
        self.check_db(&db)?;
        self.check_write_mode()?;
        unsafe { ffi::mdb_drop(self.raw.as_ptr(), db.raw(), 1) }.into_result()?;
        if db.raw() != MAIN_DBI {
            self.scope.opened.borrow_mut().retain(|(dbi, _)| *dbi != db.raw());
            self.scope.dropped.borrow_mut().push(db.raw());
        }
        Ok(())
    }

    /// Critical: guards use of a freed or blocked native handle.
    fn ensure_active(&self) -> Result<()> {
        match self.state {
            TxnState::Active => {}
            TxnState::Reset => return Err(Error::TxnReset),
            TxnState::Committed | TxnState::Aborted => return Err(Error::TxnFinished),
        }
        if self.scope.children.get() > 0 {
            return Err(Error::TxnHasChild);
        }
        Ok(())
    }

    fn ensure_writable(&self, db: &Database, key: &[u8]) -> Result<()> {
        self.ensure_active()?;
        self.check_db(db)?;
        self.check_write_mode()?;
        self.check_key(key)
    }

    fn check_db(&self, db: &Database) -> Result<()> {
        if db.env_id() != self.env.id() {
            return Err(Error::ForeignDatabase);
        }
        if checks_enabled() && self.live_generation(db.raw()) != Some(db.generation()) {
            return Err(Error::DatabaseNotRetained(db.dbi()));
        }
        Ok(())
    }

    fn live_generation(&self, dbi: ffi::MDB_dbi) -> Option<u64> {
        match self.scope.record(dbi) {
            Some(SlotRecord::Opened(generation)) => Some(generation),
            Some(SlotRecord::Dropped) => None,
            None => self.env.retained_generation(dbi),
        }
    }

    fn check_write_mode(&self) -> Result<()> {
        if checks_enabled() && self.read_only {
            return Err(Error::TxnReadOnly);
        }
        Ok(())
    }

    fn check_key(&self, key: &[u8]) -> Result<()> {
        let max = self.env.max_key_size();
        if checks_enabled() && max > 0 && key.len() > max {
            return Err(Error::KeyTooLarge {
                len: key.len(),
                max,
            });
        }
        Ok(())
    }

    fn hand_over_databases(&self) {
        let opened = self.scope.opened.take();
        let dropped = self.scope.dropped.take();
        match self.scope.parent {
            Some(parent) => {
                let mut parent_opened = parent.opened.borrow_mut();
                parent_opened.retain(|(dbi, _)| !dropped.contains(dbi));
                parent_opened.extend(opened);
                parent.dropped.borrow_mut().extend(dropped);
            }
            None => self.env.retain(&opened, &dropped),
        }
    }

    fn finish(&mut self, state: TxnState) {
        self.state = state;
        self.writer = None;
        self.env.txn_finished();
        if let Some(parent) = self.scope.parent {
            parent.children.set(parent.children.get().saturating_sub(1));
        }
    }
}

impl<P: BufferProxy> fmt::Debug for Transaction<'_, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("env", &self.env.id())
            .field("read_only", &self.read_only)
            .field("nested", &self.is_nested())
            .field("state", &self.state)
            .finish()
    }
}

impl<P: BufferProxy> Drop for Transaction<'_, P> {
    fn drop(&mut self) {
        match self.state {
            TxnState::Active if !self.read_only => {
                warn!("write transaction dropped without commit or abort; aborting");
                self.abort();
            }
            TxnState::Active | TxnState::Reset => {
                unsafe { ffi::mdb_txn_abort(self.raw.as_ptr()) };
                self.finish(TxnState::Aborted);
            }
            TxnState::Committed | TxnState::Aborted => {}
        }
    }
}
