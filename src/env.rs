use std::collections::HashMap;
use std::ffi::CString;
use std::fmt;
use std::fs;
use std::io;
use std::marker::PhantomData;
use std::os::raw::c_int;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use log::{debug, error, warn};
use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::builder::EnvironmentBuilder;
use crate::checks::checks_enabled;
use crate::constants::{CopyFlags, DbFlags, EnvFlags, TxnFlags};
use crate::database::Database;
use crate::error::{CopyDestinationCause, Error, IntoResult, Result};
use crate::ffi;
use crate::proxy::{BufferProxy, DefaultProxy};
use crate::transaction::Transaction;
use crate::types::{zeroed_info, zeroed_stat, EnvInfo, Stat};

static NEXT_ENV_ID: AtomicU64 = AtomicU64::new(1);

/// An opened LMDB environment.
///
/// The environment owns the native mapping. Transactions borrow it, so it
/// cannot be closed while one is alive; `close` additionally refuses when a
/// transaction was leaked with `mem::forget`.
///
/// `P` fixes how reads are surfaced for every transaction created here.
pub struct Environment<P: BufferProxy = DefaultProxy> {
    raw: NonNull<ffi::MDB_env>,
    id: u64,
    path: PathBuf,
    flags: EnvFlags,
    max_key_size: usize,
    max_readers: u32,
    closed: bool,
    /// Native transactions currently alive
    active_txns: AtomicUsize,
    /// Held by the root write transaction
    write_lock: Mutex<()>,
    /// Serializes mdb_dbi_open
    dbi_lock: Mutex<()>,
    /// Generation of the committed open behind each retained slot
    retained: RwLock<HashMap<ffi::MDB_dbi, u64>>,
    next_generation: AtomicU64,
    _proxy: PhantomData<fn() -> P>,
}

// The engine handle is safe to share; write transactions stay on their thread
// because the guard they hold is not `Send`.
unsafe impl<P: BufferProxy> Send for Environment<P> {}
unsafe impl<P: BufferProxy> Sync for Environment<P> {}

impl Environment<DefaultProxy> {
    /// Builder for an environment using the default proxy
    pub fn builder() -> EnvironmentBuilder<DefaultProxy> {
        EnvironmentBuilder::new()
    }

    /// Open with a map of `size_mib` mebibytes and otherwise default settings
    pub fn open<Q: AsRef<Path>>(path: Q, size_mib: usize, flags: EnvFlags) -> Result<Self> {
        Self::builder()
            .set_map_size(size_mib.saturating_mul(1024 * 1024))?
            .open(path, flags)
    }
}

impl<P: BufferProxy> Environment<P> {
    /// Builder for an environment bound to proxy `P`
    pub fn builder_with_proxy() -> EnvironmentBuilder<P> {
        EnvironmentBuilder::with_proxy()
    }

    pub(crate) fn from_raw(
        raw: NonNull<ffi::MDB_env>,
        path: PathBuf,
        flags: EnvFlags,
        max_readers: u32,
    ) -> Self {
        let max_key_size = unsafe { ffi::mdb_env_get_maxkeysize(raw.as_ptr()) }.max(0) as usize;
        let id = NEXT_ENV_ID.fetch_add(1, Ordering::Relaxed);
        debug!(
            "environment {} opened at {:?} (flags {:?}, proxy {:?})",
            id,
            path,
            flags,
            P::KIND
        );
        Environment {
            raw,
            id,
            path,
            flags,
            max_key_size,
            max_readers,
            closed: false,
            active_txns: AtomicUsize::new(0),
            write_lock: Mutex::new(()),
            dbi_lock: Mutex::new(()),
            retained: RwLock::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            _proxy: PhantomData,
        }
    }

    /// Close the environment and release the memory map.
    ///
    /// Closing twice is a no-op. Fails with [`Error::TxnsActive`] if a
    /// transaction was leaked instead of committed or aborted; the mapping
    /// is then left in place.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let active = self.active_txns.load(Ordering::SeqCst);
        if active > 0 {
            return Err(Error::TxnsActive(active));
        }
        unsafe { ffi::mdb_env_close(self.raw.as_ptr()) };
        self.closed = true;
        self.retained.write().clear();
        debug!("environment {} closed", self.id);
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_read_only(&self) -> bool {
        self.flags.contains(EnvFlags::RDONLY)
    }

    /// Flags passed at open
    pub fn flags(&self) -> EnvFlags {
        self.flags
    }

    /// Path that was used to open the environment
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Identity used to match database handles to their environment
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Largest key the engine accepts
    pub fn max_key_size(&self) -> usize {
        self.max_key_size
    }

    /// Reader slots configured at open
    pub fn max_readers(&self) -> u32 {
        self.max_readers
    }

    /// Copy the environment into an empty directory.
    ///
    /// This is a live backup: the engine holds a read snapshot for the whole
    /// copy, so concurrent writers cannot reuse pages and the map may grow.
    pub fn copy<Q: AsRef<Path>>(&self, dest: Q, flags: CopyFlags) -> Result<()> {
        self.ensure_open()?;
        let dest = dest.as_ref();
        validate_copy_destination(dest)?;

        // A no-subdir environment is a single file; copy it under its own name.
        let target = if self.flags.contains(EnvFlags::NOSUBDIR) {
            match self.path.file_name() {
                Some(name) => dest.join(name),
                None => dest.join("data.mdb"),
            }
        } else {
            dest.to_path_buf()
        };
        let c_path = path_to_cstring(&target)?;

        warn!(
            "environment {}: live copy to {:?} pins a snapshot; the map may grow under concurrent writes",
            self.id, dest
        );
        unsafe { ffi::mdb_env_copy2(self.raw.as_ptr(), c_path.as_ptr(), flags.bits()) }
            .into_result()?;
        debug!("environment {} copied to {:?}", self.id, dest);
        Ok(())
    }

    /// Statistics for the main database
    pub fn stat(&self) -> Result<Stat> {
        self.ensure_open()?;
        let mut stat = zeroed_stat();
        unsafe { ffi::mdb_env_stat(self.raw.as_ptr(), &mut stat) }.into_result()?;
        Ok(Stat::from(stat))
    }

    /// Information about the mapping and reader table
    pub fn info(&self) -> Result<EnvInfo> {
        self.ensure_open()?;
        let mut info = zeroed_info();
        unsafe { ffi::mdb_env_info(self.raw.as_ptr(), &mut info) }.into_result()?;
        Ok(EnvInfo::from(info))
    }

    /// Flush the data buffers to disk
    ///
    /// With `force` the flush is synchronous even if the environment was
    /// opened with `NOSYNC` or `MAPASYNC`.
    pub fn sync(&self, force: bool) -> Result<()> {
        self.ensure_open()?;
        if checks_enabled() && self.is_read_only() {
            return Err(Error::EnvReadOnly);
        }
        unsafe { ffi::mdb_env_sync(self.raw.as_ptr(), force as c_int) }.into_result()
    }

    /// Clear reader slots left behind by dead processes, returning how many
    pub fn reader_check(&self) -> Result<usize> {
        self.ensure_open()?;
        let mut dead: c_int = 0;
        unsafe { ffi::mdb_reader_check(self.raw.as_ptr(), &mut dead) }.into_result()?;
        Ok(dead.max(0) as usize)
    }

    /// Begin a transaction, optionally nested under `parent`.
    ///
    /// A write request against a read-only environment fails with
    /// [`Error::EnvReadOnly`] before reaching the engine. The parent stays
    /// mutably borrowed until the child is dropped.
    pub fn txn<'a>(
        &'a self,
        parent: Option<&'a mut Transaction<'_, P>>,
        flags: TxnFlags,
    ) -> Result<Transaction<'a, P>> {
        Transaction::begin(self, parent, flags)
    }

    /// Begin a read-only transaction
    pub fn txn_read(&self) -> Result<Transaction<'_, P>> {
        self.txn(None, TxnFlags::RDONLY)
    }

    /// Begin a read-write transaction.
    ///
    /// Blocks while another root write transaction on this environment is
    /// alive; never call it on a thread that already holds one.
    pub fn txn_write(&self) -> Result<Transaction<'_, P>> {
        self.txn(None, TxnFlags::empty())
    }

    /// Open (or with `CREATE`, create) a database and retain its handle.
    ///
    /// The open runs in its own transaction which is always committed, even
    /// when read-only: the engine keeps only handles from committed opens.
    pub fn open_database(&self, name: Option<&str>, flags: DbFlags) -> Result<Database> {
        let mut txn = if self.is_read_only() {
            self.txn_read()?
        } else {
            self.txn_write()?
        };
        let db = txn.open_db(name, flags)?;
        txn.commit()?;
        Ok(db)
    }

    /// Open a database, creating it if needed
    pub fn create_database(&self, name: Option<&str>) -> Result<Database> {
        self.open_database(name, DbFlags::CREATE)
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::EnvClosed);
        }
        Ok(())
    }

    pub(crate) fn raw(&self) -> *mut ffi::MDB_env {
        self.raw.as_ptr()
    }

    pub(crate) fn lock_writer(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock()
    }

    pub(crate) fn lock_dbi_open(&self) -> MutexGuard<'_, ()> {
        self.dbi_lock.lock()
    }

    pub(crate) fn txn_started(&self) {
        self.active_txns.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn txn_finished(&self) {
        self.active_txns.fetch_sub(1, Ordering::SeqCst);
    }

    /// Native transactions currently alive
    pub fn active_transactions(&self) -> usize {
        self.active_txns.load(Ordering::SeqCst)
    }

    pub(crate) fn retain(&self, opened: &[(ffi::MDB_dbi, u64)], dropped: &[ffi::MDB_dbi]) {
        if opened.is_empty() && dropped.is_empty() {
            return;
        }
        let mut retained = self.retained.write();
        for dbi in dropped {
            retained.remove(dbi);
        }
        retained.extend(opened.iter().copied());
    }

    pub(crate) fn retained_generation(&self, dbi: ffi::MDB_dbi) -> Option<u64> {
        self.retained.read().get(&dbi).copied()
    }

    pub(crate) fn next_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::Relaxed)
    }
}

impl<P: BufferProxy> fmt::Debug for Environment<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("flags", &self.flags)
            .field("closed", &self.closed)
            .field("active_txns", &self.active_transactions())
            .finish()
    }
}

impl<P: BufferProxy> Drop for Environment<P> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            // Closing under a live transaction is undefined in the engine; leak instead.
            error!(
                "environment {} dropped without closing: {}; native handle leaked",
                self.id, err
            );
        }
    }
}

fn validate_copy_destination(dest: &Path) -> Result<()> {
    let invalid = |cause| Error::InvalidCopyDestination {
        path: dest.to_path_buf(),
        cause,
    };
    let meta = match fs::metadata(dest) {
        Ok(meta) => meta,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(invalid(CopyDestinationCause::Missing))
        }
        Err(err) => return Err(err.into()),
    };
    if !meta.is_dir() {
        return Err(invalid(CopyDestinationCause::NotDirectory));
    }
    if fs::read_dir(dest)?.next().is_some() {
        return Err(invalid(CopyDestinationCause::NotEmpty));
    }
    Ok(())
}

pub(crate) fn path_to_cstring(path: &Path) -> Result<CString> {
    if path.as_os_str().is_empty() {
        return Err(Error::InvalidPath(path.to_path_buf()));
    }
    #[cfg(unix)]
    let bytes = {
        use std::os::unix::ffi::OsStrExt;
        path.as_os_str().as_bytes().to_vec()
    };
    #[cfg(not(unix))]
    let bytes = path
        .to_str()
        .ok_or_else(|| Error::InvalidPath(path.to_path_buf()))?
        .as_bytes()
        .to_vec();
    CString::new(bytes).map_err(|_| Error::InvalidPath(path.to_path_buf()))
}
