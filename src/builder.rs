use std::io;
use std::marker::PhantomData;
use std::path::Path;
use std::ptr::{self, NonNull};

use log::debug;

use crate::constants::{
    EnvFlags, DEFAULT_MAP_SIZE, DEFAULT_MAX_DBS, DEFAULT_MAX_READERS, DEFAULT_MODE,
};
use crate::env::{path_to_cstring, Environment};
use crate::error::{Error, IntoResult, Result};
use crate::ffi;
use crate::proxy::{BufferProxy, DefaultProxy};

/// Settings applied to the native handle before it is opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvConfig {
    /// Size of the memory map in bytes
    pub map_size: usize,
    /// Maximum number of named databases
    pub max_dbs: u32,
    /// Maximum number of concurrent read transactions
    pub max_readers: u32,
    /// Permission bits for created files
    pub mode: u32,
}

impl Default for EnvConfig {
    fn default() -> Self {
        EnvConfig {
            map_size: DEFAULT_MAP_SIZE,
            max_dbs: DEFAULT_MAX_DBS,
            max_readers: DEFAULT_MAX_READERS,
            mode: DEFAULT_MODE,
        }
    }
}

/// Collects configuration and opens an [`Environment`] exactly once.
///
/// Once an `open` call reaches the engine (whether or not it succeeds) every
/// setter and any further `open` fails with [`Error::AlreadyOpen`].
#[derive(Debug)]
pub struct EnvironmentBuilder<P: BufferProxy = DefaultProxy> {
    config: Option<EnvConfig>,
    _proxy: PhantomData<fn() -> P>,
}

impl EnvironmentBuilder<DefaultProxy> {
    pub fn new() -> Self {
        Self::with_proxy()
    }
}

impl Default for EnvironmentBuilder<DefaultProxy> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: BufferProxy> EnvironmentBuilder<P> {
    /// Builder whose environment will surface reads through `P`
    pub fn with_proxy() -> Self {
        EnvironmentBuilder {
            config: Some(EnvConfig::default()),
            _proxy: PhantomData,
        }
    }

    fn pending(&mut self) -> Result<&mut EnvConfig> {
        self.config.as_mut().ok_or(Error::AlreadyOpen)
    }

    /// Current configuration, `None` once opened
    pub fn config(&self) -> Option<&EnvConfig> {
        self.config.as_ref()
    }

    pub fn is_opened(&self) -> bool {
        self.config.is_none()
    }

    pub fn set_map_size(&mut self, size: usize) -> Result<&mut Self> {
        self.pending()?.map_size = size;
        Ok(self)
    }

    pub fn set_max_dbs(&mut self, dbs: u32) -> Result<&mut Self> {
        self.pending()?.max_dbs = dbs;
        Ok(self)
    }

    pub fn set_max_readers(&mut self, readers: u32) -> Result<&mut Self> {
        self.pending()?.max_readers = readers;
        Ok(self)
    }

    pub fn set_mode(&mut self, mode: u32) -> Result<&mut Self> {
        self.pending()?.mode = mode;
        Ok(self)
    }

    /// Open the environment with the configured mode
    pub fn open<Q: AsRef<Path>>(&mut self, path: Q, flags: EnvFlags) -> Result<Environment<P>> {
        let mode = self.config.as_ref().ok_or(Error::AlreadyOpen)?.mode;
        self.open_with_mode(path, flags, mode)
    }

    /// Open the environment, creating files with `mode`.
    ///
    /// The path must already exist (a directory, or the data file's parent
    /// directory with `NOSUBDIR`).
    pub fn open_with_mode<Q: AsRef<Path>>(
        &mut self,
        path: Q,
        flags: EnvFlags,
        mode: u32,
    ) -> Result<Environment<P>> {
        if self.config.is_none() {
            return Err(Error::AlreadyOpen);
        }
        let path = path.as_ref();
        let c_path = path_to_cstring(path)?;
        let config = self.config.take().ok_or(Error::AlreadyOpen)?;

        let mut raw: *mut ffi::MDB_env = ptr::null_mut();
        unsafe { ffi::mdb_env_create(&mut raw) }.into_result()?;
        let raw = NonNull::new(raw)
            .ok_or_else(|| Error::Io(io::Error::from(io::ErrorKind::OutOfMemory)))?;

        let opened = unsafe {
            ffi::mdb_env_set_mapsize(raw.as_ptr(), config.map_size)
                .into_result()
                .and_then(|_| ffi::mdb_env_set_maxdbs(raw.as_ptr(), config.max_dbs).into_result())
                .and_then(|_| {
                    ffi::mdb_env_set_maxreaders(raw.as_ptr(), config.max_readers).into_result()
                })
                .and_then(|_| {
                    ffi::mdb_env_open(
                        raw.as_ptr(),
                        c_path.as_ptr(),
                        flags.bits(),
                        mode as ffi::mode_t,
                    )
                    .into_result()
                })
        };
        if let Err(err) = opened {
            // A handle that failed to open must still be released.
            unsafe { ffi::mdb_env_close(raw.as_ptr()) };
            debug!("failed to open environment at {:?}: {}", path, err);
            return Err(err);
        }

        Ok(Environment::from_raw(
            raw,
            path.to_path_buf(),
            flags,
            config.max_readers,
        ))
    }
}
