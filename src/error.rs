use std::ffi::CStr;
use std::fmt;
use std::io;
use std::os::raw::c_int;
use std::path::PathBuf;
use std::result;

use thiserror::Error;

use crate::constants::codes;
use crate::ffi;

/// Custom result type for LMDB operations
pub type Result<T> = result::Result<T, Error>;

/// Why a directory was rejected as a copy destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyDestinationCause {
    /// Nothing exists at the path
    Missing,
    /// The path exists but is not a directory
    NotDirectory,
    /// The directory already holds entries
    NotEmpty,
}

impl fmt::Display for CopyDestinationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CopyDestinationCause::Missing => write!(f, "path does not exist"),
            CopyDestinationCause::NotDirectory => write!(f, "path is not a directory"),
            CopyDestinationCause::NotEmpty => write!(f, "directory is not empty"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// Environment was closed before the call
    #[error("Environment is closed")]
    EnvClosed,
    /// Builder already produced its environment
    #[error("Environment is already open")]
    AlreadyOpen,
    /// Transaction has already been committed or aborted
    #[error("Transaction has already finished")]
    TxnFinished,
    /// Transaction has an unresolved child transaction
    #[error("Transaction has an active child transaction")]
    TxnHasChild,
    /// Environment still has transactions that were never resolved
    #[error("Environment has {0} unresolved transaction(s)")]
    TxnsActive(usize),
    /// Write requested against a read-only environment
    #[error("Environment is read-only")]
    EnvReadOnly,
    /// Write requested through a read-only transaction
    #[error("Transaction is read-only")]
    TxnReadOnly,
    /// Transaction is reset and must be renewed first
    #[error("Transaction is reset")]
    TxnReset,
    /// Renew called on a transaction that was not reset
    #[error("Transaction is not reset")]
    TxnNotReset,
    /// Operation only applies to read-only transactions
    #[error("Operation requires a read-only transaction")]
    TxnNotReadOnly,
    /// Environment path is empty or contains an interior NUL
    #[error("Invalid environment path: {0:?}")]
    InvalidPath(PathBuf),
    /// Copy destination failed validation
    #[error("Invalid copy destination {path:?}: {cause}")]
    InvalidCopyDestination {
        path: PathBuf,
        cause: CopyDestinationCause,
    },
    /// Parent transaction belongs to another environment
    #[error("Parent transaction belongs to a different environment")]
    ForeignTransaction,
    /// Database handle belongs to another environment
    #[error("Database handle belongs to a different environment")]
    ForeignDatabase,
    /// Database handle was opened by a transaction that never committed
    #[error("Database handle {0} is not retained by the environment")]
    DatabaseNotRetained(u32),
    /// Database name contains an interior NUL
    #[error("Invalid database name: {0:?}")]
    InvalidDatabaseName(String),
    /// Key longer than the engine accepts
    #[error("Key of {len} bytes exceeds the maximum of {max}")]
    KeyTooLarge { len: usize, max: usize },
    /// Typed read past the end of a value
    #[error("Read of {width} bytes at offset {offset} exceeds value of {len} bytes")]
    OutOfBounds {
        offset: usize,
        width: usize,
        len: usize,
    },
    /// Value bytes are not valid UTF-8
    #[error("Value is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    /// Filesystem error raised by this layer
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Key/data pair already exists
    #[error("Key/data pair already exists")]
    KeyExist,
    /// No matching key/data pair found
    #[error("No matching key/data pair found")]
    NotFound,
    /// Requested page not found
    #[error("Requested page not found")]
    PageNotFound,
    /// Database file is corrupted
    #[error("Database file is corrupted")]
    Corrupted,
    /// Update of meta page failed
    #[error("Update of meta page failed or environment had fatal error")]
    Panic,
    /// Database version mismatch
    #[error("Database environment version mismatch")]
    VersionMismatch,
    /// File is not a valid LMDB file
    #[error("File is not a valid LMDB file")]
    Invalid,
    /// Environment mapsize limit reached
    #[error("Environment mapsize limit reached")]
    MapFull,
    /// Environment maxdbs limit reached
    #[error("Environment maxdbs limit reached")]
    DbsFull,
    /// Environment maxreaders limit reached
    #[error("Environment maxreaders limit reached")]
    ReadersFull,
    /// Thread-local storage keys full
    #[error("Thread-local storage keys full")]
    TlsFull,
    /// Transaction has too many dirty pages
    #[error("Transaction has too many dirty pages")]
    TxnFull,
    /// Too many open cursors
    #[error("Too many open cursors")]
    CursorFull,
    /// Page has not enough space
    #[error("Page has not enough space")]
    PageFull,
    /// Database contents grew beyond environment mapsize
    #[error("Database contents grew beyond environment mapsize")]
    MapResized,
    /// Operation and DB incompatible
    #[error("Operation and DB incompatible, or DB flags changed")]
    Incompatible,
    /// Invalid reuse of reader locktable slot
    #[error("Invalid reuse of reader locktable slot")]
    BadRslot,
    /// Transaction must abort, has a child, or is invalid
    #[error("Transaction must abort, has a child, or is invalid")]
    BadTxn,
    /// Unsupported size of key/DB name/data, or wrong DUPFIXED size
    #[error("Unsupported size of key/DB name/data, or wrong DUPFIXED size")]
    BadValSize,
    /// The specified DBI was changed unexpectedly
    #[error("The specified DBI was changed unexpectedly")]
    BadDbi,
    /// Any other engine code, with the engine's own text
    #[error("Native error {code}: {message}")]
    Native { code: c_int, message: String },
}

impl Error {
    /// Map a nonzero native return code onto the taxonomy.
    pub fn from_code(code: c_int) -> Error {
        match code {
            codes::KEYEXIST => Error::KeyExist,
            codes::NOTFOUND => Error::NotFound,
            codes::PAGE_NOTFOUND => Error::PageNotFound,
            codes::CORRUPTED => Error::Corrupted,
            codes::PANIC => Error::Panic,
            codes::VERSION_MISMATCH => Error::VersionMismatch,
            codes::INVALID => Error::Invalid,
            codes::MAP_FULL => Error::MapFull,
            codes::DBS_FULL => Error::DbsFull,
            codes::READERS_FULL => Error::ReadersFull,
            codes::TLS_FULL => Error::TlsFull,
            codes::TXN_FULL => Error::TxnFull,
            codes::CURSOR_FULL => Error::CursorFull,
            codes::PAGE_FULL => Error::PageFull,
            codes::MAP_RESIZED => Error::MapResized,
            codes::INCOMPATIBLE => Error::Incompatible,
            codes::BAD_RSLOT => Error::BadRslot,
            codes::BAD_TXN => Error::BadTxn,
            codes::BAD_VALSIZE => Error::BadValSize,
            codes::BAD_DBI => Error::BadDbi,
            code => Error::Native {
                code,
                message: strerror(code),
            },
        }
    }

    /// Raw engine code, for errors that came from the engine.
    pub fn code(&self) -> Option<c_int> {
        let code = match self {
            Error::KeyExist => codes::KEYEXIST,
            Error::NotFound => codes::NOTFOUND,
            Error::PageNotFound => codes::PAGE_NOTFOUND,
            Error::Corrupted => codes::CORRUPTED,
            Error::Panic => codes::PANIC,
            Error::VersionMismatch => codes::VERSION_MISMATCH,
            Error::Invalid => codes::INVALID,
            Error::MapFull => codes::MAP_FULL,
            Error::DbsFull => codes::DBS_FULL,
            Error::ReadersFull => codes::READERS_FULL,
            Error::TlsFull => codes::TLS_FULL,
            Error::TxnFull => codes::TXN_FULL,
            Error::CursorFull => codes::CURSOR_FULL,
            Error::PageFull => codes::PAGE_FULL,
            Error::MapResized => codes::MAP_RESIZED,
            Error::Incompatible => codes::INCOMPATIBLE,
            Error::BadRslot => codes::BAD_RSLOT,
            Error::BadTxn => codes::BAD_TXN,
            Error::BadValSize => codes::BAD_VALSIZE,
            Error::BadDbi => codes::BAD_DBI,
            Error::Native { code, .. } => *code,
            _ => return None,
        };
        Some(code)
    }

    /// Conditions that call for a bigger map or more slots, not a retry.
    pub fn is_tuning_signal(&self) -> bool {
        matches!(self, Error::MapFull | Error::ReadersFull | Error::DbsFull)
    }
}

fn strerror(code: c_int) -> String {
    // mdb_strerror falls back to strerror(3) for system codes
    let msg = unsafe { ffi::mdb_strerror(code) };
    if msg.is_null() {
        return format!("error code {}", code);
    }
    unsafe { CStr::from_ptr(msg) }.to_string_lossy().into_owned()
}

/// Helper trait for converting C error codes to Results
pub(crate) trait IntoResult {
    fn into_result(self) -> Result<()>;
}

impl IntoResult for c_int {
    fn into_result(self) -> Result<()> {
        if self == 0 {
            Ok(())
        } else {
            Err(Error::from_code(self))
        }
    }
}
