use std::ffi::CStr;
use std::fmt;
use std::os::raw::c_int;

use once_cell::sync::Lazy;

use crate::ffi;

/// B-tree statistics for an environment or a single database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub psize: u32,
    pub depth: u32,
    pub branch_pages: usize,
    pub leaf_pages: usize,
    pub overflow_pages: usize,
    pub entries: usize,
}

impl From<ffi::MDB_stat> for Stat {
    fn from(raw: ffi::MDB_stat) -> Self {
        Stat {
            psize: raw.ms_psize as u32,
            depth: raw.ms_depth as u32,
            branch_pages: raw.ms_branch_pages as usize,
            leaf_pages: raw.ms_leaf_pages as usize,
            overflow_pages: raw.ms_overflow_pages as usize,
            entries: raw.ms_entries as usize,
        }
    }
}

/// Point-in-time environment information; `mapaddr` is an address only
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvInfo {
    pub mapaddr: usize,
    pub mapsize: usize,
    pub last_pgno: usize,
    pub last_txnid: usize,
    pub max_readers: u32,
    pub num_readers: u32,
}

impl From<ffi::MDB_envinfo> for EnvInfo {
    fn from(raw: ffi::MDB_envinfo) -> Self {
        EnvInfo {
            mapaddr: raw.me_mapaddr as usize,
            mapsize: raw.me_mapsize as usize,
            last_pgno: raw.me_last_pgno as usize,
            last_txnid: raw.me_last_txnid as usize,
            max_readers: raw.me_maxreaders as u32,
            num_readers: raw.me_numreaders as u32,
        }
    }
}

/// Version of the linked engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub major: i32,
    pub minor: i32,
    pub patch: i32,
    pub banner: String,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

static VERSION: Lazy<Version> = Lazy::new(|| {
    let (mut major, mut minor, mut patch): (c_int, c_int, c_int) = (0, 0, 0);
    let banner = unsafe { ffi::mdb_version(&mut major, &mut minor, &mut patch) };
    let banner = if banner.is_null() {
        String::new()
    } else {
        unsafe { CStr::from_ptr(banner) }.to_string_lossy().into_owned()
    };
    Version {
        major,
        minor,
        patch,
        banner,
    }
});

/// Get the LMDB version
pub fn version() -> &'static Version {
    &VERSION
}

pub(crate) fn zeroed_stat() -> ffi::MDB_stat {
    // SAFETY: MDB_stat is plain integers
    unsafe { std::mem::zeroed() }
}

pub(crate) fn zeroed_info() -> ffi::MDB_envinfo {
    // SAFETY: integers and a raw pointer, all valid when zero
    unsafe { std::mem::zeroed() }
}
