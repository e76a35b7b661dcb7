use bitflags::bitflags;

// Environment flags
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EnvFlags: u32 {
        const FIXEDMAP = 0x01;
        const NOSUBDIR = 0x4000;
        const NOSYNC = 0x10000;
        const RDONLY = 0x20000;
        const NOMETASYNC = 0x40000;
        const WRITEMAP = 0x80000;
        const MAPASYNC = 0x100000;
        const NOTLS = 0x200000;
        const NOLOCK = 0x400000;
        const NORDAHEAD = 0x800000;
        const NOMEMINIT = 0x1000000;
    }
}

// Database flags
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DbFlags: u32 {
        const REVERSEKEY = 0x02;
        const DUPSORT = 0x04;
        const INTEGERKEY = 0x08;
        const DUPFIXED = 0x10;
        const INTEGERDUP = 0x20;
        const REVERSEDUP = 0x40;
        const CREATE = 0x40000;
    }
}

// Write operation flags
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct WriteFlags: u32 {
        const NOOVERWRITE = 0x10;
        const NODUPDATA = 0x20;
        const CURRENT = 0x40;
        const RESERVE = 0x10000;
        const APPEND = 0x20000;
        const APPENDDUP = 0x40000;
        const MULTIPLE = 0x80000;
    }
}

// Transaction flags accepted by mdb_txn_begin
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TxnFlags: u32 {
        const RDONLY = EnvFlags::RDONLY.bits();
        const NOSYNC = EnvFlags::NOSYNC.bits();
        const NOMETASYNC = EnvFlags::NOMETASYNC.bits();
    }
}

// Copy operation flags
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CopyFlags: u32 {
        const COMPACT = 0x01;
    }
}

/// Default map size, 1 MiB
pub const DEFAULT_MAP_SIZE: usize = 1024 * 1024;
/// Default number of named databases
pub const DEFAULT_MAX_DBS: u32 = 1;
/// Default number of reader slots
pub const DEFAULT_MAX_READERS: u32 = 1;
/// Default file creation mode
pub const DEFAULT_MODE: u32 = 0o664;

/// Engine return codes
pub(crate) mod codes {
    use std::os::raw::c_int;

    pub const KEYEXIST: c_int = -30799;
    pub const NOTFOUND: c_int = -30798;
    pub const PAGE_NOTFOUND: c_int = -30797;
    pub const CORRUPTED: c_int = -30796;
    pub const PANIC: c_int = -30795;
    pub const VERSION_MISMATCH: c_int = -30794;
    pub const INVALID: c_int = -30793;
    pub const MAP_FULL: c_int = -30792;
    pub const DBS_FULL: c_int = -30791;
    pub const READERS_FULL: c_int = -30790;
    pub const TLS_FULL: c_int = -30789;
    pub const TXN_FULL: c_int = -30788;
    pub const CURSOR_FULL: c_int = -30787;
    pub const PAGE_FULL: c_int = -30786;
    pub const MAP_RESIZED: c_int = -30785;
    pub const INCOMPATIBLE: c_int = -30784;
    pub const BAD_RSLOT: c_int = -30783;
    pub const BAD_TXN: c_int = -30782;
    pub const BAD_VALSIZE: c_int = -30781;
    pub const BAD_DBI: c_int = -30780;
}
