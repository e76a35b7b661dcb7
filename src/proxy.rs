//! Buffer proxies: how engine memory is surfaced to callers.
//!
//! An [`Environment`](crate::Environment) is bound to one proxy type for its
//! whole life; every transaction it hands out produces views of that type.

use std::marker::PhantomData;
use std::os::raw::c_void;
use std::slice;

use crate::ffi;
use crate::value::Value;

/// Address and length of a key or value, borrowed for `'a`.
#[derive(Debug, Clone, Copy)]
pub struct RawBuf<'a> {
    ptr: *const u8,
    len: usize,
    _marker: PhantomData<&'a [u8]>,
}

impl<'a> RawBuf<'a> {
    pub fn from_slice(bytes: &'a [u8]) -> Self {
        RawBuf {
            ptr: bytes.as_ptr(),
            len: bytes.len(),
            _marker: PhantomData,
        }
    }

    /// Wrap a value the engine filled in.
    ///
    /// # Safety
    ///
    /// `val` must describe memory that stays mapped and unmodified for `'a`.
    pub(crate) unsafe fn from_mdb(val: &ffi::MDB_val) -> Self {
        RawBuf {
            ptr: val.mv_data as *const u8,
            len: val.mv_size,
            _marker: PhantomData,
        }
    }

    pub(crate) fn to_mdb(self) -> ffi::MDB_val {
        ffi::MDB_val {
            mv_size: self.len,
            mv_data: self.ptr as *mut c_void,
        }
    }

    pub fn addr(&self) -> usize {
        self.ptr as usize
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &'a [u8] {
        if self.len == 0 {
            return &[];
        }
        // SAFETY: both constructors guarantee ptr/len are valid for 'a
        unsafe { slice::from_raw_parts(self.ptr, self.len) }
    }
}

/// Strategy reported by a proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyKind {
    /// Views point straight into the map
    ZeroCopy,
    /// Views own a copy of the bytes
    Copying,
}

/// Converts between engine memory and caller-facing views.
pub trait BufferProxy: 'static {
    /// What reads hand back; may borrow the transaction for `'txn`
    type View<'txn>;

    const KIND: ProxyKind;

    fn view<'txn>(raw: RawBuf<'txn>) -> Self::View<'txn>;

    /// Describe caller bytes as an address/length pair for the engine.
    fn encode(value: &[u8]) -> RawBuf<'_> {
        RawBuf::from_slice(value)
    }
}

/// Zero-copy proxy: views are slices into the memory map.
#[derive(Debug, Clone, Copy, Default)]
pub struct SliceProxy;

impl BufferProxy for SliceProxy {
    type View<'txn> = Value<'txn>;

    const KIND: ProxyKind = ProxyKind::ZeroCopy;

    fn view<'txn>(raw: RawBuf<'txn>) -> Value<'txn> {
        Value::new(raw.as_slice())
    }
}

/// Portable fallback: every read is copied into an owned buffer.
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyProxy;

impl BufferProxy for CopyProxy {
    type View<'txn> = Vec<u8>;

    const KIND: ProxyKind = ProxyKind::Copying;

    fn view<'txn>(raw: RawBuf<'txn>) -> Vec<u8> {
        raw.as_slice().to_vec()
    }
}

/// Proxy used when none is named
#[cfg(not(feature = "portable-proxy"))]
pub type DefaultProxy = SliceProxy;

/// Proxy used when none is named
#[cfg(feature = "portable-proxy")]
pub type DefaultProxy = CopyProxy;
