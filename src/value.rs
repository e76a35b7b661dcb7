use std::ops::Deref;

use crate::error::{Error, Result};

/// Zero-copy view of engine-owned memory.
///
/// The lifetime ties the view to the transaction that produced it; the
/// bytes may be remapped or reused once that transaction ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Value<'txn> {
    data: &'txn [u8],
}

impl<'txn> Value<'txn> {
    pub fn new(data: &'txn [u8]) -> Self {
        Value { data }
    }

    pub fn as_bytes(&self) -> &'txn [u8] {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Copy out of the map, for data that must outlive the transaction
    pub fn to_vec(&self) -> Vec<u8> {
        self.data.to_vec()
    }

    pub fn as_str(&self) -> Result<&'txn str> {
        Ok(std::str::from_utf8(self.data)?)
    }

    /// Native-endian `u32` at `offset`, matching `INTEGERKEY` layout
    pub fn read_u32(&self, offset: usize) -> Result<u32> {
        let bytes = self.window::<4>(offset)?;
        Ok(u32::from_ne_bytes(bytes))
    }

    /// Native-endian `u64` at `offset`
    pub fn read_u64(&self, offset: usize) -> Result<u64> {
        let bytes = self.window::<8>(offset)?;
        Ok(u64::from_ne_bytes(bytes))
    }

    fn window<const N: usize>(&self, offset: usize) -> Result<[u8; N]> {
        let out_of_bounds = || Error::OutOfBounds {
            offset,
            width: N,
            len: self.data.len(),
        };
        let end = offset.checked_add(N).ok_or_else(out_of_bounds)?;
        let slice = self.data.get(offset..end).ok_or_else(out_of_bounds)?;
        // length is exactly N by construction
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }
}

impl Deref for Value<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.data
    }
}

impl AsRef<[u8]> for Value<'_> {
    fn as_ref(&self) -> &[u8] {
        self.data
    }
}
