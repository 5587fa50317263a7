//! Byte-addressed native memory
//!
//! Every allocation is a separate block; reads and writes must fall inside
//! a live block. Addresses are never reused, so a stale address can never
//! alias a newer object.

use std::collections::BTreeMap;

use bindery_sdk::{Address, NativeError, NativeResult};
use parking_lot::Mutex;

const BASE_ADDRESS: Address = 0x1_0000;
const ALIGNMENT: u64 = 16;

struct ArenaInner {
    blocks: BTreeMap<Address, Vec<u8>>,
    next: Address,
    live_bytes: usize,
}

/// Native heap of the in-process backend
pub struct Arena {
    inner: Mutex<ArenaInner>,
}

impl Arena {
    /// Create an empty arena
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ArenaInner {
                blocks: BTreeMap::new(),
                next: BASE_ADDRESS,
                live_bytes: 0,
            }),
        }
    }

    /// Allocate `size` zeroed bytes
    pub fn allocate(&self, size: usize) -> NativeResult<Address> {
        let size = size.max(1);
        let mut inner = self.inner.lock();
        let address = inner.next;
        let span = (size as u64).div_ceil(ALIGNMENT) * ALIGNMENT;
        inner.next = address
            .checked_add(span)
            .ok_or_else(|| NativeError::Memory("address space exhausted".to_string()))?;
        inner.blocks.insert(address, vec![0u8; size]);
        inner.live_bytes += size;
        Ok(address)
    }

    /// Release the block starting at `address`
    pub fn free(&self, address: Address) -> NativeResult<()> {
        let mut inner = self.inner.lock();
        match inner.blocks.remove(&address) {
            Some(block) => {
                inner.live_bytes -= block.len();
                Ok(())
            }
            None => Err(NativeError::Memory(format!(
                "free of unallocated address {:#x}",
                address
            ))),
        }
    }

    /// Read `len` bytes
    pub fn read(&self, address: Address, len: usize) -> NativeResult<Vec<u8>> {
        let inner = self.inner.lock();
        let (start, block) = locate(&inner.blocks, address, len)?;
        let offset = (address - start) as usize;
        Ok(block[offset..offset + len].to_vec())
    }

    /// Write bytes
    pub fn write(&self, address: Address, bytes: &[u8]) -> NativeResult<()> {
        let mut inner = self.inner.lock();
        let start = locate(&inner.blocks, address, bytes.len())?.0;
        let offset = (address - start) as usize;
        if let Some(block) = inner.blocks.get_mut(&start) {
            block[offset..offset + bytes.len()].copy_from_slice(bytes);
        }
        Ok(())
    }

    /// Bytes currently allocated
    pub fn live_bytes(&self) -> usize {
        self.inner.lock().live_bytes
    }

    /// Blocks currently allocated
    pub fn live_blocks(&self) -> usize {
        self.inner.lock().blocks.len()
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

fn locate(
    blocks: &BTreeMap<Address, Vec<u8>>,
    address: Address,
    len: usize,
) -> NativeResult<(Address, &Vec<u8>)> {
    let out_of_range = || {
        NativeError::Memory(format!(
            "access of {} bytes at {:#x} outside any allocation",
            len, address
        ))
    };
    let (&start, block) = blocks.range(..=address).next_back().ok_or_else(out_of_range)?;
    let end = start + block.len() as u64;
    if address + len as u64 > end || (len == 0 && address >= end) {
        return Err(out_of_range());
    }
    Ok((start, block))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_read_write() {
        let arena = Arena::new();
        let a = arena.allocate(8).unwrap();
        arena.write(a + 4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(arena.read(a, 8).unwrap(), vec![0, 0, 0, 0, 1, 2, 3, 4]);
        assert_eq!(arena.live_bytes(), 8);
    }

    #[test]
    fn test_out_of_range_access_fails() {
        let arena = Arena::new();
        let a = arena.allocate(4).unwrap();
        assert!(arena.read(a + 2, 4).is_err());
        assert!(arena.read(0, 1).is_err());
        assert!(arena.write(a + 4, &[0]).is_err());
    }

    #[test]
    fn test_free_and_no_reuse() {
        let arena = Arena::new();
        let a = arena.allocate(16).unwrap();
        arena.free(a).unwrap();
        assert!(arena.free(a).is_err());
        assert!(arena.read(a, 1).is_err());
        let b = arena.allocate(16).unwrap();
        assert_ne!(a, b);
        assert_eq!(arena.live_bytes(), 16);
        assert_eq!(arena.live_blocks(), 1);
    }
}
