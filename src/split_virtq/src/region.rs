/*
Copyright 2026  The Hyperlight Authors.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

//! Backing memory for queues.
//!
//! A queue needs one physically contiguous region for its three areas. Where that
//! region comes from is up to the embedder: a physical frame allocator in a
//! kernel, a slice of guest memory in a VMM. [`RegionProvider`] is the seam.
//!
//! [`HeapMem`] is a provider backed by a heap allocation that also implements
//! [`MemOps`], so a driver half and a device half can share it in one address
//! space. Addresses handed out by it are offsets from a chosen base, not host
//! pointers.

use alloc::alloc::{Layout as AllocLayout, alloc_zeroed, dealloc};
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicU16, AtomicUsize, Ordering};

use thiserror::Error;

use super::MemOps;

#[derive(Debug, Error, Copy, Clone, PartialEq, Eq)]
pub enum AllocError {
    #[error("Invalid region alignment {0}")]
    InvalidAlign(u64),
    #[error("Invalid argument")]
    InvalidArg,
    #[error("Out of memory")]
    OutOfMemory,
}

#[derive(Debug, Error, Copy, Clone, PartialEq, Eq)]
pub enum MemError {
    #[error("Access of {len} bytes at {addr:#x} is out of bounds")]
    OutOfBounds { addr: u64, len: usize },
    #[error("Misaligned atomic access at {0:#x}")]
    Misaligned(u64),
}

/// A physically contiguous region handed out by a [`RegionProvider`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// Address of the first byte, as seen by the device.
    pub addr: u64,
    /// Length of the region in bytes.
    pub len: usize,
}

/// Source of contiguous memory for queue areas.
pub trait RegionProvider {
    /// Allocate at least `size` bytes aligned to `align` (a power of two).
    fn allocate_contiguous(&self, size: usize, align: usize) -> Result<Region, AllocError>;
}

/// Heap-backed shared memory with a bump allocator on top.
pub struct HeapMem {
    ptr: NonNull<u8>,
    layout: AllocLayout,
    base_addr: u64,
    next: AtomicUsize,
}

// SAFETY: HeapMem owns its allocation and only hands out copies of its contents
// or atomic accesses to it; ordering between sides is carried by the atomics.
unsafe impl Send for HeapMem {}
// SAFETY: see above.
unsafe impl Sync for HeapMem {}

impl HeapMem {
    /// Alignment of the backing allocation and of `base_addr`.
    pub const ALIGN: usize = crate::PAGE_SIZE;

    /// Allocate `len` zeroed bytes addressed from `base_addr`.
    pub fn new(base_addr: u64, len: usize) -> Result<Self, AllocError> {
        if len == 0 {
            return Err(AllocError::InvalidArg);
        }

        if !base_addr.is_multiple_of(Self::ALIGN as u64) {
            return Err(AllocError::InvalidAlign(base_addr));
        }

        let layout =
            AllocLayout::from_size_align(len, Self::ALIGN).map_err(|_| AllocError::InvalidArg)?;

        // SAFETY: layout has non-zero size
        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(AllocError::OutOfMemory)?;

        Ok(Self {
            ptr,
            layout,
            base_addr,
            next: AtomicUsize::new(0),
        })
    }

    pub fn base_addr(&self) -> u64 {
        self.base_addr
    }

    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.layout.size()
    }

    /// Bytes not yet handed out by [`allocate_contiguous`](RegionProvider::allocate_contiguous).
    pub fn remaining(&self) -> usize {
        self.len() - self.next.load(Ordering::Relaxed)
    }

    /// Translate `[addr, addr + len)` into a local pointer.
    fn ptr_for(&self, addr: u64, len: usize) -> Result<*mut u8, MemError> {
        let oob = MemError::OutOfBounds { addr, len };
        let off = addr.checked_sub(self.base_addr).ok_or(oob)? as usize;
        let end = off.checked_add(len).ok_or(oob)?;

        if end > self.len() {
            return Err(oob);
        }

        // SAFETY: off + len is within the allocation
        Ok(unsafe { self.ptr.as_ptr().add(off) })
    }

    fn atomic_for(&self, addr: u64) -> Result<&AtomicU16, MemError> {
        if !addr.is_multiple_of(2) {
            return Err(MemError::Misaligned(addr));
        }

        let ptr = self.ptr_for(addr, 2)?;
        // SAFETY: in bounds and 2-byte aligned since the allocation is page aligned;
        // lives as long as &self
        Ok(unsafe { AtomicU16::from_ptr(ptr.cast::<u16>()) })
    }
}

impl Drop for HeapMem {
    fn drop(&mut self) {
        // SAFETY: allocated in new with the same layout
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

impl core::fmt::Debug for HeapMem {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HeapMem")
            .field("base_addr", &format_args!("{:#x}", self.base_addr))
            .field("len", &self.len())
            .field("remaining", &self.remaining())
            .finish()
    }
}

impl RegionProvider for HeapMem {
    fn allocate_contiguous(&self, size: usize, align: usize) -> Result<Region, AllocError> {
        if size == 0 || !align.is_power_of_two() || align > Self::ALIGN {
            return Err(AllocError::InvalidArg);
        }

        let mut cur = self.next.load(Ordering::Relaxed);
        loop {
            let start = (cur + align - 1) & !(align - 1);
            let end = start.checked_add(size).ok_or(AllocError::OutOfMemory)?;
            if end > self.len() {
                return Err(AllocError::OutOfMemory);
            }

            match self
                .next
                .compare_exchange_weak(cur, end, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => {
                    return Ok(Region {
                        addr: self.base_addr + start as u64,
                        len: size,
                    });
                }
                Err(actual) => cur = actual,
            }
        }
    }
}

impl MemOps for HeapMem {
    type Error = MemError;

    fn read(&self, addr: u64, dst: &mut [u8]) -> Result<usize, Self::Error> {
        let src = self.ptr_for(addr, dst.len())?;
        // SAFETY: src is valid for dst.len() bytes and cannot overlap a caller buffer
        unsafe { ptr::copy_nonoverlapping(src, dst.as_mut_ptr(), dst.len()) };
        Ok(dst.len())
    }

    fn write(&self, addr: u64, src: &[u8]) -> Result<usize, Self::Error> {
        let dst = self.ptr_for(addr, src.len())?;
        // SAFETY: dst is valid for src.len() bytes and cannot overlap a caller buffer
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), dst, src.len()) };
        Ok(src.len())
    }

    fn load_acquire(&self, addr: u64) -> Result<u16, Self::Error> {
        Ok(self.atomic_for(addr)?.load(Ordering::Acquire))
    }

    fn store_release(&self, addr: u64, val: u16) -> Result<(), Self::Error> {
        self.atomic_for(addr)?.store(val, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_bad_arguments() {
        assert_eq!(HeapMem::new(0x1000, 0).unwrap_err(), AllocError::InvalidArg);
        assert_eq!(
            HeapMem::new(0x1001, 64).unwrap_err(),
            AllocError::InvalidAlign(0x1001)
        );
    }

    #[test]
    fn starts_zeroed() {
        let mem = HeapMem::new(0x1000, 256).unwrap();
        let mut buf = [0xffu8; 256];
        mem.read(0x1000, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn read_write_roundtrip_and_bounds() {
        let mem = HeapMem::new(0x1000, 64).unwrap();
        mem.write(0x1010, &[1, 2, 3, 4]).unwrap();
        let mut buf = [0u8; 4];
        mem.read(0x1010, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);

        assert_eq!(
            mem.write(0x103e, &[0; 4]).unwrap_err(),
            MemError::OutOfBounds {
                addr: 0x103e,
                len: 4
            }
        );
        assert!(mem.read(0x0fff, &mut buf).is_err());
    }

    #[test]
    fn atomics_check_alignment() {
        let mem = HeapMem::new(0x1000, 64).unwrap();
        mem.store_release(0x1002, 0xbeef).unwrap();
        assert_eq!(mem.load_acquire(0x1002).unwrap(), 0xbeef);
        assert_eq!(mem.read_val::<u16>(0x1002).unwrap(), 0xbeef);
        assert_eq!(mem.load_acquire(0x1003).unwrap_err(), MemError::Misaligned(0x1003));
    }

    #[test]
    fn zero_clears_range() {
        let mem = HeapMem::new(0x1000, 256).unwrap();
        mem.write(0x1000, &[0xaa; 200]).unwrap();
        mem.zero(0x1008, 150).unwrap();

        let mut buf = [0u8; 200];
        mem.read(0x1000, &mut buf).unwrap();
        assert!(buf[..8].iter().all(|&b| b == 0xaa));
        assert!(buf[8..158].iter().all(|&b| b == 0));
        assert!(buf[158..].iter().all(|&b| b == 0xaa));
    }

    #[test]
    fn bump_allocation_aligns_and_exhausts() {
        let mem = HeapMem::new(0x10000, 1024).unwrap();
        let a = mem.allocate_contiguous(10, 1).unwrap();
        assert_eq!(a, Region { addr: 0x10000, len: 10 });

        let b = mem.allocate_contiguous(100, 16).unwrap();
        assert_eq!(b.addr, 0x10010);

        assert_eq!(
            mem.allocate_contiguous(1024, 16).unwrap_err(),
            AllocError::OutOfMemory
        );
        assert_eq!(mem.allocate_contiguous(8, 3).unwrap_err(), AllocError::InvalidArg);
        assert_eq!(mem.remaining(), 1024 - 0x74);
    }
}
