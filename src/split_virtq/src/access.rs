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

//! Memory access for the shared queue areas.
//!
//! The transport never dereferences queue memory directly. Every read and write
//! of the descriptor table and the two rings goes through [`MemOps`], so the same
//! queue code can run against guest memory mapped into a driver, a host view of
//! guest memory, or a plain heap buffer in tests.

use core::sync::atomic::{Ordering, fence};

use bytemuck::Pod;

/// Backend-provided access to the memory shared with the device.
///
/// Addresses are the ones recorded in the queue [`Layout`](crate::Layout), i.e.
/// the addresses the device is told about. Implementations translate them into
/// whatever the local side can dereference.
///
/// # Safety
///
/// Implementations must ensure that:
/// - Reads and writes only touch memory inside the region the address belongs to
/// - `load_acquire` and `store_release` are single atomic `u16` accesses with the
///   documented ordering
pub trait MemOps {
    type Error;

    /// Read `dst.len()` bytes starting at `addr`.
    ///
    /// Returns the number of bytes read.
    fn read(&self, addr: u64, dst: &mut [u8]) -> Result<usize, Self::Error>;

    /// Write `src` starting at `addr`.
    ///
    /// Returns the number of bytes written.
    fn write(&self, addr: u64, src: &[u8]) -> Result<usize, Self::Error>;

    /// Load a u16 with acquire semantics.
    ///
    /// `addr` must be 2-byte aligned.
    fn load_acquire(&self, addr: u64) -> Result<u16, Self::Error>;

    /// Store a u16 with release semantics.
    ///
    /// `addr` must be 2-byte aligned.
    fn store_release(&self, addr: u64, val: u16) -> Result<(), Self::Error>;

    /// Full memory barrier between driver and device accesses.
    ///
    /// Every access issued before the barrier is visible to the device before any
    /// access issued after it. Backends that share memory with a real device
    /// through a weaker path (e.g. uncached mappings) override this.
    #[inline]
    fn full_barrier(&self) {
        fence(Ordering::SeqCst);
    }

    /// Read a Pod value at `addr`.
    fn read_val<T: Pod>(&self, addr: u64) -> Result<T, Self::Error> {
        let mut val = T::zeroed();
        let bytes = bytemuck::bytes_of_mut(&mut val);

        self.read(addr, bytes)?;
        Ok(val)
    }

    /// Write a Pod value at `addr`.
    fn write_val<T: Pod>(&self, addr: u64, val: T) -> Result<(), Self::Error> {
        let bytes = bytemuck::bytes_of(&val);
        self.write(addr, bytes)?;
        Ok(())
    }

    /// Fill `len` bytes at `addr` with zeroes.
    fn zero(&self, addr: u64, len: usize) -> Result<(), Self::Error> {
        const CHUNK: [u8; 64] = [0u8; 64];

        let mut off = 0;
        while off < len {
            let n = core::cmp::min(CHUNK.len(), len - off);
            self.write(addr + off as u64, &CHUNK[..n])?;
            off += n;
        }

        Ok(())
    }
}

macro_rules! forward_mem_ops {
    ($($ty:ty),*) => {
        $(
            impl<M: MemOps + ?Sized> MemOps for $ty {
                type Error = M::Error;

                #[inline]
                fn read(&self, addr: u64, dst: &mut [u8]) -> Result<usize, Self::Error> {
                    (**self).read(addr, dst)
                }

                #[inline]
                fn write(&self, addr: u64, src: &[u8]) -> Result<usize, Self::Error> {
                    (**self).write(addr, src)
                }

                #[inline]
                fn load_acquire(&self, addr: u64) -> Result<u16, Self::Error> {
                    (**self).load_acquire(addr)
                }

                #[inline]
                fn store_release(&self, addr: u64, val: u16) -> Result<(), Self::Error> {
                    (**self).store_release(addr, val)
                }

                #[inline]
                fn full_barrier(&self) {
                    (**self).full_barrier()
                }
            }
        )*
    };
}

// Lets the driver and device halves share one backend.
forward_mem_ops!(&M, alloc::sync::Arc<M>, alloc::rc::Rc<M>);
