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

//! Split Virtqueue Rings
//!
//! The driver area (available ring) carries descriptor chain heads from the driver
//! to the device; the device area (used ring) carries completed chain heads back.
//! Both start with a `flags` word and a free-running `idx` counter, followed by
//! `queue_size` ring slots and a trailing event word:
//!
//! ```text
//! driver area                         device area
//! ┌───────┬─────┬──────────────┬────┐  ┌───────┬─────┬───────────────────┬────┐
//! │ flags │ idx │ ring[size]   │ ev │  │ flags │ idx │ ring[size]        │ ev │
//! │  u16  │ u16 │ u16 each     │u16 │  │  u16  │ u16 │ {u32 id, u32 len} │u16 │
//! └───────┴─────┴──────────────┴────┘  └───────┴─────┴───────────────────┴────┘
//! ```
//!
//! Only one side ever writes each area. The `idx` of a ring is the publish point:
//! it is stored with release semantics after the slot it covers has been written,
//! and loaded with acquire semantics before that slot is read.

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

use super::MemOps;

bitflags! {
    /// Flags the driver writes into the driver area.
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct AvailFlags: u16 {
        /// Ask the device not to interrupt when it returns buffers.
        const NO_INTERRUPT = 1;
    }
}

bitflags! {
    /// Flags the device writes into the device area.
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct UsedFlags: u16 {
        /// The device asks not to be notified when new buffers are made available.
        const NO_NOTIFY = 1;
    }
}

/// One entry of the used ring.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq, Hash)]
pub struct UsedElem {
    /// Head index of the completed descriptor chain.
    pub id: u32,
    /// Total bytes the device wrote into the chain's writable buffers.
    pub len: u32,
}

impl UsedElem {
    pub const SIZE: usize = core::mem::size_of::<Self>();
}

const FLAGS_OFFSET: u64 = 0;
const IDX_OFFSET: u64 = 2;
const RING_OFFSET: u64 = 4;

/// View of the driver area at a fixed address.
#[derive(Debug, Clone, Copy)]
pub struct AvailRing {
    addr: u64,
    size: u16,
}

impl AvailRing {
    pub const ALIGN: usize = 2;

    /// Bytes taken by a driver area with `queue_size` slots, including `used_event`.
    pub const fn size(queue_size: usize) -> usize {
        6 + 2 * queue_size
    }

    pub fn new(addr: u64, size: u16) -> Self {
        Self { addr, size }
    }

    pub fn flags_addr(&self) -> u64 {
        self.addr + FLAGS_OFFSET
    }

    pub fn idx_addr(&self) -> u64 {
        self.addr + IDX_OFFSET
    }

    /// Address of the slot `idx` maps to. `idx` is a free-running counter.
    pub fn slot_addr(&self, idx: u16) -> u64 {
        let slot = idx % self.size;
        self.addr + RING_OFFSET + 2 * slot as u64
    }

    pub fn used_event_addr(&self) -> u64 {
        self.addr + RING_OFFSET + 2 * self.size as u64
    }

    pub fn read_flags<M: MemOps>(&self, mem: &M) -> Result<AvailFlags, M::Error> {
        Ok(AvailFlags::from_bits_truncate(mem.load_acquire(self.flags_addr())?))
    }

    pub fn write_flags<M: MemOps>(&self, mem: &M, flags: AvailFlags) -> Result<(), M::Error> {
        mem.store_release(self.flags_addr(), flags.bits())
    }

    /// Acquire load of the driver index.
    pub fn load_idx<M: MemOps>(&self, mem: &M) -> Result<u16, M::Error> {
        mem.load_acquire(self.idx_addr())
    }

    /// Release store of the driver index.
    pub fn publish_idx<M: MemOps>(&self, mem: &M, idx: u16) -> Result<(), M::Error> {
        mem.store_release(self.idx_addr(), idx)
    }

    pub fn read_slot<M: MemOps>(&self, mem: &M, idx: u16) -> Result<u16, M::Error> {
        mem.read_val(self.slot_addr(idx))
    }

    pub fn write_slot<M: MemOps>(&self, mem: &M, idx: u16, head: u16) -> Result<(), M::Error> {
        mem.write_val(self.slot_addr(idx), head)
    }
}

/// View of the device area at a fixed address.
#[derive(Debug, Clone, Copy)]
pub struct UsedRing {
    addr: u64,
    size: u16,
}

impl UsedRing {
    pub const ALIGN: usize = 4;

    /// Bytes taken by a device area with `queue_size` slots, including `avail_event`.
    pub const fn size(queue_size: usize) -> usize {
        6 + UsedElem::SIZE * queue_size
    }

    pub fn new(addr: u64, size: u16) -> Self {
        Self { addr, size }
    }

    pub fn flags_addr(&self) -> u64 {
        self.addr + FLAGS_OFFSET
    }

    pub fn idx_addr(&self) -> u64 {
        self.addr + IDX_OFFSET
    }

    /// Address of the element `idx` maps to. `idx` is a free-running counter.
    pub fn elem_addr(&self, idx: u16) -> u64 {
        let slot = idx % self.size;
        self.addr + RING_OFFSET + (UsedElem::SIZE as u64) * slot as u64
    }

    pub fn avail_event_addr(&self) -> u64 {
        self.addr + RING_OFFSET + (UsedElem::SIZE as u64) * self.size as u64
    }

    pub fn read_flags<M: MemOps>(&self, mem: &M) -> Result<UsedFlags, M::Error> {
        Ok(UsedFlags::from_bits_truncate(mem.load_acquire(self.flags_addr())?))
    }

    pub fn write_flags<M: MemOps>(&self, mem: &M, flags: UsedFlags) -> Result<(), M::Error> {
        mem.store_release(self.flags_addr(), flags.bits())
    }

    /// Acquire load of the device index.
    pub fn load_idx<M: MemOps>(&self, mem: &M) -> Result<u16, M::Error> {
        mem.load_acquire(self.idx_addr())
    }

    /// Release store of the device index.
    pub fn publish_idx<M: MemOps>(&self, mem: &M, idx: u16) -> Result<(), M::Error> {
        mem.store_release(self.idx_addr(), idx)
    }

    pub fn read_elem<M: MemOps>(&self, mem: &M, idx: u16) -> Result<UsedElem, M::Error> {
        mem.read_val(self.elem_addr(idx))
    }

    pub fn write_elem<M: MemOps>(&self, mem: &M, idx: u16, elem: UsedElem) -> Result<(), M::Error> {
        mem.write_val(self.elem_addr(idx), elem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn avail_ring_addresses() {
        let ring = AvailRing::new(0x100, 4);
        assert_eq!(ring.flags_addr(), 0x100);
        assert_eq!(ring.idx_addr(), 0x102);
        assert_eq!(ring.slot_addr(0), 0x104);
        assert_eq!(ring.slot_addr(3), 0x10a);
        // free-running index wraps onto the ring
        assert_eq!(ring.slot_addr(5), 0x106);
        assert_eq!(ring.slot_addr(u16::MAX), 0x10a);
        assert_eq!(ring.used_event_addr(), 0x10c);
        assert_eq!(AvailRing::size(4), 14);
    }

    #[test]
    fn used_ring_addresses() {
        let ring = UsedRing::new(0x200, 4);
        assert_eq!(ring.flags_addr(), 0x200);
        assert_eq!(ring.idx_addr(), 0x202);
        assert_eq!(ring.elem_addr(0), 0x204);
        assert_eq!(ring.elem_addr(1), 0x20c);
        assert_eq!(ring.elem_addr(4), 0x204);
        assert_eq!(ring.avail_event_addr(), 0x224);
        assert_eq!(UsedRing::size(4), 38);
    }

    #[test]
    fn flag_bits_match_virtio() {
        assert_eq!(AvailFlags::NO_INTERRUPT.bits(), 1);
        assert_eq!(UsedFlags::NO_NOTIFY.bits(), 1);
        assert_eq!(AvailFlags::from_bits_truncate(0xffff), AvailFlags::NO_INTERRUPT);
    }
}
