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

//! Split Virtqueue Descriptor Types
//!
//! The descriptor table is an array of `queue_size` 16-byte entries. A request is
//! a chain of descriptors linked through `next`; unused descriptors are linked
//! through the same field into the free chain owned by the driver.

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

use super::MemOps;

bitflags! {
    /// Descriptor flags as defined by VIRTIO specification.
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct DescFlags: u16 {
        /// This marks a buffer as continuing via the next field.
        const NEXT     = 1 << 0;
        /// This marks a buffer as device write-only (otherwise device read-only).
        const WRITE    = 1 << 1;
        /// This means the buffer contains a list of buffer descriptors (never produced here).
        const INDIRECT = 1 << 2;
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq, Hash)]
pub struct Descriptor {
    /// Physical address of the buffer.
    pub addr: u64,
    /// Length of the buffer in bytes.
    pub len: u32,
    /// Flags (NEXT, WRITE, INDIRECT).
    pub flags: u16,
    /// Index of the following descriptor. Meaningful to the device only when
    /// NEXT is set; free descriptors use it to link the free chain.
    pub next: u16,
}

const _: () = assert!(core::mem::size_of::<Descriptor>() == 16);
const _: () = assert!(Descriptor::ADDR_OFFSET == 0);
const _: () = assert!(Descriptor::LEN_OFFSET == 8);
const _: () = assert!(Descriptor::FLAGS_OFFSET == 12);
const _: () = assert!(Descriptor::NEXT_OFFSET == 14);

impl Descriptor {
    pub const SIZE: usize = core::mem::size_of::<Self>();
    /// Descriptor table alignment required by the split ring layout.
    pub const ALIGN: usize = 16;

    pub const ADDR_OFFSET: usize = core::mem::offset_of!(Self, addr);
    pub const LEN_OFFSET: usize = core::mem::offset_of!(Self, len);
    pub const FLAGS_OFFSET: usize = core::mem::offset_of!(Self, flags);
    pub const NEXT_OFFSET: usize = core::mem::offset_of!(Self, next);

    pub fn new(addr: u64, len: u32, flags: DescFlags, next: u16) -> Self {
        Self {
            addr,
            len,
            flags: flags.bits(),
            next,
        }
    }

    /// Get flags as a [`DescFlags`] bitfield.
    #[inline]
    pub fn flags(&self) -> DescFlags {
        DescFlags::from_bits_truncate(self.flags)
    }

    /// Is this descriptor writeable by the device?
    #[inline]
    pub fn is_writeable(&self) -> bool {
        self.flags().contains(DescFlags::WRITE)
    }

    /// Does this descriptor point to a next descriptor in the chain?
    #[inline]
    pub fn has_next(&self) -> bool {
        self.flags().contains(DescFlags::NEXT)
    }

    /// Read a whole descriptor from `addr`.
    pub fn read<M: MemOps>(mem: &M, addr: u64) -> Result<Self, M::Error> {
        mem.read_val(addr)
    }

    /// Write a whole descriptor to `addr`.
    ///
    /// Split rings publish through the driver index, not through descriptor
    /// flags, so no ordering is attached to the individual fields.
    pub fn write<M: MemOps>(&self, mem: &M, addr: u64) -> Result<(), M::Error> {
        mem.write_val(addr, *self)
    }
}

/// A table of descriptors stored in shared memory.
#[derive(Debug, Clone, Copy)]
pub struct DescTable {
    base_addr: u64,
    size: u16,
}

impl DescTable {
    /// Create a descriptor table view over shared memory.
    ///
    /// `base_addr` must be aligned to [`Descriptor::ALIGN`]; the [`Layout`](crate::Layout)
    /// constructors guarantee this.
    pub(crate) fn new(base_addr: u64, size: u16) -> Self {
        debug_assert!(base_addr.is_multiple_of(Descriptor::ALIGN as u64));

        Self { base_addr, size }
    }

    /// Address of descriptor `idx`, or None if idx is out of bounds
    pub fn desc_addr(&self, idx: u16) -> Option<u64> {
        if idx >= self.size {
            return None;
        }

        Some(self.base_addr + (idx as u64 * Descriptor::SIZE as u64))
    }

    /// Get number of descriptors in table
    pub fn len(&self) -> usize {
        self.size as usize
    }

    /// Is the descriptor table empty?
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_bits_match_virtio() {
        assert_eq!(DescFlags::NEXT.bits(), 1);
        assert_eq!(DescFlags::WRITE.bits(), 2);
        assert_eq!(DescFlags::INDIRECT.bits(), 4);
    }

    #[test]
    fn writeable_and_next_helpers() {
        let mut d = Descriptor::zeroed();
        d.flags = (DescFlags::WRITE | DescFlags::NEXT).bits();
        assert!(d.is_writeable());
        assert!(d.has_next());
        d.flags = 0;
        assert!(!d.is_writeable());
        assert!(!d.has_next());
    }

    #[test]
    fn unknown_flag_bits_are_ignored() {
        let d = Descriptor {
            addr: 0,
            len: 0,
            flags: 0x8000 | DescFlags::NEXT.bits(),
            next: 3,
        };
        assert_eq!(d.flags(), DescFlags::NEXT);
    }

    #[test]
    fn wire_bytes_are_little_endian_fields_in_order() {
        let d = Descriptor::new(0x1122_3344_5566_7788, 0x99aa_bbcc, DescFlags::WRITE, 0x0d0e);
        let bytes = bytemuck::bytes_of(&d);
        assert_eq!(&bytes[0..8], &0x1122_3344_5566_7788u64.to_le_bytes());
        assert_eq!(&bytes[8..12], &0x99aa_bbccu32.to_le_bytes());
        assert_eq!(&bytes[12..14], &2u16.to_le_bytes());
        assert_eq!(&bytes[14..16], &0x0d0eu16.to_le_bytes());
    }

    #[test]
    fn desc_table_get_out_of_bounds() {
        let table = DescTable::new(0x1000, 4);
        assert_eq!(table.desc_addr(0), Some(0x1000));
        assert_eq!(table.desc_addr(3), Some(0x1030));
        assert!(table.desc_addr(4).is_none());
        assert_eq!(table.len(), 4);
        assert!(!table.is_empty());
    }
}
