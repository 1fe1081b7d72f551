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

//! Device side of a split virtqueue.
//!
//! [`DeviceQueue`] attaches to a queue a driver has already initialized, pulls
//! descriptor chains from the driver area and returns them through the device
//! area. A VMM emulating a device uses it directly; tests use it to play the
//! device against a [`SplitQueue`](crate::SplitQueue).
//!
//! The device only ever writes the device area. Descriptors and the driver area
//! are read-only from this side.

use smallvec::SmallVec;

use super::desc::{DescTable, Descriptor};
use super::ring::{AvailFlags, AvailRing, UsedElem, UsedFlags, UsedRing};
use super::{Layout, MemOps, QueueConfig, QueueError};

/// One descriptor of a chain as seen by the device.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ChainSegment {
    /// Physical address of buffer
    pub addr: u64,
    /// Length of the buffer in bytes
    pub len: u32,
    /// Is this buffer writable by the device
    pub writable: bool,
}

impl From<&Descriptor> for ChainSegment {
    fn from(desc: &Descriptor) -> Self {
        ChainSegment {
            addr: desc.addr,
            len: desc.len,
            writable: desc.is_writeable(),
        }
    }
}

/// A descriptor chain the driver has made available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailChain {
    /// Head descriptor index. Pass to [`DeviceQueue::submit_used`].
    pub head: u16,
    /// Segments in chain order.
    pub segments: SmallVec<[ChainSegment; 16]>,
}

impl AvailChain {
    /// Number of descriptors in the chain.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Segments the device may read.
    pub fn readables(&self) -> impl Iterator<Item = &ChainSegment> {
        self.segments.iter().filter(|s| !s.writable)
    }

    /// Segments the device may write.
    pub fn writables(&self) -> impl Iterator<Item = &ChainSegment> {
        self.segments.iter().filter(|s| s.writable)
    }

    /// Total capacity of the writable segments.
    pub fn writable_len(&self) -> u64 {
        self.writables().map(|s| s.len as u64).sum()
    }
}

/// Device side of a split virtqueue.
#[derive(Debug)]
pub struct DeviceQueue<M> {
    /// Memory accessor
    mem: M,
    /// Descriptor table in shared memory
    desc_table: DescTable,
    /// Driver area, read-only here
    avail: AvailRing,
    /// Device area
    used: UsedRing,
    /// Next driver ring entry to consume
    last_avail: u16,
    /// Device-owned copy of the published device index
    used_idx: u16,
    /// Shadow of device flags (last written value)
    used_flags_shadow: UsedFlags,
}

impl<M: MemOps> DeviceQueue<M> {
    /// Attach to a queue at `layout`.
    ///
    /// Resumes from the current device index: chains the driver published but
    /// the device never returned are polled again.
    pub fn new(layout: Layout, mem: M) -> Result<Self, QueueError> {
        let size = QueueConfig::new(layout.queue_size).validate()?.get();
        let avail = AvailRing::new(layout.avail_addr, size);
        let used = UsedRing::new(layout.used_addr, size);

        let used_idx = used.load_idx(&mem).map_err(|_| QueueError::MemError)?;
        let used_flags = used.read_flags(&mem).map_err(|_| QueueError::MemError)?;

        Ok(Self {
            mem,
            desc_table: DescTable::new(layout.desc_table_addr, size),
            avail,
            used,
            last_avail: used_idx,
            used_idx,
            used_flags_shadow: used_flags,
        })
    }

    /// Whether the driver has made chains available that were not polled yet.
    pub fn peek_available(&self) -> Result<bool, QueueError> {
        let idx = self
            .avail
            .load_idx(&self.mem)
            .map_err(|_| QueueError::MemError)?;

        Ok(idx != self.last_avail)
    }

    /// Take the next available chain, if any.
    ///
    /// # Errors
    ///
    /// - [`QueueError::InvalidDescriptor`] - the driver published an out of range head
    /// - [`QueueError::BadChain`] - the chain does not terminate within the table
    pub fn poll_available(&mut self) -> Result<Option<AvailChain>, QueueError> {
        if !self.peek_available()? {
            return Ok(None);
        }

        // Ring slot and descriptors were written before the index we observed.
        self.mem.full_barrier();

        let head = self
            .avail
            .read_slot(&self.mem, self.last_avail)
            .map_err(|_| QueueError::MemError)?;

        if head as usize >= self.desc_table.len() {
            return Err(QueueError::InvalidDescriptor(head as u32));
        }

        let mut segments = SmallVec::new();
        let mut idx = head;
        loop {
            let addr = self.desc_table.desc_addr(idx).ok_or(QueueError::BadChain)?;
            let desc = Descriptor::read(&self.mem, addr).map_err(|_| QueueError::MemError)?;
            segments.push(ChainSegment::from(&desc));

            if !desc.has_next() {
                break;
            }

            if segments.len() >= self.desc_table.len() {
                return Err(QueueError::BadChain);
            }

            idx = desc.next;
        }

        self.last_avail = self.last_avail.wrapping_add(1);

        Ok(Some(AvailChain { head, segments }))
    }

    /// Return a chain to the driver, reporting `written` bytes.
    ///
    /// Returns whether the driver wants an interrupt, i.e. it has not set
    /// `NO_INTERRUPT` in the driver area.
    pub fn submit_used(&mut self, head: u16, written: u32) -> Result<bool, QueueError> {
        if head as usize >= self.desc_table.len() {
            return Err(QueueError::InvalidDescriptor(head as u32));
        }

        let elem = UsedElem {
            id: head as u32,
            len: written,
        };

        self.used
            .write_elem(&self.mem, self.used_idx, elem)
            .map_err(|_| QueueError::MemError)?;

        self.mem.full_barrier();

        let used_idx = self.used_idx.wrapping_add(1);
        self.used
            .publish_idx(&self.mem, used_idx)
            .map_err(|_| QueueError::MemError)?;
        self.used_idx = used_idx;

        self.mem.full_barrier();

        let flags = self
            .avail
            .read_flags(&self.mem)
            .map_err(|_| QueueError::MemError)?;

        Ok(!flags.contains(AvailFlags::NO_INTERRUPT))
    }

    /// Ask the driver not to notify about newly available chains, or undo that.
    pub fn suppress_notifications(&mut self, suppress: bool) -> Result<(), QueueError> {
        let flags = if suppress {
            UsedFlags::NO_NOTIFY
        } else {
            UsedFlags::empty()
        };

        if self.used_flags_shadow == flags {
            return Ok(());
        }

        self.used
            .write_flags(&self.mem, flags)
            .map_err(|_| QueueError::MemError)?;
        self.used_flags_shadow = flags;
        Ok(())
    }

    /// Device index as last published.
    pub fn used_index(&self) -> u16 {
        self.used_idx
    }

    /// Get descriptor table length
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.desc_table.len()
    }
}
