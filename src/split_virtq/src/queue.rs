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

//! Driver side of a split virtqueue.
//!
//! [`SplitQueue`] owns the descriptor table, both rings and the free descriptor
//! chain for its whole lifetime. Descriptors move through three states:
//!
//! ```text
//!      supply_buffer            device completes           get_buffer
//! Free ─────────────> InFlight ─────────────────> Completed ────────────> Free
//! ```
//!
//! Unused descriptors are linked into a singly-linked free chain through their own
//! `next` fields, rooted at `free_head`. Supplying a buffer takes descriptors off
//! the front of that chain; retrieving a completion splices the whole chain back
//! in front of it. The free-buffer counter, not the chain itself, bounds every walk,
//! so the chain may point at in-flight descriptors past its last free entry.
//!
//! # Memory ordering
//!
//! The device runs concurrently and only sees shared memory. Two full barriers
//! surround the driver index increment in [`SplitQueue::supply_buffer`]: the first
//! keeps the device from seeing an index that covers unwritten descriptors or ring
//! slots, the second keeps the read of the device's `NO_NOTIFY` flag after the
//! increment. [`SplitQueue::get_buffer`] issues one barrier between observing the
//! device index and reading the used element it covers.

use alloc::vec::Vec;

use thiserror::Error;

use super::desc::{DescFlags, DescTable, Descriptor};
use super::region::{AllocError, RegionProvider};
use super::ring::{AvailFlags, AvailRing, UsedFlags, UsedRing};
use super::{BufferType, Layout, MemOps, QueueConfig, ScatterList};

/// Errors that can occur in queue operations.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("Invalid queue size {0}")]
    InvalidSize(u16),
    #[error("Invalid memory layout")]
    InvalidLayout,
    #[error("Buffer chain is empty")]
    EmptyChain,
    #[error("Not enough free descriptors: need {needed}, have {free}")]
    NoFreeDescriptors { needed: usize, free: usize },
    #[error("Device returned invalid descriptor {0}")]
    InvalidDescriptor(u32),
    #[error("Descriptor chain is malformed")]
    BadChain,
    #[error("Internal state error")]
    InvalidState,
    #[error("Allocation error: {0}")]
    Alloc(#[from] AllocError),
    #[error("Backend memory error")]
    MemError,
}

/// Statistics about the current queue state.
///
/// Handed to the [`Notifier`](crate::Notifier) when the device is notified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    /// Number of free descriptors.
    pub num_free: usize,
    /// Number of descriptors in flight or completed but not yet retrieved.
    pub num_inflight: usize,
}

/// A completed buffer chain retrieved from the device ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsedBuffer<T> {
    /// Token supplied with the chain.
    pub token: T,
    /// Number of bytes the device reported as written.
    pub len: u32,
}

/// Driver side of a split virtqueue.
///
/// `T` is the token type recorded with each supplied chain and handed back when
/// the chain completes.
///
/// All mutating operations take `&mut self`; sharing one queue between several
/// driver threads needs a lock such as [`QueueHandle`](crate::QueueHandle).
#[derive(Debug)]
pub struct SplitQueue<M, T> {
    /// Memory accessor
    mem: M,
    /// Where the three areas live
    layout: Layout,
    /// Descriptor table in shared memory
    desc_table: DescTable,
    /// Driver area
    avail: AvailRing,
    /// Device area
    used: UsedRing,
    /// First descriptor of the free chain
    free_head: u16,
    /// Number of descriptors on the free chain
    num_free: usize,
    /// Driver-owned copy of the published driver index
    avail_idx: u16,
    /// Next device ring entry to consume
    used_tail: u16,
    /// Tokens of outstanding chains, indexed by head descriptor
    tokens: Vec<Option<T>>,
    /// Shadow of the driver area flags (last written value)
    avail_flags_shadow: AvailFlags,
    /// Passed to the doorbell, never interpreted here
    notify_offset: u16,
}

impl<M: MemOps, T> SplitQueue<M, T> {
    /// Allocate and initialize a queue.
    ///
    /// The backing region comes from `provider`; `mem` must be able to access it.
    /// An allocation failure is fatal for the queue and is returned as
    /// [`QueueError::Alloc`].
    pub fn new<P: RegionProvider + ?Sized>(
        config: QueueConfig,
        provider: &P,
        mem: M,
    ) -> Result<Self, QueueError> {
        let size = config.validate()?;
        let bytes = Layout::query_size(size.get() as usize, config.legacy);
        let region = provider.allocate_contiguous(bytes, Layout::base_align(config.legacy))?;

        if region.len < bytes {
            return Err(QueueError::InvalidLayout);
        }

        let layout = Layout::from_base(region.addr, size, config.legacy)?;
        Self::from_layout(layout, config.notify_offset, mem)
    }

    /// Initialize a queue over memory already placed at `layout`.
    ///
    /// The whole region is zeroed and every descriptor is linked into the free chain.
    /// A layout whose areas are misaligned or overlap is rejected with
    /// [`QueueError::InvalidLayout`] before anything is written.
    pub fn from_layout(layout: Layout, notify_offset: u16, mem: M) -> Result<Self, QueueError> {
        let size = layout.validate()?.get();

        mem.zero(layout.desc_table_addr, layout.span()?)
            .map_err(|_| QueueError::MemError)?;

        let desc_table = DescTable::new(layout.desc_table_addr, size);

        // Thread every descriptor into a circular free chain: i -> i + 1 mod size.
        for i in 0..size {
            let addr = desc_table.desc_addr(i).ok_or(QueueError::InvalidState)?;
            let next = ((i as u32 + 1) % size as u32) as u16;
            mem.write_val(addr + Descriptor::NEXT_OFFSET as u64, next)
                .map_err(|_| QueueError::MemError)?;
        }

        let avail = AvailRing::new(layout.avail_addr, size);
        let used = UsedRing::new(layout.used_addr, size);

        // Interrupts enabled by default
        avail
            .write_flags(&mem, AvailFlags::empty())
            .map_err(|_| QueueError::MemError)?;

        log::debug!(
            "split virtqueue: size={} desc={:#x} avail={:#x} used={:#x} notify_offset={}",
            size,
            layout.desc_table_addr,
            layout.avail_addr,
            layout.used_addr,
            notify_offset
        );

        Ok(Self {
            mem,
            layout,
            desc_table,
            avail,
            used,
            free_head: 0,
            num_free: size as usize,
            avail_idx: 0,
            used_tail: 0,
            tokens: (0..size).map(|_| None).collect(),
            avail_flags_shadow: AvailFlags::empty(),
            notify_offset,
        })
    }

    /// Make a buffer available to the device.
    ///
    /// Each segment of `list` takes one descriptor from the free chain; all of them
    /// get the direction of `buffer_type`. `token` is returned by
    /// [`get_buffer`](Self::get_buffer) once the device has used the chain.
    ///
    /// # Returns
    ///
    /// Whether the device wants to be notified, i.e. it has not set `NO_NOTIFY`
    /// in the device area. Ringing the doorbell is the caller's job.
    ///
    /// # Errors
    ///
    /// - [`QueueError::EmptyChain`] - `list` has no segments
    /// - [`QueueError::NoFreeDescriptors`] - `list` needs more descriptors than are free
    ///
    /// Both are detected before anything is written; the queue is left untouched
    /// and `token` is dropped.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, level = "Trace"))]
    pub fn supply_buffer(
        &mut self,
        list: &ScatterList,
        buffer_type: BufferType,
        token: T,
    ) -> Result<bool, QueueError> {
        let needed = list.len();
        if needed == 0 {
            return Err(QueueError::EmptyChain);
        }

        if needed > self.num_free {
            return Err(QueueError::NoFreeDescriptors {
                needed,
                free: self.num_free,
            });
        }

        let head = self.free_head;
        match self.tokens.get(head as usize) {
            Some(None) => {}
            // The free chain points at a descriptor that is still outstanding.
            _ => return Err(QueueError::InvalidState),
        }

        let dir = DescFlags::from(buffer_type);
        let mut idx = head;
        let mut last_addr = 0;

        for (addr, len) in list.iter() {
            let desc_addr = self
                .desc_table
                .desc_addr(idx)
                .ok_or(QueueError::InvalidState)?;

            // Keep the free chain link; it becomes the chain link below.
            let next: u16 = self
                .mem
                .read_val(desc_addr + Descriptor::NEXT_OFFSET as u64)
                .map_err(|_| QueueError::MemError)?;

            Descriptor::new(addr, len, dir | DescFlags::NEXT, next)
                .write(&self.mem, desc_addr)
                .map_err(|_| QueueError::MemError)?;

            last_addr = desc_addr;
            idx = next;
        }

        // Terminate the chain
        self.mem
            .write_val(last_addr + Descriptor::FLAGS_OFFSET as u64, dir.bits())
            .map_err(|_| QueueError::MemError)?;

        self.avail
            .write_slot(&self.mem, self.avail_idx, head)
            .map_err(|_| QueueError::MemError)?;

        // Descriptors and ring slot must be visible before the index that covers them.
        self.mem.full_barrier();

        let avail_idx = self.avail_idx.wrapping_add(1);
        self.avail
            .publish_idx(&self.mem, avail_idx)
            .map_err(|_| QueueError::MemError)?;

        // The chain is now owned by the device.
        self.avail_idx = avail_idx;
        self.free_head = idx;
        self.num_free -= needed;
        self.tokens[head as usize] = Some(token);

        // Read the device's flags only after the increment is visible.
        self.mem.full_barrier();

        let device_flags = self
            .used
            .read_flags(&self.mem)
            .map_err(|_| QueueError::MemError)?;

        log::trace!(
            "supplied chain head={} descs={} avail_idx={} free={}",
            head,
            needed,
            avail_idx,
            self.num_free
        );

        Ok(!device_flags.contains(UsedFlags::NO_NOTIFY))
    }

    /// Whether the device has published completions not yet retrieved.
    pub fn new_data_available(&self) -> Result<bool, QueueError> {
        let used_idx = self
            .used
            .load_idx(&self.mem)
            .map_err(|_| QueueError::MemError)?;

        Ok(used_idx != self.used_tail)
    }

    /// Retrieve the next completed chain, if any.
    ///
    /// Returns the chain's token and the length the device reported, and returns
    /// every descriptor of the chain to the free chain. Completions are returned
    /// in the order the device published them.
    ///
    /// # Errors
    ///
    /// - [`QueueError::InvalidDescriptor`] - the device returned a head that is out
    ///   of range or not outstanding
    /// - [`QueueError::BadChain`] - the returned chain does not terminate; its
    ///   descriptors and token stay outstanding
    ///
    /// Both consume the offending used entry, so completions published after it
    /// are still retrieved by the next call.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, level = "Trace"))]
    pub fn get_buffer(&mut self) -> Result<Option<UsedBuffer<T>>, QueueError> {
        if !self.new_data_available()? {
            return Ok(None);
        }

        // Device writes to the used element happen before its index update.
        self.mem.full_barrier();

        let elem = self
            .used
            .read_elem(&self.mem, self.used_tail)
            .map_err(|_| QueueError::MemError)?;

        let head = match u16::try_from(elem.id) {
            Ok(head) if matches!(self.tokens.get(head as usize), Some(Some(_))) => head,
            _ => {
                log::warn!(
                    "device returned invalid chain head {} at used index {}",
                    elem.id,
                    self.used_tail
                );
                self.used_tail = self.used_tail.wrapping_add(1);
                return Err(QueueError::InvalidDescriptor(elem.id));
            }
        };

        let (count, last_addr) = match self.chain_extent(head) {
            Ok(extent) => extent,
            Err(QueueError::BadChain) => {
                log::warn!(
                    "chain at head {} does not terminate, used index {}",
                    head,
                    self.used_tail
                );
                self.used_tail = self.used_tail.wrapping_add(1);
                return Err(QueueError::BadChain);
            }
            Err(e) => return Err(e),
        };
        if self.num_free + count > self.len() {
            return Err(QueueError::InvalidState);
        }

        // Splice the chain in front of the free chain.
        self.mem
            .write_val(last_addr + Descriptor::NEXT_OFFSET as u64, self.free_head)
            .map_err(|_| QueueError::MemError)?;

        self.free_head = head;
        self.num_free += count;
        self.used_tail = self.used_tail.wrapping_add(1);

        let token = self.tokens[head as usize]
            .take()
            .ok_or(QueueError::InvalidState)?;

        log::trace!(
            "retrieved chain head={} descs={} len={} free={}",
            head,
            count,
            elem.len,
            self.num_free
        );

        Ok(Some(UsedBuffer {
            token,
            len: elem.len,
        }))
    }

    /// Retrieve and drop every pending completion.
    ///
    /// Tokens are dropped, which releases whatever they own. Returns the number of
    /// chains reclaimed; zero when nothing was pending.
    pub fn discard_used_buffers(&mut self) -> Result<usize, QueueError> {
        self.drain_used(|_, _| {})
    }

    /// Retrieve every pending completion, handing each token and length to `f`.
    ///
    /// Malformed used entries are logged and skipped, so everything the device
    /// published is drained. Backend memory errors stop the drain.
    pub fn drain_used<F: FnMut(T, u32)>(&mut self, mut f: F) -> Result<usize, QueueError> {
        let mut n = 0;
        loop {
            match self.get_buffer() {
                Ok(Some(used)) => {
                    f(used.token, used.len);
                    n += 1;
                }
                Ok(None) => return Ok(n),
                Err(QueueError::InvalidDescriptor(_) | QueueError::BadChain) => {}
                Err(e) => return Err(e),
            }
        }
    }

    /// Whether at least one descriptor is free.
    pub fn can_write(&self) -> bool {
        self.num_free > 0
    }

    /// Whether a list of `n` segments would fit.
    pub fn has_free_slots(&self, n: usize) -> bool {
        n <= self.num_free
    }

    /// Number of free descriptors.
    pub fn free_buffers(&self) -> usize {
        self.num_free
    }

    /// Number of descriptors not on the free chain.
    pub fn num_inflight(&self) -> usize {
        self.len() - self.num_free
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            num_free: self.num_free,
            num_inflight: self.num_inflight(),
        }
    }

    /// Ask the device to interrupt when it returns buffers.
    pub fn enable_interrupts(&mut self) -> Result<(), QueueError> {
        self.set_avail_flags(AvailFlags::empty())
    }

    /// Ask the device not to interrupt when it returns buffers.
    ///
    /// Only a hint: the device may still interrupt, and buffers already
    /// published are unaffected.
    pub fn disable_interrupts(&mut self) -> Result<(), QueueError> {
        self.set_avail_flags(AvailFlags::NO_INTERRUPT)
    }

    fn set_avail_flags(&mut self, flags: AvailFlags) -> Result<(), QueueError> {
        // Avoid redundant writes to shared memory
        if self.avail_flags_shadow == flags {
            return Ok(());
        }

        self.avail
            .write_flags(&self.mem, flags)
            .map_err(|_| QueueError::MemError)?;
        self.avail_flags_shadow = flags;
        Ok(())
    }

    /// Count the descriptors of the chain starting at `head` and return the
    /// address of its last descriptor.
    fn chain_extent(&self, head: u16) -> Result<(usize, u64), QueueError> {
        let mut idx = head;
        let mut count = 0;

        loop {
            let addr = self.desc_table.desc_addr(idx).ok_or(QueueError::BadChain)?;
            let desc = Descriptor::read(&self.mem, addr).map_err(|_| QueueError::MemError)?;
            count += 1;

            if !desc.has_next() {
                return Ok((count, addr));
            }

            if count >= self.len() {
                return Err(QueueError::BadChain);
            }

            idx = desc.next;
        }
    }

    /// Get descriptor table length
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.desc_table.len()
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn notify_offset(&self) -> u16 {
        self.notify_offset
    }

    /// Driver index as last published.
    pub fn driver_index(&self) -> u16 {
        self.avail_idx
    }

    /// Number of device ring entries consumed so far (modulo 2^16).
    pub fn used_tail(&self) -> u16 {
        self.used_tail
    }

    /// Get memory accessor reference
    pub fn mem(&self) -> &M {
        &self.mem
    }
}
