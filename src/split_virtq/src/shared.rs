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

//! A queue shared between driver threads.
//!
//! [`SplitQueue`] is single-producer: every mutating call takes `&mut self`.
//! Drivers that submit from several contexts wrap it in a [`QueueHandle`], which
//! serializes access with a spinlock and rings the device's doorbell through an
//! injected [`Notifier`] once the lock is released.

use alloc::vec::Vec;

use spin::{Mutex, MutexGuard};

use super::{BufferType, MemOps, QueueError, QueueStats, ScatterList, SplitQueue, UsedBuffer};

/// Doorbell used to tell the device about new buffers.
///
/// The transport never touches device registers itself; the device driver that
/// owns the notification register implements this.
pub trait Notifier {
    /// Notify the device that buffers were made available on the queue
    /// registered at `notify_offset`.
    fn notify(&self, notify_offset: u16, stats: QueueStats);
}

impl<F: Fn(u16, QueueStats)> Notifier for F {
    fn notify(&self, notify_offset: u16, stats: QueueStats) {
        self(notify_offset, stats)
    }
}

/// A [`SplitQueue`] behind a spinlock, plus the doorbell to its device.
pub struct QueueHandle<M, T, N> {
    queue: Mutex<SplitQueue<M, T>>,
    notifier: N,
    notify_offset: u16,
}

impl<M, T, N> QueueHandle<M, T, N>
where
    M: MemOps,
    N: Notifier,
{
    pub fn new(queue: SplitQueue<M, T>, notifier: N) -> Self {
        let notify_offset = queue.notify_offset();
        Self {
            queue: Mutex::new(queue),
            notifier,
            notify_offset,
        }
    }

    /// Supply a buffer and ring the doorbell if the device asked for it.
    ///
    /// Returns whether the device was notified.
    pub fn submit(
        &self,
        list: &ScatterList,
        buffer_type: BufferType,
        token: T,
    ) -> Result<bool, QueueError> {
        let (notify, stats) = {
            let mut queue = self.queue.lock();
            let notify = queue.supply_buffer(list, buffer_type, token)?;
            (notify, queue.stats())
        };

        if notify {
            self.notifier.notify(self.notify_offset, stats);
        }

        Ok(notify)
    }

    /// Ring the doorbell unconditionally, e.g. after a batch supplied through [`lock`](Self::lock).
    pub fn notify(&self) {
        let stats = self.queue.lock().stats();
        self.notifier.notify(self.notify_offset, stats);
    }

    /// Retrieve the next completion, if any.
    pub fn poll(&self) -> Result<Option<UsedBuffer<T>>, QueueError> {
        self.queue.lock().get_buffer()
    }

    /// Retrieve all pending completions and hand them to `f` after the lock is released.
    pub fn drain<F: FnMut(T, u32)>(&self, mut f: F) -> Result<usize, QueueError> {
        let mut done = Vec::new();
        let res = self
            .queue
            .lock()
            .drain_used(|token, len| done.push((token, len)));

        // Completions retrieved before an error are still delivered.
        let n = done.len();
        for (token, len) in done {
            f(token, len);
        }

        res.map(|_| n)
    }

    /// Drop all pending completions.
    pub fn discard(&self) -> Result<usize, QueueError> {
        self.queue.lock().discard_used_buffers()
    }

    pub fn can_write(&self) -> bool {
        self.queue.lock().can_write()
    }

    pub fn new_data_available(&self) -> Result<bool, QueueError> {
        self.queue.lock().new_data_available()
    }

    pub fn enable_interrupts(&self) -> Result<(), QueueError> {
        self.queue.lock().enable_interrupts()
    }

    pub fn disable_interrupts(&self) -> Result<(), QueueError> {
        self.queue.lock().disable_interrupts()
    }

    pub fn stats(&self) -> QueueStats {
        self.queue.lock().stats()
    }

    /// Lock the queue for a batch of operations.
    pub fn lock(&self) -> MutexGuard<'_, SplitQueue<M, T>> {
        self.queue.lock()
    }

    pub fn into_inner(self) -> SplitQueue<M, T> {
        self.queue.into_inner()
    }
}
