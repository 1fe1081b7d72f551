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

use core::num::NonZeroU16;

#[cfg(feature = "fuzzing")]
use arbitrary::Arbitrary;

use super::QueueError;

/// Largest queue a split ring can describe.
pub const MAX_QUEUE_SIZE: u16 = 32768;

/// Parameters a queue is created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "fuzzing", derive(Arbitrary))]
pub struct QueueConfig {
    /// Number of descriptors. Must be a power of two no larger than [`MAX_QUEUE_SIZE`].
    pub size: u16,
    /// Offset the doorbell writes to when notifying the device about this queue.
    pub notify_offset: u16,
    /// Place the device area on its own page, as legacy devices require.
    pub legacy: bool,
}

impl QueueConfig {
    pub const DEFAULT_SIZE: u16 = 256;

    pub fn new(size: u16) -> Self {
        Self {
            size,
            notify_offset: 0,
            legacy: false,
        }
    }

    pub fn with_notify_offset(mut self, notify_offset: u16) -> Self {
        self.notify_offset = notify_offset;
        self
    }

    pub fn with_legacy(mut self, legacy: bool) -> Self {
        self.legacy = legacy;
        self
    }

    /// Check the queue size and return it as a non-zero value.
    pub fn validate(&self) -> Result<NonZeroU16, QueueError> {
        let size = NonZeroU16::new(self.size).ok_or(QueueError::InvalidSize(self.size))?;

        if !size.is_power_of_two() || size.get() > MAX_QUEUE_SIZE {
            return Err(QueueError::InvalidSize(self.size));
        }

        Ok(size)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SIZE)
    }
}
