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

//! Split Virtqueue Transport
//!
//! This crate implements the driver side of the VIRTIO split virtqueue: the
//! descriptor table, the driver (available) ring, the device (used) ring and the
//! free descriptor chain shared with a device running in another context.
//!
//! # Architecture
//!
//! - **Transport** ([`SplitQueue`]): supplies scatter-gather buffers to the device
//!   and retrieves completions together with the token each buffer was supplied
//!   with. This is the API device drivers use.
//!
//! - **Device side** ([`DeviceQueue`]): the other half of the protocol, for device
//!   emulation and tests.
//!
//! - **Shared handle** ([`QueueHandle`]): a locked queue plus an injected
//!   [`Notifier`] doorbell, for drivers submitting from several threads.
//!
//! - **Memory** ([`MemOps`], [`RegionProvider`]): how queue memory is allocated and
//!   accessed. [`HeapMem`] implements both over a heap allocation.
//!
//! - **Raw types** ([`Descriptor`], [`UsedElem`], [`Layout`]): the wire layout.
//!
//! # Quick Start
//!
//! ```ignore
//! let mut queue = SplitQueue::new(QueueConfig::new(256), &frames, mem)?;
//!
//! let request = ScatterList::from_range(buf_phys, buf_len, PAGE_SIZE as u64);
//! if queue.supply_buffer(&request, BufferType::DeviceWritable, request_id)? {
//!     doorbell.notify(queue.notify_offset(), queue.stats());
//! }
//!
//! // ... interrupt or poll ...
//! while let Some(done) = queue.get_buffer()? {
//!     complete(done.token, done.len);
//! }
//! ```

#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::panic))]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::expect_used))]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::unwrap_used))]
// We use Arbitrary during fuzzing, which requires std
#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub const PAGE_SIZE: usize = 0x1_000; // 4KB

// Ring structures are accessed as native Pod values.
#[cfg(target_endian = "big")]
compile_error!("split-virtq supports little-endian targets only");

extern crate alloc;

mod access;
mod config;
mod desc;
mod device;
mod layout;
mod queue;
mod region;
mod ring;
mod sg;
mod shared;

pub use access::*;
pub use config::*;
pub use desc::*;
pub use device::*;
pub use layout::*;
pub use queue::*;
pub use region::*;
pub use ring::*;
pub use sg::*;
pub use shared::*;
