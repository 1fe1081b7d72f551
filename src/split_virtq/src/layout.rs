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

use super::desc::Descriptor;
use super::ring::{AvailRing, UsedElem, UsedRing};
use super::{QueueConfig, QueueError};

/// Page size used to separate the device area in legacy layouts.
pub const LEGACY_ALIGN: usize = crate::PAGE_SIZE;

/// Layout of a split virtqueue in shared memory.
///
/// # Memory Layout
///
/// The three areas live in one contiguous region:
///
/// | Area       | Alignment | Size                 |
/// |------------|-----------|----------------------|
/// | Descriptor | 16        | 16 * queue_size      |
/// | Driver     | 2         | 6 + 2 * queue_size   |
/// | Device     | 4         | 6 + 8 * queue_size   |
///
/// Legacy devices expect the device area to start on a new page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Layout {
    /// Descriptor table base in shared memory.
    pub desc_table_addr: u64,
    /// Driver (available) ring base in shared memory.
    pub avail_addr: u64,
    /// Device (used) ring base in shared memory.
    pub used_addr: u64,
    /// Number of descriptors.
    pub queue_size: u16,
}

#[inline]
const fn align_up(val: usize, align: usize) -> usize {
    (val + align - 1) & !(align - 1)
}

#[derive(Clone, Copy)]
struct Offsets {
    avail: usize,
    used: usize,
    end: usize,
}

const fn offsets(queue_size: usize, legacy: bool) -> Offsets {
    let desc_size = queue_size * Descriptor::SIZE;
    let avail = align_up(desc_size, AvailRing::ALIGN);
    let avail_end = avail + AvailRing::size(queue_size);
    let used = if legacy {
        align_up(avail_end, LEGACY_ALIGN)
    } else {
        align_up(avail_end, UsedRing::ALIGN)
    };

    Offsets {
        avail,
        used,
        end: used + UsedRing::size(queue_size),
    }
}

impl Layout {
    /// Alignment the region base must satisfy.
    pub const ALIGN: usize = Descriptor::ALIGN;

    /// Compute the layout of a queue with `queue_size` descriptors placed at `base`.
    ///
    /// The region starting at `base` must be at least
    /// [`query_size`](Self::query_size) bytes.
    pub fn from_base(base: u64, queue_size: NonZeroU16, legacy: bool) -> Result<Self, QueueError> {
        if !base.is_multiple_of(Self::base_align(legacy) as u64) {
            return Err(QueueError::InvalidLayout);
        }

        let off = offsets(queue_size.get() as usize, legacy);

        Ok(Self {
            desc_table_addr: base,
            avail_addr: base + off.avail as u64,
            used_addr: base + off.used as u64,
            queue_size: queue_size.get(),
        })
    }

    /// Alignment of the region base; legacy layouts are page aligned so the
    /// device area lands on a page boundary.
    pub const fn base_align(legacy: bool) -> usize {
        if legacy { LEGACY_ALIGN } else { Self::ALIGN }
    }

    /// Compute the layout described by `config` at `base`.
    pub fn for_config(base: u64, config: &QueueConfig) -> Result<Self, QueueError> {
        let size = config.validate()?;
        Self::from_base(base, size, config.legacy)
    }

    /// Memory needed for a ring with `queue_size` descriptors,
    /// accounting for alignment requirements.
    pub const fn query_size(queue_size: usize, legacy: bool) -> usize {
        offsets(queue_size, legacy).end
    }

    /// Check that the three areas are aligned, ordered and do not overlap.
    ///
    /// Layouts built by [`from_base`](Self::from_base) always pass; hand-built ones
    /// may not.
    pub fn validate(&self) -> Result<NonZeroU16, QueueError> {
        let size = QueueConfig::new(self.queue_size).validate()?;
        let n = size.get() as u64;

        let aligned = self.desc_table_addr.is_multiple_of(Self::ALIGN as u64)
            && self.avail_addr.is_multiple_of(AvailRing::ALIGN as u64)
            && self.used_addr.is_multiple_of(UsedRing::ALIGN as u64);
        if !aligned {
            return Err(QueueError::InvalidLayout);
        }

        let desc_end = self
            .desc_table_addr
            .checked_add(n * Descriptor::SIZE as u64)
            .ok_or(QueueError::InvalidLayout)?;
        let avail_end = self
            .avail_addr
            .checked_add(AvailRing::size(n as usize) as u64)
            .ok_or(QueueError::InvalidLayout)?;
        let used_end = self
            .used_addr
            .checked_add(UsedRing::size(n as usize) as u64);

        if self.avail_addr < desc_end || self.used_addr < avail_end || used_end.is_none() {
            return Err(QueueError::InvalidLayout);
        }

        Ok(size)
    }

    /// Total bytes spanned by this layout.
    pub fn span(&self) -> Result<usize, QueueError> {
        let head = self
            .used_addr
            .checked_sub(self.desc_table_addr)
            .ok_or(QueueError::InvalidLayout)?;
        let total = head
            .checked_add(UsedRing::size(self.queue_size as usize) as u64)
            .ok_or(QueueError::InvalidLayout)?;

        usize::try_from(total).map_err(|_| QueueError::InvalidLayout)
    }
}

const _: () = assert!(UsedElem::SIZE == 8);

#[cfg(test)]
mod tests {
    use super::*;

    fn size(n: u16) -> NonZeroU16 {
        NonZeroU16::new(n).unwrap()
    }

    #[test]
    fn modern_layout_offsets() {
        let layout = Layout::from_base(0x10000, size(4), false).unwrap();
        assert_eq!(layout.desc_table_addr, 0x10000);
        // 4 descriptors of 16 bytes
        assert_eq!(layout.avail_addr, 0x10000 + 64);
        // driver area is 6 + 2 * 4 = 14 bytes, rounded up to 4
        assert_eq!(layout.used_addr, 0x10000 + 64 + 16);
        assert_eq!(Layout::query_size(4, false), 64 + 16 + 6 + 8 * 4);
        assert_eq!(layout.span().unwrap(), Layout::query_size(4, false));
        assert!(layout.validate().is_ok());
    }

    #[test]
    fn legacy_layout_puts_device_area_on_next_page() {
        let layout = Layout::from_base(0x20000, size(256), true).unwrap();
        assert_eq!(layout.avail_addr, 0x20000 + 4096);
        // 4096 + 6 + 512 rounds up to 8192
        assert_eq!(layout.used_addr, 0x20000 + 8192);
        assert_eq!(Layout::query_size(256, true), 8192 + 6 + 8 * 256);
    }

    #[test]
    fn misaligned_base_rejected() {
        assert!(matches!(
            Layout::from_base(0x1008, size(8), false),
            Err(QueueError::InvalidLayout)
        ));
    }

    #[test]
    fn legacy_base_must_be_page_aligned() {
        assert!(matches!(
            Layout::from_base(0x1010, size(8), true),
            Err(QueueError::InvalidLayout)
        ));
        assert_eq!(Layout::base_align(true), crate::PAGE_SIZE);
        assert_eq!(LEGACY_ALIGN, crate::HeapMem::ALIGN);
        assert_eq!(Layout::base_align(false), 16);
    }

    #[test]
    fn hand_built_layouts_are_checked() {
        let good = Layout::from_base(0x10000, size(4), false).unwrap();
        assert_eq!(good.validate().unwrap().get(), 4);

        // device area placed before the descriptor table
        let reversed = Layout {
            desc_table_addr: 0x11000,
            avail_addr: 0x11040,
            used_addr: 0x10000,
            queue_size: 4,
        };
        assert!(matches!(reversed.validate(), Err(QueueError::InvalidLayout)));
        assert!(matches!(reversed.span(), Err(QueueError::InvalidLayout)));

        // driver area overlapping the descriptor table
        let overlap = Layout {
            avail_addr: good.desc_table_addr + 32,
            ..good
        };
        assert!(matches!(overlap.validate(), Err(QueueError::InvalidLayout)));

        // device area overlapping the driver area
        let overlap = Layout {
            used_addr: good.avail_addr + 4,
            ..good
        };
        assert!(matches!(overlap.validate(), Err(QueueError::InvalidLayout)));

        let misaligned = Layout {
            used_addr: good.used_addr + 2,
            ..good
        };
        assert!(matches!(misaligned.validate(), Err(QueueError::InvalidLayout)));

        let odd_size = Layout {
            queue_size: 3,
            ..good
        };
        assert!(matches!(odd_size.validate(), Err(QueueError::InvalidSize(3))));
    }

    #[test]
    fn for_config_validates_size() {
        let cfg = QueueConfig::new(12);
        assert!(matches!(
            Layout::for_config(0x1000, &cfg),
            Err(QueueError::InvalidSize(12))
        ));

        let cfg = QueueConfig::new(16);
        let layout = Layout::for_config(0x1000, &cfg).unwrap();
        assert_eq!(layout.queue_size, 16);
    }
}
