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

//! Scatter-gather lists.
//!
//! A logical I/O buffer may span physically discontiguous pages. A [`ScatterList`]
//! describes it as an ordered list of `(addr, len)` [`Segment`]s, one descriptor
//! per segment once supplied to a queue.

#[cfg(feature = "fuzzing")]
use arbitrary::Arbitrary;
use smallvec::SmallVec;

use super::desc::DescFlags;

/// Direction of a buffer from the device's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "fuzzing", derive(Arbitrary))]
pub enum BufferType {
    /// The device reads from the buffer.
    DeviceReadable,
    /// The device writes into the buffer.
    DeviceWritable,
}

impl From<BufferType> for DescFlags {
    fn from(ty: BufferType) -> Self {
        match ty {
            BufferType::DeviceReadable => DescFlags::empty(),
            BufferType::DeviceWritable => DescFlags::WRITE,
        }
    }
}

/// One physically contiguous piece of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "fuzzing", derive(Arbitrary))]
pub struct Segment {
    /// Physical address of the segment
    pub addr: u64,
    /// Length of the segment in bytes
    pub len: u32,
}

impl Segment {
    pub fn new(addr: u64, len: u32) -> Self {
        Self { addr, len }
    }
}

impl From<(u64, u32)> for Segment {
    fn from((addr, len): (u64, u32)) -> Self {
        Self { addr, len }
    }
}

/// An ordered list of segments making up one buffer.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScatterList {
    segments: SmallVec<[Segment; 16]>,
}

impl ScatterList {
    pub fn new() -> Self {
        Self::default()
    }

    /// A list with a single segment.
    pub fn single(addr: u64, len: u32) -> Self {
        let mut list = Self::new();
        list.push(addr, len);
        list
    }

    /// Split the physically contiguous range `[addr, addr + len)` at `page_size`
    /// boundaries, one segment per page touched.
    ///
    /// Returns an empty list when `len` is zero or `page_size` is not a power of two.
    /// A range running past the end of the address space is also empty.
    pub fn from_range(addr: u64, len: u64, page_size: u64) -> Self {
        let mut list = Self::new();
        if len == 0 || !page_size.is_power_of_two() {
            return list;
        }

        let Some(end) = addr.checked_add(len) else {
            return list;
        };
        let mut cur = addr;
        while cur < end {
            let page_end = (cur & !(page_size - 1)).saturating_add(page_size);
            let chunk = core::cmp::min(page_end, end) - cur;
            // segment lengths are u32
            let mut left = chunk;
            while left > 0 {
                let n = core::cmp::min(left, u32::MAX as u64);
                list.push(cur, n as u32);
                cur += n;
                left -= n;
            }
        }

        list
    }

    /// Append a segment.
    pub fn push(&mut self, addr: u64, len: u32) -> &mut Self {
        self.segments.push(Segment { addr, len });
        self
    }

    /// Number of segments, which is the number of descriptors the list occupies.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = (u64, u32)> + '_ {
        self.segments.iter().map(|s| (s.addr, s.len))
    }

    pub fn segments(&self) -> &[Segment] {
        self.segments.as_slice()
    }

    /// Sum of all segment lengths.
    pub fn total_len(&self) -> u64 {
        self.segments.iter().map(|s| s.len as u64).sum()
    }
}

impl<S: Into<Segment>> FromIterator<S> for ScatterList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            segments: iter.into_iter().map(Into::into).collect(),
        }
    }
}

impl<S: Into<Segment>> Extend<S> for ScatterList {
    fn extend<I: IntoIterator<Item = S>>(&mut self, iter: I) {
        self.segments.extend(iter.into_iter().map(Into::into));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_type_maps_to_write_bit() {
        assert_eq!(DescFlags::from(BufferType::DeviceReadable), DescFlags::empty());
        assert_eq!(DescFlags::from(BufferType::DeviceWritable), DescFlags::WRITE);
    }

    #[test]
    fn push_and_iterate_in_order() {
        let mut list = ScatterList::new();
        list.push(0x1000, 16).push(0x8000, 32);
        assert_eq!(list.len(), 2);
        assert_eq!(list.total_len(), 48);
        assert_eq!(
            list.iter().collect::<Vec<_>>(),
            vec![(0x1000, 16), (0x8000, 32)]
        );
    }

    #[test]
    fn from_range_splits_at_page_boundaries() {
        let list = ScatterList::from_range(0x1f00, 0x2200, 0x1000);
        assert_eq!(
            list.iter().collect::<Vec<_>>(),
            vec![(0x1f00, 0x100), (0x2000, 0x1000), (0x3000, 0x1000), (0x4000, 0x100)]
        );
        assert_eq!(list.total_len(), 0x2200);
    }

    #[test]
    fn from_range_within_one_page() {
        let list = ScatterList::from_range(0x1010, 0x20, 0x1000);
        assert_eq!(list.segments(), &[Segment::new(0x1010, 0x20)]);
    }

    #[test]
    fn from_range_degenerate_inputs_are_empty() {
        assert!(ScatterList::from_range(0x1000, 0, 0x1000).is_empty());
        assert!(ScatterList::from_range(0x1000, 16, 1000).is_empty());
    }

    #[test]
    fn from_range_past_address_space_is_empty() {
        assert!(ScatterList::from_range(u64::MAX - 0xff, 0x200, 0x1000).is_empty());

        // ending exactly at the top is fine
        let list = ScatterList::from_range(u64::MAX - 0xff, 0xff, 0x1000);
        assert_eq!(list.segments(), &[Segment::new(u64::MAX - 0xff, 0xff)]);
    }

    #[test]
    fn collect_from_pairs() {
        let list: ScatterList = [(0x10u64, 1u32), (0x20, 2)].into_iter().collect();
        assert_eq!(list.segments()[1], Segment::new(0x20, 2));
        assert_eq!(ScatterList::single(0x30, 3).len(), 1);
    }
}
