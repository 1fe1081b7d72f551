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

#![no_main]

use std::sync::Arc;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use split_virtq::{
    BufferType, DeviceQueue, HeapMem, MemOps, QueueConfig, QueueError, ScatterList, Segment,
    SplitQueue, UsedElem, UsedRing,
};

const BASE: u64 = 0x10_0000;
const MEM_SIZE: usize = 2 * 1024 * 1024;

#[derive(Arbitrary, Debug)]
enum Op {
    Supply {
        segments: Vec<Segment>,
        buffer_type: BufferType,
    },
    /// Well-behaved device returns the next available chain.
    Complete { written: u32 },
    /// Misbehaving device publishes an arbitrary head.
    Corrupt { id: u32, len: u32 },
    Retrieve,
    Discard,
    SetInterrupts(bool),
    SuppressNotify(bool),
}

#[derive(Arbitrary, Debug)]
struct FuzzInput {
    config: QueueConfig,
    ops: Vec<Op>,
}

fuzz_target!(|input: FuzzInput| {
    let Ok(mem) = HeapMem::new(BASE, MEM_SIZE) else {
        return;
    };
    let mem = Arc::new(mem);

    let mut queue: SplitQueue<_, usize> =
        match SplitQueue::new(input.config, &*mem, mem.clone()) {
            Ok(queue) => queue,
            Err(QueueError::InvalidSize(_)) => {
                assert!(input.config.validate().is_err());
                return;
            }
            Err(e) => panic!("unexpected construction error: {e}"),
        };

    let mut device = DeviceQueue::new(queue.layout(), mem.clone()).unwrap();
    let layout = queue.layout();
    let used = UsedRing::new(layout.used_addr, layout.queue_size);

    for (n, op) in input.ops.into_iter().enumerate() {
        let free = queue.free_buffers();

        match op {
            Op::Supply {
                segments,
                buffer_type,
            } => {
                let list: ScatterList = segments.iter().map(|s| (s.addr, s.len)).collect();
                match queue.supply_buffer(&list, buffer_type, n) {
                    Ok(_) => assert_eq!(queue.free_buffers(), free - list.len()),
                    Err(QueueError::EmptyChain) => assert!(list.is_empty()),
                    Err(QueueError::NoFreeDescriptors { needed, .. }) => {
                        assert!(needed > free);
                        assert_eq!(queue.free_buffers(), free);
                    }
                    Err(e) => panic!("unexpected supply error: {e}"),
                }
            }
            Op::Complete { written } => {
                if let Ok(Some(chain)) = device.poll_available() {
                    device.submit_used(chain.head, written).unwrap();
                }
            }
            Op::Corrupt { id, len } => {
                let idx = used.load_idx(&*mem).unwrap();
                used.write_elem(&*mem, idx, UsedElem { id, len }).unwrap();
                mem.store_release(used.idx_addr(), idx.wrapping_add(1)).unwrap();
                // keep the device side in step with the forged entry
                device = DeviceQueue::new(layout, mem.clone()).unwrap();
            }
            Op::Retrieve => match queue.get_buffer() {
                Ok(Some(_)) => assert!(queue.free_buffers() > free),
                Ok(None) | Err(_) => assert_eq!(queue.free_buffers(), free),
            },
            Op::Discard => {
                let _ = queue.discard_used_buffers();
            }
            Op::SetInterrupts(enable) => {
                if enable {
                    queue.enable_interrupts().unwrap();
                } else {
                    queue.disable_interrupts().unwrap();
                }
            }
            Op::SuppressNotify(suppress) => device.suppress_notifications(suppress).unwrap(),
        }

        assert!(queue.free_buffers() <= queue.len());
        assert_eq!(queue.free_buffers() + queue.num_inflight(), queue.len());
    }
});
