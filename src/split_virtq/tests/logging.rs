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

use std::sync::Arc;

use log::Level;
use split_virtq::{
    BufferType, HeapMem, MemOps, QueueConfig, ScatterList, SplitQueue, UsedElem, UsedRing,
};
use split_virtq_testing::simplelogger::{LOGGER, SimpleLogger};

const BASE: u64 = 0x20_0000;

// All checks live in one test: the logger is process global.
#[test]
fn queue_lifecycle_is_logged() {
    SimpleLogger::initialize_test_logger();
    LOGGER.clear_log_calls();

    let mem = Arc::new(HeapMem::new(BASE, 0x4000).unwrap());
    let mut queue: SplitQueue<_, u32> =
        SplitQueue::new(QueueConfig::new(8), &*mem, mem.clone()).unwrap();

    let init = LOGGER.calls_at(Level::Debug);
    assert_eq!(init.len(), 1);
    assert!(init[0].args.contains("size=8"));
    assert!(init[0].target.starts_with("split_virtq"));
    LOGGER.clear_log_calls();

    queue
        .supply_buffer(&ScatterList::single(0x1000, 64), BufferType::DeviceReadable, 1)
        .unwrap();
    LOGGER.test_log_records(|calls| {
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].level, Level::Trace);
        assert!(calls[0].args.contains("head=0"));
    });

    // A device handing back a head it never received is reported once.
    let layout = queue.layout();
    let used = UsedRing::new(layout.used_addr, layout.queue_size);
    used.write_elem(&*mem, 0, UsedElem { id: 5, len: 0 }).unwrap();
    mem.store_release(used.idx_addr(), 1u16).unwrap();

    assert!(queue.get_buffer().is_err());
    let warnings = LOGGER.calls_at(Level::Warn);
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].args.contains("invalid chain head 5"));
    assert_eq!(LOGGER.get_log_call(0).map(|c| c.level), Some(Level::Warn));
    assert_eq!(LOGGER.num_log_calls(), 1);
    LOGGER.clear_log_calls();
}
