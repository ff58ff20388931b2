// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::common::types::UniqueId;
use crate::flintrocks_logging::debug;
use crate::runtime::batch::RawBatch;
use crate::runtime::blocking_deque::BlockingDeque;
use crate::runtime::fragment_context::FragmentContext;
use crate::runtime::read_controller::ReadController;

/// Queue length below which reads are resumed after sender-side memory
/// pressure.
const OOM_RESUME_QUEUE_LEN: usize = 10;

/// Consumer-side surface of an incoming buffer: the operator pulling
/// batches depends on this seam, not on the concrete buffer.
pub trait IncomingBatchProvider {
    /// Next batch in arrival order, blocking while the buffer is live and
    /// empty. `None` means the stream is over: either the buffer finished
    /// and drained, or the wait was cancelled.
    fn get_next(&self) -> Option<RawBatch>;

    /// Forced teardown: drain the queue and release every remaining
    /// payload.
    ///
    /// Caller-enforced precondition: the producing side has already
    /// stopped enqueuing. A batch racing the drain is handed out to
    /// exactly one of the two paths either way, but may survive the
    /// drain.
    fn kill(&self, context: &FragmentContext);

    /// Release resources beyond the queue itself.
    fn cleanup(&self);
}

/// Flow-controlled handoff buffer between a network-receiving producer
/// and one consuming operator.
///
/// The queue itself is unbounded; memory growth is bounded heuristically
/// by toggling inbound reads through the [`ReadController`] when the
/// queue length crosses the soft limit, and re-enabling them once the
/// consumer has drained it back to the start limit. Sender-side
/// out-of-memory markers jump the queue and force a global read stop
/// until the backlog is nearly gone.
///
/// Exactly one producer thread calls [`enqueue`](Self::enqueue) and
/// exactly one consumer thread calls
/// [`get_next`](IncomingBatchProvider::get_next). The flags are
/// deliberately plain atomics rather than a shared lock: the thresholds
/// are approximations, and a race that admits a few extra batches past
/// the soft limit is acceptable.
pub struct RawBatchBuffer {
    finst_id: UniqueId,
    buffer: BlockingDeque<RawBatch>,
    finished: AtomicBool,
    softlimit: usize,
    startlimit: usize,
    overlimit: AtomicBool,
    out_of_memory: AtomicBool,
    read_controller: Arc<dyn ReadController>,
    multi_sender: bool,
}

/// Point-in-time view of the buffer state, for logs and tests.
#[derive(Clone, Debug)]
pub struct RawBatchBufferSnapshot {
    pub queued_batches: usize,
    pub finished: bool,
    pub overlimit: bool,
    pub out_of_memory: bool,
}

impl RawBatchBuffer {
    pub fn new(
        context: &FragmentContext,
        read_controller: Arc<dyn ReadController>,
        sender_count: usize,
    ) -> Self {
        let buffer_size_per_sender = context.incoming_buffer_size();
        let softlimit = buffer_size_per_sender * sender_count;
        let startlimit = (softlimit / 2).max(1);
        debug!(
            "incoming buffer created: finst={} senders={} softlimit={} startlimit={}",
            context.fragment_instance_id(),
            sender_count,
            softlimit,
            startlimit
        );
        Self {
            finst_id: context.fragment_instance_id(),
            buffer: BlockingDeque::new(),
            finished: AtomicBool::new(false),
            softlimit,
            startlimit,
            overlimit: AtomicBool::new(false),
            out_of_memory: AtomicBool::new(false),
            read_controller,
            multi_sender: sender_count > 1,
        }
    }

    pub fn soft_limit(&self) -> usize {
        self.softlimit
    }

    pub fn start_limit(&self) -> usize {
        self.startlimit
    }

    /// Route a read toggle: per-sender when several senders share the
    /// buffer, global when there is only one.
    fn set_read(&self, sender_id: i32, enabled: bool) {
        if self.multi_sender {
            self.read_controller.set_sender_auto_read(sender_id, enabled);
        } else {
            self.read_controller.set_auto_read(enabled);
        }
    }

    /// Producer-side entry point. Never blocks.
    ///
    /// Out-of-memory markers bypass the tail: reading is stopped globally
    /// and the marker is inserted at the front so the consumer sees it
    /// before the backlog, unless an equivalent marker is already
    /// pending.
    pub fn enqueue(&self, batch: RawBatch) {
        if batch.header().is_out_of_memory {
            debug!(
                "incoming buffer OOM marker: finst={} sender={} autoread=false",
                self.finst_id,
                batch.header().sending_sender_id
            );
            self.read_controller.set_auto_read(false);
            let marker_pending = self
                .buffer
                .peek_front(|front| front.is_some_and(|b| b.header().is_out_of_memory));
            if !self.out_of_memory.load(Ordering::Acquire) && !marker_pending {
                self.buffer.push_front(batch);
            }
            self.out_of_memory.store(true, Ordering::Release);
            return;
        }

        let sending_sender_id = batch.header().sending_sender_id;
        self.buffer.push_back(batch);
        if self.buffer.len() == self.softlimit {
            self.overlimit.store(true, Ordering::Release);
            debug!(
                "incoming buffer over soft limit: finst={} softlimit={} autoread=false",
                self.finst_id, self.softlimit
            );
            self.set_read(sending_sender_id, false);
        }
    }

    /// Terminal signal: no further batches will arrive. One-way. A
    /// consumer blocked on an empty queue is woken and observes the
    /// drain-then-`None` behavior.
    pub fn finished(&self) {
        self.finished.store(true, Ordering::Release);
        self.buffer.unblock();
    }

    pub fn snapshot(&self) -> RawBatchBufferSnapshot {
        RawBatchBufferSnapshot {
            queued_batches: self.buffer.len(),
            finished: self.finished.load(Ordering::Acquire),
            overlimit: self.overlimit.load(Ordering::Acquire),
            out_of_memory: self.out_of_memory.load(Ordering::Acquire),
        }
    }
}

impl IncomingBatchProvider for RawBatchBuffer {
    fn get_next(&self) -> Option<RawBatch> {
        if self.out_of_memory.load(Ordering::Acquire) && self.buffer.len() < OOM_RESUME_QUEUE_LEN {
            debug!(
                "incoming buffer OOM recovered: finst={} autoread=true",
                self.finst_id
            );
            self.out_of_memory.store(false, Ordering::Release);
            self.read_controller.set_auto_read(true);
        }

        let mut batch = self.buffer.try_pop_front();

        // Nothing buffered and more may arrive: wait. A cancelled wait
        // surfaces as the terminal `None`.
        if batch.is_none() && !self.finished.load(Ordering::Acquire) {
            batch = self.buffer.take_front();
        }

        let batch = batch?;

        if batch.header().is_out_of_memory {
            self.out_of_memory.store(true, Ordering::Release);
            self.read_controller.set_auto_read(false);
            return Some(batch);
        }

        if !self.finished.load(Ordering::Acquire)
            && self.overlimit.load(Ordering::Acquire)
            && self.buffer.len() == self.startlimit
        {
            self.overlimit.store(false, Ordering::Release);
            debug!(
                "incoming buffer drained to start limit: finst={} startlimit={} autoread=true",
                self.finst_id, self.startlimit
            );
            // The routed call targets the sender that was throttled; the
            // global call broadens the resume to every connection.
            self.set_read(batch.header().sending_sender_id, true);
            self.read_controller.set_auto_read(true);
        }

        Some(batch)
    }

    fn kill(&self, context: &FragmentContext) {
        self.buffer.unblock();
        let mut batches = 0usize;
        let mut bytes = 0usize;
        while let Some(batch) = self.buffer.try_pop_front() {
            batches += 1;
            bytes += batch.release();
        }
        if batches != 0 {
            debug!(
                "incoming buffer killed: finst={} released_batches={} released_bytes={}",
                context.fragment_instance_id(),
                batches,
                bytes
            );
        }
    }

    fn cleanup(&self) {
        // The queue is the only resource this buffer owns.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::batch::{BatchBody, BatchHeader};
    use bytes::Bytes;
    use std::sync::Mutex;
    use std::thread;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum ReadEvent {
        Global(bool),
        Sender(i32, bool),
    }

    #[derive(Default)]
    struct RecordingController {
        events: Mutex<Vec<ReadEvent>>,
    }

    impl RecordingController {
        fn events(&self) -> Vec<ReadEvent> {
            self.events.lock().expect("events lock").clone()
        }
    }

    impl ReadController for RecordingController {
        fn set_auto_read(&self, enabled: bool) {
            self.events
                .lock()
                .expect("events lock")
                .push(ReadEvent::Global(enabled));
        }

        fn set_sender_auto_read(&self, sender_id: i32, enabled: bool) {
            self.events
                .lock()
                .expect("events lock")
                .push(ReadEvent::Sender(sender_id, enabled));
        }
    }

    fn data_batch(sender_id: i32) -> RawBatch {
        RawBatch::new(
            BatchHeader {
                is_out_of_memory: false,
                sending_sender_id: sender_id,
            },
            BatchBody::new(Bytes::from_static(b"payload")),
        )
    }

    fn buffer_with(
        buffer_size: usize,
        sender_count: usize,
    ) -> (RawBatchBuffer, Arc<RecordingController>, FragmentContext) {
        let controller = Arc::new(RecordingController::default());
        let ctx = FragmentContext::with_incoming_buffer_size(UniqueId::new(7, 7), buffer_size);
        let reads: Arc<dyn ReadController> = controller.clone();
        let buffer = RawBatchBuffer::new(&ctx, reads, sender_count);
        (buffer, controller, ctx)
    }

    #[test]
    fn limits_derive_from_buffer_size_and_sender_count() {
        let (buffer, _, _) = buffer_with(10, 2);
        assert_eq!(buffer.soft_limit(), 20);
        assert_eq!(buffer.start_limit(), 10);

        let (tiny, _, _) = buffer_with(1, 1);
        assert_eq!(tiny.soft_limit(), 1);
        assert_eq!(tiny.start_limit(), 1);
    }

    #[test]
    fn soft_limit_disables_reads_exactly_once_single_sender() {
        let (buffer, controller, _ctx) = buffer_with(20, 1);
        for i in 0..20 {
            assert_eq!(controller.events().len(), 0, "no toggle before batch {i}");
            buffer.enqueue(data_batch(0));
        }
        // Single-sender mode routes the disable through the global call.
        assert_eq!(controller.events(), vec![ReadEvent::Global(false)]);
        assert!(buffer.snapshot().overlimit);
    }

    #[test]
    fn soft_limit_disables_reads_per_sender_in_multi_sender_mode() {
        let (buffer, controller, _ctx) = buffer_with(2, 2);
        buffer.enqueue(data_batch(0));
        buffer.enqueue(data_batch(1));
        buffer.enqueue(data_batch(0));
        buffer.enqueue(data_batch(1));
        assert_eq!(controller.events(), vec![ReadEvent::Sender(1, false)]);
    }

    #[test]
    fn start_limit_reenables_reads_on_exact_transition() {
        let (buffer, controller, _ctx) = buffer_with(20, 1);
        for _ in 0..20 {
            buffer.enqueue(data_batch(0));
        }
        assert_eq!(controller.events(), vec![ReadEvent::Global(false)]);

        // Draining from 20 down: re-enable fires when 10 remain, not before.
        for remaining in (10..20).rev() {
            let batch = buffer.get_next().expect("batch");
            drop(batch);
            if remaining > 10 {
                assert_eq!(
                    controller.events().len(),
                    1,
                    "no re-enable at queue length {remaining}"
                );
            }
        }
        assert_eq!(
            controller.events(),
            vec![
                ReadEvent::Global(false),
                // Routed call plus the deliberate global broadening.
                ReadEvent::Global(true),
                ReadEvent::Global(true),
            ]
        );
        assert!(!buffer.snapshot().overlimit);
    }

    #[test]
    fn start_limit_recovery_issues_sender_and_global_calls() {
        let (buffer, controller, _ctx) = buffer_with(2, 2);
        for _ in 0..2 {
            buffer.enqueue(data_batch(3));
            buffer.enqueue(data_batch(4));
        }
        assert_eq!(controller.events(), vec![ReadEvent::Sender(4, false)]);

        // soft=4, start=2: the second retrieval lands on the start limit.
        let first = buffer.get_next().expect("batch");
        assert_eq!(controller.events().len(), 1);
        let second = buffer.get_next().expect("batch");
        assert_eq!(
            controller.events(),
            vec![
                ReadEvent::Sender(4, false),
                ReadEvent::Sender(second.header().sending_sender_id, true),
                ReadEvent::Global(true),
            ]
        );
        drop(first);
    }

    #[test]
    fn oom_marker_jumps_queue_and_dedups() {
        let (buffer, controller, _ctx) = buffer_with(20, 1);
        buffer.enqueue(data_batch(0));
        buffer.enqueue(data_batch(0));

        buffer.enqueue(RawBatch::oom_marker(0));
        assert!(buffer.snapshot().out_of_memory);
        assert_eq!(buffer.snapshot().queued_batches, 3);
        assert_eq!(controller.events(), vec![ReadEvent::Global(false)]);

        // A second marker while one is pending is dropped, but still
        // stops reads again.
        buffer.enqueue(RawBatch::oom_marker(0));
        assert_eq!(buffer.snapshot().queued_batches, 3);
        assert_eq!(
            controller.events(),
            vec![ReadEvent::Global(false), ReadEvent::Global(false)]
        );

        let front = buffer.get_next().expect("front batch");
        assert!(front.header().is_out_of_memory);
    }

    #[test]
    fn oom_marker_into_empty_buffer_is_queued() {
        let (buffer, _controller, _ctx) = buffer_with(20, 1);
        buffer.enqueue(RawBatch::oom_marker(0));
        assert_eq!(buffer.snapshot().queued_batches, 1);
        let batch = buffer.get_next().expect("marker");
        assert!(batch.header().is_out_of_memory);
    }

    #[test]
    fn consumer_observing_marker_disables_reads() {
        let (buffer, controller, _ctx) = buffer_with(20, 1);
        buffer.enqueue(RawBatch::oom_marker(0));
        controller.events.lock().expect("events lock").clear();

        // The queue is short, so the recovery check briefly re-enables
        // reads; observing the marker then turns them off again and the
        // buffer lands back in the out-of-memory state.
        let marker = buffer.get_next().expect("marker");
        assert!(marker.header().is_out_of_memory);
        assert!(buffer.snapshot().out_of_memory);
        assert_eq!(
            controller.events(),
            vec![ReadEvent::Global(true), ReadEvent::Global(false)]
        );
    }

    #[test]
    fn oom_clears_once_queue_is_nearly_drained() {
        let (buffer, controller, _ctx) = buffer_with(20, 1);
        for _ in 0..12 {
            buffer.enqueue(data_batch(0));
        }
        buffer.enqueue(RawBatch::oom_marker(0));

        // Marker first, then the backlog; the flag stays until fewer than
        // OOM_RESUME_QUEUE_LEN batches remain at the top of a call.
        let marker = buffer.get_next().expect("marker");
        assert!(marker.header().is_out_of_memory);
        let mut resumed_at = None;
        for remaining in (0..12).rev() {
            let batch = buffer.get_next().expect("batch");
            assert!(!batch.header().is_out_of_memory);
            if !buffer.snapshot().out_of_memory && resumed_at.is_none() {
                resumed_at = Some(remaining);
            }
        }
        // 12 queued at the marker pop; recovery triggers on the call that
        // began with 9 queued.
        assert_eq!(resumed_at, Some(8));
        assert!(
            controller
                .events()
                .iter()
                .any(|e| *e == ReadEvent::Global(true))
        );
    }

    #[test]
    fn finished_drains_then_returns_none_without_blocking() {
        let (buffer, _controller, _ctx) = buffer_with(20, 1);
        buffer.enqueue(data_batch(0));
        buffer.enqueue(data_batch(0));
        buffer.finished();

        assert!(buffer.get_next().is_some());
        assert!(buffer.get_next().is_some());
        assert!(buffer.get_next().is_none());
        assert!(buffer.get_next().is_none());
    }

    #[test]
    fn finished_unblocks_waiting_consumer() {
        let (buffer, controller, ctx) = buffer_with(20, 1);
        let buffer = Arc::new(buffer);
        let waiter = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || buffer.get_next())
        };
        thread::sleep(Duration::from_millis(50));
        buffer.finished();
        assert!(waiter.join().expect("join").is_none());
        assert!(controller.events().is_empty());
        let _ = ctx;
    }

    #[test]
    fn kill_unblocks_waiting_consumer() {
        let (buffer, _controller, ctx) = buffer_with(20, 1);
        let buffer = Arc::new(buffer);
        let waiter = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || buffer.get_next())
        };
        thread::sleep(Duration::from_millis(50));
        buffer.kill(&ctx);
        assert!(waiter.join().expect("join").is_none());
    }

    #[test]
    fn kill_on_empty_buffer_is_a_no_op() {
        let (buffer, controller, ctx) = buffer_with(20, 1);
        buffer.kill(&ctx);
        assert_eq!(buffer.snapshot().queued_batches, 0);
        assert!(controller.events().is_empty());
    }

    #[test]
    fn fifo_order_is_preserved_without_markers() {
        let (buffer, _controller, _ctx) = buffer_with(100, 1);
        for i in 0..10 {
            buffer.enqueue(data_batch(i));
        }
        buffer.finished();
        for i in 0..10 {
            let batch = buffer.get_next().expect("batch");
            assert_eq!(batch.header().sending_sender_id, i);
        }
        assert!(buffer.get_next().is_none());
    }
}
