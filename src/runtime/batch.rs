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

use bytes::Bytes;

use crate::runtime::mem_tracker::{MemTracker, TrackedBytes};

/// Header of a raw exchange batch as received from a remote sender.
///
/// `is_out_of_memory` turns the batch into an in-band distress signal: the
/// sender is under memory pressure and asks the receiving side to throttle.
#[derive(Copy, Clone, Debug)]
pub struct BatchHeader {
    pub is_out_of_memory: bool,
    pub sending_sender_id: i32,
}

/// The owned payload region of a raw batch.
///
/// The receiving runtime never inspects the payload; it only moves
/// ownership downstream or releases it on teardown. Accounting (if any)
/// is released together with the payload, so holding the body is what
/// keeps the bytes charged against the fragment's tracker.
#[derive(Debug)]
pub struct BatchBody {
    data: Bytes,
    accounting: Option<TrackedBytes>,
}

impl BatchBody {
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            accounting: None,
        }
    }

    /// Body charged against `tracker` until released.
    pub fn with_tracker(data: Bytes, tracker: &Arc<MemTracker>) -> Self {
        let accounting = TrackedBytes::new(data.len(), Arc::clone(tracker));
        Self {
            data,
            accounting: Some(accounting),
        }
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Release the payload and its accounting. Consuming `self` makes the
    /// exactly-once obligation a compile-time property; a dropped body
    /// releases the same way.
    pub fn release(self) -> usize {
        let released = self.data.len();
        drop(self);
        released
    }
}

/// A deserialization-pending data batch from one upstream sender.
#[derive(Debug)]
pub struct RawBatch {
    header: BatchHeader,
    body: BatchBody,
}

impl RawBatch {
    pub fn new(header: BatchHeader, body: BatchBody) -> Self {
        Self { header, body }
    }

    /// Header-only distress batch signalling sender-side memory pressure.
    pub fn oom_marker(sending_sender_id: i32) -> Self {
        Self {
            header: BatchHeader {
                is_out_of_memory: true,
                sending_sender_id,
            },
            body: BatchBody::new(Bytes::new()),
        }
    }

    pub fn header(&self) -> &BatchHeader {
        &self.header
    }

    pub fn body(&self) -> &BatchBody {
        &self.body
    }

    pub fn into_body(self) -> BatchBody {
        self.body
    }

    /// Release the batch's body, returning the payload size that was held.
    pub fn release(self) -> usize {
        self.body.release()
    }
}
