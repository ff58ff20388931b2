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

use crate::common::config;
use crate::common::types::UniqueId;
use crate::runtime::mem_tracker::{self, MemTracker};

/// Per-fragment-instance execution context.
///
/// Owns what the incoming buffers need from their surroundings: the
/// configured per-sender queue depth and a fragment-level memory tracker
/// that queued payloads are charged against.
pub struct FragmentContext {
    fragment_instance_id: UniqueId,
    incoming_buffer_size: usize,
    mem_tracker: Arc<MemTracker>,
}

impl FragmentContext {
    pub fn new(fragment_instance_id: UniqueId) -> Self {
        Self::with_incoming_buffer_size(
            fragment_instance_id,
            config::incoming_buffer_size_per_sender(),
        )
    }

    pub fn with_incoming_buffer_size(
        fragment_instance_id: UniqueId,
        incoming_buffer_size: usize,
    ) -> Self {
        let process = mem_tracker::process_mem_tracker();
        let label = format!("fragment_{}", fragment_instance_id);
        Self {
            fragment_instance_id,
            incoming_buffer_size,
            mem_tracker: MemTracker::new_child(label, &process),
        }
    }

    pub fn fragment_instance_id(&self) -> UniqueId {
        self.fragment_instance_id
    }

    /// Incoming exchange queue depth budgeted per upstream sender.
    pub fn incoming_buffer_size(&self) -> usize {
        self.incoming_buffer_size
    }

    pub fn mem_tracker(&self) -> &Arc<MemTracker> {
        &self.mem_tracker
    }
}
