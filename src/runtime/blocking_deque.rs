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
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};

/// Thread-safe double-ended queue with a cancellable blocking take.
///
/// Synchronization lives entirely inside the queue; callers coordinate
/// their own state with atomics rather than sharing this lock. `unblock`
/// is one-way: once called, `take_front` on an empty queue returns `None`
/// instead of waiting, now and forever.
pub struct BlockingDeque<T> {
    mu: Mutex<VecDeque<T>>,
    cv: Condvar,
    unblocked: AtomicBool,
}

impl<T> BlockingDeque<T> {
    pub fn new() -> Self {
        Self {
            mu: Mutex::new(VecDeque::new()),
            cv: Condvar::new(),
            unblocked: AtomicBool::new(false),
        }
    }

    pub fn push_back(&self, item: T) {
        let mut q = self.mu.lock().expect("deque lock");
        q.push_back(item);
        self.cv.notify_all();
    }

    pub fn push_front(&self, item: T) {
        let mut q = self.mu.lock().expect("deque lock");
        q.push_front(item);
        self.cv.notify_all();
    }

    pub fn try_pop_front(&self) -> Option<T> {
        self.mu.lock().expect("deque lock").pop_front()
    }

    /// Pop the front item, waiting while the queue is empty. Returns
    /// `None` only after `unblock` with the queue still empty.
    pub fn take_front(&self) -> Option<T> {
        let mut q = self.mu.lock().expect("deque lock");
        loop {
            if let Some(item) = q.pop_front() {
                return Some(item);
            }
            if self.unblocked.load(Ordering::Acquire) {
                return None;
            }
            q = self.cv.wait(q).expect("deque wait");
        }
    }

    /// Inspect the front item without removing it. The closure sees
    /// `None` when the queue is empty.
    pub fn peek_front<R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
        let q = self.mu.lock().expect("deque lock");
        f(q.front())
    }

    pub fn len(&self) -> usize {
        self.mu.lock().expect("deque lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wake all blocked takers and make every future empty-queue take
    /// return immediately.
    pub fn unblock(&self) {
        let _q = self.mu.lock().expect("deque lock");
        self.unblocked.store(true, Ordering::Release);
        self.cv.notify_all();
    }
}

impl<T> Default for BlockingDeque<T> {
    fn default() -> Self {
        Self::new()
    }
}
