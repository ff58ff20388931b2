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

/// Capability to throttle inbound reads on the connections feeding an
/// incoming buffer.
///
/// Calls are fire-and-forget: the buffer updates its own flags and issues
/// the instruction without waiting for the network side to acknowledge
/// that reading actually stopped or resumed. Implementations live with
/// the transport; tests substitute recording stubs.
pub trait ReadController: Send + Sync {
    /// Enable or disable reading on every connection feeding the buffer.
    fn set_auto_read(&self, enabled: bool);

    /// Enable or disable reading for one upstream sender only.
    fn set_sender_auto_read(&self, sender_id: i32, enabled: bool);
}
