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
//! Scheduling contract between atomic request executions and their host.
//!
//! The host owns worker threads and the owner context that drives
//! `next_tuple`. Executions only submit work, schedule delayed wake-ups, and
//! ask for the owner to be re-polled.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::common::ids::AtomicRequestId;

/// Unit of work run on a host worker thread.
pub type WorkTask = Box<dyn FnOnce() + Send + 'static>;

/// Cancellation token for a delayed task.
///
/// Canceling only prevents a task that has not started yet; the host checks
/// the token right before running it.
#[derive(Clone, Debug, Default)]
pub struct CancelableTimer {
    canceled: Arc<AtomicBool>,
}

impl CancelableTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }
}

/// Host scheduling facility seen from one owner context.
pub trait WorkScheduler: Send + Sync {
    /// Queues `task`; smaller `priority` values run first. Returns false when
    /// the host no longer accepts work.
    fn submit(&self, task: WorkTask, priority: i32) -> bool;

    /// Runs `task` once `delay` has elapsed unless the returned timer is
    /// canceled first.
    fn schedule_delayed(&self, task: WorkTask, priority: i32, delay: Duration) -> CancelableTimer;

    /// Queues `task` ahead of regular fetch work.
    fn submit_high_priority(&self, task: WorkTask);

    /// Asks the owner context to call `next_tuple` again.
    fn more_work(&self);

    /// Records that `id` is being executed for this owner.
    fn register_atomic_request(&self, id: AtomicRequestId) -> Result<(), String> {
        let _ = id;
        Ok(())
    }

    fn close_atomic_request(&self, id: AtomicRequestId) {
        let _ = id;
    }
}
