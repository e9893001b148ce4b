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
//! Owner context for the atomic requests of one user request.
//!
//! Responsibilities:
//! - Routes fetch units and retry timers to the shared `WorkerPool`.
//! - Turns `more_work` into an observer notification so the driver re-polls.
//! - Tracks which atomic requests are currently open for this owner.
//!
//! Key exported interfaces:
//! - Types: `RequestWorkItem`, `WorkPriorities`.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::observer::{Observable, Observer};
use super::scheduler::{CancelableTimer, WorkScheduler, WorkTask};
use super::work_executor::WorkerPool;
use crate::common::config::{fetch_work_priority, high_priority, retry_timer_priority};
use crate::common::ids::{AtomicRequestId, RequestId};
use crate::datatier_logging::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkPriorities {
    pub fetch: i32,
    pub retry_timer: i32,
    pub high: i32,
}

impl WorkPriorities {
    pub fn from_config() -> Self {
        Self {
            fetch: fetch_work_priority(),
            retry_timer: retry_timer_priority(),
            high: high_priority(),
        }
    }
}

impl Default for WorkPriorities {
    fn default() -> Self {
        Self {
            fetch: 100,
            retry_timer: 10,
            high: 0,
        }
    }
}

pub struct RequestWorkItem {
    request_id: RequestId,
    pool: Arc<WorkerPool>,
    more_work: Arc<Observable>,
    high_priority: i32,
    open_requests: Mutex<HashSet<AtomicRequestId>>,
}

impl RequestWorkItem {
    pub fn new(request_id: RequestId, pool: Arc<WorkerPool>, priorities: WorkPriorities) -> Self {
        Self {
            request_id,
            pool,
            more_work: Arc::new(Observable::new()),
            high_priority: priorities.high,
            open_requests: Mutex::new(HashSet::new()),
        }
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Registers a callback run each time an execution asks to be re-polled.
    pub fn add_observer(&self, observer: Observer) {
        self.more_work.add_observer(observer);
    }

    pub fn more_work_count(&self) -> u64 {
        self.more_work.notify_count()
    }

    pub fn open_request_count(&self) -> usize {
        self.open_requests
            .lock()
            .expect("request work item lock")
            .len()
    }

    pub fn is_open(&self, id: &AtomicRequestId) -> bool {
        self.open_requests
            .lock()
            .expect("request work item lock")
            .contains(id)
    }
}

impl WorkScheduler for RequestWorkItem {
    fn submit(&self, task: WorkTask, priority: i32) -> bool {
        let accepted = self.pool.submit(task, priority);
        if !accepted {
            warn!(
                "request {} work rejected: worker pool is shut down",
                self.request_id
            );
        }
        accepted
    }

    fn schedule_delayed(&self, task: WorkTask, priority: i32, delay: Duration) -> CancelableTimer {
        self.pool.schedule(task, priority, delay)
    }

    fn submit_high_priority(&self, task: WorkTask) {
        let _ = self.submit(task, self.high_priority);
    }

    fn more_work(&self) {
        let notify = self.more_work.defer_notify();
        notify.arm();
    }

    fn register_atomic_request(&self, id: AtomicRequestId) -> Result<(), String> {
        let mut open = self.open_requests.lock().expect("request work item lock");
        if !open.insert(id) {
            return Err(format!(
                "atomic request {} is already registered for request {}",
                id, self.request_id
            ));
        }
        debug!("request {} registered atomic request {}", self.request_id, id);
        Ok(())
    }

    fn close_atomic_request(&self, id: AtomicRequestId) {
        let removed = self
            .open_requests
            .lock()
            .expect("request work item lock")
            .remove(&id);
        if removed {
            debug!("request {} closed atomic request {}", self.request_id, id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn work_item() -> RequestWorkItem {
        RequestWorkItem::new(RequestId(7), Arc::new(WorkerPool::new(1)), WorkPriorities::default())
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let item = work_item();
        let id = AtomicRequestId::new(RequestId(7), 1);
        assert!(item.register_atomic_request(id).is_ok());
        assert!(item.register_atomic_request(id).is_err());
        assert!(item.is_open(&id));
        item.close_atomic_request(id);
        assert_eq!(item.open_request_count(), 0);
        assert!(item.register_atomic_request(id).is_ok());
    }

    #[test]
    fn more_work_notifies_observers() {
        let item = work_item();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = Arc::clone(&hits);
        item.add_observer(Arc::new(move || {
            hits_clone.fetch_add(1, Ordering::AcqRel);
        }));
        item.more_work();
        item.more_work();
        assert_eq!(hits.load(Ordering::Acquire), 2);
        assert_eq!(item.more_work_count(), 2);
    }
}
