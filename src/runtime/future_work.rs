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
//! Handle to one outstanding unit of scheduled work.
//!
//! Responsibilities:
//! - Wraps a work function and its completion listener into one host task.
//! - Holds the outcome in a single-slot inbox until the owner takes it.
//!
//! Key exported interfaces:
//! - Types: `FutureWork`.
//! - Functions: `submit_work`.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::scheduler::WorkScheduler;

struct Inbox<T> {
    value: Mutex<Option<Result<T, String>>>,
    done: AtomicBool,
}

impl<T> Inbox<T> {
    fn complete(&self, value: Result<T, String>) {
        let mut guard = self.value.lock().expect("future work inbox lock");
        *guard = Some(value);
        self.done.store(true, Ordering::Release);
    }
}

/// Outstanding unit of work. The outcome can be taken exactly once.
pub struct FutureWork<T> {
    inbox: Arc<Inbox<T>>,
}

impl<T> FutureWork<T> {
    pub fn is_done(&self) -> bool {
        self.inbox.done.load(Ordering::Acquire)
    }

    /// Takes the outcome if the work has finished. `Err` carries the panic
    /// message of a work function that unwound.
    pub fn take(&self) -> Option<Result<T, String>> {
        if !self.is_done() {
            return None;
        }
        let mut guard = self.inbox.value.lock().expect("future work inbox lock");
        guard.take()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "work panicked".to_string()
    }
}

/// Submits `work` to `scheduler`. The outcome lands in the returned handle
/// before `listener` runs on the same worker thread.
///
/// Returns `None` when the scheduler rejected the task.
pub fn submit_work<T, W, L>(
    scheduler: &dyn WorkScheduler,
    priority: i32,
    work: W,
    listener: L,
) -> Option<FutureWork<T>>
where
    T: Send + 'static,
    W: FnOnce() -> T + Send + 'static,
    L: FnOnce() + Send + 'static,
{
    let inbox = Arc::new(Inbox {
        value: Mutex::new(None),
        done: AtomicBool::new(false),
    });
    let task_inbox = Arc::clone(&inbox);
    let accepted = scheduler.submit(
        Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(work))
                .map_err(|payload| panic_message(payload.as_ref()));
            task_inbox.complete(outcome);
            listener();
        }),
        priority,
    );
    accepted.then_some(FutureWork { inbox })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::scheduler::{CancelableTimer, WorkTask};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Queues tasks and runs them only when the test says so.
    #[derive(Default)]
    struct QueueScheduler {
        tasks: Mutex<Vec<WorkTask>>,
        accept: bool,
    }

    impl QueueScheduler {
        fn run_all(&self) {
            let tasks = std::mem::take(&mut *self.tasks.lock().expect("tasks lock"));
            for task in tasks {
                task();
            }
        }
    }

    impl WorkScheduler for QueueScheduler {
        fn submit(&self, task: WorkTask, _priority: i32) -> bool {
            if !self.accept {
                return false;
            }
            self.tasks.lock().expect("tasks lock").push(task);
            true
        }

        fn schedule_delayed(&self, task: WorkTask, priority: i32, _delay: Duration) -> CancelableTimer {
            self.submit(task, priority);
            CancelableTimer::new()
        }

        fn submit_high_priority(&self, task: WorkTask) {
            self.submit(task, 0);
        }

        fn more_work(&self) {}
    }

    #[test]
    fn outcome_is_available_once_after_completion() {
        let scheduler = QueueScheduler {
            accept: true,
            ..Default::default()
        };
        let listened = Arc::new(AtomicUsize::new(0));
        let listened_clone = Arc::clone(&listened);
        let future = submit_work(&scheduler, 1, || 7, move || {
            listened_clone.fetch_add(1, Ordering::AcqRel);
        })
        .expect("accepted");

        assert!(!future.is_done());
        assert!(future.take().is_none());

        scheduler.run_all();
        assert!(future.is_done());
        assert_eq!(listened.load(Ordering::Acquire), 1);
        assert_eq!(future.take(), Some(Ok(7)));
        assert_eq!(future.take(), None);
    }

    #[test]
    fn panicking_work_reports_error() {
        let scheduler = QueueScheduler {
            accept: true,
            ..Default::default()
        };
        let future = submit_work(&scheduler, 1, || -> i32 { panic!("boom") }, || {})
            .expect("accepted");
        scheduler.run_all();
        assert_eq!(future.take(), Some(Err("boom".to_string())));
    }

    #[test]
    fn rejected_submission_returns_none() {
        let scheduler = QueueScheduler::default();
        assert!(submit_work(&scheduler, 1, || 1, || {}).is_none());
    }
}
