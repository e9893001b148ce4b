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
//! Worker pool for connector fetches and retry timers.
//!
//! Responsibilities:
//! - Runs submitted tasks on a fixed set of worker threads, lowest priority value first.
//! - Runs a timer thread that releases delayed tasks into the queue once due,
//!   dropping those whose timer was canceled.
//!
//! Key exported interfaces:
//! - Types: `WorkerPool`.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use super::scheduler::{CancelableTimer, WorkTask};
use crate::common::config::fetch_threads;
use crate::datatier_logging::{debug, warn};

const TIMER_IDLE_WAIT: Duration = Duration::from_millis(500);

struct QueuedTask {
    priority: i32,
    seq: u64,
    task: WorkTask,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    // BinaryHeap is a max-heap: invert so the smallest (priority, seq) pops first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct DelayedTask {
    due: Instant,
    priority: i32,
    task: WorkTask,
    timer: CancelableTimer,
}

struct PoolInner {
    queue: Mutex<BinaryHeap<QueuedTask>>,
    cv: Condvar,
    delayed: Mutex<Vec<DelayedTask>>,
    timer_cv: Condvar,
    shutdown: AtomicBool,
    next_seq: AtomicU64,
}

impl PoolInner {
    fn new() -> Self {
        Self {
            queue: Mutex::new(BinaryHeap::new()),
            cv: Condvar::new(),
            delayed: Mutex::new(Vec::new()),
            timer_cv: Condvar::new(),
            shutdown: AtomicBool::new(false),
            next_seq: AtomicU64::new(0),
        }
    }

    fn push(&self, task: WorkTask, priority: i32) -> bool {
        if self.shutdown.load(Ordering::Acquire) {
            return false;
        }
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let mut queue = self.queue.lock().expect("worker pool queue lock");
        queue.push(QueuedTask {
            priority,
            seq,
            task,
        });
        self.cv.notify_one();
        true
    }

    fn take(&self) -> Option<WorkTask> {
        let mut queue = self.queue.lock().expect("worker pool queue lock");
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return None;
            }
            if let Some(entry) = queue.pop() {
                return Some(entry.task);
            }
            queue = self
                .cv
                .wait(queue)
                .expect("worker pool queue condvar wait");
        }
    }

    fn schedule(&self, task: WorkTask, priority: i32, delay: Duration) -> CancelableTimer {
        let timer = CancelableTimer::new();
        if self.shutdown.load(Ordering::Acquire) {
            timer.cancel();
            return timer;
        }
        let mut delayed = self.delayed.lock().expect("worker pool timer lock");
        delayed.push(DelayedTask {
            due: Instant::now() + delay,
            priority,
            task,
            timer: timer.clone(),
        });
        self.timer_cv.notify_one();
        timer
    }

    fn release_due(&self, now: Instant) -> Option<Instant> {
        let due = {
            let mut delayed = self.delayed.lock().expect("worker pool timer lock");
            delayed.retain(|d| !d.timer.is_canceled());
            let (due, pending): (Vec<_>, Vec<_>) =
                delayed.drain(..).partition(|d| d.due <= now);
            *delayed = pending;
            due
        };
        for entry in due {
            let timer = entry.timer;
            let task = entry.task;
            // A timer may still be canceled while its task waits in the queue.
            self.push(
                Box::new(move || {
                    if !timer.is_canceled() {
                        task();
                    }
                }),
                entry.priority,
            );
        }
        let delayed = self.delayed.lock().expect("worker pool timer lock");
        delayed.iter().map(|d| d.due).min()
    }
}

/// Fixed-size pool executing fetch units, close tasks, and retry timers.
pub struct WorkerPool {
    inner: Arc<PoolInner>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(num_threads: usize) -> Self {
        let inner = Arc::new(PoolInner::new());
        let threads = num_threads.max(1);
        let mut workers = Vec::with_capacity(threads + 1);
        for idx in 0..threads {
            let inner_clone = Arc::clone(&inner);
            let spawned = thread::Builder::new()
                .name(format!("datatier_fetch_{idx}"))
                .spawn(move || worker_loop(inner_clone));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(err) => warn!("failed to spawn fetch worker {}: {}", idx, err),
            }
        }
        let timer_inner = Arc::clone(&inner);
        match thread::Builder::new()
            .name("datatier_timer".to_string())
            .spawn(move || timer_loop(timer_inner))
        {
            Ok(handle) => workers.push(handle),
            Err(err) => warn!("failed to spawn timer thread: {}", err),
        }
        debug!("WorkerPool started: threads={}", threads);
        Self {
            inner,
            workers: Mutex::new(workers),
        }
    }

    /// Pool sized from `[runtime] fetch_threads`.
    pub fn from_config() -> Self {
        Self::new(fetch_threads())
    }

    pub fn submit<F>(&self, task: F, priority: i32) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.push(Box::new(task), priority)
    }

    pub fn schedule<F>(&self, task: F, priority: i32, delay: Duration) -> CancelableTimer
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.schedule(Box::new(task), priority, delay)
    }

    pub fn num_tasks(&self) -> usize {
        self.inner.queue.lock().expect("worker pool queue lock").len()
    }

    pub fn num_delayed(&self) -> usize {
        self.inner
            .delayed
            .lock()
            .expect("worker pool timer lock")
            .iter()
            .filter(|d| !d.timer.is_canceled())
            .count()
    }

    /// Stops accepting work, drops queued tasks, and joins the threads.
    pub fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let _queue = self.inner.queue.lock().expect("worker pool queue lock");
            self.inner.cv.notify_all();
        }
        {
            let _delayed = self.inner.delayed.lock().expect("worker pool timer lock");
            self.inner.timer_cv.notify_all();
        }
        let workers = std::mem::take(&mut *self.workers.lock().expect("worker pool workers lock"));
        let current = thread::current().id();
        for handle in workers {
            // The last reference may be dropped from inside a task.
            if handle.thread().id() == current {
                continue;
            }
            let _ = handle.join();
        }
        self.inner
            .queue
            .lock()
            .expect("worker pool queue lock")
            .clear();
        self.inner
            .delayed
            .lock()
            .expect("worker pool timer lock")
            .clear();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(inner: Arc<PoolInner>) {
    while let Some(task) = inner.take() {
        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            warn!("worker task panicked; worker keeps running");
        }
    }
}

fn timer_loop(inner: Arc<PoolInner>) {
    loop {
        if inner.shutdown.load(Ordering::Acquire) {
            break;
        }
        let next_due = inner.release_due(Instant::now());
        let delayed = inner.delayed.lock().expect("worker pool timer lock");
        if inner.shutdown.load(Ordering::Acquire) {
            break;
        }
        // Re-check under the lock so a timer added meanwhile is not missed.
        let earliest = delayed.iter().map(|d| d.due).min().or(next_due);
        let wait = match earliest {
            Some(due) => due.saturating_duration_since(Instant::now()),
            None => TIMER_IDLE_WAIT,
        };
        if wait.is_zero() {
            continue;
        }
        let _ = inner
            .timer_cv
            .wait_timeout(delayed, wait)
            .expect("worker pool timer condvar wait");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    impl WorkerPool {
        // Test-only constructor: no threads, tasks are run by the test.
        fn new_for_test() -> Self {
            Self {
                inner: Arc::new(PoolInner::new()),
                workers: Mutex::new(Vec::new()),
            }
        }

        fn pop_one_for_test(&self) -> bool {
            let task = {
                let mut queue = self.inner.queue.lock().expect("worker pool queue lock");
                queue.pop()
            };
            match task {
                Some(entry) => {
                    (entry.task)();
                    true
                }
                None => false,
            }
        }
    }

    #[test]
    fn lower_priority_value_runs_first_and_ties_are_fifo() {
        let pool = WorkerPool::new_for_test();
        let order = Arc::new(Mutex::new(Vec::new()));
        for (label, priority) in [("fetch_a", 100), ("timer", 10), ("fetch_b", 100), ("close", 0)] {
            let order = Arc::clone(&order);
            assert!(pool.submit(move || order.lock().expect("order lock").push(label), priority));
        }
        while pool.pop_one_for_test() {}
        assert_eq!(
            *order.lock().expect("order lock"),
            vec!["close", "timer", "fetch_a", "fetch_b"]
        );
    }

    #[test]
    fn delayed_task_runs_after_delay() {
        let pool = WorkerPool::new(1);
        let (tx, rx) = mpsc::channel();
        let start = Instant::now();
        let _timer = pool.schedule(
            move || {
                let _ = tx.send(Instant::now());
            },
            10,
            Duration::from_millis(30),
        );
        let fired_at = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("timer should fire");
        assert!(fired_at.duration_since(start) >= Duration::from_millis(30));
    }

    #[test]
    fn canceled_timer_never_runs() {
        let pool = WorkerPool::new(1);
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = Arc::clone(&hits);
        let timer = pool.schedule(
            move || {
                hits_clone.fetch_add(1, Ordering::AcqRel);
            },
            10,
            Duration::from_millis(20),
        );
        timer.cancel();
        thread::sleep(Duration::from_millis(80));
        assert_eq!(hits.load(Ordering::Acquire), 0);
        assert_eq!(pool.num_delayed(), 0);
    }

    #[test]
    fn shutdown_rejects_new_work() {
        let pool = WorkerPool::new(1);
        pool.shutdown();
        assert!(!pool.submit(|| {}, 1));
        assert!(pool.schedule(|| {}, 1, Duration::from_millis(1)).is_canceled());
    }

    #[test]
    fn panicking_task_does_not_kill_worker() {
        let pool = WorkerPool::new(1);
        assert!(pool.submit(|| panic!("task failure"), 1));
        let (tx, rx) = mpsc::channel();
        assert!(pool.submit(
            move || {
                let _ = tx.send(());
            },
            1
        ));
        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
    }
}
