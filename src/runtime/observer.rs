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
//! Observable primitives for "more work ready" signalling.
//!
//! Responsibilities:
//! - Provides callback registration and deferred notification for owner contexts.
//! - Used by request work items so that fetch completions and retry timers can
//!   ask the owner to re-poll its atomic requests.
//!
//! Key exported interfaces:
//! - Types: `Observer`, `Observable`, `DeferNotify`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::datatier_logging::trace;

/// Callback invoked when an observable fires.
pub type Observer = Arc<dyn Fn() + Send + Sync + 'static>;

/// Observer registry that fans one readiness event out to every subscriber.
pub struct Observable {
    observers: Mutex<Vec<Observer>>,
    notify_count: AtomicU64,
}

impl Observable {
    pub fn new() -> Self {
        Self {
            observers: Mutex::new(Vec::new()),
            notify_count: AtomicU64::new(0),
        }
    }

    pub fn add_observer(&self, observer: Observer) {
        let mut guard = self.observers.lock().expect("observable lock");
        guard.push(observer);
    }

    // Create a deferred notifier that triggers on drop if armed.
    pub fn defer_notify(self: &Arc<Self>) -> DeferNotify {
        DeferNotify::new(Arc::clone(self))
    }

    fn notify_observers(&self) {
        // Clone out so callbacks run without the registry lock held.
        let observers = {
            let guard = self.observers.lock().expect("observable lock");
            guard.clone()
        };
        let count = self.notify_count.fetch_add(1, Ordering::AcqRel) + 1;
        trace!(
            "Observable notify: count={} observers={}",
            count,
            observers.len()
        );
        for observer in observers {
            observer();
        }
    }

    pub fn num_observers(&self) -> usize {
        let guard = self.observers.lock().expect("observable lock");
        guard.len()
    }

    /// Number of notifications delivered so far.
    pub fn notify_count(&self) -> u64 {
        self.notify_count.load(Ordering::Acquire)
    }
}

impl Default for Observable {
    fn default() -> Self {
        Self::new()
    }
}

/// Delays observer callbacks until drop so notifications happen outside locks.
/// Call `arm()` after the state change is committed.
#[must_use]
pub struct DeferNotify {
    observable: Arc<Observable>,
    armed: AtomicBool,
}

impl DeferNotify {
    pub fn new(observable: Arc<Observable>) -> Self {
        Self {
            observable,
            armed: AtomicBool::new(false),
        }
    }

    pub fn arm(&self) {
        self.armed.store(true, Ordering::Release);
    }
}

impl Drop for DeferNotify {
    fn drop(&mut self) {
        if self.armed.load(Ordering::Acquire) {
            self.observable.notify_observers();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn unarmed_defer_notify_is_silent() {
        let observable = Arc::new(Observable::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = Arc::clone(&hits);
        observable.add_observer(Arc::new(move || {
            hits_clone.fetch_add(1, Ordering::AcqRel);
        }));

        drop(observable.defer_notify());
        assert_eq!(hits.load(Ordering::Acquire), 0);

        let notify = observable.defer_notify();
        notify.arm();
        drop(notify);
        assert_eq!(hits.load(Ordering::Acquire), 1);
        assert_eq!(observable.notify_count(), 1);
    }

    #[test]
    fn every_observer_is_called() {
        let observable = Arc::new(Observable::new());
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let hits = Arc::clone(&hits);
            observable.add_observer(Arc::new(move || {
                hits.fetch_add(1, Ordering::AcqRel);
            }));
        }
        assert_eq!(observable.num_observers(), 3);
        let notify = observable.defer_notify();
        notify.arm();
        drop(notify);
        assert_eq!(hits.load(Ordering::Acquire), 3);
    }
}
