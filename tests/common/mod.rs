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
//! Common utilities and helpers for integration tests.
#![allow(dead_code)]
#![allow(unused_imports)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;

use datatier::common::ids::{AtomicRequestId, RequestId};
use datatier::datatier_config;
use datatier::datatier_logging;
use datatier::exec::change_events::EventDistributor;
use datatier::exec::tuple_source::{AtomicRequestExecution, NextTuple};
use datatier::exec::value::Row;
use datatier::runtime::buffer_manager::{BufferManager, FileStore, LocalBufferManager};
use datatier::runtime::work_executor::WorkerPool;
use datatier::runtime::work_item::{RequestWorkItem, WorkPriorities};

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Test configuration for integration tests.
pub struct TestConfig {
    /// Temporary directory for test artifacts
    pub temp_dir: TempDir,
    /// Test config path
    pub config_path: PathBuf,
}

impl TestConfig {
    /// Create a new test configuration with default settings.
    pub fn new() -> anyhow::Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        let config_path = temp_dir.path().join("test_datatier.toml");
        let spool_dir = temp_dir.path().join("spool");

        let config_content = format!(
            r#"
log_level = "debug"

[runtime]
fetch_threads = 2
fetch_work_priority = 100
retry_timer_priority = 10

[lob]
transfer_buffer_bytes = 64
spool_dir = "{}"

[change_events]
detect = true
"#,
            spool_dir.display()
        );

        std::fs::write(&config_path, config_content)?;

        Ok(Self {
            temp_dir,
            config_path,
        })
    }

    /// Initialize logging for tests.
    pub fn init_logging(&self) {
        datatier_logging::init_with_level("debug");
    }

    /// Load the test configuration.
    pub fn load_config(&self) -> anyhow::Result<&'static datatier_config::DataTierConfig> {
        datatier_config::init_from_path(&self.config_path)
    }

    pub fn spool_dir(&self) -> PathBuf {
        self.temp_dir.path().join("spool")
    }
}

impl Default for TestConfig {
    fn default() -> Self {
        Self::new().expect("Failed to create test config")
    }
}

pub fn test_request_id(subrequest_id: u32) -> AtomicRequestId {
    AtomicRequestId::new(RequestId(1234), subrequest_id)
}

/// Counts re-poll requests and lets a driver wait for the next one.
#[derive(Default)]
pub struct PollSignal {
    count: Mutex<u64>,
    cv: Condvar,
}

impl PollSignal {
    pub fn notify(&self) {
        let mut count = self.count.lock().expect("poll signal lock");
        *count += 1;
        self.cv.notify_all();
    }

    pub fn count(&self) -> u64 {
        *self.count.lock().expect("poll signal lock")
    }

    /// Waits until more than `seen` notifications were delivered.
    pub fn wait_beyond(&self, seen: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.count.lock().expect("poll signal lock");
        while *count <= seen {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            count = self
                .cv
                .wait_timeout(count, deadline - now)
                .expect("poll signal wait")
                .0;
        }
        true
    }
}

/// Owner context backed by a real worker pool.
pub struct TestHost {
    pub pool: Arc<WorkerPool>,
    pub work_item: Arc<RequestWorkItem>,
    pub signal: Arc<PollSignal>,
}

impl TestHost {
    pub fn new(threads: usize) -> Self {
        let pool = Arc::new(WorkerPool::new(threads));
        let work_item = Arc::new(RequestWorkItem::new(
            RequestId(1234),
            Arc::clone(&pool),
            WorkPriorities::default(),
        ));
        let signal = Arc::new(PollSignal::default());
        let observer_signal = Arc::clone(&signal);
        work_item.add_observer(Arc::new(move || observer_signal.notify()));
        Self {
            pool,
            work_item,
            signal,
        }
    }
}

/// Pulls rows until `Done`, waiting for a re-poll signal whenever blocked.
pub fn drain(exec: &mut AtomicRequestExecution, signal: &PollSignal) -> datatier::Result<Vec<Row>> {
    let mut rows = Vec::new();
    loop {
        let seen = signal.count();
        match exec.next_tuple()? {
            NextTuple::Row(row) => rows.push(row),
            NextTuple::Done => return Ok(rows),
            NextTuple::Blocked(reason) => {
                assert!(
                    signal.wait_beyond(seen, WAIT_TIMEOUT),
                    "no re-poll signal while blocked on {:?}",
                    reason
                );
            }
        }
    }
}

/// Buffer manager counting file store creations.
pub struct CountingBufferManager {
    inner: LocalBufferManager,
    stores: AtomicUsize,
}

impl CountingBufferManager {
    pub fn new(spool_dir: impl Into<PathBuf>) -> Self {
        Self {
            inner: LocalBufferManager::new(spool_dir),
            stores: AtomicUsize::new(0),
        }
    }

    pub fn stores_created(&self) -> usize {
        self.stores.load(Ordering::Acquire)
    }
}

impl BufferManager for CountingBufferManager {
    fn create_file_store(&self, name: &str) -> datatier::Result<Arc<dyn FileStore>> {
        self.stores.fetch_add(1, Ordering::AcqRel);
        self.inner.create_file_store(name)
    }
}

/// Distributor recording every event as `vdb:version:schema.table`.
#[derive(Default)]
pub struct RecordingDistributor {
    events: Mutex<Vec<String>>,
}

impl RecordingDistributor {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().expect("distributor lock").clone()
    }
}

impl EventDistributor for RecordingDistributor {
    fn data_modification(&self, vdb_name: &str, vdb_version: &str, schema_name: &str, table_name: &str) {
        self.events
            .lock()
            .expect("distributor lock")
            .push(format!("{vdb_name}:{vdb_version}:{schema_name}.{table_name}"));
    }
}

/// Polls `cond` until it holds or `timeout` expires.
pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

pub fn int_rows(range: std::ops::Range<i32>) -> Vec<Row> {
    range.map(|i| vec![datatier::exec::value::Value::Integer(i)]).collect()
}

/// Installs the test subscriber without loading any config file.
pub fn init_logging_once() {
    datatier_logging::init_with_level("datatier=debug");
}
