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
//! In-memory VALUES connector.
//!
//! Responsibilities:
//! - Serves literal rows in fixed-size batches, in insertion order.
//! - Replays scripted fetch steps (batches, retry hints, failures) so the
//!   execution state machine can be driven deterministically.
//! - Counts connector calls for callers that assert on the lifecycle.
//!
//! Key exported interfaces:
//! - Types: `ValuesConnector`, `ValuesConnectorWork`, `ScriptStep`, `ValuesLob`.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{ConnectorFactory, ConnectorWork, DataNotAvailable, FetchOutcome, ResultsBatch};
use crate::common::error::ConnectorError;
use crate::exec::atomic_request::AtomicRequest;
use crate::exec::command::Command;
use crate::exec::value::{LobSource, LobStream, Row, StreamKind, Value};

/// In-memory LOB content that counts how often it is opened.
#[derive(Debug, Default)]
pub struct ValuesLob {
    bytes: Vec<u8>,
    opens: AtomicUsize,
}

impl ValuesLob {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Arc<Self> {
        Arc::new(Self {
            bytes: bytes.into(),
            opens: AtomicUsize::new(0),
        })
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::Acquire)
    }

    pub fn binary_stream(self: &Arc<Self>) -> Value {
        Value::Stream(LobStream {
            kind: StreamKind::Binary,
            source: Arc::clone(self) as Arc<dyn LobSource>,
        })
    }

    pub fn character_stream(self: &Arc<Self>) -> Value {
        Value::Stream(LobStream {
            kind: StreamKind::Character,
            source: Arc::clone(self) as Arc<dyn LobSource>,
        })
    }
}

impl LobSource for ValuesLob {
    fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        self.opens.fetch_add(1, Ordering::AcqRel);
        Ok(Box::new(io::Cursor::new(self.bytes.clone())))
    }
}

/// One scripted response to `more()`.
#[derive(Clone, Debug)]
pub enum ScriptStep {
    Batch(ResultsBatch),
    NotAvailable(DataNotAvailable),
    Fail(ConnectorError),
}

#[derive(Default)]
struct CallCounters {
    execute: AtomicUsize,
    more: AtomicUsize,
    cancel: AtomicUsize,
    close: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

pub struct ValuesConnectorWork {
    steps: Mutex<VecDeque<ScriptStep>>,
    execute_error: Option<ConnectorError>,
    copy_lobs: bool,
    lobs_usable_after_close: bool,
    fetch_delay: Option<Duration>,
    data_available: AtomicBool,
    rows_delivered: AtomicI64,
    counters: CallCounters,
}

impl ValuesConnectorWork {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            execute_error: None,
            copy_lobs: false,
            lobs_usable_after_close: false,
            fetch_delay: None,
            data_available: AtomicBool::new(false),
            rows_delivered: AtomicI64::new(0),
            counters: CallCounters::default(),
        }
    }

    /// Splits `rows` into batches of `batch_size`; the last one is final.
    pub fn from_rows(rows: Vec<Row>, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        let mut steps = Vec::new();
        let mut rows = rows.into_iter().peekable();
        let mut delivered = 0i64;
        loop {
            let batch: Vec<Row> = rows.by_ref().take(batch_size).collect();
            if rows.peek().is_none() {
                steps.push(ScriptStep::Batch(ResultsBatch::last(batch, delivered)));
                break;
            }
            delivered += batch.len() as i64;
            steps.push(ScriptStep::Batch(ResultsBatch::partial(batch)));
        }
        Self::new(steps)
    }

    pub fn with_execute_error(mut self, err: ConnectorError) -> Self {
        self.execute_error = Some(err);
        self
    }

    pub fn with_copy_lobs(mut self, copy_lobs: bool) -> Self {
        self.copy_lobs = copy_lobs;
        self
    }

    pub fn with_lobs_usable_after_close(mut self, usable: bool) -> Self {
        self.lobs_usable_after_close = usable;
        self
    }

    /// Makes every `more()` call take at least `delay`.
    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    pub fn set_data_available(&self, available: bool) {
        self.data_available.store(available, Ordering::Release);
    }

    pub fn execute_calls(&self) -> usize {
        self.counters.execute.load(Ordering::Acquire)
    }

    pub fn more_calls(&self) -> usize {
        self.counters.more.load(Ordering::Acquire)
    }

    pub fn cancel_calls(&self) -> usize {
        self.counters.cancel.load(Ordering::Acquire)
    }

    pub fn close_calls(&self) -> usize {
        self.counters.close.load(Ordering::Acquire)
    }

    /// Highest number of `more()` calls observed running at once.
    pub fn max_concurrent_fetches(&self) -> usize {
        self.counters.max_in_flight.load(Ordering::Acquire)
    }

    fn next_step(&self) -> ScriptStep {
        let mut steps = self.steps.lock().expect("values connector lock");
        steps.pop_front().unwrap_or_else(|| {
            ScriptStep::Batch(ResultsBatch::last(
                Vec::new(),
                self.rows_delivered.load(Ordering::Acquire),
            ))
        })
    }
}

impl ConnectorWork for ValuesConnectorWork {
    fn execute(&self) -> Result<(), ConnectorError> {
        self.counters.execute.fetch_add(1, Ordering::AcqRel);
        match &self.execute_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn more(&self) -> Result<FetchOutcome, ConnectorError> {
        self.counters.more.fetch_add(1, Ordering::AcqRel);
        let running = self.counters.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.counters
            .max_in_flight
            .fetch_max(running, Ordering::AcqRel);
        if let Some(delay) = self.fetch_delay {
            std::thread::sleep(delay);
        }
        let step = self.next_step();
        self.counters.in_flight.fetch_sub(1, Ordering::AcqRel);
        match step {
            ScriptStep::Batch(batch) => {
                self.rows_delivered
                    .fetch_add(batch.rows.len() as i64, Ordering::AcqRel);
                Ok(FetchOutcome::Batch(batch))
            }
            ScriptStep::NotAvailable(hint) => Ok(FetchOutcome::NotAvailable(hint)),
            ScriptStep::Fail(err) => Err(err),
        }
    }

    fn cancel(&self) {
        self.counters.cancel.fetch_add(1, Ordering::AcqRel);
    }

    fn close(&self) {
        self.counters.close.fetch_add(1, Ordering::AcqRel);
    }

    fn is_data_available(&self) -> bool {
        self.data_available.load(Ordering::Acquire)
    }

    fn copy_lobs(&self) -> bool {
        self.copy_lobs
    }

    fn are_lobs_usable_after_close(&self) -> bool {
        self.lobs_usable_after_close
    }
}

/// Connector serving named in-memory tables.
pub struct ValuesConnector {
    name: String,
    batch_size: usize,
    tables: HashMap<String, Vec<Row>>,
}

impl ValuesConnector {
    pub fn new(name: impl Into<String>, batch_size: usize) -> Self {
        Self {
            name: name.into(),
            batch_size,
            tables: HashMap::new(),
        }
    }

    pub fn with_table(mut self, name: impl Into<String>, rows: Vec<Row>) -> Self {
        self.tables.insert(name.into(), rows);
        self
    }

    fn update_count(&self, command: &Command) -> Result<i32, ConnectorError> {
        let rows_in = |name: &str| -> Result<i32, ConnectorError> {
            let rows = self
                .tables
                .get(name)
                .ok_or_else(|| ConnectorError::failed(format!("table not found: {}", name)))?;
            i32::try_from(rows.len())
                .map_err(|_| ConnectorError::Processing(format!("table too large: {}", name)))
        };
        match command {
            Command::Insert { .. } => Ok(1),
            Command::Update { target } | Command::Delete { target } => rows_in(&target.name),
            Command::Query { .. } | Command::BatchedUpdate(_) => Err(ConnectorError::Processing(
                "not a single update command".to_string(),
            )),
        }
    }
}

impl ConnectorFactory for ValuesConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_work(&self, request: &AtomicRequest) -> Result<Arc<dyn ConnectorWork>, ConnectorError> {
        let work = match request.command() {
            Command::Query { from, .. } => {
                let rows = self
                    .tables
                    .get(&from.name)
                    .ok_or_else(|| ConnectorError::failed(format!("table not found: {}", from.name)))?;
                ValuesConnectorWork::from_rows(rows.clone(), self.batch_size)
            }
            Command::BatchedUpdate(commands) => {
                let counts = commands
                    .iter()
                    .map(|c| self.update_count(c).map(|n| vec![Value::Integer(n)]))
                    .collect::<Result<Vec<_>, _>>()?;
                ValuesConnectorWork::new(vec![ScriptStep::Batch(ResultsBatch::last(counts, 0))])
            }
            single => {
                let count = self.update_count(single)?;
                ValuesConnectorWork::new(vec![ScriptStep::Batch(ResultsBatch::last(
                    vec![vec![Value::Integer(count)]],
                    0,
                ))])
            }
        };
        Ok(Arc::new(work))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(n: i32) -> Vec<Row> {
        (0..n).map(|i| vec![Value::Integer(i)]).collect()
    }

    fn fetch_batch(work: &ValuesConnectorWork) -> ResultsBatch {
        match work.more().expect("more") {
            FetchOutcome::Batch(batch) => batch,
            other => panic!("expected batch, got {:?}", other),
        }
    }

    #[test]
    fn rows_are_split_into_batches_with_final_marker() {
        let work = ValuesConnectorWork::from_rows(rows(5), 2);
        let first = fetch_batch(&work);
        assert_eq!(first.rows.len(), 2);
        assert!(!first.is_final());
        let _ = fetch_batch(&work);
        let last = fetch_batch(&work);
        assert_eq!(last.rows, vec![vec![Value::Integer(4)]]);
        assert_eq!(last.final_row, 5);
        assert_eq!(work.more_calls(), 3);
    }

    #[test]
    fn empty_table_yields_one_empty_final_batch() {
        let work = ValuesConnectorWork::from_rows(Vec::new(), 10);
        let batch = fetch_batch(&work);
        assert!(batch.rows.is_empty());
        assert_eq!(batch.final_row, 0);
    }

    #[test]
    fn exhausted_script_keeps_returning_final_batches() {
        let work = ValuesConnectorWork::new(vec![ScriptStep::Batch(ResultsBatch::partial(rows(3)))]);
        let _ = fetch_batch(&work);
        assert_eq!(fetch_batch(&work).final_row, 3);
    }

    #[test]
    fn lob_streams_count_opens() {
        let lob = ValuesLob::new(b"abc".to_vec());
        let Value::Stream(stream) = lob.binary_stream() else {
            panic!("expected stream");
        };
        let mut out = Vec::new();
        stream
            .source
            .open()
            .expect("open")
            .read_to_end(&mut out)
            .expect("read");
        assert_eq!(out, b"abc");
        assert_eq!(lob.opens(), 1);
    }
}
