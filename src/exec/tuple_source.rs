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
//! Execution of one atomic request against its connector.
//!
//! Responsibilities:
//! - Drives `ConnectorWork` either inline (serial requests) or through one
//!   outstanding fetch unit on the host scheduler, with read-ahead.
//! - Turns "not available yet" hints into non-blocking `Blocked` results,
//!   retry timers, and strict wait gates.
//! - Coerces every emitted row, enforces the row limit, and degrades source
//!   failures to partial results when the request allows it.
//! - Defers connector close until an in-flight fetch unit has finished.
//!
//! Key exported interfaces:
//! - Types: `AtomicRequestExecution`, `NextTuple`, `BlockedReason`, `ExecutionState`, `CancelHandle`.
//!
//! Current limitations:
//! - `next_tuple` and `close_source` must be called by one owner at a time;
//!   `CancelHandle` is the only handle meant for other threads.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;

use super::atomic_request::{AtomicRequest, SourceWarning};
use super::change_events::{EventDistributor, check_for_updates};
use super::coercion::{LobPolicy, SchemaDescriptor, ValueCoercionPipeline};
use super::data_tier::ExecOptions;
use super::value::Row;
use crate::common::error::{ConnectorError, DataTierError, Result};
use crate::common::ids::AtomicRequestId;
use crate::connector::{CacheScope, ConnectorWork, DataNotAvailable, FetchOutcome, ResultsBatch};
use crate::datatier_logging::{debug, warn};
use crate::runtime::buffer_manager::BufferManager;
use crate::runtime::future_work::{FutureWork, submit_work};
use crate::runtime::scheduler::{CancelableTimer, WorkScheduler};

/// Why `next_tuple` could not produce a row yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockedReason {
    /// A fetch unit is queued or running.
    SourceQuery,
    /// Strict wait: no fetch before this instant unless the source reports data.
    Deadline(Instant),
    /// Lenient wait: a re-poll is scheduled after this delay.
    RetryAfter(Duration),
    /// Waiting for the source to signal availability.
    Notification,
}

#[derive(Clone, Debug, PartialEq)]
pub enum NextTuple {
    Row(Row),
    Done,
    Blocked(BlockedReason),
}

/// Observable lifecycle state of an execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionState {
    Created,
    Executing,
    HasBatch,
    Draining,
    Exhausted,
    Canceled,
    Errored,
    Closed,
}

struct HeldBatch {
    rows: std::vec::IntoIter<Row>,
    is_final: bool,
}

enum Phase {
    Created,
    Executing,
    HasBatch(HeldBatch),
    Draining(HeldBatch),
    Exhausted,
    Canceled,
    Errored,
    Closed,
}

impl Phase {
    fn state(&self) -> ExecutionState {
        match self {
            Phase::Created => ExecutionState::Created,
            Phase::Executing => ExecutionState::Executing,
            Phase::HasBatch(_) => ExecutionState::HasBatch,
            Phase::Draining(_) => ExecutionState::Draining,
            Phase::Exhausted => ExecutionState::Exhausted,
            Phase::Canceled => ExecutionState::Canceled,
            Phase::Errored => ExecutionState::Errored,
            Phase::Closed => ExecutionState::Closed,
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(
            self,
            Phase::Exhausted | Phase::Canceled | Phase::Errored | Phase::Closed
        )
    }
}

enum RowStep {
    Row(Row),
    NeedBatch,
    EndOfStream,
}

enum Fetched {
    Pending,
    Abandoned,
    Outcome(FetchOutcome),
    Failed(ConnectorError),
}

#[derive(Clone, Copy, Debug)]
enum WaitGate {
    Until(Instant),
    Indefinite,
}

type FetchResult = std::result::Result<Option<FetchOutcome>, ConnectorError>;

// Shared state bits.
const CLOSED: usize = 1 << 0;
const CANCELED: usize = 1 << 1;
const CANCEL_ASYNC: usize = 1 << 2;
const RUNNING: usize = 1 << 3;
const CAN_ASYNC_CLOSE: usize = 1 << 4;
const CONNECTOR_CLOSED: usize = 1 << 5;
const EXECUTED: usize = 1 << 6;
const DONE: usize = 1 << 7;

/// State touched by both the owner and worker threads.
struct ExecutionShared {
    id: AtomicRequestId,
    serial: bool,
    flags: AtomicUsize,
    connector: Arc<dyn ConnectorWork>,
    scheduler: Arc<dyn WorkScheduler>,
}

impl ExecutionShared {
    fn is_set(&self, flag: usize) -> bool {
        self.flags.load(Ordering::SeqCst) & flag != 0
    }

    fn set(&self, flag: usize) -> usize {
        self.flags.fetch_or(flag, Ordering::SeqCst)
    }

    fn get_results(&self) -> FetchResult {
        if self.is_set(CANCEL_ASYNC) {
            return Ok(None);
        }
        self.set(RUNNING);
        if self.set(EXECUTED) & EXECUTED == 0 {
            self.connector.execute()?;
        }
        self.connector.more().map(Some)
    }

    // Runs on the worker before the outcome is published.
    fn unit_finished(&self) {
        let prev = self
            .flags
            .fetch_and(!(RUNNING | CAN_ASYNC_CLOSE), Ordering::SeqCst);
        if prev & CLOSED != 0 {
            debug!("closing connector for {} after fetch completed", self.id);
            self.close_connector();
        }
    }

    fn close_connector(&self) {
        if self.set(CONNECTOR_CLOSED) & CONNECTOR_CLOSED == 0 {
            self.connector.close();
        }
    }

    fn fully_close_source(self: &Arc<Self>) {
        let prev = self.set(CANCEL_ASYNC | CLOSED);
        if prev & CLOSED != 0 {
            return;
        }
        self.scheduler.close_atomic_request(self.id);
        if self.serial {
            self.close_connector();
        } else if prev & CAN_ASYNC_CLOSE == 0 {
            let shared = Arc::clone(self);
            self.scheduler
                .submit_high_priority(Box::new(move || shared.close_connector()));
        } else {
            debug!("deferring connector close for {} until fetch completes", self.id);
        }
    }

    // Nothing is in flight and the scheduler refuses work: close on the caller.
    fn close_inline(&self) {
        if self.set(CANCEL_ASYNC | CLOSED) & CLOSED == 0 {
            self.scheduler.close_atomic_request(self.id);
        }
        self.close_connector();
    }

    fn cancel_request(&self) {
        if self.set(CANCELED) & CANCELED != 0 {
            return;
        }
        debug!("canceling atomic request {}", self.id);
        self.connector.cancel();
        self.scheduler.more_work();
    }
}

struct UnitGuard(Arc<ExecutionShared>);

impl Drop for UnitGuard {
    fn drop(&mut self) {
        self.0.unit_finished();
    }
}

/// Thread-safe handle for canceling or closing an execution from outside
/// its owner.
#[derive(Clone)]
pub struct CancelHandle {
    shared: Arc<ExecutionShared>,
}

impl CancelHandle {
    pub fn cancel_request(&self) {
        self.shared.cancel_request();
    }

    pub fn fully_close_source(&self) {
        self.shared.fully_close_source();
    }

    pub fn is_canceled(&self) -> bool {
        self.shared.is_set(CANCELED)
    }
}

/// Tuple source for one atomic request.
pub struct AtomicRequestExecution {
    request: AtomicRequest,
    shared: Arc<ExecutionShared>,
    coercion: ValueCoercionPipeline,
    distributor: Option<Arc<dyn EventDistributor>>,
    options: ExecOptions,
    phase: Phase,
    outstanding: Option<FutureWork<FetchResult>>,
    retry_timer: Option<CancelableTimer>,
    wait_gate: Option<WaitGate>,
    remaining_limit: Option<u64>,
    rows_processed: i64,
    batches_received: u64,
    explicit_close: bool,
    scope: Option<CacheScope>,
}

impl AtomicRequestExecution {
    /// Registers the request with `scheduler` and, unless it runs serially,
    /// submits the first fetch.
    pub fn new(
        request: AtomicRequest,
        connector: Arc<dyn ConnectorWork>,
        scheduler: Arc<dyn WorkScheduler>,
        buffer_manager: Arc<dyn BufferManager>,
        distributor: Option<Arc<dyn EventDistributor>>,
        options: ExecOptions,
    ) -> Result<Self> {
        scheduler
            .register_atomic_request(request.id())
            .map_err(DataTierError::Component)?;
        let schema = SchemaDescriptor::from_columns(&request.command().projected_columns());
        let coercion =
            ValueCoercionPipeline::new(schema, buffer_manager, options.lob_transfer_buffer_bytes);
        let shared = Arc::new(ExecutionShared {
            id: request.id(),
            serial: request.is_serial(),
            flags: AtomicUsize::new(0),
            connector,
            scheduler,
        });
        let mut execution = Self {
            remaining_limit: request.row_limit(),
            request,
            shared,
            coercion,
            distributor,
            options,
            phase: Phase::Created,
            outstanding: None,
            retry_timer: None,
            wait_gate: None,
            rows_processed: 0,
            batches_received: 0,
            explicit_close: false,
            scope: None,
        };
        if !execution.request.is_serial() && execution.remaining_limit != Some(0) {
            execution.submit_fetch()?;
        }
        Ok(execution)
    }

    /// Returns the next row, `Done`, or `Blocked` without ever blocking the
    /// calling thread.
    ///
    /// A component failure closes the connector before it is returned.
    pub fn next_tuple(&mut self) -> Result<NextTuple> {
        match self.poll_next() {
            Err(err) if err.is_component() => Err(self.component_failed(err)),
            other => other,
        }
    }

    fn component_failed(&mut self, err: DataTierError) -> DataTierError {
        warn!(
            "atomic request {} on {} failed: {}",
            self.shared.id,
            self.connector_name(),
            err
        );
        self.phase = Phase::Errored;
        if let Some(timer) = self.retry_timer.take() {
            timer.cancel();
        }
        self.shared.fully_close_source();
        err
    }

    fn poll_next(&mut self) -> Result<NextTuple> {
        if self.shared.is_set(CANCELED) {
            if !self.phase.is_terminal() {
                self.phase = Phase::Canceled;
            }
            return Ok(NextTuple::Done);
        }
        if self.shared.is_set(CLOSED) {
            if !matches!(self.phase, Phase::Errored) {
                self.phase = Phase::Closed;
            }
            return Ok(NextTuple::Done);
        }
        if self.phase.is_terminal() {
            return Ok(NextTuple::Done);
        }
        if let Some(reason) = self.check_wait_gate() {
            return Ok(NextTuple::Blocked(reason));
        }
        loop {
            match self.take_row() {
                RowStep::Row(row) => {
                    if let Some(remaining) = self.remaining_limit.as_mut() {
                        if *remaining == 0 {
                            return Ok(self.finish_exhausted());
                        }
                        *remaining -= 1;
                    }
                    let policy = self.lob_policy();
                    return match self.coercion.correct_types(row, policy) {
                        Ok(row) => Ok(NextTuple::Row(row)),
                        Err(err) => {
                            self.phase = Phase::Errored;
                            Err(err)
                        }
                    };
                }
                RowStep::EndOfStream => return Ok(self.finish_exhausted()),
                RowStep::NeedBatch => {}
            }
            if self.remaining_limit == Some(0) {
                return Ok(self.finish_exhausted());
            }
            match self.fetch()? {
                Fetched::Pending => return Ok(NextTuple::Blocked(BlockedReason::SourceQuery)),
                Fetched::Abandoned => {
                    self.phase = Phase::Closed;
                    return Ok(NextTuple::Done);
                }
                Fetched::Outcome(FetchOutcome::Batch(batch)) => {
                    self.detect_changes(&batch);
                    self.receive_results(batch, false);
                }
                Fetched::Outcome(FetchOutcome::NotAvailable(hint)) => {
                    if let Some(reason) = self.handle_data_not_available(hint) {
                        return Ok(NextTuple::Blocked(reason));
                    }
                }
                Fetched::Failed(err) => {
                    let batch = self.exception_occurred(err)?;
                    self.receive_results(batch, true);
                }
            }
        }
    }

    /// Releases per-request resources and closes the connector unless a
    /// handed-out LOB still depends on it. Safe to call more than once.
    pub fn close_source(&mut self) {
        if let Some(timer) = self.retry_timer.take() {
            timer.cancel();
        }
        self.coercion.release_spool();
        if !matches!(self.phase, Phase::Errored) {
            self.phase = Phase::Closed;
        }
        self.shared.set(CANCEL_ASYNC);
        if self.explicit_close || self.coercion.requires_explicit_close() {
            debug!(
                "atomic request {} left open for explicit close",
                self.shared.id
            );
            return;
        }
        self.shared.fully_close_source();
    }

    /// Closes the connector now, or once the in-flight fetch completes.
    pub fn fully_close_source(&self) {
        self.shared.fully_close_source();
    }

    /// Asks the connector to stop; the next `next_tuple` returns `Done`.
    pub fn cancel_request(&self) {
        self.shared.cancel_request();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// True once the final batch arrived or the row limit was reached.
    pub fn is_done(&self) -> bool {
        self.shared.is_set(DONE)
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_set(RUNNING)
    }

    /// True while a submitted fetch waits for a worker.
    pub fn is_queued(&self) -> bool {
        !self.is_running() && self.outstanding.as_ref().is_some_and(|f| !f.is_done())
    }

    pub fn is_canceled(&self) -> bool {
        self.shared.is_set(CANCELED)
    }

    pub fn is_transactional(&self) -> bool {
        self.request.is_transactional()
    }

    /// True when closing must wait for an explicit `fully_close_source`.
    pub fn requires_explicit_close(&self) -> bool {
        self.explicit_close || self.coercion.requires_explicit_close()
    }

    pub fn connector_name(&self) -> &str {
        self.request.connector_name()
    }

    pub fn atomic_request(&self) -> &AtomicRequest {
        &self.request
    }

    /// Cache scope of the last received batch.
    pub fn scope(&self) -> Option<CacheScope> {
        self.scope
    }

    pub fn state(&self) -> ExecutionState {
        self.phase.state()
    }

    pub fn rows_processed(&self) -> i64 {
        self.rows_processed
    }

    fn lob_policy(&self) -> LobPolicy {
        LobPolicy {
            copy_lobs: self.shared.connector.copy_lobs(),
            usable_after_close: self.shared.connector.are_lobs_usable_after_close(),
        }
    }

    fn take_row(&mut self) -> RowStep {
        match std::mem::replace(&mut self.phase, Phase::Executing) {
            Phase::HasBatch(mut held) | Phase::Draining(mut held) => match held.rows.next() {
                Some(row) => {
                    self.phase = Phase::Draining(held);
                    RowStep::Row(row)
                }
                None if held.is_final => RowStep::EndOfStream,
                None => RowStep::NeedBatch,
            },
            other => {
                self.phase = other;
                RowStep::NeedBatch
            }
        }
    }

    fn finish_exhausted(&mut self) -> NextTuple {
        self.phase = Phase::Exhausted;
        self.shared.set(DONE);
        NextTuple::Done
    }

    fn check_wait_gate(&mut self) -> Option<BlockedReason> {
        let gate = self.wait_gate?;
        let reason = match gate {
            WaitGate::Until(deadline) if Instant::now() < deadline => BlockedReason::Deadline(deadline),
            WaitGate::Until(_) => {
                self.wait_gate = None;
                return None;
            }
            WaitGate::Indefinite => BlockedReason::Notification,
        };
        if self.shared.connector.is_data_available() {
            self.wait_gate = None;
            return None;
        }
        Some(reason)
    }

    fn fetch(&mut self) -> Result<Fetched> {
        if matches!(self.phase, Phase::Created) {
            self.phase = Phase::Executing;
        }
        if self.outstanding.is_some() || !self.request.is_serial() {
            return self.async_get();
        }
        let result = self.shared.get_results();
        self.shared.unit_finished();
        Ok(Self::classify(result))
    }

    fn classify(result: FetchResult) -> Fetched {
        match result {
            Ok(Some(outcome)) => Fetched::Outcome(outcome),
            Ok(None) => Fetched::Abandoned,
            Err(err) => Fetched::Failed(err),
        }
    }

    fn async_get(&mut self) -> Result<Fetched> {
        if self.outstanding.is_none() {
            self.submit_fetch()?;
        }
        let Some(future) = self.outstanding.as_ref() else {
            return Ok(Fetched::Pending);
        };
        if !future.is_done() {
            return Ok(Fetched::Pending);
        }
        let outcome = self.outstanding.take().and_then(|f| f.take());
        let result = match outcome {
            Some(Ok(result)) => result,
            Some(Err(panic_message)) => {
                return Err(DataTierError::Component(format!(
                    "fetch for atomic request {} panicked: {}",
                    self.shared.id, panic_message
                )));
            }
            None => {
                return Err(DataTierError::Component(format!(
                    "fetch result for atomic request {} was already consumed",
                    self.shared.id
                )));
            }
        };
        if let Ok(Some(FetchOutcome::Batch(batch))) = &result
            && !batch.is_final()
        {
            debug!("read-ahead fetch for atomic request {}", self.shared.id);
            self.submit_fetch()?;
        }
        Ok(Self::classify(result))
    }

    fn submit_fetch(&mut self) -> Result<()> {
        if self.outstanding.is_some() {
            return Err(DataTierError::Component(format!(
                "atomic request {} already has an outstanding fetch",
                self.shared.id
            )));
        }
        if self.shared.is_set(CANCEL_ASYNC) {
            return Ok(());
        }
        self.shared.set(CAN_ASYNC_CLOSE);
        let work_shared = Arc::clone(&self.shared);
        let listener_shared = Arc::clone(&self.shared);
        let future = submit_work(
            self.shared.scheduler.as_ref(),
            self.options.fetch_work_priority,
            move || {
                let _guard = UnitGuard(Arc::clone(&work_shared));
                work_shared.get_results()
            },
            move || {
                if !listener_shared.is_set(CANCEL_ASYNC | CANCELED) {
                    listener_shared.scheduler.more_work();
                }
            },
        );
        match future {
            Some(future) => {
                debug!("submitted fetch for atomic request {}", self.shared.id);
                self.phase = match std::mem::replace(&mut self.phase, Phase::Executing) {
                    Phase::Created => Phase::Executing,
                    other => other,
                };
                self.outstanding = Some(future);
                Ok(())
            }
            None => {
                self.shared
                    .flags
                    .fetch_and(!CAN_ASYNC_CLOSE, Ordering::SeqCst);
                self.shared.close_inline();
                Err(DataTierError::Component(format!(
                    "scheduler rejected fetch for atomic request {}",
                    self.shared.id
                )))
            }
        }
    }

    fn handle_data_not_available(&mut self, hint: DataNotAvailable) -> Option<BlockedReason> {
        let now = Instant::now();
        if let Some(deadline) = hint.wait_until {
            if deadline <= now {
                return None;
            }
            self.schedule_more_work(deadline - now);
            debug!(
                "atomic request {} waiting until deadline, strict={}",
                self.shared.id, hint.strict
            );
            if hint.strict {
                self.wait_gate = Some(WaitGate::Until(deadline));
                return Some(BlockedReason::Deadline(deadline));
            }
            return Some(BlockedReason::RetryAfter(deadline - now));
        }
        if let Some(delay) = hint.retry_delay {
            self.schedule_more_work(delay);
            debug!(
                "atomic request {} retrying after {:?}, strict={}",
                self.shared.id, delay, hint.strict
            );
            if hint.strict {
                let deadline = now + delay;
                self.wait_gate = Some(WaitGate::Until(deadline));
                return Some(BlockedReason::Deadline(deadline));
            }
            return Some(BlockedReason::RetryAfter(delay));
        }
        if self.shared.connector.is_data_available() {
            return None;
        }
        if hint.strict {
            self.wait_gate = Some(WaitGate::Indefinite);
        }
        Some(BlockedReason::Notification)
    }

    fn schedule_more_work(&mut self, delay: Duration) {
        if let Some(timer) = self.retry_timer.take() {
            timer.cancel();
        }
        let scheduler = Arc::clone(&self.shared.scheduler);
        self.retry_timer = Some(self.shared.scheduler.schedule_delayed(
            Box::new(move || scheduler.more_work()),
            self.options.retry_timer_priority,
            delay,
        ));
    }

    fn exception_occurred(&mut self, err: ConnectorError) -> Result<ResultsBatch> {
        if self.request.use_partial_results() {
            warn!(
                "atomic request {} on {} failed, continuing with partial results: {}",
                self.shared.id,
                self.connector_name(),
                err
            );
            let mut batch = ResultsBatch::last(Vec::new(), self.rows_processed);
            batch.warnings.push(err);
            return Ok(batch);
        }
        self.phase = Phase::Errored;
        self.shared.fully_close_source();
        Err(DataTierError::from_connector(self.connector_name(), err))
    }

    fn receive_results(&mut self, batch: ResultsBatch, partial: bool) {
        self.batches_received += 1;
        self.scope = batch.scope;
        self.explicit_close |= !batch.supports_implicit_close;
        self.rows_processed += batch.rows.len() as i64;
        let context = self.request.command_context();
        for warning in batch.warnings {
            context.add_warning(SourceWarning {
                model_name: self.request.model_name().to_string(),
                connector_name: self.request.connector_name().to_string(),
                error: warning,
                partial_results: partial,
            });
        }
        let is_final = batch.final_row >= 0;
        if is_final {
            self.shared.set(DONE);
        }
        self.phase = Phase::HasBatch(HeldBatch {
            rows: batch.rows.into_iter(),
            is_final,
        });
    }

    fn detect_changes(&self, batch: &ResultsBatch) {
        if self.batches_received > 0
            || !self.options.detect_change_events
            || !self.request.command().is_update()
        {
            return;
        }
        let request = &self.request;
        let distributor = self.distributor.as_deref();
        let checked = panic::catch_unwind(AssertUnwindSafe(|| {
            check_for_updates(request, batch, distributor, Utc::now())
        }));
        if checked.is_err() {
            warn!(
                "change event distribution failed for atomic request {}",
                self.shared.id
            );
        }
    }
}
