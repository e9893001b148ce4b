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
//! Connector contract driven by atomic request executions.
//!
//! Responsibilities:
//! - Defines the per-request execution unit a data source implements.
//! - Defines result batches and the "not available yet" retry hint.
//! - Keeps a registry of connector factories keyed by connector name.
//!
//! Key exported interfaces:
//! - Traits: `ConnectorWork`, `ConnectorFactory`.
//! - Types: `ResultsBatch`, `FetchOutcome`, `DataNotAvailable`, `CacheScope`, `ConnectorRegistry`.

pub mod values;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::common::error::ConnectorError;
use crate::exec::atomic_request::AtomicRequest;
use crate::exec::value::Row;

pub use values::{ValuesConnector, ValuesConnectorWork};

/// How widely a batch may be cached by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheScope {
    None,
    Session,
    User,
    Vdb,
}

/// Retry hint for a source that has no data yet.
///
/// A strict hint is a hard gate; a lenient one only suggests when to re-poll.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DataNotAvailable {
    pub retry_delay: Option<Duration>,
    pub wait_until: Option<Instant>,
    pub strict: bool,
}

impl DataNotAvailable {
    /// No hint: wait until the source signals availability.
    pub fn no_polling() -> Self {
        Self::default()
    }

    pub fn retry_after(delay: Duration) -> Self {
        Self {
            retry_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn retry_after_strict(delay: Duration) -> Self {
        Self {
            retry_delay: Some(delay),
            strict: true,
            ..Self::default()
        }
    }

    pub fn wait_until(deadline: Instant, strict: bool) -> Self {
        Self {
            wait_until: Some(deadline),
            strict,
            ..Self::default()
        }
    }
}

/// One chunk of rows returned by a connector.
#[derive(Clone, Debug)]
pub struct ResultsBatch {
    pub rows: Vec<Row>,
    /// Negative while more rows are pending, otherwise the total row count
    /// of the stream.
    pub final_row: i64,
    pub warnings: Vec<ConnectorError>,
    pub scope: Option<CacheScope>,
    /// False when the connector must stay open until the owner closes it.
    pub supports_implicit_close: bool,
}

impl ResultsBatch {
    /// A batch with more rows to follow.
    pub fn partial(rows: Vec<Row>) -> Self {
        Self {
            rows,
            final_row: -1,
            warnings: Vec::new(),
            scope: None,
            supports_implicit_close: true,
        }
    }

    /// The last batch, after `rows_before` rows were already delivered.
    pub fn last(rows: Vec<Row>, rows_before: i64) -> Self {
        let final_row = rows_before + rows.len() as i64;
        Self {
            final_row,
            ..Self::partial(rows)
        }
    }

    pub fn is_final(&self) -> bool {
        self.final_row >= 0
    }

    pub fn with_warning(mut self, warning: ConnectorError) -> Self {
        self.warnings.push(warning);
        self
    }

    pub fn with_scope(mut self, scope: CacheScope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn with_explicit_close(mut self) -> Self {
        self.supports_implicit_close = false;
        self
    }
}

/// Result of one `more()` call.
#[derive(Clone, Debug)]
pub enum FetchOutcome {
    Batch(ResultsBatch),
    NotAvailable(DataNotAvailable),
}

/// Connector-specific execution unit for one atomic request.
///
/// `execute` and `more` run on worker threads; `cancel` may be called from
/// any thread while they are running.
pub trait ConnectorWork: Send + Sync {
    fn execute(&self) -> Result<(), ConnectorError>;

    fn more(&self) -> Result<FetchOutcome, ConnectorError>;

    fn cancel(&self);

    fn close(&self);

    fn is_data_available(&self) -> bool {
        false
    }

    /// Whether LOB values must be copied into the request's spool store.
    fn copy_lobs(&self) -> bool {
        false
    }

    fn are_lobs_usable_after_close(&self) -> bool {
        false
    }
}

pub trait ConnectorFactory: Send + Sync {
    fn name(&self) -> &str;

    fn create_work(&self, request: &AtomicRequest) -> Result<Arc<dyn ConnectorWork>, ConnectorError>;
}

#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    factories: HashMap<String, Arc<dyn ConnectorFactory>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, factory: Arc<dyn ConnectorFactory>) {
        self.factories.insert(factory.name().to_string(), factory);
    }

    pub fn get(&self, connector_name: &str) -> Option<Arc<dyn ConnectorFactory>> {
        self.factories.get(connector_name).cloned()
    }

    /// Creates the execution unit for `request` on its named connector.
    pub fn create_work(
        &self,
        request: &AtomicRequest,
    ) -> Result<Arc<dyn ConnectorWork>, ConnectorError> {
        let Some(factory) = self.factories.get(request.connector_name()) else {
            return Err(ConnectorError::Component(format!(
                "unknown connector: {}",
                request.connector_name()
            )));
        };
        factory.create_work(request)
    }
}

impl std::fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.factories.keys().map(String::as_str).collect();
        names.sort();
        f.debug_struct("ConnectorRegistry")
            .field("connectors", &names)
            .finish()
    }
}
