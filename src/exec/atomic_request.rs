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
//! Atomic request description and the per-command diagnostic context.
//!
//! Responsibilities:
//! - Describes one subrequest sent to a single connector; immutable once built.
//! - Collects source warnings raised while the user command runs.
//!
//! Key exported interfaces:
//! - Types: `AtomicRequest`, `AtomicRequestBuilder`, `CommandContext`, `SourceWarning`.

use std::fmt;
use std::sync::{Arc, Mutex};

use super::command::Command;
use crate::common::error::ConnectorError;
use crate::common::ids::AtomicRequestId;

/// Warning raised by a source while executing an atomic request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceWarning {
    pub model_name: String,
    pub connector_name: String,
    pub error: ConnectorError,
    /// True when the warning stands in for a failure tolerated as partial results.
    pub partial_results: bool,
}

impl fmt::Display for SourceWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}: {}",
            self.model_name, self.connector_name, self.error
        )?;
        if self.partial_results {
            write!(f, " (partial results)")?;
        }
        Ok(())
    }
}

/// State shared by every atomic request of one user command.
#[derive(Debug)]
pub struct CommandContext {
    vdb_name: String,
    vdb_version: String,
    warnings: Mutex<Vec<SourceWarning>>,
}

impl CommandContext {
    pub fn new(vdb_name: impl Into<String>, vdb_version: impl Into<String>) -> Self {
        Self {
            vdb_name: vdb_name.into(),
            vdb_version: vdb_version.into(),
            warnings: Mutex::new(Vec::new()),
        }
    }

    pub fn vdb_name(&self) -> &str {
        &self.vdb_name
    }

    pub fn vdb_version(&self) -> &str {
        &self.vdb_version
    }

    pub fn add_warning(&self, warning: SourceWarning) {
        self.warnings
            .lock()
            .expect("command context lock")
            .push(warning);
    }

    pub fn warnings(&self) -> Vec<SourceWarning> {
        self.warnings.lock().expect("command context lock").clone()
    }
}

#[derive(Debug)]
pub struct AtomicRequest {
    id: AtomicRequestId,
    command: Command,
    model_name: String,
    connector_name: String,
    row_limit: Option<u64>,
    serial: bool,
    transactional: bool,
    partial_results: bool,
    command_context: Arc<CommandContext>,
}

impl AtomicRequest {
    pub fn builder(
        id: AtomicRequestId,
        command: Command,
        connector_name: impl Into<String>,
    ) -> AtomicRequestBuilder {
        let connector_name = connector_name.into();
        AtomicRequestBuilder {
            request: AtomicRequest {
                id,
                command,
                model_name: connector_name.clone(),
                connector_name,
                row_limit: None,
                serial: false,
                transactional: false,
                partial_results: false,
                command_context: Arc::new(CommandContext::new("vdb", "1")),
            },
        }
    }

    pub fn id(&self) -> AtomicRequestId {
        self.id
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn connector_name(&self) -> &str {
        &self.connector_name
    }

    pub fn row_limit(&self) -> Option<u64> {
        self.row_limit
    }

    /// Fetches run inline on the owner instead of on worker threads.
    pub fn is_serial(&self) -> bool {
        self.serial
    }

    pub fn is_transactional(&self) -> bool {
        self.transactional
    }

    pub fn use_partial_results(&self) -> bool {
        self.partial_results
    }

    pub fn command_context(&self) -> &Arc<CommandContext> {
        &self.command_context
    }
}

pub struct AtomicRequestBuilder {
    request: AtomicRequest,
}

impl AtomicRequestBuilder {
    pub fn model_name(mut self, model_name: impl Into<String>) -> Self {
        self.request.model_name = model_name.into();
        self
    }

    pub fn row_limit(mut self, limit: u64) -> Self {
        self.request.row_limit = Some(limit);
        self
    }

    pub fn serial(mut self, serial: bool) -> Self {
        self.request.serial = serial;
        self
    }

    pub fn transactional(mut self, transactional: bool) -> Self {
        self.request.transactional = transactional;
        self
    }

    pub fn partial_results(mut self, partial_results: bool) -> Self {
        self.request.partial_results = partial_results;
        self
    }

    pub fn command_context(mut self, context: Arc<CommandContext>) -> Self {
        self.request.command_context = context;
        self
    }

    pub fn build(self) -> AtomicRequest {
        self.request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ids::RequestId;
    use crate::exec::command::GroupRef;

    #[test]
    fn builder_defaults_model_to_connector_name() {
        let request = AtomicRequest::builder(
            AtomicRequestId::new(RequestId(1), 2),
            Command::Delete {
                target: GroupRef::new("pg.orders"),
            },
            "pg",
        )
        .row_limit(10)
        .build();
        assert_eq!(request.model_name(), "pg");
        assert_eq!(request.row_limit(), Some(10));
        assert!(!request.is_serial());
        assert!(!request.use_partial_results());
    }

    #[test]
    fn warning_display_marks_partial_results() {
        let warning = SourceWarning {
            model_name: "crm".into(),
            connector_name: "crm-ws".into(),
            error: ConnectorError::failed("timeout"),
            partial_results: true,
        };
        assert_eq!(warning.to_string(), "crm/crm-ws: timeout (partial results)");
    }
}
