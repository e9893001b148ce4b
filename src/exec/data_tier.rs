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
//! Entry point that turns atomic requests into executions.

use std::sync::Arc;

use super::atomic_request::AtomicRequest;
use super::change_events::EventDistributor;
use super::tuple_source::AtomicRequestExecution;
use crate::common::config::{
    detect_change_events, fetch_work_priority, lob_transfer_buffer_bytes, retry_timer_priority,
};
use crate::common::error::{DataTierError, Result};
use crate::connector::{ConnectorRegistry, ConnectorWork};
use crate::datatier_logging::debug;
use crate::runtime::buffer_manager::{BufferManager, LocalBufferManager};
use crate::runtime::scheduler::WorkScheduler;

/// Per-execution settings, resolved once when the manager is built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecOptions {
    pub fetch_work_priority: i32,
    pub retry_timer_priority: i32,
    pub lob_transfer_buffer_bytes: usize,
    pub detect_change_events: bool,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            fetch_work_priority: 100,
            retry_timer_priority: 10,
            lob_transfer_buffer_bytes: 1 << 14,
            detect_change_events: false,
        }
    }
}

impl ExecOptions {
    pub fn from_config() -> Self {
        Self {
            fetch_work_priority: fetch_work_priority(),
            retry_timer_priority: retry_timer_priority(),
            lob_transfer_buffer_bytes: lob_transfer_buffer_bytes(),
            detect_change_events: detect_change_events(),
        }
    }
}

pub struct DataTierManager {
    buffer_manager: Arc<dyn BufferManager>,
    distributor: Option<Arc<dyn EventDistributor>>,
    registry: ConnectorRegistry,
    options: ExecOptions,
}

impl DataTierManager {
    pub fn new(buffer_manager: Arc<dyn BufferManager>, options: ExecOptions) -> Self {
        Self {
            buffer_manager,
            distributor: None,
            registry: ConnectorRegistry::new(),
            options,
        }
    }

    /// Manager spooling to `[lob] spool_dir` with options from the loaded config.
    pub fn from_config() -> Self {
        Self::new(
            Arc::new(LocalBufferManager::from_config()),
            ExecOptions::from_config(),
        )
    }

    pub fn with_event_distributor(mut self, distributor: Arc<dyn EventDistributor>) -> Self {
        self.distributor = Some(distributor);
        self
    }

    pub fn with_registry(mut self, registry: ConnectorRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn options(&self) -> &ExecOptions {
        &self.options
    }

    pub fn buffer_manager(&self) -> &Arc<dyn BufferManager> {
        &self.buffer_manager
    }

    pub fn registry(&self) -> &ConnectorRegistry {
        &self.registry
    }

    /// Starts executing `request` on an already created connector unit.
    pub fn execute(
        &self,
        request: AtomicRequest,
        connector: Arc<dyn ConnectorWork>,
        scheduler: Arc<dyn WorkScheduler>,
    ) -> Result<AtomicRequestExecution> {
        debug!(
            "executing atomic request {} on {} (serial={}, limit={:?})",
            request.id(),
            request.connector_name(),
            request.is_serial(),
            request.row_limit()
        );
        AtomicRequestExecution::new(
            request,
            connector,
            scheduler,
            Arc::clone(&self.buffer_manager),
            self.distributor.clone(),
            self.options.clone(),
        )
    }

    /// Creates the connector unit through the registry, then executes.
    pub fn execute_request(
        &self,
        request: AtomicRequest,
        scheduler: Arc<dyn WorkScheduler>,
    ) -> Result<AtomicRequestExecution> {
        let connector = self
            .registry
            .create_work(&request)
            .map_err(|e| DataTierError::from_connector(request.connector_name(), e))?;
        self.execute(request, connector, scheduler)
    }
}
