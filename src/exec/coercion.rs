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
//! Per-column type normalization of connector rows.
//!
//! Responsibilities:
//! - Converts raw connector values to runtime values, then to the projected column type.
//! - Remembers per column when a step turned out to be a no-op and skips it afterwards.
//! - Spools LOBs the connector asks to copy into one lazily created file store.
//!
//! Key exported interfaces:
//! - Types: `SchemaDescriptor`, `ValueCoercionPipeline`, `LobPolicy`.
//!
//! Current limitations:
//! - The spool store is created at most once; LOBs arriving after `release_spool` are rejected.

use std::sync::Arc;

use super::command::ProjectedColumn;
use super::value::{DataType, Row, Value, to_runtime, transform};
use crate::common::error::{DataTierError, Result};
use crate::datatier_logging::debug;
use crate::runtime::buffer_manager::{BufferManager, FileStore};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColumnSpec {
    pub data_type: DataType,
    pub is_lob: bool,
}

/// Expected runtime type of every projected column.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchemaDescriptor {
    columns: Vec<ColumnSpec>,
}

impl SchemaDescriptor {
    pub fn from_columns(columns: &[ProjectedColumn]) -> Self {
        Self {
            columns: columns
                .iter()
                .map(|c| ColumnSpec {
                    data_type: c.data_type,
                    is_lob: c.data_type.is_lob(),
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column(&self, index: usize) -> Option<ColumnSpec> {
        self.columns.get(index).copied()
    }
}

/// LOB handling the connector asks for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LobPolicy {
    pub copy_lobs: bool,
    pub usable_after_close: bool,
}

// Per-column flags; true while the step may still change values.
struct CoercionMemo {
    to_runtime: Vec<bool>,
    to_desired: Vec<bool>,
}

struct LobSpool {
    store: Arc<dyn FileStore>,
    buffer: Vec<u8>,
}

pub struct ValueCoercionPipeline {
    schema: SchemaDescriptor,
    memo: CoercionMemo,
    buffer_manager: Arc<dyn BufferManager>,
    transfer_buffer_bytes: usize,
    spool: Option<LobSpool>,
    spool_created: bool,
    explicit_close: bool,
}

impl ValueCoercionPipeline {
    pub fn new(
        schema: SchemaDescriptor,
        buffer_manager: Arc<dyn BufferManager>,
        transfer_buffer_bytes: usize,
    ) -> Self {
        let width = schema.len();
        Self {
            schema,
            memo: CoercionMemo {
                to_runtime: vec![true; width],
                to_desired: vec![true; width],
            },
            buffer_manager,
            transfer_buffer_bytes: transfer_buffer_bytes.max(1),
            spool: None,
            spool_created: false,
            explicit_close: false,
        }
    }

    pub fn schema(&self) -> &SchemaDescriptor {
        &self.schema
    }

    /// Set once a connector-held LOB was handed out that becomes unreadable
    /// when the connector closes.
    pub fn requires_explicit_close(&self) -> bool {
        self.explicit_close
    }

    pub fn has_spool(&self) -> bool {
        self.spool.is_some()
    }

    /// True once both steps proved to be no-ops for `column`.
    pub fn is_stable(&self, column: usize) -> bool {
        !self.memo.to_runtime.get(column).copied().unwrap_or(true)
            && !self.memo.to_desired.get(column).copied().unwrap_or(true)
    }

    /// Drops the spool store and transfer buffer. Spooled LOBs already
    /// handed out keep the store alive.
    pub fn release_spool(&mut self) {
        self.spool = None;
    }

    /// Coerces `row` in place; values keep their positions and nulls pass through.
    pub fn correct_types(&mut self, mut row: Row, policy: LobPolicy) -> Result<Row> {
        if row.len() != self.schema.len() {
            return Err(DataTierError::Component(format!(
                "row has {} values but {} columns are projected",
                row.len(),
                self.schema.len()
            )));
        }
        for (i, value) in row.iter_mut().enumerate() {
            if value.is_null() {
                continue;
            }
            let column = self.schema.columns[i];
            if self.memo.to_runtime[i] {
                match to_runtime(value, column.data_type) {
                    // Object columns may see a connector-native value later.
                    None if column.data_type != DataType::Object => self.memo.to_runtime[i] = false,
                    None => {}
                    Some(result) => {
                        if column.is_lob
                            && !policy.copy_lobs
                            && !policy.usable_after_close
                            && result.as_lob().is_some_and(|lob| lob.is_connector_backed())
                        {
                            self.explicit_close = true;
                        }
                        *value = result;
                    }
                }
            }
            if !self.memo.to_desired[i] {
                continue;
            }
            let transformed = transform(value, column.data_type).map_err(DataTierError::Transformation)?;
            if column.is_lob && policy.copy_lobs {
                let current = transformed.unwrap_or_else(|| value.clone());
                let Some(lob) = current.as_lob() else {
                    return Err(DataTierError::Transformation(format!(
                        "column {} expects {} but the value is not a large object",
                        i, column.data_type
                    )));
                };
                if self.spool.is_none() {
                    self.spool = Some(self.create_spool()?);
                }
                let Some(spool) = self.spool.as_mut() else {
                    continue;
                };
                let persisted = self
                    .buffer_manager
                    .persist_lob(lob, &spool.store, &mut spool.buffer)?;
                *value = Value::from_lob(persisted);
            } else {
                match transformed {
                    Some(result) => *value = result,
                    None => self.memo.to_desired[i] = false,
                }
            }
        }
        Ok(row)
    }

    fn create_spool(&mut self) -> Result<LobSpool> {
        if self.spool_created {
            return Err(DataTierError::Component(
                "lob spool was already released".to_string(),
            ));
        }
        let store = self.buffer_manager.create_file_store("lobs")?;
        self.spool_created = true;
        debug!(
            "created lob spool store '{}' with {} byte transfer buffer",
            store.name(),
            self.transfer_buffer_bytes
        );
        Ok(LobSpool {
            store,
            buffer: vec![0u8; self.transfer_buffer_bytes],
        })
    }
}
