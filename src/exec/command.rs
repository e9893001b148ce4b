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
//! Commands pushed to a connector and the table metadata they touch.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};

use super::value::DataType;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProjectedColumn {
    pub name: String,
    pub data_type: DataType,
}

impl ProjectedColumn {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// Physical table metadata shared by every command that targets it.
#[derive(Debug)]
pub struct TableMetadata {
    schema_name: String,
    table_name: String,
    // Epoch millis of the last observed modification, 0 if never.
    last_data_modification: AtomicI64,
}

impl TableMetadata {
    pub fn new(schema_name: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            schema_name: schema_name.into(),
            table_name: table_name.into(),
            last_data_modification: AtomicI64::new(0),
        }
    }

    pub fn schema_name(&self) -> &str {
        &self.schema_name
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema_name, self.table_name)
    }

    pub fn last_data_modification(&self) -> Option<DateTime<Utc>> {
        match self.last_data_modification.load(Ordering::Acquire) {
            0 => None,
            millis => DateTime::<Utc>::from_timestamp_millis(millis),
        }
    }

    pub fn set_last_data_modification(&self, at: DateTime<Utc>) {
        self.last_data_modification
            .store(at.timestamp_millis(), Ordering::Release);
    }
}

/// Group (table) named by a command, with metadata when it resolves to a
/// physical table.
#[derive(Clone, Debug)]
pub struct GroupRef {
    pub name: String,
    pub metadata: Option<Arc<TableMetadata>>,
}

impl GroupRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metadata: None,
        }
    }

    pub fn physical(metadata: Arc<TableMetadata>) -> Self {
        Self {
            name: metadata.full_name(),
            metadata: Some(metadata),
        }
    }
}

#[derive(Clone, Debug)]
pub enum Command {
    Query {
        from: GroupRef,
        columns: Vec<ProjectedColumn>,
    },
    Insert {
        target: GroupRef,
    },
    Update {
        target: GroupRef,
    },
    Delete {
        target: GroupRef,
    },
    BatchedUpdate(Vec<Command>),
}

impl Command {
    /// Columns of the rows the connector returns. Updates return one
    /// integer update count per row.
    pub fn projected_columns(&self) -> Vec<ProjectedColumn> {
        match self {
            Command::Query { columns, .. } => columns.clone(),
            _ => vec![ProjectedColumn::new("count", DataType::Integer)],
        }
    }

    pub fn is_update(&self) -> bool {
        !matches!(self, Command::Query { .. })
    }

    /// Target of each update, indexed like the update-count rows. Queries in
    /// a batch contribute `None`.
    pub fn update_targets(&self) -> Vec<Option<&GroupRef>> {
        match self {
            Command::Query { .. } => Vec::new(),
            Command::Insert { target } | Command::Update { target } | Command::Delete { target } => {
                vec![Some(target)]
            }
            Command::BatchedUpdate(commands) => commands
                .iter()
                .map(|command| match command {
                    Command::Insert { target }
                    | Command::Update { target }
                    | Command::Delete { target } => Some(target),
                    _ => None,
                })
                .collect(),
        }
    }
}
