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
//! Data modification events raised by update commands.

use chrono::{DateTime, Utc};

use super::atomic_request::AtomicRequest;
use super::value::Value;
use crate::connector::ResultsBatch;
use crate::datatier_logging::debug;

/// Receives table modification events, e.g. to invalidate result caches.
pub trait EventDistributor: Send + Sync {
    fn data_modification(&self, vdb_name: &str, vdb_version: &str, schema_name: &str, table_name: &str);
}

/// Records the modification time of every table an update in `batch`
/// changed and notifies `distributor`.
///
/// Targets without physical table metadata and updates that report a zero
/// count are skipped. Returns the number of tables marked modified.
pub fn check_for_updates(
    request: &AtomicRequest,
    batch: &ResultsBatch,
    distributor: Option<&dyn EventDistributor>,
    at: DateTime<Utc>,
) -> usize {
    let context = request.command_context();
    let mut modified = 0;
    for (command_index, target) in request.command().update_targets().into_iter().enumerate() {
        let Some(target) = target else {
            continue;
        };
        let Some(row) = batch.rows.get(command_index) else {
            continue;
        };
        if row.first().is_some_and(is_zero_count) {
            continue;
        }
        let Some(table) = target.metadata.as_ref() else {
            continue;
        };
        table.set_last_data_modification(at);
        modified += 1;
        if let Some(distributor) = distributor {
            debug!(
                "distributing data modification for {} in {}.{}",
                table.full_name(),
                context.vdb_name(),
                context.vdb_version()
            );
            distributor.data_modification(
                context.vdb_name(),
                context.vdb_version(),
                table.schema_name(),
                table.table_name(),
            );
        }
    }
    modified
}

fn is_zero_count(value: &Value) -> bool {
    match value {
        Value::Byte(n) => *n == 0,
        Value::Short(n) => *n == 0,
        Value::Integer(n) => *n == 0,
        Value::Long(n) => *n == 0,
        Value::BigInteger(n) => *n == 0,
        Value::UnsignedLong(n) => *n == 0,
        _ => false,
    }
}
