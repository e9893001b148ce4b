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
//! Integration tests for the data tier manager, connector registry and
//! change events.

use std::sync::Arc;

use crate::common::{RecordingDistributor, TestHost, drain, init_logging_once, int_rows, test_request_id};
use datatier::connector::{ConnectorRegistry, ValuesConnector};
use datatier::exec::atomic_request::{AtomicRequest, CommandContext};
use datatier::exec::change_events::EventDistributor;
use datatier::exec::command::{Command, GroupRef, ProjectedColumn, TableMetadata};
use datatier::exec::value::{DataType, Value};
use datatier::runtime::buffer_manager::LocalBufferManager;
use datatier::runtime::scheduler::WorkScheduler;
use datatier::{DataTierError, DataTierManager, ExecOptions};

mod common;

fn registry() -> ConnectorRegistry {
    let mut registry = ConnectorRegistry::new();
    registry.register(Arc::new(
        ValuesConnector::new("values", 4)
            .with_table("public.orders", int_rows(0..3))
            .with_table("public.items", int_rows(0..10)),
    ));
    registry
}

fn manager(detect: bool, distributor: &Arc<RecordingDistributor>) -> DataTierManager {
    let options = ExecOptions {
        detect_change_events: detect,
        ..ExecOptions::default()
    };
    DataTierManager::new(Arc::new(LocalBufferManager::new(std::env::temp_dir())), options)
        .with_registry(registry())
        .with_event_distributor(Arc::clone(distributor) as Arc<dyn EventDistributor>)
}

fn scheduler(host: &TestHost) -> Arc<dyn WorkScheduler> {
    Arc::clone(&host.work_item) as Arc<dyn WorkScheduler>
}

#[test]
fn test_query_through_registry() {
    init_logging_once();
    let host = TestHost::new(2);
    let distributor = Arc::new(RecordingDistributor::default());
    let manager = manager(true, &distributor);
    let request = AtomicRequest::builder(
        test_request_id(1),
        Command::Query {
            from: GroupRef::new("public.items"),
            columns: vec![ProjectedColumn::new("id", DataType::Long)],
        },
        "values",
    )
    .build();

    let mut exec = manager.execute_request(request, scheduler(&host)).expect("execute");
    assert_eq!(exec.connector_name(), "values");
    let rows = drain(&mut exec, &host.signal).expect("drain");
    let expected: Vec<_> = (0..10).map(|i| vec![Value::Long(i)]).collect();
    assert_eq!(rows, expected);
    // Queries never raise modification events.
    assert!(distributor.events().is_empty());
}

#[test]
fn test_update_raises_change_event() {
    init_logging_once();
    let host = TestHost::new(1);
    let distributor = Arc::new(RecordingDistributor::default());
    let manager = manager(true, &distributor);
    let orders = Arc::new(TableMetadata::new("public", "orders"));
    let request = AtomicRequest::builder(
        test_request_id(1),
        Command::Update {
            target: GroupRef::physical(Arc::clone(&orders)),
        },
        "values",
    )
    .command_context(Arc::new(CommandContext::new("sales", "2")))
    .build();

    let mut exec = manager.execute_request(request, scheduler(&host)).expect("execute");
    let rows = drain(&mut exec, &host.signal).expect("drain");
    assert_eq!(rows, vec![vec![Value::Integer(3)]]);
    assert_eq!(distributor.events(), vec!["sales:2:public.orders".to_string()]);
    assert!(orders.last_data_modification().is_some());
}

#[test]
fn test_batched_update_marks_each_changed_table() {
    init_logging_once();
    let host = TestHost::new(1);
    let distributor = Arc::new(RecordingDistributor::default());
    let manager = manager(true, &distributor);
    let orders = Arc::new(TableMetadata::new("public", "orders"));
    let items = Arc::new(TableMetadata::new("public", "items"));
    let request = AtomicRequest::builder(
        test_request_id(1),
        Command::BatchedUpdate(vec![
            Command::Delete {
                target: GroupRef::physical(Arc::clone(&orders)),
            },
            Command::Insert {
                target: GroupRef::physical(Arc::clone(&items)),
            },
        ]),
        "values",
    )
    .serial(true)
    .build();

    let mut exec = manager.execute_request(request, scheduler(&host)).expect("execute");
    let rows = drain(&mut exec, &host.signal).expect("drain");
    assert_eq!(rows, vec![vec![Value::Integer(3)], vec![Value::Integer(1)]]);
    assert_eq!(
        distributor.events(),
        vec![
            "vdb:1:public.orders".to_string(),
            "vdb:1:public.items".to_string()
        ]
    );
}

#[test]
fn test_change_detection_disabled() {
    init_logging_once();
    let host = TestHost::new(1);
    let distributor = Arc::new(RecordingDistributor::default());
    let manager = manager(false, &distributor);
    let orders = Arc::new(TableMetadata::new("public", "orders"));
    let request = AtomicRequest::builder(
        test_request_id(1),
        Command::Update {
            target: GroupRef::physical(Arc::clone(&orders)),
        },
        "values",
    )
    .build();

    let mut exec = manager.execute_request(request, scheduler(&host)).expect("execute");
    drain(&mut exec, &host.signal).expect("drain");
    assert!(distributor.events().is_empty());
    assert!(orders.last_data_modification().is_none());
}

#[test]
fn test_unknown_connector_is_component_error() {
    init_logging_once();
    let host = TestHost::new(1);
    let distributor = Arc::new(RecordingDistributor::default());
    let manager = manager(false, &distributor);
    let request = AtomicRequest::builder(
        test_request_id(1),
        Command::Query {
            from: GroupRef::new("public.items"),
            columns: vec![ProjectedColumn::new("id", DataType::Integer)],
        },
        "oracle",
    )
    .build();

    let err = manager
        .execute_request(request, scheduler(&host))
        .err()
        .expect("unknown connector");
    assert!(err.is_component());
    assert_eq!(host.work_item.open_request_count(), 0);
}

#[test]
fn test_missing_table_is_connector_error() {
    init_logging_once();
    let host = TestHost::new(1);
    let distributor = Arc::new(RecordingDistributor::default());
    let manager = manager(false, &distributor);
    let request = AtomicRequest::builder(
        test_request_id(1),
        Command::Query {
            from: GroupRef::new("public.missing"),
            columns: vec![ProjectedColumn::new("id", DataType::Integer)],
        },
        "values",
    )
    .build();

    match manager.execute_request(request, scheduler(&host)) {
        Err(DataTierError::Connector { connector, message }) => {
            assert_eq!(connector, "values");
            assert_eq!(message, "table not found: public.missing");
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("missing table must fail"),
    }
}
