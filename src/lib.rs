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
pub mod common;
pub mod connector;
pub mod exec;
pub mod runtime;

// Engine-style folder layout, with `datatier_*` convenience aliases.
pub use common::app_config as datatier_config;
pub use common::logging as datatier_logging;
pub use connector as datatier_connectors;

pub use common::error::{ConnectorError, DataTierError, Result};
pub use common::ids::{AtomicRequestId, RequestId};
pub use exec::data_tier::{DataTierManager, ExecOptions};
pub use exec::tuple_source::{AtomicRequestExecution, BlockedReason, CancelHandle, NextTuple};
