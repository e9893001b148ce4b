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
//! Atomic request execution and tuple materialization.
//!
//! Responsibilities:
//! - Describes atomic requests, their commands, and row values.
//! - Runs one atomic request against its connector and coerces the rows it returns.
//! - Raises data modification events for update commands.

pub mod atomic_request;
pub mod change_events;
pub mod coercion;
pub mod command;
pub mod data_tier;
pub mod tuple_source;
pub mod value;
