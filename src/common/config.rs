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
use std::path::PathBuf;

use crate::datatier_config::config as datatier_app_config;

pub(crate) fn fetch_threads() -> usize {
    datatier_app_config()
        .ok()
        .map(|c| c.runtime.actual_fetch_threads())
        .unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
}

pub(crate) fn fetch_work_priority() -> i32 {
    datatier_app_config()
        .ok()
        .map(|c| c.runtime.fetch_work_priority)
        .unwrap_or(100)
}

pub(crate) fn retry_timer_priority() -> i32 {
    datatier_app_config()
        .ok()
        .map(|c| c.runtime.retry_timer_priority)
        .unwrap_or(10)
}

pub(crate) fn high_priority() -> i32 {
    datatier_app_config()
        .ok()
        .map(|c| c.runtime.high_priority)
        .unwrap_or(0)
}

pub(crate) fn lob_transfer_buffer_bytes() -> usize {
    datatier_app_config()
        .ok()
        .map(|c| c.lob.transfer_buffer_bytes)
        .unwrap_or(1 << 14)
        .max(1)
}

pub(crate) fn lob_spool_dir() -> PathBuf {
    let configured = datatier_app_config()
        .ok()
        .and_then(|c| c.lob.spool_dir.clone());
    match configured {
        Some(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
        _ => {
            let mut default_dir = std::env::temp_dir();
            default_dir.push("datatier-lobs");
            default_dir
        }
    }
}

pub(crate) fn detect_change_events() -> bool {
    datatier_app_config()
        .ok()
        .map(|c| c.change_events.detect)
        .unwrap_or(false)
}
