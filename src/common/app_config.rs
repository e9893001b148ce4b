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
use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static CONFIG: OnceLock<DataTierConfig> = OnceLock::new();

fn default_log_level() -> String {
    "info".to_string()
}

pub fn init_from_path(path: impl AsRef<Path>) -> Result<&'static DataTierConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let cfg = DataTierConfig::load_from_file(path.as_ref())?;
    Ok(CONFIG.get_or_init(|| cfg))
}

pub fn init_from_env_or_default() -> Result<&'static DataTierConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = config_path_from_env_or_default()?;
    let cfg = DataTierConfig::load_from_file(&path)?;
    Ok(CONFIG.get_or_init(|| cfg))
}

pub fn config() -> Result<&'static DataTierConfig> {
    init_from_env_or_default()
}

fn config_path_from_env_or_default() -> Result<PathBuf> {
    if let Ok(p) = std::env::var("DATATIER_CONFIG") {
        if !p.trim().is_empty() {
            return Ok(PathBuf::from(p));
        }
    }

    let candidates = [PathBuf::from("datatier.toml")];
    for p in candidates {
        if p.exists() {
            return Ok(p);
        }
    }

    Err(anyhow!(
        "missing config file: set $DATATIER_CONFIG or create ./datatier.toml"
    ))
}

#[derive(Clone, Deserialize)]
pub struct DataTierConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional full tracing EnvFilter expression.
    /// If set, this takes precedence over `log_level`.
    /// Example: "datatier=debug"
    #[serde(default)]
    pub log_filter: Option<String>,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub lob: LobConfig,

    #[serde(default)]
    pub change_events: ChangeEventsConfig,
}

impl DataTierConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        let cfg: DataTierConfig =
            toml::from_str(&s).with_context(|| format!("parse toml: {}", path.display()))?;
        Ok(cfg)
    }
}

impl Default for DataTierConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_filter: None,
            runtime: RuntimeConfig::default(),
            lob: LobConfig::default(),
            change_events: ChangeEventsConfig::default(),
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Worker threads for connector fetches; 0 means one per core.
    #[serde(default)]
    pub fetch_threads: usize,
    #[serde(default = "default_fetch_work_priority")]
    pub fetch_work_priority: i32,
    #[serde(default = "default_retry_timer_priority")]
    pub retry_timer_priority: i32,
    #[serde(default = "default_high_priority")]
    pub high_priority: i32,
}

fn default_fetch_work_priority() -> i32 {
    100
}

fn default_retry_timer_priority() -> i32 {
    10
}

fn default_high_priority() -> i32 {
    0
}

impl RuntimeConfig {
    pub fn actual_fetch_threads(&self) -> usize {
        if self.fetch_threads > 0 {
            self.fetch_threads
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            fetch_threads: 0,
            fetch_work_priority: default_fetch_work_priority(),
            retry_timer_priority: default_retry_timer_priority(),
            high_priority: default_high_priority(),
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct LobConfig {
    #[serde(default = "default_transfer_buffer_bytes")]
    pub transfer_buffer_bytes: usize,
    /// Directory for LOB spool files; the system temp dir when unset.
    #[serde(default)]
    pub spool_dir: Option<String>,
}

fn default_transfer_buffer_bytes() -> usize {
    1 << 14
}

impl Default for LobConfig {
    fn default() -> Self {
        Self {
            transfer_buffer_bytes: default_transfer_buffer_bytes(),
            spool_dir: None,
        }
    }
}

#[derive(Clone, Default, Deserialize)]
pub struct ChangeEventsConfig {
    #[serde(default)]
    pub detect: bool,
}

#[cfg(test)]
mod tests {
    use super::DataTierConfig;

    #[test]
    fn test_empty_config_uses_defaults() {
        let cfg: DataTierConfig = toml::from_str("").expect("parse config");
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.runtime.fetch_work_priority, 100);
        assert_eq!(cfg.runtime.retry_timer_priority, 10);
        assert_eq!(cfg.lob.transfer_buffer_bytes, 16_384);
        assert!(!cfg.change_events.detect);
    }

    #[test]
    fn test_sections_can_be_overridden() {
        let cfg: DataTierConfig = toml::from_str(
            r#"
log_filter = "datatier=debug"

[runtime]
fetch_threads = 3
fetch_work_priority = 50

[lob]
transfer_buffer_bytes = 4096
spool_dir = "/tmp/spool"

[change_events]
detect = true
"#,
        )
        .expect("parse config");
        assert_eq!(cfg.log_filter.as_deref(), Some("datatier=debug"));
        assert_eq!(cfg.runtime.actual_fetch_threads(), 3);
        assert_eq!(cfg.runtime.fetch_work_priority, 50);
        assert_eq!(cfg.lob.transfer_buffer_bytes, 4096);
        assert_eq!(cfg.lob.spool_dir.as_deref(), Some("/tmp/spool"));
        assert!(cfg.change_events.detect);
    }

    #[test]
    fn test_zero_fetch_threads_uses_available_parallelism() {
        let cfg: DataTierConfig = toml::from_str("[runtime]\nfetch_threads = 0\n").expect("parse");
        assert!(cfg.runtime.actual_fetch_threads() >= 1);
    }
}
