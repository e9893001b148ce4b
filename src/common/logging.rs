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
//! Process-wide tracing setup.
//!
//! Events are written one per line in glog layout:
//! `Lyyyymmdd hh:mm:ss.uuuuuu tid file:line] message`.
//! The sink is `$DATATIER_LOG_FILE`, else `$DATATIER_LOG_DIR/datatier.log`,
//! else stderr.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use chrono::Local;
use tracing::Level;
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, fmt as tracing_fmt};

static INIT: OnceLock<()> = OnceLock::new();

struct GlogLine;

impl<S, N> FormatEvent<S, N> for GlogLine
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &tracing_fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> fmt::Result {
        let meta = event.metadata();
        write!(
            writer,
            "{}{} {} {}:{}] ",
            severity(meta.level()),
            Local::now().format("%Y%m%d %H:%M:%S%.6f"),
            thread_number(),
            meta.file().unwrap_or("unknown"),
            meta.line().unwrap_or(0)
        )?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

fn severity(level: &Level) -> char {
    match *level {
        Level::ERROR => 'E',
        Level::WARN => 'W',
        Level::INFO => 'I',
        Level::DEBUG => 'D',
        Level::TRACE => 'T',
    }
}

// `ThreadId` has no stable numeric accessor; take it from the Debug form.
fn thread_number() -> u64 {
    format!("{:?}", std::thread::current().id())
        .trim_start_matches("ThreadId(")
        .trim_end_matches(')')
        .parse()
        .unwrap_or(0)
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn log_file() -> Option<File> {
    let path = env_path("DATATIER_LOG_FILE")
        .or_else(|| env_path("DATATIER_LOG_DIR").map(|dir| dir.join("datatier.log")))?;
    let opened = path
        .parent()
        .map_or(Ok(()), fs::create_dir_all)
        .and_then(|_| OpenOptions::new().create(true).append(true).open(&path));
    match opened {
        Ok(file) => Some(file),
        Err(err) => {
            eprintln!("cannot open log file {}: {}, using stderr", path.display(), err);
            None
        }
    }
}

/// Installs the process subscriber once; later calls are no-ops.
///
/// `level` is a full `EnvFilter` expression, e.g. `"datatier=debug"`.
pub fn init_with_level(level: &str) {
    INIT.get_or_init(|| {
        let builder = tracing_fmt().with_env_filter(EnvFilter::new(level));
        let _ = match log_file() {
            Some(file) => builder
                .with_ansi(false)
                .event_format(GlogLine)
                .with_writer(Mutex::new(file))
                .try_init(),
            None => builder
                .with_ansi(atty::is(atty::Stream::Stderr))
                .event_format(GlogLine)
                .with_writer(std::io::stderr)
                .try_init(),
        };
    });
}

/// Initializes logging from the loaded configuration, defaulting to `info`.
pub fn init() {
    let filter = crate::datatier_config::config()
        .ok()
        .map(|c| c.log_filter.clone().unwrap_or_else(|| c.log_level.clone()))
        .unwrap_or_else(|| "info".to_string());
    init_with_level(&filter);
}

pub use tracing::{debug, error, info, trace, warn};
