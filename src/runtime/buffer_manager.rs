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
//! Spool storage for large objects that must outlive their connector.
//!
//! Responsibilities:
//! - Defines append-only file stores and the buffer manager that creates them.
//! - Copies LOB content into a store through a caller-owned transfer buffer.
//!
//! Key exported interfaces:
//! - Traits: `FileStore`, `BufferManager`.
//! - Types: `LocalBufferManager`.

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::common::config::lob_spool_dir;
use crate::common::error::Result;
use crate::datatier_logging::debug;
use crate::exec::value::LobRef;

/// Append-only byte store.
pub trait FileStore: Send + Sync {
    fn name(&self) -> &str;

    /// Appends `bytes` and returns the offset they were written at.
    fn append(&self, bytes: &[u8]) -> io::Result<u64>;

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub trait BufferManager: Send + Sync {
    fn create_file_store(&self, name: &str) -> Result<Arc<dyn FileStore>>;

    /// Copies `lob` into `store` and returns a reference to the copy.
    fn persist_lob(
        &self,
        lob: &LobRef,
        store: &Arc<dyn FileStore>,
        buffer: &mut [u8],
    ) -> Result<LobRef> {
        let mut reader = lob.open()?;
        let offset = store.len();
        let mut written = 0u64;
        loop {
            let n = match reader.read(buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            store.append(&buffer[..n])?;
            written += n as u64;
        }
        Ok(LobRef::spooled(lob.kind(), Arc::clone(store), offset, written))
    }
}

/// File store backed by an anonymous temp file; removed when the last
/// reference is dropped.
pub struct LocalFileStore {
    name: String,
    file: Mutex<File>,
    len: AtomicU64,
}

impl FileStore for LocalFileStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn append(&self, bytes: &[u8]) -> io::Result<u64> {
        let mut file = self.file.lock().expect("file store lock");
        let offset = self.len.load(Ordering::Acquire);
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(bytes)?;
        self.len.store(offset + bytes.len() as u64, Ordering::Release);
        Ok(offset)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let len = self.len.load(Ordering::Acquire);
        if offset >= len {
            return Ok(0);
        }
        let max = (len - offset).min(buf.len() as u64) as usize;
        let mut file = self.file.lock().expect("file store lock");
        file.seek(SeekFrom::Start(offset))?;
        file.read(&mut buf[..max])
    }

    fn len(&self) -> u64 {
        self.len.load(Ordering::Acquire)
    }
}

/// Buffer manager spooling into temp files under one directory.
pub struct LocalBufferManager {
    spool_dir: PathBuf,
}

impl LocalBufferManager {
    pub fn new(spool_dir: impl Into<PathBuf>) -> Self {
        Self {
            spool_dir: spool_dir.into(),
        }
    }

    /// Spools into `[lob] spool_dir`.
    pub fn from_config() -> Self {
        Self::new(lob_spool_dir())
    }

    pub fn spool_dir(&self) -> &Path {
        &self.spool_dir
    }
}

impl BufferManager for LocalBufferManager {
    fn create_file_store(&self, name: &str) -> Result<Arc<dyn FileStore>> {
        fs::create_dir_all(&self.spool_dir)?;
        let file = tempfile::tempfile_in(&self.spool_dir)?;
        debug!(
            "created file store '{}' in {}",
            name,
            self.spool_dir.display()
        );
        Ok(Arc::new(LocalFileStore {
            name: name.to_string(),
            file: Mutex::new(file),
            len: AtomicU64::new(0),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::value::LobKind;

    #[test]
    fn appends_are_contiguous_and_readable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = LocalBufferManager::new(dir.path().join("spool"));
        let store = manager.create_file_store("lobs").expect("store");
        assert!(store.is_empty());
        assert_eq!(store.append(b"hello").expect("append"), 0);
        assert_eq!(store.append(b" world").expect("append"), 5);
        let mut buf = [0u8; 5];
        let n = store.read_at(6, &mut buf).expect("read");
        assert_eq!(&buf[..n], b"world");
        assert_eq!(store.read_at(64, &mut buf).expect("read past end"), 0);
    }

    #[test]
    fn persist_lob_streams_through_small_buffer() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = LocalBufferManager::new(dir.path());
        let store = manager.create_file_store("lobs").expect("store");
        let content: Vec<u8> = (0..100u8).collect();
        let lob = LobRef::inline(LobKind::Blob, content.clone());

        let mut buffer = [0u8; 7];
        let first = manager.persist_lob(&lob, &store, &mut buffer).expect("persist");
        let second = manager.persist_lob(&lob, &store, &mut buffer).expect("persist");

        assert!(first.is_spooled());
        assert_eq!(first.kind(), LobKind::Blob);
        assert_eq!(first.read_to_end().expect("read"), content);
        assert_eq!(second.read_to_end().expect("read"), content);
        assert_eq!(store.len(), 200);
    }
}
