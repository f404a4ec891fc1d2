// Copyright 2026 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Infrastructure adapter for append-only backup objects on the local filesystem.

use log::debug;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::domain::errors::{BackupError, Result};
use crate::ports::blob_store_port::BlobStorePort;

/// Hosted append blobs accept at most 4 MiB per block.
pub const DEFAULT_MAX_BLOCK_BYTES: usize = 4 * 1024 * 1024;

/// Concrete implementation of `BlobStorePort` backed by a directory.
///
/// Each object is one file inside the container directory. Blocks are written
/// with `O_APPEND` and flushed with `sync_data` before the call returns.
pub struct LocalBlobAdapter {
    container: PathBuf,
    max_block_bytes: usize,
}

impl LocalBlobAdapter {
    /// Opens (and creates if needed) the container directory.
    pub fn new(container: impl AsRef<Path>, max_block_bytes: usize) -> Result<Self> {
        let container = container.as_ref().to_path_buf();
        std::fs::create_dir_all(&container)?;
        Ok(Self {
            container,
            max_block_bytes: max_block_bytes.max(1),
        })
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(BackupError::AppendError {
                destination: name.to_string(),
                reason: "object names must be a single path component".into(),
            });
        }
        Ok(self.container.join(name))
    }

    fn append_error(name: &str, reason: impl ToString) -> BackupError {
        BackupError::AppendError {
            destination: name.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl BlobStorePort for LocalBlobAdapter {
    fn create_if_absent(&self, name: &str) -> Result<bool> {
        let path = self.path_for(name)?;
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(f) => {
                f.sync_all().map_err(|e| Self::append_error(name, e))?;
                debug!("Created {}", path.display());
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(Self::append_error(name, e)),
        }
    }

    fn append_block(&self, name: &str, block: &[u8]) -> Result<()> {
        if block.len() > self.max_block_bytes {
            return Err(Self::append_error(
                name,
                format!(
                    "block of {} bytes exceeds the {} byte limit",
                    block.len(),
                    self.max_block_bytes
                ),
            ));
        }
        let path = self.path_for(name)?;
        let mut file: File = OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => Self::append_error(name, "object does not exist"),
                _ => Self::append_error(name, e),
            })?;
        file.write_all(block)
            .map_err(|e| Self::append_error(name, e))?;
        file.sync_data().map_err(|e| Self::append_error(name, e))?;
        Ok(())
    }

    fn max_block_bytes(&self) -> usize {
        self.max_block_bytes
    }

    fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(name)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BackupError::IoError(e)),
        }
    }
}
