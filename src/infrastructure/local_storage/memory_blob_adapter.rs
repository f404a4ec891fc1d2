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

//! In-memory append-only objects, for tests and dry runs.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::domain::errors::{BackupError, Result};
use crate::infrastructure::local_storage::local_blob_adapter::DEFAULT_MAX_BLOCK_BYTES;
use crate::ports::blob_store_port::BlobStorePort;

pub struct MemoryBlobAdapter {
    blobs: Mutex<BTreeMap<String, Vec<Vec<u8>>>>,
    max_block_bytes: usize,
    /// Appends still allowed to succeed; `usize::MAX` means no limit.
    append_budget: AtomicUsize,
}

impl Default for MemoryBlobAdapter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BLOCK_BYTES)
    }
}

impl MemoryBlobAdapter {
    pub fn new(max_block_bytes: usize) -> Self {
        Self {
            blobs: Mutex::new(BTreeMap::new()),
            max_block_bytes: max_block_bytes.max(1),
            append_budget: AtomicUsize::new(usize::MAX),
        }
    }

    /// Makes every `append_block` after the first `n` fail, like a store that
    /// drops its connection mid-run.
    pub fn fail_appends_after(self, n: usize) -> Self {
        self.append_budget.store(n, Ordering::SeqCst);
        self
    }

    /// Lifts a limit set by [`fail_appends_after`](Self::fail_appends_after).
    pub fn allow_all_appends(&self) {
        self.append_budget.store(usize::MAX, Ordering::SeqCst);
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Vec<Vec<u8>>>>> {
        self.blobs
            .lock()
            .map_err(|_| BackupError::Unknown("blob store lock poisoned".into()))
    }

    /// Number of blocks appended to `name`, `None` if it does not exist.
    pub fn block_count(&self, name: &str) -> Option<usize> {
        self.lock().ok()?.get(name).map(|b| b.len())
    }

    pub fn names(&self) -> Vec<String> {
        self.lock()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl BlobStorePort for MemoryBlobAdapter {
    fn create_if_absent(&self, name: &str) -> Result<bool> {
        let mut blobs = self.lock()?;
        if blobs.contains_key(name) {
            return Ok(false);
        }
        blobs.insert(name.to_string(), Vec::new());
        Ok(true)
    }

    fn append_block(&self, name: &str, block: &[u8]) -> Result<()> {
        if block.len() > self.max_block_bytes {
            return Err(BackupError::AppendError {
                destination: name.to_string(),
                reason: format!("block of {} bytes exceeds the limit", block.len()),
            });
        }
        let budget = self.append_budget.load(Ordering::SeqCst);
        if budget == 0 {
            return Err(BackupError::AppendError {
                destination: name.to_string(),
                reason: "connection reset".into(),
            });
        }
        let mut blobs = self.lock()?;
        let blocks = blobs.get_mut(name).ok_or_else(|| BackupError::AppendError {
            destination: name.to_string(),
            reason: "object does not exist".into(),
        })?;
        blocks.push(block.to_vec());
        if budget != usize::MAX {
            self.append_budget.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn max_block_bytes(&self) -> usize {
        self.max_block_bytes
    }

    fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.lock()?.get(name).map(|blocks| blocks.concat()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_budget_runs_out_and_recovers() {
        let blobs = MemoryBlobAdapter::default().fail_appends_after(1);
        blobs.create_if_absent("d").unwrap();
        blobs.append_block("d", b"[1]").unwrap();
        assert!(blobs.append_block("d", b"[2]").is_err());

        blobs.allow_all_appends();
        blobs.append_block("d", b"[3]").unwrap();
        assert_eq!(blobs.read("d").unwrap().unwrap(), b"[1][3]".to_vec());
        assert_eq!(blobs.block_count("d"), Some(2));
    }
}
