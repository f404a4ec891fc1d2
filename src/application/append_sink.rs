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

//! # Append Sink
//!
//! Writes one page to the end of a backup destination, creating the
//! destination on first use. A page too large for one block is written as
//! several self-contained JSON arrays, one per block, so every completed
//! append leaves the destination decodable.

use log::{debug, info};
use std::sync::Arc;

use crate::domain::codec;
use crate::domain::entities::Row;
use crate::domain::errors::Result;
use crate::domain::export_models::BackupDestination;
use crate::ports::blob_store_port::BlobStorePort;

/// What one page cost on the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendedPage {
    pub blocks: usize,
    pub bytes: u64,
}

pub struct AppendSink {
    blobs: Arc<dyn BlobStorePort>,
}

impl AppendSink {
    pub fn new(blobs: Arc<dyn BlobStorePort>) -> Self {
        Self { blobs }
    }

    /// Encodes and appends `rows`.
    ///
    /// Everything is encoded before the first write, so a row that can never
    /// fit a block fails the page with the destination untouched.
    pub fn append_page(&self, destination: &BackupDestination, rows: &[Row]) -> Result<AppendedPage> {
        let name = destination.name();
        let blocks = codec::encode_blocks(rows, self.blobs.max_block_bytes())?;
        if blocks.is_empty() {
            return Ok(AppendedPage { blocks: 0, bytes: 0 });
        }

        if self.blobs.create_if_absent(name)? {
            info!("Created backup destination {}", name);
        }
        let mut bytes = 0u64;
        for block in &blocks {
            self.blobs.append_block(name, block)?;
            bytes += block.len() as u64;
        }
        debug!(
            "Appended {} rows ({} bytes) to {} in {} block(s)",
            rows.len(),
            bytes,
            name,
            blocks.len()
        );
        Ok(AppendedPage {
            blocks: blocks.len(),
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::export_models::{PagingMode, RunId};
    use crate::infrastructure::local_storage::memory_blob_adapter::MemoryBlobAdapter;

    fn dest() -> BackupDestination {
        BackupDestination::for_run(&RunId::parse("r").unwrap(), PagingMode::Token, "b.json")
    }

    fn rows(range: std::ops::Range<u32>) -> Vec<Row> {
        range.map(|i| Row::new("p", format!("{:03}", i))).collect()
    }

    #[test]
    fn test_creates_then_appends_in_order() {
        let blobs = Arc::new(MemoryBlobAdapter::default());
        let sink = AppendSink::new(blobs.clone());
        let first = sink.append_page(&dest(), &rows(0..2)).unwrap();
        sink.append_page(&dest(), &rows(2..3)).unwrap();

        assert_eq!(first.blocks, 1);
        assert_eq!(blobs.block_count(dest().name()), Some(2));
        let bytes = blobs.read(dest().name()).unwrap().unwrap();
        let mut expected = codec::encode_page(&rows(0..2)).unwrap();
        expected.extend(codec::encode_page(&rows(2..3)).unwrap());
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_large_page_is_split_into_whole_arrays() {
        let one = serde_json::to_vec(&rows(0..1)[0]).unwrap().len();
        let blobs = Arc::new(MemoryBlobAdapter::new(2 * one + 3));
        let sink = AppendSink::new(blobs.clone());

        let appended = sink.append_page(&dest(), &rows(0..5)).unwrap();
        assert_eq!(appended.blocks, 3);
        let bytes = blobs.read(dest().name()).unwrap().unwrap();
        assert_eq!(appended.bytes, bytes.len() as u64);
        let pages = codec::decode_stream(&bytes).unwrap();
        assert_eq!(pages.concat(), rows(0..5));
    }

    #[test]
    fn test_oversize_row_fails_before_writing() {
        let blobs = Arc::new(MemoryBlobAdapter::new(8));
        let sink = AppendSink::new(blobs.clone());
        assert!(sink.append_page(&dest(), &rows(0..2)).is_err());
        assert!(blobs.names().is_empty());
    }

    #[test]
    fn test_interrupted_page_leaves_a_readable_prefix() {
        let one = serde_json::to_vec(&rows(0..1)[0]).unwrap().len();
        let blobs = Arc::new(MemoryBlobAdapter::new(one + 2).fail_appends_after(2));
        let sink = AppendSink::new(blobs.clone());

        assert!(sink.append_page(&dest(), &rows(0..4)).is_err());
        let bytes = blobs.read(dest().name()).unwrap().unwrap();
        let pages = codec::decode_stream(&bytes).unwrap();
        assert_eq!(pages.concat(), rows(0..2));
    }
}
