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

//! File-backed table source.
//!
//! Reads entities from a JSON array or JSON-lines file. The file is re-read on
//! every query, so edits made while a backup is running are visible to the
//! pages that follow, just like writes to a live table.

use log::debug;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::domain::codec;
use crate::domain::errors::{BackupError, Result};
use crate::domain::entities::RowPage;
use crate::infrastructure::table::memory_table_adapter::{query_rows, DEFAULT_SERVER_PAGE_LIMIT};
use crate::ports::table_store_port::{QueryFilter, TableStorePort};

pub struct FileTableAdapter {
    path: PathBuf,
    server_page_limit: usize,
}

impl FileTableAdapter {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            server_page_limit: DEFAULT_SERVER_PAGE_LIMIT,
        }
    }

    pub fn with_server_page_limit(mut self, limit: usize) -> Self {
        self.server_page_limit = limit.max(1);
        self
    }

    fn fetch_error(&self, reason: String) -> BackupError {
        BackupError::FetchError {
            table: self.path.display().to_string(),
            reason,
        }
    }
}

impl TableStorePort for FileTableAdapter {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn query_page(
        &self,
        filter: &QueryFilter,
        page_size: usize,
        continuation: Option<&str>,
    ) -> Result<RowPage> {
        let bytes = std::fs::read(&self.path)
            .map_err(|e| self.fetch_error(format!("cannot read table file: {}", e)))?;
        let rows = codec::decode_rows(&bytes).map_err(|e| self.fetch_error(e.to_string()))?;

        // Later entries with the same key replace earlier ones.
        let mut by_key = BTreeMap::new();
        for row in rows {
            by_key.insert(row.key(), row);
        }
        debug!(
            "Loaded {} entities from {} for filter {}",
            by_key.len(),
            self.path.display(),
            filter
        );

        query_rows(
            &self.name(),
            by_key.into_values(),
            filter,
            page_size,
            continuation,
            self.server_page_limit,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_reads_json_lines_and_dedupes_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"PartitionKey":"a","RowKey":"1","v":1}}"#).unwrap();
        writeln!(file, r#"{{"PartitionKey":"a","RowKey":"2","v":2}}"#).unwrap();
        writeln!(file, r#"{{"PartitionKey":"a","RowKey":"1","v":3}}"#).unwrap();

        let table = FileTableAdapter::new(file.path());
        let page = table.query_page(&QueryFilter::All, 10, None).unwrap();
        assert_eq!(page.rows.len(), 2);
        assert_eq!(
            page.rows[0].get("v"),
            Some(&crate::domain::entities::Value::Int32(3))
        );
        assert!(page.continuation.is_none());
    }

    #[test]
    fn test_sees_rows_appended_between_queries() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"[{{"PartitionKey":"a","RowKey":"1"}}]"#).unwrap();
        let table = FileTableAdapter::new(file.path());
        assert_eq!(table.query_page(&QueryFilter::All, 10, None).unwrap().rows.len(), 1);

        writeln!(file, r#"{{"PartitionKey":"a","RowKey":"2"}}"#).unwrap();
        file.flush().unwrap();
        assert_eq!(table.query_page(&QueryFilter::All, 10, None).unwrap().rows.len(), 2);
    }

    #[test]
    fn test_missing_file_is_a_fetch_error() {
        let dir = tempfile::tempdir().unwrap();
        let table = FileTableAdapter::new(dir.path().join("nope.json"));
        let err = table.query_page(&QueryFilter::All, 10, None).unwrap_err();
        assert!(matches!(err, BackupError::FetchError { .. }));
    }
}
