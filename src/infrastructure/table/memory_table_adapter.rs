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

//! In-memory implementation of `TableStorePort`.
//!
//! Behaves like a hosted table service: rows are kept in key order, the
//! server caps every page, and continuation tokens are opaque base64 strings
//! naming the first row of the next page. Rows can be inserted and deleted
//! between queries to simulate a live table.

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use crate::domain::entities::{Row, RowKey, RowPage};
use crate::domain::errors::{BackupError, Result};
use crate::ports::table_store_port::{QueryFilter, TableStorePort};

/// Hosted table services return at most this many rows per page.
pub const DEFAULT_SERVER_PAGE_LIMIT: usize = 1000;

/// Where the next page starts, in the order implied by the filter.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
struct ResumePoint {
    ts: Option<DateTime<Utc>>,
    pk: String,
    rk: String,
}

impl ResumePoint {
    fn encode(&self) -> Result<String> {
        Ok(general_purpose::URL_SAFE_NO_PAD.encode(serde_json::to_vec(self)?))
    }

    fn decode(token: &str, table: &str) -> Result<Self> {
        let invalid = || BackupError::FetchError {
            table: table.to_string(),
            reason: format!("invalid continuation token '{}'", token),
        };
        let raw = general_purpose::URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| invalid())?;
        serde_json::from_slice(&raw).map_err(|_| invalid())
    }
}

/// Evaluates one page query over a snapshot of rows.
///
/// Shared by every adapter that holds its rows in memory at query time.
pub(crate) fn query_rows<I>(
    table: &str,
    rows: I,
    filter: &QueryFilter,
    page_size: usize,
    continuation: Option<&str>,
    server_page_limit: usize,
) -> Result<RowPage>
where
    I: IntoIterator<Item = Row>,
{
    let resume = continuation
        .map(|t| ResumePoint::decode(t, table))
        .transpose()?;

    let mut ordered: Vec<(ResumePoint, Row)> = match filter {
        QueryFilter::All => rows
            .into_iter()
            .map(|row| {
                let point = ResumePoint {
                    ts: None,
                    pk: row.partition_key.clone(),
                    rk: row.row_key.clone(),
                };
                (point, row)
            })
            .collect(),
        QueryFilter::After { field, position } => rows
            .into_iter()
            .filter_map(|row| {
                let ts = row.get(field).and_then(|v| v.as_datetime());
                // Rows without a timestamp are never filtered; they sort first.
                if let (Some(ts), Some(pos)) = (ts, position.as_ref()) {
                    if !pos.is_before(ts, &row) {
                        return None;
                    }
                }
                let point = ResumePoint {
                    ts,
                    pk: row.partition_key.clone(),
                    rk: row.row_key.clone(),
                };
                Some((point, row))
            })
            .collect(),
    };
    ordered.sort_by(|a, b| a.0.cmp(&b.0));

    let limit = page_size.clamp(1, server_page_limit.max(1));
    let mut remaining = ordered
        .into_iter()
        .skip_while(|(point, _)| resume.as_ref().map_or(false, |r| point < r));

    let rows: Vec<Row> = remaining.by_ref().take(limit).map(|(_, row)| row).collect();
    let continuation = match remaining.next() {
        Some((point, _)) => Some(point.encode()?),
        None => None,
    };

    Ok(RowPage { rows, continuation })
}

pub struct MemoryTableAdapter {
    name: String,
    rows: RwLock<BTreeMap<RowKey, Row>>,
    server_page_limit: usize,
    queries: AtomicU64,
}

impl MemoryTableAdapter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rows: RwLock::new(BTreeMap::new()),
            server_page_limit: DEFAULT_SERVER_PAGE_LIMIT,
            queries: AtomicU64::new(0),
        }
    }

    pub fn with_rows(name: impl Into<String>, rows: impl IntoIterator<Item = Row>) -> Self {
        let table = Self::new(name);
        if let Ok(mut map) = table.rows.write() {
            for row in rows {
                map.insert(row.key(), row);
            }
        }
        table
    }

    /// Overrides the per-page cap the "server" applies on top of the hint.
    pub fn with_server_page_limit(mut self, limit: usize) -> Self {
        self.server_page_limit = limit.max(1);
        self
    }

    /// Inserts or replaces a row.
    pub fn upsert(&self, row: Row) -> Result<()> {
        self.rows
            .write()
            .map_err(|_| BackupError::Unknown("table lock poisoned".into()))?
            .insert(row.key(), row);
        Ok(())
    }

    pub fn delete(&self, key: &RowKey) -> Result<bool> {
        Ok(self
            .rows
            .write()
            .map_err(|_| BackupError::Unknown("table lock poisoned".into()))?
            .remove(key)
            .is_some())
    }

    pub fn len(&self) -> usize {
        self.rows.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `query_page` calls served so far.
    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }
}

impl TableStorePort for MemoryTableAdapter {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn query_page(
        &self,
        filter: &QueryFilter,
        page_size: usize,
        continuation: Option<&str>,
    ) -> Result<RowPage> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        let snapshot: Vec<Row> = self
            .rows
            .read()
            .map_err(|_| BackupError::Unknown("table lock poisoned".into()))?
            .values()
            .cloned()
            .collect();
        query_rows(
            &self.name,
            snapshot,
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
    use crate::domain::cursor::WatermarkPosition;
    use chrono::TimeZone;

    fn stamped(pk: &str, rk: &str, secs: i64) -> Row {
        Row::new(pk, rk).with("Timestamp", Utc.timestamp_opt(secs, 0).unwrap())
    }

    fn drain(table: &MemoryTableAdapter, filter: &QueryFilter, page: usize) -> Vec<Vec<String>> {
        let mut pages = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let p = table.query_page(filter, page, token.as_deref()).unwrap();
            pages.push(p.rows.iter().map(|r| r.row_key.clone()).collect());
            match p.continuation {
                Some(t) => token = Some(t),
                None => break,
            }
        }
        pages
    }

    #[test]
    fn test_token_paging_walks_key_order() {
        let table = MemoryTableAdapter::with_rows(
            "t",
            vec![Row::new("b", "1"), Row::new("a", "2"), Row::new("a", "1")],
        );
        let pages = drain(&table, &QueryFilter::All, 2);
        assert_eq!(pages, vec![vec!["1", "2"], vec!["1"]]);
        assert_eq!(table.query_count(), 2);
    }

    #[test]
    fn test_server_limit_caps_page_size() {
        let rows = (0..5).map(|i| Row::new("p", format!("{:02}", i)));
        let table = MemoryTableAdapter::with_rows("t", rows).with_server_page_limit(2);
        let page = table.query_page(&QueryFilter::All, 100, None).unwrap();
        assert_eq!(page.rows.len(), 2);
        assert!(page.continuation.is_some());
    }

    #[test]
    fn test_watermark_filter_orders_by_time_then_key() {
        let table = MemoryTableAdapter::with_rows(
            "t",
            vec![stamped("a", "late", 30), stamped("a", "x", 10), stamped("a", "w", 10)],
        );
        let filter = QueryFilter::After {
            field: "Timestamp".into(),
            position: None,
        };
        let page = table.query_page(&filter, 10, None).unwrap();
        let keys: Vec<&str> = page.rows.iter().map(|r| r.row_key.as_str()).collect();
        assert_eq!(keys, vec!["w", "x", "late"]);

        let filter = QueryFilter::After {
            field: "Timestamp".into(),
            position: Some(WatermarkPosition::new(
                Utc.timestamp_opt(10, 0).unwrap(),
                RowKey::new("a", "w"),
            )),
        };
        let page = table.query_page(&filter, 10, None).unwrap();
        let keys: Vec<&str> = page.rows.iter().map(|r| r.row_key.as_str()).collect();
        assert_eq!(keys, vec!["x", "late"]);
    }

    #[test]
    fn test_rows_without_timestamp_are_returned_first() {
        let table =
            MemoryTableAdapter::with_rows("t", vec![stamped("a", "1", 5), Row::new("a", "2")]);
        let filter = QueryFilter::After {
            field: "Timestamp".into(),
            position: Some(WatermarkPosition::new(
                Utc.timestamp_opt(100, 0).unwrap(),
                RowKey::new("z", "z"),
            )),
        };
        let page = table.query_page(&filter, 10, None).unwrap();
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.rows[0].row_key, "2");
    }

    #[test]
    fn test_deleted_resume_row_does_not_break_paging() {
        let rows = (0..4).map(|i| Row::new("p", i.to_string()));
        let table = MemoryTableAdapter::with_rows("t", rows);
        let first = table.query_page(&QueryFilter::All, 2, None).unwrap();
        table.delete(&RowKey::new("p", "2")).unwrap();
        let second = table
            .query_page(&QueryFilter::All, 2, first.continuation.as_deref())
            .unwrap();
        let keys: Vec<&str> = second.rows.iter().map(|r| r.row_key.as_str()).collect();
        assert_eq!(keys, vec!["3"]);
    }

    #[test]
    fn test_garbage_token_is_a_fetch_error() {
        let table = MemoryTableAdapter::new("t");
        let err = table
            .query_page(&QueryFilter::All, 1, Some("!!not-base64!!"))
            .unwrap_err();
        assert!(matches!(err, BackupError::FetchError { .. }));
    }
}
