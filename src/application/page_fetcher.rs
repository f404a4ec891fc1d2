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

//! # Page Fetcher
//!
//! Translates a cursor into one table store query and the query result back
//! into rows plus the cursor that marks the end of those rows. Read-only.

use chrono::{DateTime, Utc};
use log::debug;
use std::sync::Arc;

use crate::domain::cursor::{Continuation, Cursor, Watermark, WatermarkPosition};
use crate::domain::entities::Row;
use crate::domain::errors::{BackupError, Result};
use crate::ports::table_store_port::{QueryFilter, TableStorePort};

/// Rows of one page and the cursor identifying the page's end.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub rows: Vec<Row>,
    pub next: Cursor,
}

pub struct PageFetcher {
    store: Arc<dyn TableStorePort>,
}

impl PageFetcher {
    pub fn new(store: Arc<dyn TableStorePort>) -> Self {
        Self { store }
    }

    pub fn table_name(&self) -> String {
        self.store.name()
    }

    /// Fetches the page that follows `cursor`.
    ///
    /// A terminal cursor yields an empty page without touching the store.
    pub fn fetch(
        &self,
        cursor: &Cursor,
        page_size: usize,
        watermark_field: &str,
    ) -> Result<FetchedPage> {
        match cursor {
            Cursor::Token(Continuation::Done) | Cursor::Watermark(Watermark::Exhausted) => {
                Ok(FetchedPage {
                    rows: Vec::new(),
                    next: cursor.clone(),
                })
            }
            Cursor::Token(c) => self.fetch_by_token(c, page_size),
            Cursor::Watermark(Watermark::Beginning) => {
                self.fetch_after(None, page_size, watermark_field)
            }
            Cursor::Watermark(Watermark::At(p)) => {
                self.fetch_after(Some(p), page_size, watermark_field)
            }
        }
    }

    /// Reads the whole table by following continuation tokens to the end.
    pub fn fetch_all(&self, page_size: usize) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        let mut cursor = Continuation::Start;
        while cursor != Continuation::Done {
            let page = self.fetch_by_token(&cursor, page_size)?;
            rows.extend(page.rows);
            cursor = match page.next {
                Cursor::Token(next) => next,
                Cursor::Watermark(_) => Continuation::Done,
            };
        }
        Ok(rows)
    }

    fn fetch_by_token(&self, cursor: &Continuation, page_size: usize) -> Result<FetchedPage> {
        let page = self
            .store
            .query_page(&QueryFilter::All, page_size, cursor.token())?;
        debug!(
            "Fetched {} rows from {} (more: {})",
            page.rows.len(),
            self.store.name(),
            page.continuation.is_some()
        );
        Ok(FetchedPage {
            rows: page.rows,
            next: Cursor::Token(Continuation::from_token(page.continuation)),
        })
    }

    fn fetch_after(
        &self,
        position: Option<&WatermarkPosition>,
        page_size: usize,
        field: &str,
    ) -> Result<FetchedPage> {
        let filter = QueryFilter::After {
            field: field.to_string(),
            position: position.cloned(),
        };
        // The watermark is the cursor; store tokens are not carried between pages.
        let page = self.store.query_page(&filter, page_size, None)?;
        debug!(
            "Fetched {} rows from {} where {}",
            page.rows.len(),
            self.store.name(),
            filter
        );

        let mut newest: Option<WatermarkPosition> = position.cloned();
        for row in &page.rows {
            let ts = row_timestamp(row, field)?;
            if let Some(prev) = &newest {
                if !prev.is_before(ts, row) {
                    return Err(BackupError::FetchError {
                        table: self.store.name(),
                        reason: format!(
                            "row {} is not after watermark {}@{}/{}",
                            row.key(),
                            prev.timestamp,
                            prev.partition_key,
                            prev.row_key
                        ),
                    });
                }
            }
            newest = Some(WatermarkPosition::new(ts, row.key()));
        }

        let next = match newest {
            Some(p) if !page.rows.is_empty() => Cursor::Watermark(Watermark::At(p)),
            _ => Cursor::Watermark(Watermark::Exhausted),
        };
        Ok(FetchedPage {
            rows: page.rows,
            next,
        })
    }
}

/// Reads the watermark timestamp of `row`.
pub fn row_timestamp(row: &Row, field: &str) -> Result<DateTime<Utc>> {
    row.get(field)
        .and_then(|v| v.as_datetime())
        .ok_or_else(|| BackupError::WatermarkError {
            partition_key: row.partition_key.clone(),
            row_key: row.row_key.clone(),
            field: field.to_string(),
        })
}
