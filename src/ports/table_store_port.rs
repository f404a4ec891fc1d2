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

//! # Table Store Port
//!
//! This Port defines what it means to "read a page" from the wide-column
//! table. It doesn't care IF the table lives in a cloud service, a local file,
//! or a Mock for testing.

use chrono::SecondsFormat;
use std::fmt;

use crate::domain::cursor::WatermarkPosition;
use crate::domain::entities::RowPage;
use crate::domain::errors::Result;

/// Filter expression sent with a page query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryFilter {
    /// Every row, in the store's natural key order.
    All,
    /// Rows whose `field` timestamp sorts after `position`, tie-broken on key.
    ///
    /// Results must come back ordered by `(field, PartitionKey, RowKey)`.
    /// Rows that lack `field` must still be returned so the caller can reject
    /// them instead of silently losing them.
    After {
        field: String,
        position: Option<WatermarkPosition>,
    },
}

impl fmt::Display for QueryFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryFilter::All => write!(f, "(all)"),
            QueryFilter::After {
                field,
                position: None,
            } => write!(f, "order by {}", field),
            QueryFilter::After {
                field,
                position: Some(p),
            } => {
                let ts = p.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true);
                write!(
                    f,
                    "{field} gt datetime'{ts}' or ({field} eq datetime'{ts}' and \
                     (PartitionKey gt '{pk}' or (PartitionKey eq '{pk}' and RowKey gt '{rk}')))",
                    field = field,
                    ts = ts,
                    pk = p.partition_key,
                    rk = p.row_key
                )
            }
        }
    }
}

/// `TableStorePort` is the read side of the backup.
///
/// Implementations must be safe to call from several runs at once.
pub trait TableStorePort: Send + Sync {
    /// Human-readable name of the source, used in logs and errors.
    fn name(&self) -> String;

    /// Reads up to `page_size` rows matching `filter`, starting at
    /// `continuation` (or the beginning when `None`).
    ///
    /// `page_size` is a hint. Stores may cap it further, and an empty page
    /// with a continuation token is legal.
    fn query_page(
        &self,
        filter: &QueryFilter,
        page_size: usize,
        continuation: Option<&str>,
    ) -> Result<RowPage>;
}
