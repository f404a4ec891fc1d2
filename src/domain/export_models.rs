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

//! Domain models describing a backup run: how it pages, where it writes,
//! what each step reports, and the final report card.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::domain::cursor::{Continuation, Cursor, Watermark};
use crate::domain::errors::{BackupError, Result};

/// Pagination strategy for one run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PagingMode {
    /// Follow the store's continuation tokens.
    Token,
    /// Filter on the timestamp watermark, ordered by timestamp.
    Watermark,
    /// Drain the whole table in one activity and append it as one block.
    SingleShot,
}

impl PagingMode {
    /// Destination name suffix identifying the strategy that produced it.
    pub fn suffix(&self) -> &'static str {
        match self {
            PagingMode::Token => "token",
            PagingMode::Watermark => "watermark",
            PagingMode::SingleShot => "full",
        }
    }

    pub fn initial_cursor(&self) -> Cursor {
        match self {
            PagingMode::Token | PagingMode::SingleShot => Cursor::Token(Continuation::Start),
            PagingMode::Watermark => Cursor::Watermark(Watermark::Beginning),
        }
    }
}

impl fmt::Display for PagingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PagingMode::Token => write!(f, "TOKEN"),
            PagingMode::Watermark => write!(f, "WATERMARK"),
            PagingMode::SingleShot => write!(f, "SINGLE_SHOT"),
        }
    }
}

impl FromStr for PagingMode {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "token" => Ok(PagingMode::Token),
            "watermark" => Ok(PagingMode::Watermark),
            "single_shot" | "single-shot" | "full" => Ok(PagingMode::SingleShot),
            other => Err(BackupError::ConfigError(format!(
                "Unknown paging mode '{}' (expected token, watermark or single_shot)",
                other
            ))),
        }
    }
}

static RUN_SEQUENCE: AtomicU32 = AtomicU32::new(0);

/// Identifier of one orchestration run.
///
/// Used verbatim as the destination prefix and as the key under which replay
/// history is stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(String);

impl RunId {
    /// Validates a caller-supplied identifier.
    pub fn parse(id: &str) -> Result<Self> {
        let id = id.trim();
        if id.is_empty() {
            return Err(BackupError::ConfigError("Run id must not be empty".into()));
        }
        if id.contains('/') || id.contains('\\') {
            return Err(BackupError::ConfigError(format!(
                "Run id '{}' must not contain path separators",
                id
            )));
        }
        Ok(Self(id.to_string()))
    }

    /// Derives a fresh identifier from the current time.
    ///
    /// The process id and a per-process sequence number keep runs started in
    /// the same microsecond apart.
    pub fn generate() -> Self {
        let seq = RUN_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        Self(format!(
            "{}-{:x}-{}",
            Utc::now().format("%Y%m%dT%H%M%S%6f"),
            std::process::id(),
            seq
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of the append-only object a run writes to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackupDestination(String);

impl BackupDestination {
    /// `{run_id}-{suffix}-{base_name}`.
    pub fn for_run(run_id: &RunId, mode: PagingMode, base_name: &str) -> Self {
        Self(format!("{}-{}-{}", run_id, mode.suffix(), base_name))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BackupDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything a run needs, captured once when the run starts.
///
/// Nothing downstream re-reads configuration or the environment; the same
/// context is handed to every step, so a replayed run sees the same values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    pub run_id: RunId,
    pub mode: PagingMode,
    pub page_size: usize,
    pub destination: BackupDestination,
    /// Property that carries the row timestamp in watermark mode.
    pub watermark_field: String,
    /// Operational safety cap on executed steps; `None` runs to the end of the table.
    pub max_pages: Option<u64>,
    /// Source label used in error messages.
    pub table: String,
}

/// A request to start one backup, before the run id is fixed.
#[derive(Debug, Clone, PartialEq)]
pub struct BackupRequest {
    /// Caller-supplied id. Reusing the id of an interrupted run resumes it.
    pub run_id: Option<RunId>,
    pub mode: PagingMode,
    pub page_size: usize,
    pub base_name: String,
    pub watermark_field: String,
    pub max_pages: Option<u64>,
}

impl BackupRequest {
    /// Freezes the request into the context every step of the run will see.
    pub fn into_context(self, table: &str) -> Result<RunContext> {
        if self.page_size == 0 {
            return Err(BackupError::ConfigError("page size must be at least 1".into()));
        }
        if self.base_name.is_empty() || self.base_name.contains(['/', '\\']) {
            return Err(BackupError::ConfigError(format!(
                "invalid destination base name '{}'",
                self.base_name
            )));
        }
        let run_id = self.run_id.unwrap_or_else(RunId::generate);
        Ok(RunContext {
            destination: BackupDestination::for_run(&run_id, self.mode, &self.base_name),
            run_id,
            mode: self.mode,
            page_size: self.page_size,
            watermark_field: self.watermark_field,
            max_pages: self.max_pages,
            table: table.to_string(),
        })
    }
}

/// Uniform result of one activity step, for every strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub rows_written: u64,
    pub bytes_written: u64,
    pub cursor: Cursor,
}

impl StepOutcome {
    /// A step that wrote nothing and only moved the cursor.
    pub fn empty(cursor: Cursor) -> Self {
        Self {
            rows_written: 0,
            bytes_written: 0,
            cursor,
        }
    }
}

/// Cumulative counters for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    /// Activity invocations, including the final empty one.
    pub steps: u64,
    /// Pages that were appended to the destination.
    pub pages: u64,
    pub rows: u64,
    pub bytes: u64,
}

impl RunStats {
    pub fn absorb(&mut self, outcome: &StepOutcome) {
        self.steps += 1;
        if outcome.rows_written > 0 {
            self.pages += 1;
        }
        self.rows += outcome.rows_written;
        self.bytes += outcome.bytes_written;
    }
}

/// Final state of a run as shown to operators.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Completed,
    /// Stopped by the operational page cap before the table was exhausted.
    Capped,
    Failed,
}

/// `RunReport` is the "Report Card" for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub destination: String,
    pub mode: PagingMode,
    pub steps: u64,
    pub pages: u64,
    pub rows: u64,
    pub bytes: u64,
    pub final_cursor: Option<Cursor>,
    pub status: RunStatus,
    pub error: Option<String>,
    pub duration: f64,
    pub started_at: DateTime<Utc>,
}

impl RunReport {
    pub fn finished(
        ctx: &RunContext,
        stats: RunStats,
        cursor: Cursor,
        started_at: DateTime<Utc>,
        duration: f64,
    ) -> Self {
        let status = if cursor.is_terminal() {
            RunStatus::Completed
        } else {
            RunStatus::Capped
        };
        Self {
            run_id: ctx.run_id.to_string(),
            destination: ctx.destination.to_string(),
            mode: ctx.mode,
            steps: stats.steps,
            pages: stats.pages,
            rows: stats.rows,
            bytes: stats.bytes,
            final_cursor: Some(cursor),
            status,
            error: None,
            duration,
            started_at,
        }
    }

    /// A request that never became a run (invalid before a destination existed).
    pub fn rejected(mode: PagingMode, started_at: DateTime<Utc>, error: String) -> Self {
        Self {
            run_id: String::new(),
            destination: String::new(),
            mode,
            steps: 0,
            pages: 0,
            rows: 0,
            bytes: 0,
            final_cursor: None,
            status: RunStatus::Failed,
            error: Some(error),
            duration: 0.0,
            started_at,
        }
    }

    /// Report of a run that stopped on `error`.
    ///
    /// When the run got as far as paging, the report keeps what was appended
    /// and the cursor after the last completed page.
    pub fn failure(
        ctx: &RunContext,
        error: &BackupError,
        started_at: DateTime<Utc>,
        duration: f64,
    ) -> Self {
        let (stats, final_cursor) = match error {
            BackupError::RunAborted { stats, cursor, .. } => (*stats, Some(cursor.clone())),
            _ => (RunStats::default(), None),
        };
        Self {
            run_id: ctx.run_id.to_string(),
            destination: ctx.destination.to_string(),
            mode: ctx.mode,
            steps: stats.steps,
            pages: stats.pages,
            rows: stats.rows,
            bytes: stats.bytes,
            final_cursor,
            status: RunStatus::Failed,
            error: Some(error.to_string()),
            duration,
            started_at,
        }
    }
}
