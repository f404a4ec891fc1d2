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

//! Core error definitions for the table backup.
//!
//! This module provides a centralized `BackupError` enum and a `Result` type
//! used throughout the application to handle store, I/O, replay and logic errors.

use thiserror::Error;

use crate::domain::cursor::Cursor;
use crate::domain::export_models::RunStats;

/// Error types encountered during a backup run.
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Fetch failed for {table}: {reason}")]
    FetchError { table: String, reason: String },

    #[error("Append to {destination} failed: {reason}")]
    AppendError { destination: String, reason: String },

    /// A row reached the watermark fetcher without a usable timestamp.
    #[error("Row {partition_key}/{row_key} has no usable watermark field '{field}'")]
    WatermarkError {
        partition_key: String,
        row_key: String,
        field: String,
    },

    #[error("Cursor moved backwards from {previous} to {next}")]
    CursorRegression { previous: String, next: String },

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("History error: {0}")]
    HistoryError(String),

    /// The orchestrator asked for something different from what history recorded.
    #[error("Non-deterministic replay at step {sequence}: history has {expected}, orchestrator requested {actual}")]
    NonDeterminism {
        sequence: u64,
        expected: String,
        actual: String,
    },

    /// A step failed after earlier steps had already been appended.
    ///
    /// `cursor` is the input of the failed step, i.e. the cursor after the
    /// last page that completed.
    #[error("Run aborted after {} step(s) at cursor {cursor}: {source}", .stats.steps)]
    RunAborted {
        stats: RunStats,
        cursor: Cursor,
        #[source]
        source: Box<BackupError>,
    },

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<serde_json::Error> for BackupError {
    fn from(e: serde_json::Error) -> Self {
        BackupError::SerializationError(e.to_string())
    }
}

/// A specialized Result type for the table backup.
impl BackupError {
    /// The error that actually stopped the run, looking through `RunAborted`.
    pub fn root_cause(&self) -> &BackupError {
        match self {
            BackupError::RunAborted { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
