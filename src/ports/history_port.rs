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

//! # History Port
//!
//! Durable record of the activity steps a run has completed. The replay host
//! reads it back on restart so the orchestrator can pick up where it stopped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::cursor::Cursor;
use crate::domain::errors::Result;
use crate::domain::export_models::{RunId, StepOutcome};

/// One completed activity step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEvent {
    /// Zero-based position of the step within the run.
    pub sequence: u64,
    /// Cursor the orchestrator passed in.
    pub input: Cursor,
    pub outcome: StepOutcome,
    pub recorded_at: DateTime<Utc>,
}

pub trait HistoryStorePort: Send + Sync {
    /// All events recorded for `run_id`, in sequence order.
    fn load(&self, run_id: &RunId) -> Result<Vec<HistoryEvent>>;

    /// Durably records the next event. Sequence numbers must be contiguous.
    fn append(&self, run_id: &RunId, event: &HistoryEvent) -> Result<()>;
}
