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

//! # Durable Replay
//!
//! The orchestrator never calls the executor directly. It goes through an
//! [`ActivityInvoker`], which decides whether a step really runs:
//!
//! - [`DirectInvoker`] always executes. A restarted run starts from the top.
//! - [`ReplayHost`] records every completed step in a history store. When the
//!   same run id is started again, the first N calls are answered from history
//!   and only the remaining steps execute, so the run continues from its last
//!   recorded cursor against the same destination.
//!
//! A step that appended its page but died before being recorded is executed
//! again on resume. That second append is the accepted at-least-once cost.

use chrono::Utc;
use log::info;

use crate::application::activity::ActivityExecutor;
use crate::domain::cursor::Cursor;
use crate::domain::errors::{BackupError, Result};
use crate::domain::export_models::{RunContext, StepOutcome};
use crate::ports::history_port::{HistoryEvent, HistoryStorePort};

/// The single suspension point of an orchestration.
pub trait ActivityInvoker {
    /// Runs (or replays) the next activity step with `input`.
    fn call_activity(&mut self, input: &Cursor) -> Result<StepOutcome>;

    /// True while calls are being answered from recorded history.
    fn is_replaying(&self) -> bool;
}

pub struct DirectInvoker<'a> {
    executor: &'a ActivityExecutor,
    ctx: &'a RunContext,
}

impl<'a> DirectInvoker<'a> {
    pub fn new(executor: &'a ActivityExecutor, ctx: &'a RunContext) -> Self {
        Self { executor, ctx }
    }
}

impl ActivityInvoker for DirectInvoker<'_> {
    fn call_activity(&mut self, input: &Cursor) -> Result<StepOutcome> {
        self.executor.execute(self.ctx, input)
    }

    fn is_replaying(&self) -> bool {
        false
    }
}

pub struct ReplayHost<'a> {
    executor: &'a ActivityExecutor,
    ctx: &'a RunContext,
    history: &'a dyn HistoryStorePort,
    recorded: Vec<HistoryEvent>,
    next_sequence: u64,
}

impl<'a> ReplayHost<'a> {
    /// Loads the recorded history of `ctx.run_id`.
    pub fn new(
        executor: &'a ActivityExecutor,
        ctx: &'a RunContext,
        history: &'a dyn HistoryStorePort,
    ) -> Result<Self> {
        let recorded = history.load(&ctx.run_id)?;
        if !recorded.is_empty() {
            info!(
                "Run {} has {} recorded step(s); replaying before resuming",
                ctx.run_id,
                recorded.len()
            );
        }
        Ok(Self {
            executor,
            ctx,
            history,
            recorded,
            next_sequence: 0,
        })
    }

    /// Number of steps that will be answered from history.
    pub fn recorded_steps(&self) -> usize {
        self.recorded.len()
    }
}

impl ActivityInvoker for ReplayHost<'_> {
    fn call_activity(&mut self, input: &Cursor) -> Result<StepOutcome> {
        let sequence = self.next_sequence;

        if let Some(event) = self.recorded.get(sequence as usize) {
            if event.input != *input {
                return Err(BackupError::NonDeterminism {
                    sequence,
                    expected: event.input.to_string(),
                    actual: input.to_string(),
                });
            }
            self.next_sequence += 1;
            return Ok(event.outcome.clone());
        }

        let outcome = self.executor.execute(self.ctx, input)?;
        self.history.append(
            &self.ctx.run_id,
            &HistoryEvent {
                sequence,
                input: input.clone(),
                outcome: outcome.clone(),
                recorded_at: Utc::now(),
            },
        )?;
        self.next_sequence += 1;
        Ok(outcome)
    }

    fn is_replaying(&self) -> bool {
        (self.next_sequence as usize) < self.recorded.len()
    }
}
