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

//! The pagination state machine that drives one backup run.
//!
//! `Initializing -> Paging -> Completed`. The orchestrator performs no I/O of
//! its own: every value it branches on comes back from an activity step, which
//! is what allows a [`ReplayHost`](crate::application::replay::ReplayHost) to
//! re-run it from the top and land on exactly the same decisions.
//!
//! Errors from a step are not caught. They abort the run, leaving the
//! destination as it was after the last completed append.

use log::{debug, info, warn};

use crate::application::replay::ActivityInvoker;
use crate::domain::cursor::{Cursor, Watermark};
use crate::domain::errors::{BackupError, Result};
use crate::domain::export_models::{RunContext, RunStats};

#[derive(Debug, Clone, PartialEq)]
enum OrchestrationState {
    Initializing,
    Paging(Cursor),
    Completed(Cursor),
}

/// What a finished run hands back to its host.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub stats: RunStats,
    /// Terminal sentinel, or the last cursor reached if the page cap stopped the run.
    pub cursor: Cursor,
}

/// Orchestrates the paged export of one table into one destination.
pub struct BackupOrchestrator<'a> {
    ctx: &'a RunContext,
}

impl<'a> BackupOrchestrator<'a> {
    pub fn new(ctx: &'a RunContext) -> Self {
        Self { ctx }
    }

    /// Runs to completion.
    pub fn run(&self, invoker: &mut dyn ActivityInvoker) -> Result<RunOutcome> {
        self.run_with_progress(invoker, |_| {})
    }

    /// Runs to completion, reporting cumulative stats after every step.
    pub fn run_with_progress<F>(
        &self,
        invoker: &mut dyn ActivityInvoker,
        mut on_step: F,
    ) -> Result<RunOutcome>
    where
        F: FnMut(&RunStats),
    {
        let ctx = self.ctx;
        let mut stats = RunStats::default();
        // Steps run in this call; replayed history does not count against the cap.
        let mut executed = 0u64;
        let mut state = OrchestrationState::Initializing;

        loop {
            state = match state {
                OrchestrationState::Initializing => {
                    if !invoker.is_replaying() {
                        info!(
                            "Run {}: backing up {} to {} ({} mode, page size {})",
                            ctx.run_id, ctx.table, ctx.destination, ctx.mode, ctx.page_size
                        );
                    }
                    OrchestrationState::Paging(ctx.mode.initial_cursor())
                }
                OrchestrationState::Paging(cursor) => {
                    if let Some(cap) = ctx.max_pages {
                        if executed >= cap {
                            warn!(
                                "Run {} stopped at the {}-step cap with cursor {}",
                                ctx.run_id, cap, cursor
                            );
                            return Ok(RunOutcome { stats, cursor });
                        }
                    }

                    let replaying = invoker.is_replaying();
                    let step = invoker
                        .call_activity(&cursor)
                        .and_then(|outcome| check_progress(&cursor, &outcome.cursor).map(|_| outcome));
                    let outcome = match step {
                        Ok(outcome) => outcome,
                        Err(source) => {
                            return Err(BackupError::RunAborted {
                                stats,
                                cursor,
                                source: Box::new(source),
                            })
                        }
                    };
                    if !replaying {
                        executed += 1;
                    }
                    stats.absorb(&outcome);
                    on_step(&stats);

                    if replaying {
                        debug!(
                            "Run {} replayed step {}: {} rows, cursor {}",
                            ctx.run_id, stats.steps, outcome.rows_written, outcome.cursor
                        );
                    } else {
                        info!(
                            "Run {} step {}: {} rows ({} total), cursor {}",
                            ctx.run_id, stats.steps, outcome.rows_written, stats.rows, outcome.cursor
                        );
                    }

                    if outcome.cursor.is_terminal() {
                        OrchestrationState::Completed(outcome.cursor)
                    } else {
                        OrchestrationState::Paging(outcome.cursor)
                    }
                }
                OrchestrationState::Completed(cursor) => {
                    info!(
                        "Run {} completed: {} pages, {} rows, {} bytes in {}",
                        ctx.run_id, stats.pages, stats.rows, stats.bytes, ctx.destination
                    );
                    return Ok(RunOutcome { stats, cursor });
                }
            };
        }
    }
}

/// Rejects a step that switched cursor shape or moved a watermark backwards.
fn check_progress(previous: &Cursor, next: &Cursor) -> Result<()> {
    let regressed = match (previous, next) {
        (Cursor::Watermark(a), Cursor::Watermark(b)) => b < a,
        (Cursor::Token(_), Cursor::Token(_)) => false,
        _ => true,
    };
    if regressed {
        return Err(BackupError::CursorRegression {
            previous: previous.to_string(),
            next: next.to_string(),
        });
    }
    // A watermark that stands still would loop forever.
    if let (Cursor::Watermark(Watermark::At(a)), Cursor::Watermark(Watermark::At(b))) =
        (previous, next)
    {
        if a == b {
            return Err(BackupError::CursorRegression {
                previous: previous.to_string(),
                next: next.to_string(),
            });
        }
    }
    Ok(())
}
