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

//! # Activity Executor
//!
//! The unit of work the orchestrator schedules: fetch one page, append it,
//! report the new cursor. Given the same context and input cursor it always
//! reads the same way, so re-running it after a crash appends an equivalent
//! page (possibly a second time; writes are at-least-once).

use log::debug;

use crate::application::append_sink::AppendSink;
use crate::application::page_fetcher::PageFetcher;
use crate::domain::cursor::{Cursor, Watermark};
use crate::domain::errors::Result;
use crate::domain::export_models::{PagingMode, RunContext, StepOutcome};

pub struct ActivityExecutor {
    fetcher: PageFetcher,
    sink: AppendSink,
}

impl ActivityExecutor {
    pub fn new(fetcher: PageFetcher, sink: AppendSink) -> Self {
        Self { fetcher, sink }
    }

    pub fn table_name(&self) -> String {
        self.fetcher.table_name()
    }

    /// Runs one fetch-then-append cycle starting at `cursor`.
    pub fn execute(&self, ctx: &RunContext, cursor: &Cursor) -> Result<StepOutcome> {
        if cursor.is_terminal() {
            return Ok(StepOutcome::empty(cursor.clone()));
        }
        if ctx.mode == PagingMode::SingleShot {
            return self.execute_single_shot(ctx, cursor);
        }

        let page = self
            .fetcher
            .fetch(cursor, ctx.page_size, &ctx.watermark_field)?;

        if page.rows.is_empty() {
            // An empty token page may still carry a token; keep following it.
            let next = match page.next {
                Cursor::Watermark(_) => Cursor::Watermark(Watermark::Exhausted),
                token => token,
            };
            debug!("Empty page at {}, next cursor {}", cursor, next);
            return Ok(StepOutcome::empty(next));
        }

        let appended = self.sink.append_page(&ctx.destination, &page.rows)?;

        Ok(StepOutcome {
            rows_written: page.rows.len() as u64,
            bytes_written: appended.bytes,
            cursor: page.next,
        })
    }

    fn execute_single_shot(&self, ctx: &RunContext, cursor: &Cursor) -> Result<StepOutcome> {
        let rows = self.fetcher.fetch_all(ctx.page_size)?;
        let done = cursor.terminal();
        if rows.is_empty() {
            return Ok(StepOutcome::empty(done));
        }

        let appended = self.sink.append_page(&ctx.destination, &rows)?;
        Ok(StepOutcome {
            rows_written: rows.len() as u64,
            bytes_written: appended.bytes,
            cursor: done,
        })
    }
}
