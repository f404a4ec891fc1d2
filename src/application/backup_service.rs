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

//! # Backup Service
//!
//! The entry point that wires the ports together for a run:
//! 1. Freezes a [`BackupRequest`] into a [`RunContext`] (run id, destination).
//! 2. Chooses the invoker: a [`ReplayHost`] when a history store is configured,
//!    otherwise a [`DirectInvoker`].
//! 3. Drives the [`BackupOrchestrator`] and turns the outcome into a [`RunReport`].
//!
//! Runs can be awaited ([`BackupService::run`]), started in the background
//! ([`BackupService::start`]) or fanned out over the rayon pool
//! ([`BackupService::run_all`]).

use chrono::Utc;
use log::{error, info};
use rayon::prelude::*;
use std::fs::File;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

use crate::application::activity::ActivityExecutor;
use crate::application::append_sink::AppendSink;
use crate::application::orchestrator::BackupOrchestrator;
use crate::application::page_fetcher::PageFetcher;
use crate::application::replay::{ActivityInvoker, DirectInvoker, ReplayHost};
use crate::domain::errors::{BackupError, Result};
use crate::domain::export_models::{
    BackupDestination, BackupRequest, RunContext, RunId, RunReport, RunStats, RunStatus,
};
use crate::ports::blob_store_port::BlobStorePort;
use crate::ports::history_port::HistoryStorePort;
use crate::ports::table_store_port::TableStorePort;

/// Observable state of a run started with [`BackupService::start`].
#[derive(Debug, Clone, PartialEq)]
pub enum RunState {
    Pending,
    Running { pages: u64, rows: u64 },
    Completed(Box<RunReport>),
    /// The report keeps the pages appended before the failure and the cursor
    /// after the last of them.
    Failed(Box<RunReport>),
}

/// Handle to a background run.
pub struct RunHandle {
    pub run_id: RunId,
    pub destination: BackupDestination,
    state: Arc<Mutex<RunState>>,
    join: JoinHandle<RunReport>,
}

impl RunHandle {
    pub fn status(&self) -> RunState {
        match self.state.lock() {
            Ok(state) => state.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Blocks until the run finishes and returns its report.
    pub fn wait(self) -> Result<RunReport> {
        self.join
            .join()
            .map_err(|_| BackupError::Unknown(format!("Run {} panicked", self.run_id)))
    }
}

pub struct BackupService {
    table: Arc<dyn TableStorePort>,
    blobs: Arc<dyn BlobStorePort>,
    history: Option<Arc<dyn HistoryStorePort>>,
}

impl BackupService {
    pub fn new(table: Arc<dyn TableStorePort>, blobs: Arc<dyn BlobStorePort>) -> Self {
        Self {
            table,
            blobs,
            history: None,
        }
    }

    /// Records every step so an interrupted run can be resumed by id.
    pub fn with_history(mut self, history: Arc<dyn HistoryStorePort>) -> Self {
        self.history = Some(history);
        self
    }

    /// Guards against silently continuing (or silently restarting) a run.
    ///
    /// With `resume` the named run must have recorded history; without it a
    /// caller-supplied run id must not have any.
    pub fn check_resume(&self, request: &BackupRequest, resume: bool) -> Result<()> {
        let (Some(history), Some(run_id)) = (&self.history, &request.run_id) else {
            if resume {
                return Err(BackupError::ConfigError(
                    "resuming needs a run id and a history store".into(),
                ));
            }
            return Ok(());
        };
        let recorded = history.load(run_id)?.len();
        match (resume, recorded) {
            (true, 0) => Err(BackupError::HistoryError(format!(
                "Run {} has no recorded history to resume",
                run_id
            ))),
            (false, n) if n > 0 => Err(BackupError::HistoryError(format!(
                "Run {} already has {} recorded step(s); resume it or pick a new run id",
                run_id, n
            ))),
            _ => Ok(()),
        }
    }

    pub fn prepare(&self, request: BackupRequest) -> Result<RunContext> {
        request.into_context(&self.table.name())
    }

    /// Runs one backup to completion on the calling thread.
    pub fn run(&self, request: BackupRequest) -> Result<RunReport> {
        let ctx = self.prepare(request)?;
        self.execute(&ctx, |_| {})
    }

    /// Like [`run`](Self::run), but folds a failure into a `FAILED` report.
    pub fn run_to_report(&self, request: BackupRequest) -> RunReport {
        let started_at = Utc::now();
        let mode = request.mode;
        let ctx = match self.prepare(request) {
            Ok(ctx) => ctx,
            Err(e) => {
                error!("Backup request rejected: {}", e);
                return RunReport::rejected(mode, started_at, e.to_string());
            }
        };
        self.execute_to_report(&ctx, |_| {})
    }

    /// Runs several backups concurrently on the global rayon pool.
    pub fn run_all(&self, requests: Vec<BackupRequest>) -> Vec<RunReport> {
        info!("Running {} backup(s)", requests.len());
        requests
            .into_par_iter()
            .map(|req| self.run_to_report(req))
            .collect()
    }

    /// Starts a run on its own thread and returns immediately.
    pub fn start(self: &Arc<Self>, request: BackupRequest) -> Result<RunHandle> {
        let ctx = self.prepare(request)?;
        let state = Arc::new(Mutex::new(RunState::Pending));
        let run_id = ctx.run_id.clone();
        let destination = ctx.destination.clone();

        let service = Arc::clone(self);
        let shared = Arc::clone(&state);
        let join = std::thread::Builder::new()
            .name(format!("backup-{}", run_id))
            .spawn(move || {
                let report = service.execute_to_report(&ctx, |stats| {
                    set_state(
                        &shared,
                        RunState::Running {
                            pages: stats.pages,
                            rows: stats.rows,
                        },
                    )
                });
                let done = Box::new(report.clone());
                match report.status {
                    RunStatus::Failed => set_state(&shared, RunState::Failed(done)),
                    _ => set_state(&shared, RunState::Completed(done)),
                }
                report
            })?;

        info!("Started run {} writing to {}", run_id, destination);
        Ok(RunHandle {
            run_id,
            destination,
            state,
            join,
        })
    }

    fn execute_to_report<F>(&self, ctx: &RunContext, on_step: F) -> RunReport
    where
        F: FnMut(&RunStats),
    {
        let started_at = Utc::now();
        let start = Instant::now();
        match self.execute(ctx, on_step) {
            Ok(report) => report,
            Err(e) => {
                error!("Run {} failed: {}", ctx.run_id, e);
                RunReport::failure(ctx, &e, started_at, start.elapsed().as_secs_f64())
            }
        }
    }

    fn execute<F>(&self, ctx: &RunContext, on_step: F) -> Result<RunReport>
    where
        F: FnMut(&RunStats),
    {
        let started_at = Utc::now();
        let start = Instant::now();
        let executor = ActivityExecutor::new(
            PageFetcher::new(Arc::clone(&self.table)),
            AppendSink::new(Arc::clone(&self.blobs)),
        );

        let mut direct;
        let mut replay;
        let invoker: &mut dyn ActivityInvoker = match &self.history {
            Some(history) => {
                replay = ReplayHost::new(&executor, ctx, history.as_ref())?;
                &mut replay
            }
            None => {
                direct = DirectInvoker::new(&executor, ctx);
                &mut direct
            }
        };

        let outcome = BackupOrchestrator::new(ctx).run_with_progress(invoker, on_step)?;
        Ok(RunReport::finished(
            ctx,
            outcome.stats,
            outcome.cursor,
            started_at,
            start.elapsed().as_secs_f64(),
        ))
    }
}

fn set_state(state: &Mutex<RunState>, next: RunState) {
    match state.lock() {
        Ok(mut guard) => *guard = next,
        Err(poisoned) => *poisoned.into_inner() = next,
    }
}

/// Writes `report_<timestamp>.json` into `output_dir` and returns its path.
pub fn write_report(reports: &[RunReport], output_dir: &str, duration_secs: f64) -> Result<String> {
    let total = reports.len();
    let completed = reports
        .iter()
        .filter(|r| r.status == RunStatus::Completed)
        .count();
    let capped = reports
        .iter()
        .filter(|r| r.status == RunStatus::Capped)
        .count();
    let failed = total - (completed + capped);

    info!(
        "Report: Total={}, Completed={}, Capped={}, Failed={}",
        total, completed, capped, failed
    );

    let total_rows = reports.iter().map(|r| r.rows).sum::<u64>();
    let total_bytes = reports.iter().map(|r| r.bytes).sum::<u64>();
    let total_mb = total_bytes as f64 / 1024.0 / 1024.0;
    let total_mb_per_sec = if duration_secs > 0.0 {
        total_mb / duration_secs
    } else {
        0.0
    };

    let report = serde_json::json!({
        "summary": {
            "total_rows": total_rows,
            "total_bytes": total_bytes,
            "total_mb_per_sec": (total_mb_per_sec * 100.0).round() / 100.0,
            "total_runs": total,
            "completed": completed,
            "capped": capped,
            "failed": failed,
            "total_duration_seconds": duration_secs,
            "timestamp": chrono::Local::now().to_rfc3339(),
            "timezone": chrono::Local::now().offset().to_string()
        },
        "details": reports
    });

    std::fs::create_dir_all(output_dir)?;
    let timestamp_str = Utc::now().format("%Y%m%d_%H%M%S").to_string();
    let path = Path::new(output_dir).join(format!("report_{}.json", timestamp_str));
    let mut file = File::create(&path)?;
    serde_json::to_writer_pretty(&mut file, &report)?;

    Ok(path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::codec;
    use crate::domain::cursor::{Continuation, Cursor, Watermark};
    use crate::domain::entities::Row;
    use crate::domain::export_models::PagingMode;
    use crate::infrastructure::local_storage::history_file_adapter::MemoryHistoryAdapter;
    use crate::infrastructure::local_storage::memory_blob_adapter::MemoryBlobAdapter;
    use crate::infrastructure::table::memory_table_adapter::MemoryTableAdapter;
    use chrono::TimeZone;
    use std::collections::HashSet;

    fn table(n: i64) -> Arc<MemoryTableAdapter> {
        Arc::new(MemoryTableAdapter::with_rows(
            "orders",
            (0..n).map(|i| {
                Row::new(format!("p{}", i % 3), format!("{:05}", i))
                    .with("Timestamp", Utc.timestamp_opt(1_700_000_000 + i, 0).unwrap())
                    .with("Amount", i)
            }),
        ))
    }

    fn request(mode: PagingMode, run_id: Option<&str>) -> BackupRequest {
        BackupRequest {
            run_id: run_id.map(|id| RunId::parse(id).unwrap()),
            mode,
            page_size: 1000,
            base_name: "orders.json".into(),
            watermark_field: "Timestamp".into(),
            max_pages: None,
        }
    }

    #[test]
    fn test_run_reports_totals() {
        let blobs = Arc::new(MemoryBlobAdapter::default());
        let service = BackupService::new(table(2500), blobs.clone());

        let report = service
            .run(request(PagingMode::Watermark, Some("nightly")))
            .unwrap();
        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.destination, "nightly-watermark-orders.json");
        assert_eq!(report.rows, 2500);
        assert_eq!(report.pages, 3);
        assert_eq!(report.steps, 4);
        assert_eq!(
            report.final_cursor,
            Some(Cursor::Watermark(Watermark::Exhausted))
        );

        let bytes = blobs.read(&report.destination).unwrap().unwrap();
        assert_eq!(report.bytes, bytes.len() as u64);
        let pages = codec::decode_stream(&bytes).unwrap();
        assert_eq!(pages.iter().map(Vec::len).collect::<Vec<_>>(), vec![1000, 1000, 500]);
    }

    #[test]
    fn test_rejected_request_becomes_failed_report() {
        let service = BackupService::new(table(1), Arc::new(MemoryBlobAdapter::default()));
        let mut req = request(PagingMode::Token, None);
        req.page_size = 0;

        assert!(service.run(req.clone()).is_err());
        let report = service.run_to_report(req);
        assert_eq!(report.status, RunStatus::Failed);
        assert!(report.error.unwrap().contains("page size"));
    }

    #[test]
    fn test_same_run_id_resumes_from_history() {
        let store = table(30);
        let blobs = Arc::new(MemoryBlobAdapter::default());
        let history = Arc::new(MemoryHistoryAdapter::new());
        let service =
            BackupService::new(store.clone(), blobs.clone()).with_history(history.clone());

        let mut capped = request(PagingMode::Watermark, Some("resume-me"));
        capped.page_size = 10;
        capped.max_pages = Some(2);
        let first = service.run(capped.clone()).unwrap();
        assert_eq!(first.status, RunStatus::Capped);
        assert_eq!(first.rows, 20);
        assert_eq!(store.query_count(), 2);

        capped.max_pages = None;
        let second = service.run(capped).unwrap();
        assert_eq!(second.status, RunStatus::Completed);
        assert_eq!(second.rows, 30);
        // Two recorded steps answered from history, then one page and the empty probe.
        assert_eq!(store.query_count(), 4);

        let rows = codec::decode_rows(&blobs.read(&second.destination).unwrap().unwrap()).unwrap();
        assert_eq!(rows.len(), 30);
    }

    #[test]
    fn test_failed_run_reports_what_was_appended() {
        let blobs = Arc::new(MemoryBlobAdapter::default().fail_appends_after(2));
        let service = Arc::new(BackupService::new(table(30), blobs.clone()));
        let mut req = request(PagingMode::Token, Some("flaky"));
        req.page_size = 10;

        let report = service.run_to_report(req.clone());
        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.rows, 20);
        assert_eq!(report.pages, 2);
        assert!(matches!(
            report.final_cursor,
            Some(Cursor::Token(Continuation::Next(_)))
        ));
        assert!(report.error.unwrap().contains("connection reset"));

        req.run_id = Some(RunId::parse("flaky-2").unwrap());
        let handle = service.start(req).unwrap();
        let state = Arc::clone(&handle.state);
        let report = handle.wait().unwrap();
        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.rows, 0);
        let final_state = state.lock().unwrap().clone();
        assert_eq!(final_state, RunState::Failed(Box::new(report)));
    }

    #[test]
    fn test_check_resume() {
        let history = Arc::new(MemoryHistoryAdapter::new());
        let service = BackupService::new(table(3), Arc::new(MemoryBlobAdapter::default()))
            .with_history(history);
        let req = request(PagingMode::Token, Some("r1"));

        assert!(service.check_resume(&req, true).is_err());
        service.check_resume(&req, false).unwrap();
        service.run(req.clone()).unwrap();
        assert!(matches!(
            service.check_resume(&req, false),
            Err(BackupError::HistoryError(_))
        ));
        service.check_resume(&req, true).unwrap();

        let plain = BackupService::new(table(3), Arc::new(MemoryBlobAdapter::default()));
        assert!(plain.check_resume(&req, true).is_err());
        plain.check_resume(&req, false).unwrap();
    }

    #[test]
    fn test_concurrent_runs_use_distinct_destinations() {
        let blobs = Arc::new(MemoryBlobAdapter::default());
        let service = Arc::new(BackupService::new(table(120), blobs.clone()));

        let mut small = request(PagingMode::Token, None);
        small.page_size = 7;
        let a = service.start(small.clone()).unwrap();
        let b = service.start(small).unwrap();
        assert_ne!(a.destination, b.destination);

        for handle in [a, b] {
            let dest = handle.destination.clone();
            let report = handle.wait().unwrap();
            assert_eq!(report.status, RunStatus::Completed);
            assert_eq!(report.destination, dest.name());

            let rows = codec::decode_rows(&blobs.read(dest.name()).unwrap().unwrap()).unwrap();
            let keys: HashSet<_> = rows.iter().map(Row::key).collect();
            assert_eq!(rows.len(), 120);
            assert_eq!(keys.len(), 120);
        }
    }

    #[test]
    fn test_handle_reports_completion() {
        let service = Arc::new(BackupService::new(
            table(5),
            Arc::new(MemoryBlobAdapter::default()),
        ));
        let handle = service
            .start(request(PagingMode::SingleShot, Some("one")))
            .unwrap();
        assert_eq!(handle.destination.name(), "one-full-orders.json");

        let state = Arc::clone(&handle.state);
        let report = handle.wait().unwrap();
        assert_eq!(report.rows, 5);
        let final_state = state.lock().unwrap().clone();
        assert_eq!(final_state, RunState::Completed(Box::new(report)));
    }

    #[test]
    fn test_run_all_and_write_report() {
        let dir = tempfile::tempdir().unwrap();
        let service = BackupService::new(table(50), Arc::new(MemoryBlobAdapter::default()));

        let mut bad = request(PagingMode::Token, None);
        bad.base_name = String::new();
        let reports = service.run_all(vec![
            request(PagingMode::Token, None),
            request(PagingMode::Watermark, None),
            bad,
        ]);
        assert_eq!(reports.len(), 3);
        assert_eq!(
            reports.iter().filter(|r| r.status == RunStatus::Completed).count(),
            2
        );

        let out = dir.path().join("reports");
        let path = write_report(&reports, out.to_str().unwrap(), 1.5).unwrap();
        let json: serde_json::Value =
            serde_json::from_reader(File::open(path).unwrap()).unwrap();
        assert_eq!(json["summary"]["total_rows"], 100);
        assert_eq!(json["summary"]["failed"], 1);
        assert_eq!(json["details"].as_array().unwrap().len(), 3);
    }
}
