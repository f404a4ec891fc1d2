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

//! # Run History Files
//!
//! One JSON-lines file per run, `{dir}/{run_id}.history.jsonl`, holding the
//! completed activity steps in order. A torn final line (the process died in
//! the middle of writing it) is cut off on load; the step it described is
//! simply executed again.

use log::warn;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::domain::errors::{BackupError, Result};
use crate::domain::export_models::RunId;
use crate::ports::history_port::{HistoryEvent, HistoryStorePort};

pub struct FileHistoryAdapter {
    dir: PathBuf,
    /// Next expected sequence per run, filled on first load or append.
    next_sequence: Mutex<HashMap<RunId, u64>>,
}

impl FileHistoryAdapter {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            next_sequence: Mutex::new(HashMap::new()),
        })
    }

    pub fn path_for(&self, run_id: &RunId) -> PathBuf {
        self.dir.join(format!("{}.history.jsonl", run_id))
    }

    fn sequences(&self) -> Result<std::sync::MutexGuard<'_, HashMap<RunId, u64>>> {
        self.next_sequence
            .lock()
            .map_err(|_| BackupError::Unknown("history lock poisoned".into()))
    }
}

impl HistoryStorePort for FileHistoryAdapter {
    fn load(&self, run_id: &RunId) -> Result<Vec<HistoryEvent>> {
        let path = self.path_for(run_id);
        let text = match std::fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BackupError::IoError(e)),
        };

        let complete = text.ends_with('\n');
        let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
        let mut events = Vec::with_capacity(lines.len());
        for (i, line) in lines.iter().enumerate() {
            match serde_json::from_str::<HistoryEvent>(line) {
                Ok(event) => events.push(event),
                Err(e) if i + 1 == lines.len() && !complete => {
                    warn!(
                        "Dropping torn last entry in {}: {}",
                        path.display(),
                        e
                    );
                    // Cut the fragment so the next append starts on a fresh line.
                    let keep = text.rfind('\n').map_or(0, |pos| pos + 1);
                    OpenOptions::new()
                        .write(true)
                        .open(&path)?
                        .set_len(keep as u64)?;
                }
                Err(e) => {
                    return Err(BackupError::HistoryError(format!(
                        "{} line {}: {}",
                        path.display(),
                        i + 1,
                        e
                    )))
                }
            }
        }

        for (expected, event) in events.iter().enumerate() {
            if event.sequence != expected as u64 {
                return Err(BackupError::HistoryError(format!(
                    "{} has a gap: expected step {}, found {}",
                    path.display(),
                    expected,
                    event.sequence
                )));
            }
        }
        self.sequences()?
            .insert(run_id.clone(), events.len() as u64);
        Ok(events)
    }

    fn append(&self, run_id: &RunId, event: &HistoryEvent) -> Result<()> {
        let cached = self.sequences()?.get(run_id).copied();
        let expected = match cached {
            Some(next) => next,
            None => self.load(run_id)?.len() as u64,
        };
        if event.sequence != expected {
            return Err(BackupError::HistoryError(format!(
                "run {} expects step {}, got {}",
                run_id, expected, event.sequence
            )));
        }

        let path = self.path_for(run_id);
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(&line)?;
        file.sync_data()?;
        self.sequences()?.insert(run_id.clone(), expected + 1);
        Ok(())
    }
}

/// History kept in memory, for tests and runs that opt out of resuming.
#[derive(Default)]
pub struct MemoryHistoryAdapter {
    events: Mutex<HashMap<RunId, Vec<HistoryEvent>>>,
}

impl MemoryHistoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HistoryStorePort for MemoryHistoryAdapter {
    fn load(&self, run_id: &RunId) -> Result<Vec<HistoryEvent>> {
        let events = self
            .events
            .lock()
            .map_err(|_| BackupError::Unknown("history lock poisoned".into()))?;
        Ok(events.get(run_id).cloned().unwrap_or_default())
    }

    fn append(&self, run_id: &RunId, event: &HistoryEvent) -> Result<()> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| BackupError::Unknown("history lock poisoned".into()))?;
        let run = events.entry(run_id.clone()).or_default();
        if event.sequence != run.len() as u64 {
            return Err(BackupError::HistoryError(format!(
                "run {} expects step {}, got {}",
                run_id,
                run.len(),
                event.sequence
            )));
        }
        run.push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cursor::{Continuation, Cursor};
    use crate::domain::export_models::StepOutcome;

    fn event(sequence: u64) -> HistoryEvent {
        HistoryEvent {
            sequence,
            input: Cursor::Token(Continuation::Start),
            outcome: StepOutcome {
                rows_written: 3,
                bytes_written: 30,
                cursor: Cursor::Token(Continuation::Next(format!("t{}", sequence))),
            },
            recorded_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_file_history_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let history = FileHistoryAdapter::new(dir.path()).unwrap();
        let run = RunId::parse("r1").unwrap();

        assert!(history.load(&run).unwrap().is_empty());
        let (first, second) = (event(0), event(1));
        history.append(&run, &first).unwrap();
        history.append(&run, &second).unwrap();

        assert_eq!(history.load(&run).unwrap(), vec![first, second]);
    }

    #[test]
    fn test_torn_tail_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let history = FileHistoryAdapter::new(dir.path()).unwrap();
        let run = RunId::parse("r2").unwrap();
        history.append(&run, &event(0)).unwrap();

        let mut f = OpenOptions::new()
            .append(true)
            .open(history.path_for(&run))
            .unwrap();
        f.write_all(b"{\"sequence\":1,\"inp").unwrap();

        assert_eq!(history.load(&run).unwrap().len(), 1);
        history.append(&run, &event(1)).unwrap();
        assert_eq!(history.load(&run).unwrap().len(), 2);
    }

    #[test]
    fn test_corrupt_middle_line_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let history = FileHistoryAdapter::new(dir.path()).unwrap();
        let run = RunId::parse("r3").unwrap();
        std::fs::write(history.path_for(&run), "garbage\n").unwrap();
        assert!(matches!(
            history.load(&run).unwrap_err(),
            BackupError::HistoryError(_)
        ));
    }

    #[test]
    fn test_file_history_rejects_gaps() {
        let dir = tempfile::tempdir().unwrap();
        let history = FileHistoryAdapter::new(dir.path()).unwrap();
        let run = RunId::parse("r4").unwrap();
        history.append(&run, &event(0)).unwrap();
        assert!(matches!(
            history.append(&run, &event(2)).unwrap_err(),
            BackupError::HistoryError(_)
        ));
        assert!(history.append(&run, &event(0)).is_err());

        // A fresh adapter picks the position up from the file.
        let reopened = FileHistoryAdapter::new(dir.path()).unwrap();
        assert!(reopened.append(&run, &event(3)).is_err());
        reopened.append(&run, &event(1)).unwrap();
        assert_eq!(reopened.load(&run).unwrap().len(), 2);
    }

    #[test]
    fn test_memory_history_rejects_gaps() {
        let history = MemoryHistoryAdapter::new();
        let run = RunId::parse("r").unwrap();
        history.append(&run, &event(0)).unwrap();
        assert!(history.append(&run, &event(2)).is_err());
        assert_eq!(history.load(&run).unwrap().len(), 1);
    }
}
