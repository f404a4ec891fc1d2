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

//! # Runtime Context
//!
//! Sizes the global `rayon` pool that [`BackupService::run_all`] fans runs out
//! over. Each run is sequential on its own; parallelism only exists between
//! runs.
//!
//! [`BackupService::run_all`]: crate::application::backup_service::BackupService::run_all

use crate::config::RuntimeConfig;
use log::info;

/// Default share of the machine's cores given to concurrent runs.
pub const DEFAULT_CPU_PERCENT: u8 = 50;

pub struct RuntimeContext {
    /// The number of runs that may execute at once.
    pub num_threads: usize,
}

impl RuntimeContext {
    /// Initializes the global thread pool.
    ///
    /// An explicit `parallel` wins; otherwise `cpu_percent` of the available
    /// cores is used, and never less than one thread.
    pub fn init(config: &RuntimeConfig) -> Self {
        let cpu_percent = config.cpu_percent.unwrap_or(DEFAULT_CPU_PERCENT);
        let num_threads = thread_count(config.parallel, cpu_percent, num_cpus::get());

        info!(
            "Initializing worker pool with {} threads (Target CPU: {}%)",
            num_threads, cpu_percent
        );

        rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build_global()
            .unwrap_or_else(|e| {
                info!(
                    "Global thread pool already initialized (likely in a test): {}",
                    e
                );
            });

        Self { num_threads }
    }
}

fn thread_count(parallel: Option<usize>, cpu_percent: u8, total_cpus: usize) -> usize {
    let target = parallel
        .unwrap_or_else(|| (total_cpus as f64 * (cpu_percent as f64 / 100.0)).ceil() as usize);
    std::cmp::max(1, target)
}
