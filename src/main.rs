use table_backup::application::backup_service::{write_report, BackupService};
use table_backup::application::inspect::inspect_destination;
use table_backup::application::runtime::RuntimeContext;
use table_backup::config::{AppConfig, CliArgs};
use table_backup::domain::export_models::RunStatus;
use table_backup::infrastructure::local_storage::history_file_adapter::FileHistoryAdapter;
use table_backup::infrastructure::local_storage::local_blob_adapter::{
    LocalBlobAdapter, DEFAULT_MAX_BLOCK_BYTES,
};
use table_backup::infrastructure::table::file_table_adapter::FileTableAdapter;
use clap::Parser;
use log::{error, info};
use std::process;
use std::sync::Arc;
use std::time::Instant;

fn main() {
    // 1. Initialize Logging
    env_logger::init();

    // 2. Parse Arguments
    let args = CliArgs::parse();

    // 3. Load Config
    let mut config = if let Some(config_path) = &args.config {
        match AppConfig::from_file(config_path) {
            Ok(c) => c,
            Err(e) => {
                error!("Failed to load config: {}", e);
                process::exit(1);
            }
        }
    } else {
        AppConfig::default()
    };

    // Environment fills the gaps, CLI overrides everything
    if let Err(e) = config.apply_env(|key| std::env::var(key).ok()) {
        error!("Invalid environment: {}", e);
        process::exit(1);
    }
    if let Err(e) = config.merge_cli(&args) {
        error!("Invalid arguments: {}", e);
        process::exit(1);
    }

    let max_block_bytes = config.blob.max_block_bytes.unwrap_or(DEFAULT_MAX_BLOCK_BYTES);

    // --inspect only needs the container
    if let Some(destination) = &args.inspect {
        let blobs = match LocalBlobAdapter::new(&config.blob.container, max_block_bytes) {
            Ok(b) => b,
            Err(e) => {
                error!("Cannot open container {}: {}", config.blob.container, e);
                process::exit(1);
            }
        };
        match inspect_destination(&blobs, destination) {
            Ok(summary) => match serde_json::to_string_pretty(&summary) {
                Ok(json) => println!("{}", json),
                Err(e) => {
                    error!("Failed to render summary: {}", e);
                    process::exit(1);
                }
            },
            Err(e) => {
                error!("Inspection of {} failed: {}", destination, e);
                process::exit(1);
            }
        }
        return;
    }

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        process::exit(1);
    }

    // 4. Setup Parallelism
    RuntimeContext::init(&config.runtime);

    // 5. Initialize Hexagonal Components
    let mut table = FileTableAdapter::new(&config.table.source);
    if let Some(limit) = config.table.server_page_limit {
        table = table.with_server_page_limit(limit);
    }

    let blobs = match LocalBlobAdapter::new(&config.blob.container, max_block_bytes) {
        Ok(b) => b,
        Err(e) => {
            error!("Cannot open container {}: {}", config.blob.container, e);
            process::exit(1);
        }
    };

    let mut service = BackupService::new(Arc::new(table), Arc::new(blobs));
    if let Some(dir) = &config.backup.history_dir {
        match FileHistoryAdapter::new(dir) {
            Ok(h) => service = service.with_history(Arc::new(h)),
            Err(e) => {
                error!("Cannot open history directory {}: {}", dir, e);
                process::exit(1);
            }
        }
    }

    let request = match config.to_request() {
        Ok(r) => r,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            process::exit(1);
        }
    };
    if let Err(e) = service.check_resume(&request, config.backup.resume) {
        error!("{}", e);
        process::exit(1);
    }

    // 6. Run
    info!("Starting backup of {}...", config.table.source);
    let start = Instant::now();
    let reports = service.run_all(vec![request]);

    match write_report(&reports, config.output_dir(), start.elapsed().as_secs_f64()) {
        Ok(path) => info!("Report written to {}", path),
        Err(e) => error!("Failed to write report: {}", e),
    }

    let failed = reports
        .iter()
        .filter(|r| r.status == RunStatus::Failed)
        .count();
    if failed > 0 {
        error!("{} of {} backup run(s) failed", failed, reports.len());
        process::exit(1);
    }
    for report in &reports {
        info!(
            "Backup {} finished with status {:?}: {} rows in {} pages -> {}",
            report.run_id, report.status, report.rows, report.pages, report.destination
        );
    }
}
