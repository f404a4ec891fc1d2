use clap::Parser;
use serde::Deserialize;
use std::fs::File;
use std::io::Read;

use crate::domain::errors::{BackupError, Result};
use crate::domain::export_models::{BackupRequest, PagingMode, RunId};

pub const ENV_TABLE_CONNECTION: &str = "TableStorageConnection";
pub const ENV_BLOB_CONNECTION: &str = "BlobStorageConnection";
pub const ENV_BACKUP_BLOB: &str = "BackupBlob";
pub const ENV_PAGE_SIZE: &str = "BackupPageSize";

pub const DEFAULT_PAGE_SIZE: usize = 1000;
pub const DEFAULT_WATERMARK_FIELD: &str = "Timestamp";
pub const DEFAULT_BASE_NAME: &str = "backup.json";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub table: TableConfig,
    #[serde(default)]
    pub blob: BlobConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// Where `report_<timestamp>.json` is written.
    pub output_dir: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TableConfig {
    /// Entity file (JSON array or JSON lines) that backs the table.
    #[serde(default)]
    pub source: String,
    pub watermark_field: Option<String>,
    pub server_page_limit: Option<usize>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct BlobConfig {
    /// Directory holding the append objects.
    #[serde(default)]
    pub container: String,
    pub base_name: Option<String>,
    pub max_block_bytes: Option<usize>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct BackupConfig {
    pub page_size: Option<usize>,
    pub mode: Option<PagingMode>,
    pub run_id: Option<String>,
    /// Operational cap on steps executed per invocation; replayed steps are free.
    pub max_pages: Option<u64>,
    /// Enables durable replay; history files live here.
    pub history_dir: Option<String>,
    /// Continue the run named by `run_id` from its recorded history.
    #[serde(default)]
    pub resume: bool,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RuntimeConfig {
    pub parallel: Option<usize>,
    pub cpu_percent: Option<u8>,
}

#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to configuration file (YAML or JSON)
    #[arg(short, long)]
    pub config: Option<String>,

    // Overrides for ad-hoc runs
    /// Entity file backing the source table
    #[arg(long)]
    pub table: Option<String>,
    /// Directory holding backup destinations
    #[arg(long)]
    pub container: Option<String>,
    #[arg(long)]
    pub base_name: Option<String>,
    #[arg(long)]
    pub page_size: Option<usize>,
    /// token, watermark or single_shot
    #[arg(long)]
    pub mode: Option<String>,
    #[arg(long)]
    pub run_id: Option<String>,
    #[arg(long)]
    pub max_pages: Option<u64>,
    #[arg(long)]
    pub history_dir: Option<String>,
    /// Resume the run given by --run-id
    #[arg(long)]
    pub resume: bool,
    #[arg(short, long)]
    pub output: Option<String>,
    #[arg(long)]
    pub parallel: Option<usize>,
    /// Summarize an existing destination instead of running a backup
    #[arg(long)]
    pub inspect: Option<String>,
}

impl AppConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;

        let config: AppConfig = if path.ends_with(".json") {
            serde_json::from_str(&contents)?
        } else {
            serde_yaml::from_str(&contents)
                .map_err(|e| BackupError::ConfigError(format!("{}: {}", path, e)))?
        };

        Ok(config)
    }

    /// Fills values the file left unset from the process environment.
    ///
    /// `lookup` is `std::env::var` in `main`; this is the only place the
    /// environment is read.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.table.source.is_empty() {
            if let Some(v) = lookup(ENV_TABLE_CONNECTION) {
                self.table.source = v;
            }
        }
        if self.blob.container.is_empty() {
            if let Some(v) = lookup(ENV_BLOB_CONNECTION) {
                self.blob.container = v;
            }
        }
        if self.blob.base_name.is_none() {
            self.blob.base_name = lookup(ENV_BACKUP_BLOB);
        }
        if self.backup.page_size.is_none() {
            if let Some(v) = lookup(ENV_PAGE_SIZE) {
                let size = v.trim().parse::<usize>().map_err(|_| {
                    BackupError::ConfigError(format!("{}='{}' is not a page size", ENV_PAGE_SIZE, v))
                })?;
                self.backup.page_size = Some(size);
            }
        }
        Ok(())
    }

    pub fn merge_cli(&mut self, args: &CliArgs) -> Result<()> {
        if let Some(t) = &args.table { self.table.source = t.clone(); }
        if let Some(c) = &args.container { self.blob.container = c.clone(); }
        if let Some(b) = &args.base_name { self.blob.base_name = Some(b.clone()); }
        if let Some(p) = args.page_size { self.backup.page_size = Some(p); }
        if let Some(m) = &args.mode { self.backup.mode = Some(m.parse()?); }
        if let Some(r) = &args.run_id { self.backup.run_id = Some(r.clone()); }
        if let Some(m) = args.max_pages { self.backup.max_pages = Some(m); }
        if let Some(h) = &args.history_dir { self.backup.history_dir = Some(h.clone()); }
        if args.resume { self.backup.resume = true; }
        if let Some(o) = &args.output { self.output_dir = Some(o.clone()); }
        if let Some(p) = args.parallel { self.runtime.parallel = Some(p); }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.table.source.trim().is_empty() {
            return Err(BackupError::ConfigError(format!(
                "table.source is required (or set {})",
                ENV_TABLE_CONNECTION
            )));
        }
        if self.blob.container.trim().is_empty() {
            return Err(BackupError::ConfigError(format!(
                "blob.container is required (or set {})",
                ENV_BLOB_CONNECTION
            )));
        }
        let base_name = self.base_name();
        if base_name.is_empty() || base_name.contains(['/', '\\']) {
            return Err(BackupError::ConfigError(format!(
                "blob.base_name '{}' must be a plain, non-empty name",
                base_name
            )));
        }
        if self.page_size() == 0 {
            return Err(BackupError::ConfigError("backup.page_size must be at least 1".into()));
        }
        if self.blob.max_block_bytes == Some(0) {
            return Err(BackupError::ConfigError("blob.max_block_bytes must be at least 1".into()));
        }
        if self.table.server_page_limit == Some(0) {
            return Err(BackupError::ConfigError("table.server_page_limit must be at least 1".into()));
        }
        if let Some(pct) = self.runtime.cpu_percent {
            if pct == 0 || pct > 100 {
                return Err(BackupError::ConfigError(format!(
                    "runtime.cpu_percent {} is outside 1..=100",
                    pct
                )));
            }
        }
        if let Some(id) = &self.backup.run_id {
            RunId::parse(id)?;
        }
        if self.backup.resume {
            if self.backup.run_id.is_none() {
                return Err(BackupError::ConfigError("resume needs backup.run_id".into()));
            }
            if self.backup.history_dir.is_none() {
                return Err(BackupError::ConfigError("resume needs backup.history_dir".into()));
            }
        }
        Ok(())
    }

    pub fn page_size(&self) -> usize {
        self.backup.page_size.unwrap_or(DEFAULT_PAGE_SIZE)
    }

    pub fn base_name(&self) -> &str {
        self.blob.base_name.as_deref().unwrap_or(DEFAULT_BASE_NAME)
    }

    pub fn output_dir(&self) -> &str {
        self.output_dir.as_deref().unwrap_or(".")
    }

    /// The backup request this configuration describes.
    pub fn to_request(&self) -> Result<BackupRequest> {
        Ok(BackupRequest {
            run_id: self.backup.run_id.as_deref().map(RunId::parse).transpose()?,
            mode: self.backup.mode.unwrap_or(PagingMode::Watermark),
            page_size: self.page_size(),
            base_name: self.base_name().to_string(),
            watermark_field: self
                .table
                .watermark_field
                .clone()
                .unwrap_or_else(|| DEFAULT_WATERMARK_FIELD.to_string()),
            max_pages: self.backup.max_pages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_load_yaml_config() {
        let yaml = r#"
table:
  source: "./data/orders.json"
  watermark_field: "UpdatedAt"
blob:
  container: "./backups"
  base_name: "orders.json"
  max_block_bytes: 1048576
backup:
  page_size: 500
  mode: token
  max_pages: 20
runtime:
  cpu_percent: 25
output_dir: "./reports"
"#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", yaml).unwrap();
        let path = file.path().to_str().unwrap();

        let config = AppConfig::from_file(path).expect("Failed to parse config");
        config.validate().unwrap();

        assert_eq!(config.table.source, "./data/orders.json");
        assert_eq!(config.blob.max_block_bytes, Some(1048576));
        assert_eq!(config.backup.mode, Some(PagingMode::Token));
        assert_eq!(config.runtime.cpu_percent, Some(25));

        let req = config.to_request().unwrap();
        assert_eq!(req.page_size, 500);
        assert_eq!(req.watermark_field, "UpdatedAt");
        assert_eq!(req.max_pages, Some(20));
        assert!(req.run_id.is_none());
    }

    #[test]
    fn test_load_json_config() {
        let file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        std::fs::write(
            file.path(),
            r#"{"table":{"source":"t.json"},"blob":{"container":"c"},"backup":{"mode":"single_shot"}}"#,
        )
        .unwrap();

        let config = AppConfig::from_file(file.path().to_str().unwrap()).unwrap();
        let req = config.to_request().unwrap();
        assert_eq!(req.mode, PagingMode::SingleShot);
        assert_eq!(req.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(req.base_name, DEFAULT_BASE_NAME);
    }

    #[test]
    fn test_env_fills_only_missing_values() {
        let env: HashMap<&str, &str> = [
            (ENV_TABLE_CONNECTION, "env-table.json"),
            (ENV_BLOB_CONNECTION, "env-container"),
            (ENV_BACKUP_BLOB, "env.json"),
            (ENV_PAGE_SIZE, "250"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config.blob.container = "file-container".into();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.table.source, "env-table.json");
        assert_eq!(config.blob.container, "file-container");
        assert_eq!(config.base_name(), "env.json");
        assert_eq!(config.page_size(), 250);
    }

    #[test]
    fn test_bad_env_page_size_is_rejected() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env(|k| (k == ENV_PAGE_SIZE).then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(err, BackupError::ConfigError(_)));
    }

    #[test]
    fn test_cli_overrides_file() {
        let mut config = AppConfig::default();
        config.backup.page_size = Some(10);
        let args = CliArgs {
            table: Some("t.json".into()),
            container: Some("out".into()),
            page_size: Some(99),
            mode: Some("full".into()),
            ..Default::default()
        };
        config.merge_cli(&args).unwrap();
        config.validate().unwrap();
        assert_eq!(config.page_size(), 99);
        assert_eq!(config.backup.mode, Some(PagingMode::SingleShot));

        let bad = CliArgs {
            mode: Some("sideways".into()),
            ..Default::default()
        };
        assert!(config.merge_cli(&bad).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let valid = || {
            let mut c = AppConfig::default();
            c.table.source = "t.json".into();
            c.blob.container = "c".into();
            c
        };
        valid().validate().unwrap();

        let mut c = valid();
        c.backup.page_size = Some(0);
        assert!(c.validate().is_err());

        let mut c = valid();
        c.table.source = "  ".into();
        assert!(c.validate().is_err());

        let mut c = valid();
        c.blob.container = String::new();
        assert!(c.validate().is_err());

        let mut c = valid();
        c.blob.base_name = Some("nested/name.json".into());
        assert!(c.validate().is_err());

        let mut c = valid();
        c.blob.base_name = Some(String::new());
        assert!(c.validate().is_err());

        let mut c = valid();
        c.blob.max_block_bytes = Some(0);
        assert!(c.validate().is_err());

        let mut c = valid();
        c.backup.resume = true;
        c.backup.history_dir = Some("h".into());
        assert!(c.validate().is_err());
        c.backup.run_id = Some("r1".into());
        c.validate().unwrap();
    }
}
