use anyhow::{Context, Result};
use clap::Parser;
use lib_livesync::{LoggerLocalOptions, SyncConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Live data sync demo host", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "LIVESYNC_CONFIG_PATH", help = "Path to the JSON host configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "LIVESYNC_FEEDS_PATH", help = "Path to the JSON5 feed timing table.")]
    pub feeds_path: Option<PathBuf>,

    #[clap(long, env = "LIVESYNC_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "LIVESYNC_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "LIVESYNC_LOG_JSON", help = "Write console logs as JSON lines (true/false).")]
    pub log_json: Option<bool>,

    #[clap(long, env = "LIVESYNC_START_HIDDEN", help = "Start with the page hidden (true/false).")]
    pub start_hidden: Option<bool>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            config_path: other.config_path.or(self.config_path),
            feeds_path: other.feeds_path.or(self.feeds_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            log_json: other.log_json.or(self.log_json),
            start_hidden: other.start_hidden.or(self.start_hidden),
        }
    }

    fn defaults() -> Config {
        Config {
            feeds_path: Some(PathBuf::from("livesync.json5")),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            log_json: Some(false),
            start_hidden: Some(false),
            ..Default::default()
        }
    }

    pub fn logger_options(&self) -> LoggerLocalOptions {
        LoggerLocalOptions {
            level: self.log_level.clone().unwrap_or_else(|| "info".to_string()),
            json: self.log_json.unwrap_or(false),
            log_dir: self.log_dir.clone(),
            ..Default::default()
        }
    }

    /// The feed table from `feeds_path`, or the built-in table when the file
    /// does not exist.
    pub fn sync_config(&self) -> Result<SyncConfig> {
        match &self.feeds_path {
            Some(path) if path.exists() => SyncConfig::from_file(path)
                .with_context(|| format!("loading feed table {}", path.display())),
            _ => Ok(SyncConfig::from_json5_str(DEFAULT_FEEDS)?),
        }
    }
}

/// Used when no feed table file is present.
pub const DEFAULT_FEEDS: &str = r#"{
  feeds: {
    notifications:   { pollIntervalMs: 30000, cacheLifetimeMs: 15000 },
    "kids-progress": { pollIntervalMs: 60000, cacheLifetimeMs: 30000 },
    "admin-metrics": { pollIntervalMs: 15000, cacheLifetimeMs: 10000 },
  },
}"#;

pub fn load_config() -> Result<Config> {
    load_config_from(Config::parse())
}

/// Layers defaults, then the host file (server_livesync.conf unless the CLI
/// names another), then environment variables and CLI arguments.
pub fn load_config_from(cli: Config) -> Result<Config> {
    let mut current_config = Config::defaults();

    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("server_livesync.conf"));

    if config_file_path.exists() {
        let config_str = fs::read_to_string(&config_file_path)
            .with_context(|| format!("reading config file {}", config_file_path.display()))?;
        let file_config: Config = serde_json::from_str(&config_str)
            .with_context(|| format!("parsing config file {}", config_file_path.display()))?;
        current_config = current_config.merge(file_config);
    }

    Ok(current_config.merge(cli))
}
