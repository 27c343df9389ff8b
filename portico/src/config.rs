use gateway::config::Listener;
use serde::Deserialize;
use std::fs::File;
use std::path::{Path, PathBuf};

#[derive(Deserialize)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

#[derive(Deserialize)]
pub struct LoggingConfig {
    pub sentry_dsn: String,
}

#[derive(Deserialize, Default)]
pub struct CommonConfig {
    pub metrics: Option<MetricsConfig>,
    pub logging: Option<LoggingConfig>,
}

#[derive(Deserialize)]
pub struct AdminConfig {
    #[serde(default = "default_admin_listener")]
    pub listener: Listener,
    /// Base URL of the external index/configuration loader warmed after
    /// promotions. Warming is skipped when absent.
    pub index_loader_url: Option<String>,
}

impl Default for AdminConfig {
    fn default() -> Self {
        AdminConfig {
            listener: default_admin_listener(),
            index_loader_url: None,
        }
    }
}

fn default_admin_listener() -> Listener {
    Listener {
        host: "127.0.0.1".into(),
        port: 8001,
    }
}

#[derive(Deserialize)]
pub struct Config {
    #[serde(flatten)]
    pub common: CommonConfig,
    pub gateway: gateway::config::Config,
    pub admin: Option<AdminConfig>,
    /// Optional YAML fixture loaded into the in-memory store at startup.
    pub seed_file: Option<PathBuf>,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let data = serde_yaml::from_reader(file)?;

        Ok(data)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
}
