use serde::{Deserialize, Serialize};
use anyhow::Result;
use std::path::{Path, PathBuf};
use tokio::fs;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ProbeConfig {
    pub targets: Vec<String>,
    #[serde(default = "default_capture_headers")]
    pub capture_headers: Vec<String>,
    #[serde(default = "default_output_file")]
    pub output_file: PathBuf,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub follow_redirects: bool,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_curl_path")]
    pub curl_path: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Where to drop the Prometheus text exposition after a run, if anywhere.
    #[serde(default)]
    pub metrics_textfile: Option<PathBuf>,
}

fn default_capture_headers() -> Vec<String> {
    vec!["cf-ray".to_string()]
}

fn default_output_file() -> PathBuf {
    PathBuf::from("measurements.jsonl")
}

fn default_timeout_secs() -> u64 {
    15
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_concurrency() -> usize {
    15
}

fn default_curl_path() -> String {
    "curl".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ProbeConfig {
    /// Get the log level as a tracing::Level
    pub fn get_tracing_level(&self) -> Result<tracing::Level> {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Ok(tracing::Level::TRACE),
            "debug" => Ok(tracing::Level::DEBUG),
            "info" => Ok(tracing::Level::INFO),
            "warn" | "warning" => Ok(tracing::Level::WARN),
            "error" => Ok(tracing::Level::ERROR),
            _ => Err(anyhow::anyhow!("Invalid log level: {}. Valid levels are: trace, debug, info, warn, error", self.log_level))
        }
    }

    /// Reject configurations a run cannot start from.
    pub fn validate(&self) -> Result<()> {
        self.get_tracing_level()?;
        if self.targets.is_empty() {
            return Err(anyhow::anyhow!("No targets configured"));
        }
        if self.timeout_secs == 0 {
            return Err(anyhow::anyhow!("timeout_secs must be at least 1"));
        }
        match self.method.to_uppercase().as_str() {
            "GET" | "HEAD" => Ok(()),
            other => Err(anyhow::anyhow!("Unsupported method: {}. Valid methods are: GET, HEAD", other)),
        }
    }

    /// Concurrency limit as used by the scheduler, never below one.
    pub fn effective_concurrency(&self) -> usize {
        if self.concurrency == 0 {
            tracing::warn!("concurrency 0 is not allowed, using 1");
        }
        self.concurrency.max(1)
    }

    /// CSV export path used when none is given: next to the measurement log.
    pub fn default_csv_path(&self) -> PathBuf {
        self.output_file.with_extension("csv")
    }
}

pub async fn load_file_config(file_path: &Path) -> Result<ProbeConfig> {
    if !file_path.exists() {
        return Err(anyhow::anyhow!("Config file not found: {}", file_path.display()));
    }

    let content = fs::read_to_string(file_path).await?;
    let config: ProbeConfig = serde_json::from_str(&content)?;
    config.validate()?;
    Ok(config)
}
