use serde::{Deserialize, Serialize};
use anyhow::Result;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::cli::Args;
use crate::prober::ProbeSettings;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ProbeConfig {
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default = "default_count")]
    pub count: u16,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_verify_checksum")]
    pub verify_checksum: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub metrics_addr: Option<SocketAddr>,
    #[serde(default = "default_enable_latency_history")]
    pub enable_latency_history: bool,
}

fn default_count() -> u16 {
    10
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_verify_checksum() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_enable_latency_history() -> bool {
    false // Default to show current latency only
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            count: default_count(),
            timeout_ms: default_timeout_ms(),
            interval_ms: default_interval_ms(),
            verify_checksum: default_verify_checksum(),
            log_level: default_log_level(),
            metrics_addr: None,
            enable_latency_history: default_enable_latency_history(),
        }
    }
}

impl ProbeConfig {
    /// Defaults, then the JSON file if one is named, then command-line flags.
    pub fn load(args: &Args) -> Result<Self> {
        let file = args
            .config
            .clone()
            .or_else(|| std::env::var_os("TARGET_CONFIG").map(PathBuf::from));

        let mut config = match file {
            Some(path) => Self::load_file_config(&path)?,
            None => Self::default(),
        };
        config.apply_args(args)?;
        config.validate()?;
        Ok(config)
    }

    fn load_file_config(file_path: &Path) -> Result<Self> {
        if !file_path.exists() {
            return Err(anyhow::anyhow!("Config file not found: {}", file_path.display()));
        }

        let content = std::fs::read_to_string(file_path)?;
        let config: ProbeConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    fn apply_args(&mut self, args: &Args) -> Result<()> {
        if !args.targets.is_empty() {
            self.targets = args.targets.clone();
        }
        if let Some(count) = args.count {
            self.count = count;
        }
        if let Some(secs) = args.timeout {
            self.timeout_ms = seconds_to_ms(secs)?;
        }
        if let Some(secs) = args.interval {
            self.interval_ms = seconds_to_ms(secs)?;
        }
        if let Some(level) = &args.log_level {
            self.log_level = level.clone();
        }
        if args.no_verify_checksum {
            self.verify_checksum = false;
        }
        if args.metrics_addr.is_some() {
            self.metrics_addr = args.metrics_addr;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.targets.is_empty() {
            return Err(anyhow::anyhow!("No targets given"));
        }
        if self.count == 0 {
            return Err(anyhow::anyhow!("Probe count must be at least 1"));
        }
        if self.timeout_ms == 0 {
            return Err(anyhow::anyhow!("Timeout must be greater than zero"));
        }
        self.validate_log_level()
    }

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

    /// Validate the log level is one of the supported values
    pub fn validate_log_level(&self) -> Result<()> {
        self.get_tracing_level().map(|_| ())
    }

    pub fn probe_settings(&self) -> ProbeSettings {
        ProbeSettings {
            count: self.count,
            timeout: Duration::from_millis(self.timeout_ms),
            interval: Duration::from_millis(self.interval_ms),
            verify_checksum: self.verify_checksum,
        }
    }
}

fn seconds_to_ms(secs: f64) -> Result<u64> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(anyhow::anyhow!("Invalid duration: {} seconds", secs));
    }
    Ok((secs * 1000.0).round() as u64)
}
