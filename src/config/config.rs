// SPDX-License-Identifier: GPL-3.0-only
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::logging::LogFormat;
use crate::monitor::{MonitorSettings, MonitorTarget};
use crate::registry::RetryPolicy;

pub const CONFIG_ENV: &str = "RCD_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Local directory mirroring the shared provider configurations
    pub providers_dir: PathBuf,

    /// Local directory mirroring the topology descriptors
    pub descriptors_dir: PathBuf,

    /// Optional file declaring `[[registry]]` connection entries
    pub registries_file: Option<PathBuf>,

    /// Inline registry definitions, `name = "type=...;address=..."`
    pub remote_registries: BTreeMap<String, String>,

    /// Name of the registry connection the monitor uses; nothing is mirrored when unset
    pub monitor_client_name: Option<String>,

    /// Secrets keyed by credential alias
    pub secrets: BTreeMap<String, String>,

    /// Connect attempts after the first one before startup fails
    pub connect_retries: u32,

    /// Initial connect backoff in milliseconds, doubled per attempt
    pub connect_backoff_ms: u64,

    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Log output format (pretty, json)
    pub log_format: LogFormat,
}

impl Config {
    /// Load configuration from the TOML file named by `RCD_CONFIG` with environment variable overrides
    pub fn load() -> anyhow::Result<Self> {
        let config_path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| "config.toml".to_string());

        let mut config = if Path::new(&config_path).exists() {
            Self::load_from(Path::new(&config_path))?
        } else {
            Config::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Apply `RCD_*` overrides fetched through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("RCD_PROVIDERS_DIR") {
            self.providers_dir = PathBuf::from(val);
        }
        if let Some(val) = lookup("RCD_DESCRIPTORS_DIR") {
            self.descriptors_dir = PathBuf::from(val);
        }
        if let Some(val) = lookup("RCD_REGISTRIES_FILE") {
            self.registries_file = Some(PathBuf::from(val));
        }
        if let Some(val) = lookup("RCD_MONITOR_CLIENT_NAME") {
            self.monitor_client_name = Some(val);
        }
        if let Some(val) = lookup("RCD_CONNECT_RETRIES") {
            self.connect_retries = val.parse().context("Invalid RCD_CONNECT_RETRIES")?;
        }
        if let Some(val) = lookup("RCD_CONNECT_BACKOFF_MS") {
            self.connect_backoff_ms = val.parse().context("Invalid RCD_CONNECT_BACKOFF_MS")?;
        }
        if let Some(val) = lookup("RCD_LOG_LEVEL") {
            self.log_level = val;
        }
        if let Some(val) = lookup("RCD_LOG_FORMAT") {
            self.log_format = val.parse().map_err(anyhow::Error::msg)?;
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.connect_retries, Duration::from_millis(self.connect_backoff_ms))
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            client_name: self.monitor_client_name.clone(),
            inline_registries: self.remote_registries.clone(),
            registries_file: self.registries_file.clone(),
            targets: vec![
                MonitorTarget::providers(self.providers_dir.clone()),
                MonitorTarget::descriptors(self.descriptors_dir.clone()),
            ],
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            providers_dir: PathBuf::from("conf/shared-providers"),
            descriptors_dir: PathBuf::from("conf/descriptors"),
            registries_file: None,
            remote_registries: BTreeMap::new(),
            monitor_client_name: None,
            secrets: BTreeMap::new(),
            connect_retries: 5,
            connect_backoff_ms: 100,
            log_level: String::from("info"),
            log_format: LogFormat::Pretty,
        }
    }
}
