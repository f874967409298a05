use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::net::CurlOptions;

/// Global configuration loaded from `~/.config/parget/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of partitions a segmented download is split into.
    pub num_threads: usize,
    /// Maximum tasks an executor runs concurrently.
    pub max_task_count: usize,
    /// Keep partially downloaded bytes when a transfer fails, so a later run
    /// can resume them.
    pub keep_partial_on_error: bool,
    /// Connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Abort when throughput stays below `low_speed_limit` bytes/sec for
    /// `low_speed_time_secs`.
    pub low_speed_limit: u32,
    pub low_speed_time_secs: u64,
    /// Hard wall-clock cap per request in seconds.
    pub timeout_secs: u64,
    /// Optional bandwidth cap in bytes per second (None = no cap).
    #[serde(default)]
    pub max_bytes_per_sec: Option<u64>,
    /// Optional receive buffer size in bytes (None = library default).
    #[serde(default)]
    pub buffer_bytes: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            num_threads: 4,
            max_task_count: 3,
            keep_partial_on_error: true,
            connect_timeout_secs: 30,
            low_speed_limit: 1024,
            low_speed_time_secs: 60,
            timeout_secs: 3600,
            max_bytes_per_sec: None,
            buffer_bytes: None,
        }
    }
}

impl EngineConfig {
    /// Transport tuning derived from this configuration.
    pub fn curl_options(&self) -> CurlOptions {
        CurlOptions {
            connect_timeout_secs: self.connect_timeout_secs,
            low_speed_limit: self.low_speed_limit,
            low_speed_time_secs: self.low_speed_time_secs,
            timeout_secs: self.timeout_secs,
            max_recv_speed: self.max_bytes_per_sec,
            buffer_size: self.buffer_bytes,
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("parget")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<EngineConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = EngineConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: EngineConfig = toml::from_str(&data)?;
    Ok(cfg)
}
