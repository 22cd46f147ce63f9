use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::catalog::DEFAULT_LOCALE;
use crate::error::PackError;
use crate::orchestrator::DEFAULT_WARMUP;
use crate::progress::{DEFAULT_PEER_REFRESH, DEFAULT_TICK_INTERVAL, RoundOptions};

pub const DEFAULT_CONFIG_FILE: &str = "packfetch.json";
pub const MIN_TICK_INTERVAL_MS: u64 = 50;
pub const MAX_TICK_INTERVAL_MS: u64 = 1000;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub source_dir: Option<String>,
    #[serde(default)]
    pub download_dir: Option<String>,
    #[serde(default)]
    pub scratch_dir: Option<String>,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub catalog: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub tick_interval_ms: Option<u64>,
    #[serde(default)]
    pub warmup_ms: Option<u64>,
    #[serde(default)]
    pub peer_refresh_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub source_dir: Utf8PathBuf,
    pub download_dir: Utf8PathBuf,
    pub scratch_dir: Utf8PathBuf,
    pub destination: Option<Utf8PathBuf>,
    pub catalog: Utf8PathBuf,
    pub locale: String,
    pub tick_interval: Duration,
    pub warmup: Duration,
    pub peer_refresh: Duration,
}

impl ResolvedConfig {
    pub fn round_options(&self) -> RoundOptions {
        RoundOptions {
            tick_interval: self.tick_interval,
            peer_refresh: self.peer_refresh,
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Without an explicit path a missing `packfetch.json` means defaults.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, PackError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| PackError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| PackError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, PackError> {
        let schema_version = config.schema_version.unwrap_or(1);
        if schema_version != 1 {
            return Err(PackError::ConfigParse(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let locale = config
            .locale
            .map(|locale| locale.trim().to_lowercase())
            .filter(|locale| !locale.is_empty())
            .unwrap_or_else(|| DEFAULT_LOCALE.to_string());

        let tick_ms = config
            .tick_interval_ms
            .unwrap_or(DEFAULT_TICK_INTERVAL.as_millis() as u64)
            .clamp(MIN_TICK_INTERVAL_MS, MAX_TICK_INTERVAL_MS);

        Ok(ResolvedConfig {
            schema_version,
            source_dir: path_or(config.source_dir, "source"),
            download_dir: path_or(config.download_dir, "downloads"),
            scratch_dir: config
                .scratch_dir
                .map(Utf8PathBuf::from)
                .unwrap_or_else(default_scratch_dir),
            destination: config
                .destination
                .filter(|value| !value.trim().is_empty())
                .map(Utf8PathBuf::from),
            catalog: path_or(config.catalog, "locales.json"),
            locale,
            tick_interval: Duration::from_millis(tick_ms),
            warmup: config
                .warmup_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_WARMUP),
            peer_refresh: config
                .peer_refresh_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_PEER_REFRESH),
        })
    }
}

fn path_or(value: Option<String>, default: &str) -> Utf8PathBuf {
    Utf8PathBuf::from(value.unwrap_or_else(|| default.to_string()))
}

pub fn default_scratch_dir() -> Utf8PathBuf {
    BaseDirs::new()
        .and_then(|dirs| Utf8PathBuf::from_path_buf(dirs.cache_dir().to_path_buf()).ok())
        .map(|cache| cache.join("packfetch").join("extract"))
        .unwrap_or_else(|| Utf8PathBuf::from("temp_extract"))
}
