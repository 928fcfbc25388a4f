//! Runtime configuration.
//!
//! Values come from the process environment first and from a `KEY=VALUE`
//! file (`.env` in the working directory by default) second. Nothing is ever
//! written back into the environment.

use anyhow::{Context, Result, anyhow};
use std::{
    fs,
    net::IpAddr,
    path::{Path, PathBuf},
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_STATIC_DIR: &str = "frontend/dist";
pub const DEFAULT_PLAYLIST_API_URL: &str = "https://www.googleapis.com/youtube/v3/playlistItems";
pub const DEFAULT_PLAYLIST_ID: &str = "PLxVWCXBCnDMNRTtdO1E-4VGTz1LEnJoWs";

/// Raw values as found in one source. Unset keys stay `None`.
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    pub db_url: Option<PathBuf>,
    pub port: Option<u16>,
    pub host: Option<IpAddr>,
    pub static_dir: Option<PathBuf>,
    pub api_key: Option<String>,
    pub playlist_id: Option<String>,
    pub playlist_api_url: Option<String>,
}

impl EnvConfig {
    /// Fills every key still unset in `self` from `fallback`.
    pub fn or(self, fallback: EnvConfig) -> EnvConfig {
        EnvConfig {
            db_url: self.db_url.or(fallback.db_url),
            port: self.port.or(fallback.port),
            host: self.host.or(fallback.host),
            static_dir: self.static_dir.or(fallback.static_dir),
            api_key: self.api_key.or(fallback.api_key),
            playlist_id: self.playlist_id.or(fallback.playlist_id),
            playlist_api_url: self.playlist_api_url.or(fallback.playlist_api_url),
        }
    }

    fn apply(&mut self, key: &str, value: &str, origin: &str) -> Result<()> {
        let value = value.trim().trim_matches('"');
        if value.is_empty() {
            return Ok(());
        }
        match key {
            "BLUEPRINT_DB_URL" => self.db_url = Some(PathBuf::from(value)),
            "PORT" => {
                let port: u16 = value
                    .parse()
                    .with_context(|| format!("Parsing PORT from {origin}"))?;
                self.port = Some(port);
            }
            "HOST" => {
                let host: IpAddr = value
                    .parse()
                    .with_context(|| format!("Parsing HOST from {origin}"))?;
                self.host = Some(host);
            }
            "STATIC_DIR" => self.static_dir = Some(PathBuf::from(value)),
            "YOUTUBE_API_KEY" => self.api_key = Some(value.to_string()),
            "PLAYLIST_ID" => self.playlist_id = Some(value.to_string()),
            "PLAYLIST_API_URL" => self.playlist_api_url = Some(value.to_string()),
            _ => {}
        }
        Ok(())
    }
}

/// Where and how the upstream playlist is fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamConfig {
    pub api_url: String,
    pub playlist_id: String,
    pub api_key: String,
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub db_path: PathBuf,
    pub port: u16,
    pub host: IpAddr,
    pub static_dir: PathBuf,
    pub upstream: UpstreamConfig,
}

pub fn read_env_file(path: &Path) -> Result<Option<EnvConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    let origin = path.display().to_string();
    let mut cfg = EnvConfig::default();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let trimmed = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        if let Some((key, value)) = trimmed.split_once('=') {
            cfg.apply(key.trim(), value, &origin)?;
        }
    }
    Ok(Some(cfg))
}

pub fn read_vars<I>(vars: I) -> Result<EnvConfig>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut cfg = EnvConfig::default();
    for (key, value) in vars {
        cfg.apply(&key, &value, "environment")?;
    }
    Ok(cfg)
}

pub fn load_runtime_config() -> Result<RuntimeConfig> {
    load_runtime_config_from(Path::new(DEFAULT_ENV_PATH), std::env::vars())
}

pub fn load_runtime_config_from<I>(env_file: impl AsRef<Path>, vars: I) -> Result<RuntimeConfig>
where
    I: IntoIterator<Item = (String, String)>,
{
    let env_file = env_file.as_ref();
    let mut cfg = read_vars(vars)?;
    if let Some(file_cfg) = read_env_file(env_file)? {
        cfg = cfg.or(file_cfg);
    }

    let db_path = cfg.db_url.ok_or_else(|| {
        anyhow!(
            "BLUEPRINT_DB_URL not set in the environment or {}",
            env_file.display()
        )
    })?;
    let host = match cfg.host {
        Some(host) => host,
        None => DEFAULT_HOST.parse().context("Parsing default host")?,
    };

    Ok(RuntimeConfig {
        db_path,
        port: cfg.port.unwrap_or(DEFAULT_PORT),
        host,
        static_dir: cfg
            .static_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATIC_DIR)),
        upstream: UpstreamConfig {
            api_url: cfg
                .playlist_api_url
                .unwrap_or_else(|| DEFAULT_PLAYLIST_API_URL.to_string()),
            playlist_id: cfg
                .playlist_id
                .unwrap_or_else(|| DEFAULT_PLAYLIST_ID.to_string()),
            api_key: cfg.api_key.unwrap_or_default(),
        },
    })
}
