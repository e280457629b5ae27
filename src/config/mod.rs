//! Configuration management for mediadl
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use mediadl::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Daemon listening on: {}", config.server.bind_addr);
//! ```
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `MEDIADL__<section>__<key>`
//!
//! Examples:
//! - `MEDIADL__SERVER__BIND_ADDR=0.0.0.0:8420`
//! - `MEDIADL__DOWNLOADS__CONCURRENT_JOBS=4`
//! - `MEDIADL__VPN__PROBE_INTERVAL=15s`
//!
//! Credentials for the download clients are only read from
//! `MEDIADL_QBITTORRENT_PASSWORD` and `MEDIADL_SABNZBD_API_KEY`.
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/mediadl.toml`.
//! This can be overridden using the `MEDIADL_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

pub use models::{
    BitTorrentProviderConfig, Config, DownloadsConfig, HttpProviderConfig, ProvidersConfig,
    ServerConfig, UsenetProviderConfig, VpnConfig,
};
pub use validation::{ValidationError, validate_retry};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// Configuration is loaded with the following priority (highest to lowest):
    /// 1. Environment variables (`MEDIADL__*`)
    /// 2. TOML file (default: `config/mediadl.toml`)
    /// 3. Default values
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file is malformed or a value
    /// fails validation.
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }
}
