use super::models::Config;
use config::{ConfigError, Environment, File};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "MEDIADL_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/mediadl.toml";
const ENV_PREFIX: &str = "MEDIADL";
const ENV_SEPARATOR: &str = "__";

const QBITTORRENT_PASSWORD_VAR: &str = "MEDIADL_QBITTORRENT_PASSWORD";
const SABNZBD_API_KEY_VAR: &str = "MEDIADL_SABNZBD_API_KEY";

/// Load configuration from multiple sources with priority:
/// 1. Defaults (embedded in structs)
/// 2. TOML file (if exists)
/// 3. Environment variables from .env file (via dotenvy)
/// 4. System environment variables (highest priority)
pub fn load() -> Result<Config, ConfigError> {
    let _ = dotenvy::dotenv();

    let config_path = env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    load_from_sources(config_path)
}

/// Secrets are never read from TOML files, only from the environment
fn load_secrets(config: &mut Config) {
    if let Ok(password) = env::var(QBITTORRENT_PASSWORD_VAR) {
        config.providers.bittorrent.password = Some(password);
    }
    if let Ok(api_key) = env::var(SABNZBD_API_KEY_VAR) {
        config.providers.usenet.api_key = Some(api_key);
    }
}

/// Load configuration from a specific path and environment
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::warn!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // MEDIADL__DOWNLOADS__CONCURRENT_JOBS -> downloads.concurrent_jobs
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let mut config: Config = builder.build()?.try_deserialize()?;
    load_secrets(&mut config);
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_load_defaults_only() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.toml");

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.server.bind_addr.to_string(), "127.0.0.1:8420");
        assert_eq!(config.downloads.concurrent_jobs, 3);
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[server]
bind_addr = "0.0.0.0:9000"

[downloads]
concurrent_jobs = 5
default_destination = "/srv/media"
cancel_grace = 2500
retention = "2h"

[vpn]
required = false
probe_interval = "15s"
killswitch_threshold = 4

[providers.usenet]
enabled = false
category = "tv"
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.server.bind_addr.to_string(), "0.0.0.0:9000");
        assert_eq!(config.downloads.concurrent_jobs, 5);
        assert_eq!(config.downloads.default_destination, PathBuf::from("/srv/media"));
        assert_eq!(config.downloads.cancel_grace.as_duration(), Duration::from_millis(2500));
        assert_eq!(config.downloads.retention.as_duration(), Duration::from_secs(7200));
        assert!(!config.vpn.required);
        assert_eq!(config.vpn.probe_interval.as_duration(), Duration::from_secs(15));
        assert_eq!(config.vpn.killswitch_threshold, 4);
        assert!(!config.providers.usenet.enabled);
        assert_eq!(config.providers.usenet.category.as_deref(), Some("tv"));
    }
}
