use super::models::Config;
use crate::retry::RetryPolicy;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("downloads.concurrent_jobs must be at least 1")]
    ZeroConcurrency,

    #[error("vpn.killswitch_threshold must be at least 2, got {0}")]
    KillswitchThresholdTooLow(u32),

    #[error("vpn.probe_interval must be positive")]
    ZeroProbeInterval,

    #[error("vpn.probe_timeout ({timeout}) exceeds vpn.probe_interval ({interval})")]
    ProbeTimeoutExceedsInterval { timeout: String, interval: String },

    #[error("Retry policy for {backend}: {reason}")]
    InvalidRetryPolicy { backend: String, reason: String },

    #[error("No provider is enabled")]
    NoProvidersEnabled,

    #[error("Invalid URL for {field}: '{url}' (expected http:// or https://)")]
    InvalidUrl { field: String, url: String },
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_downloads(config)?;
    validate_vpn(config)?;
    validate_providers(config)?;
    Ok(())
}

fn validate_downloads(config: &Config) -> Result<(), ValidationError> {
    if config.downloads.concurrent_jobs == 0 {
        return Err(ValidationError::ZeroConcurrency);
    }
    Ok(())
}

fn validate_vpn(config: &Config) -> Result<(), ValidationError> {
    let vpn = &config.vpn;

    if vpn.killswitch_threshold < 2 {
        return Err(ValidationError::KillswitchThresholdTooLow(vpn.killswitch_threshold));
    }
    if vpn.probe_interval.is_zero() {
        return Err(ValidationError::ZeroProbeInterval);
    }
    if vpn.probe_timeout.as_duration() > vpn.probe_interval.as_duration() {
        return Err(ValidationError::ProbeTimeoutExceedsInterval {
            timeout: vpn.probe_timeout.to_string(),
            interval: vpn.probe_interval.to_string(),
        });
    }

    validate_http_url("vpn.control_url", &vpn.control_url)
}

fn validate_providers(config: &Config) -> Result<(), ValidationError> {
    let providers = &config.providers;

    if !providers.http.enabled && !providers.bittorrent.enabled && !providers.usenet.enabled {
        return Err(ValidationError::NoProvidersEnabled);
    }

    validate_retry("http", providers.http.retry.as_ref())?;
    validate_retry("bittorrent", providers.bittorrent.retry.as_ref())?;
    validate_retry("usenet", providers.usenet.retry.as_ref())?;

    if providers.bittorrent.enabled {
        validate_http_url("providers.bittorrent.url", &providers.bittorrent.url)?;
    }
    if providers.usenet.enabled {
        validate_http_url("providers.usenet.url", &providers.usenet.url)?;
    }

    Ok(())
}

/// Shared with submission validation for per-job overrides
pub fn validate_retry(backend: &str, policy: Option<&RetryPolicy>) -> Result<(), ValidationError> {
    let Some(policy) = policy else {
        return Ok(());
    };

    let invalid = |reason: &str| ValidationError::InvalidRetryPolicy {
        backend: backend.to_string(),
        reason: reason.to_string(),
    };

    if policy.base_delay.is_zero() {
        return Err(invalid("base_delay must be positive"));
    }
    if policy.base_delay.as_duration() > policy.max_delay.as_duration() {
        return Err(invalid("base_delay exceeds max_delay"));
    }
    Ok(())
}

fn validate_http_url(field: &str, url: &str) -> Result<(), ValidationError> {
    let ok = url::Url::parse(url)
        .map(|parsed| matches!(parsed.scheme(), "http" | "https"))
        .unwrap_or(false);

    if !ok {
        return Err(ValidationError::InvalidUrl {
            field: field.to_string(),
            url: url.to_string(),
        });
    }
    Ok(())
}
