use crate::config::types::{
    Config, FetchConfig, FilterConfig, FrontierConfig, PolitenessConfig, StorageConfig,
    WorkerConfig,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_worker(&config.worker)?;
    validate_fetch(&config.fetch)?;
    validate_politeness(&config.politeness)?;
    validate_frontier(&config.frontier)?;
    validate_filter(&config.filter)?;
    validate_storage(&config.storage)?;
    validate_seeds(&config.crawl.seeds)?;
    Ok(())
}

fn validate_worker(config: &WorkerConfig) -> Result<(), ConfigError> {
    if config.concurrency < 1 || config.concurrency > 256 {
        return Err(ConfigError::Validation(format!(
            "concurrency must be between 1 and 256, got {}",
            config.concurrency
        )));
    }

    if config.max_idle_polls < 1 {
        return Err(ConfigError::Validation(
            "max-idle-polls must be >= 1".to_string(),
        ));
    }

    if config.idle_backoff_seconds <= 0.0 {
        return Err(ConfigError::Validation(format!(
            "idle-backoff-seconds must be positive, got {}",
            config.idle_backoff_seconds
        )));
    }

    Ok(())
}

fn validate_fetch(config: &FetchConfig) -> Result<(), ConfigError> {
    if config.user_agent_name.is_empty() {
        return Err(ConfigError::Validation(
            "user-agent-name cannot be empty".to_string(),
        ));
    }

    if !config
        .user_agent_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "user-agent-name must contain only alphanumeric characters and hyphens, got '{}'",
            config.user_agent_name
        )));
    }

    if config.fetch_timeout_seconds < 1 {
        return Err(ConfigError::Validation(
            "fetch-timeout-seconds must be >= 1".to_string(),
        ));
    }

    if config.max_content_length == 0 {
        return Err(ConfigError::Validation(
            "max-content-length must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_politeness(config: &PolitenessConfig) -> Result<(), ConfigError> {
    if config.default_crawl_delay_seconds < 0.0 {
        return Err(ConfigError::Validation(format!(
            "default-crawl-delay-seconds cannot be negative, got {}",
            config.default_crawl_delay_seconds
        )));
    }

    if config.lease_ttl_seconds < 1 {
        return Err(ConfigError::Validation(
            "lease-ttl-seconds must be >= 1".to_string(),
        ));
    }

    if config.max_adaptive_delay_seconds < config.default_crawl_delay_seconds {
        return Err(ConfigError::Validation(
            "max-adaptive-delay-seconds must be >= default-crawl-delay-seconds".to_string(),
        ));
    }

    Ok(())
}

fn validate_frontier(config: &FrontierConfig) -> Result<(), ConfigError> {
    if config.claim_ttl_seconds < 1 {
        return Err(ConfigError::Validation(
            "claim-ttl-seconds must be >= 1".to_string(),
        ));
    }

    if config.soft_limit < 1 {
        return Err(ConfigError::Validation(
            "soft-limit must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_filter(config: &FilterConfig) -> Result<(), ConfigError> {
    if config.capacity < 1 {
        return Err(ConfigError::Validation(
            "filter capacity must be >= 1".to_string(),
        ));
    }

    if config.error_rate <= 0.0 || config.error_rate >= 1.0 {
        return Err(ConfigError::Validation(format!(
            "filter error-rate must be in (0, 1), got {}",
            config.error_rate
        )));
    }

    Ok(())
}

fn validate_storage(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }

    if config.batch_size == 0 {
        return Err(ConfigError::Validation(
            "batch-size must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_seeds(seeds: &[String]) -> Result<(), ConfigError> {
    for seed in seeds {
        let url = Url::parse(seed).map_err(|_| ConfigError::InvalidSeed(seed.clone()))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidSeed(seed.clone()));
        }
    }
    Ok(())
}
