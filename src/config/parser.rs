use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and parses a worker configuration file from the given path
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;

    let config: Config = toml::from_str(&content)?;

    validate(&config)?;

    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// Logged at startup so a crawl can be correlated with the exact
/// configuration it ran under.
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let result = hasher.finalize();
    Ok(hex::encode(result))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_minimal_config() {
        // Every section has defaults; an empty file is a valid config
        let file = create_temp_config("");
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.worker.concurrency, 4);
        assert_eq!(config.storage.batch_size, 50);
        assert_eq!(config.frontier.claim_ttl_seconds, 600);
        assert_eq!(config.filter.capacity, 10_000_000);
        assert!((config.filter.error_rate - 0.001).abs() < f64::EPSILON);
    }

    #[test]
    fn test_load_full_config() {
        let config_content = r#"
[worker]
worker-id = "w1"
concurrency = 2
max-pages = 100

[fetch]
user-agent-name = "TestBot"
user-agent-version = "1.0"
contact = "https://example.com/bot"
fetch-timeout-seconds = 5

[politeness]
default-crawl-delay-seconds = 0.5
lease-ttl-seconds = 10

[frontier]
claim-ttl-seconds = 60
max-retries = 2

[filter]
capacity = 1000
error-rate = 0.01

[storage]
database-path = "./test.db"
batch-size = 10
batch-age-seconds = 1

[crawl]
seeds = ["https://example.com/"]
"#;

        let file = create_temp_config(config_content);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.worker.worker_id, "w1");
        assert_eq!(config.worker.concurrency, 2);
        assert_eq!(config.fetch.user_agent(), "TestBot/1.0 (+https://example.com/bot)");
        assert_eq!(config.frontier.max_retries, 2);
        assert_eq!(config.crawl.seeds.len(), 1);
    }

    #[test]
    fn test_load_config_with_invalid_path() {
        let result = load_config(Path::new("/nonexistent/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_with_invalid_toml() {
        let file = create_temp_config("this is not valid TOML {{{");
        let result = load_config(file.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_with_validation_error() {
        let config_content = r#"
[worker]
concurrency = 0
"#;
        let file = create_temp_config(config_content);
        let result = load_config(file.path());
        assert!(matches!(result.unwrap_err(), ConfigError::Validation(_)));
    }

    #[test]
    fn test_compute_config_hash() {
        let file = create_temp_config("test content");

        let hash1 = compute_config_hash(file.path()).unwrap();
        let hash2 = compute_config_hash(file.path()).unwrap();

        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_different_content_different_hash() {
        let file1 = create_temp_config("content 1");
        let file2 = create_temp_config("content 2");

        assert_ne!(
            compute_config_hash(file1.path()).unwrap(),
            compute_config_hash(file2.path()).unwrap()
        );
    }
}
