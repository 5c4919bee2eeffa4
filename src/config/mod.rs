mod defaults;
mod types;

pub use types::*;

use crate::error::ConfigError;
use defaults::*;
use std::path::Path;

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            base_dir: default_base_dir(),
            input_dir: None,
            state_dir: default_state_dir(),
            concurrency: default_concurrency(),
            launch_delay_ms: default_launch_delay_ms(),
            fan_in: default_fan_in(),
            combine: Combine::default(),
            cancel_ttl_sec: default_cancel_ttl_sec(),
            seed_count: default_seed_count(),
            retry: RetryConfig::default(),
        }
    }
}

impl Config {
    /// Load config from a YAML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Load config if the file exists, otherwise fall back to defaults
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Validate the config
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fan_in < 2 {
            return Err(ConfigError::Invalid(format!(
                "fan_in must be at least 2, got {}",
                self.fan_in
            )));
        }

        if self.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "concurrency must be at least 1".to_string(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.fan_in, 2);
        assert_eq!(config.input_dir(), config.base_dir);
    }

    #[test]
    fn test_load_partial_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "base_dir: work\nconcurrency: 2\ncombine: max\nretry:\n  max_attempts: 3"
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.base_dir, Path::new("work"));
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.combine, Combine::Max);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.backoff_base_ms, 1000);
        assert_eq!(config.fan_in, 2);
    }

    #[test]
    fn test_validate_rejects_small_fan_in() {
        let config = Config {
            fan_in: 1,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = Config::load_or_default(Path::new("/nonexistent/treereduce.yaml")).unwrap();
        assert_eq!(config.seed_count, 20);
    }
}
