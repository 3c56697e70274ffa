//! Configuration Loader
//!
//! Environment-aware loading built on the `config` crate. Sources are layered,
//! later ones winning:
//!
//! 1. `<dir>/pricefeed.toml`
//! 2. `<dir>/environments/<environment>.toml`
//! 3. `PRICEFEED__<SECTION>__<KEY>` environment variables
//!
//! Tier URLs left unset after layering fall back to the conventional
//! `REDIS_URL` and `DATABASE_URL` variables.

use super::error::ConfigResult;
use super::PricefeedConfig;
use ::config::{Config, Environment, File, FileFormat};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const ENV_PREFIX: &str = "PRICEFEED";
const BASE_FILE: &str = "pricefeed.toml";

/// Loaded, validated, immutable configuration
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: PricefeedConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        debug!(
            environment = environment,
            directory = %config_directory.display(),
            "Loading configuration"
        );

        let base_file = config_directory.join(BASE_FILE);
        let environment_file = config_directory
            .join("environments")
            .join(format!("{environment}.toml"));

        let settings = Config::builder()
            .add_source(
                File::from(base_file.as_path())
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                File::from(environment_file.as_path())
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: PricefeedConfig = settings.try_deserialize()?;
        Self::apply_url_fallbacks(&mut config);
        config.validate()?;

        info!(
            environment = environment,
            cache_backend = %config.store.cache.backend,
            durable_backend = %config.store.durable.backend,
            worker_count = config.pipeline.worker_count,
            items_per_worker = config.pipeline.items_per_worker,
            currency = %config.pipeline.currency,
            "Configuration loaded"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an already-built configuration (embedding, tests)
    pub fn from_config(
        config: PricefeedConfig,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory: Self::default_config_directory(),
        }))
    }

    pub fn config(&self) -> &PricefeedConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Current environment from `PRICEFEED_ENV`, then `APP_ENV`
    pub fn detect_environment() -> String {
        env::var("PRICEFEED_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }

    fn default_config_directory() -> PathBuf {
        env::var("PRICEFEED_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"))
    }

    fn apply_url_fallbacks(config: &mut PricefeedConfig) {
        if config.store.cache.url.is_none() {
            config.store.cache.url = env::var("REDIS_URL").ok();
        }
        if config.store.durable.url.is_none() {
            config.store.durable.url = env::var("DATABASE_URL").ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_missing_directory_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let manager =
            ConfigManager::load_from_directory_with_env(Some(dir.path().join("absent")), "test")
                .unwrap();
        assert_eq!(manager.environment(), "test");
        assert_eq!(manager.config().pipeline.items_per_worker, 50);
    }

    #[test]
    fn test_environment_overlay_wins_over_base() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(BASE_FILE),
            "[pipeline]\nitems_per_worker = 25\ncurrency = \"EUR\"\n",
        )
        .unwrap();
        fs::create_dir_all(dir.path().join("environments")).unwrap();
        fs::write(
            dir.path().join("environments").join("staging.toml"),
            "[pipeline]\nitems_per_worker = 10\n",
        )
        .unwrap();

        let manager =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "staging")
                .unwrap();
        assert_eq!(manager.config().pipeline.items_per_worker, 10);
        assert_eq!(manager.config().pipeline.currency, "EUR");
    }

    #[test]
    fn test_invalid_file_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(BASE_FILE),
            "[store.durable]\nbackend = \"sqlite\"\n",
        )
        .unwrap();

        let result =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test");
        assert!(result.is_err());
    }

    #[test]
    fn test_from_config_validates() {
        let mut config = PricefeedConfig::default();
        config.pipeline.currency = " ".to_string();
        assert!(ConfigManager::from_config(config, "test").is_err());
    }
}
