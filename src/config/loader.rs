//! Configuration Loader
//!
//! Layers built-in defaults, an optional TOML file and environment overrides
//! with the `config` crate, then validates the merged result.

use config::{Config, Environment, File, FileFormat};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::BulkConfig;
use crate::constants::{CONFIG_PATH_ENV, ENV_PREFIX, ENV_SEPARATOR};
use crate::error::{BulkError, Result};

#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    /// Replaces the process environment as the override source
    env_vars: Option<HashMap<String, String>>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loader reading the file named by `BULK_CONFIG_PATH`, when set
    pub fn from_env() -> Self {
        let file = std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from);
        Self {
            file,
            env_vars: None,
        }
    }

    /// Read this TOML file; it must exist
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Take overrides from `vars` instead of the process environment
    pub fn with_env_vars(mut self, vars: HashMap<String, String>) -> Self {
        self.env_vars = Some(vars);
        self
    }

    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    pub fn load(&self) -> Result<BulkConfig> {
        let mut builder = Config::builder().add_source(Config::try_from(&BulkConfig::default())?);

        if let Some(path) = &self.file {
            if !path.is_file() {
                return Err(BulkError::configuration(format!(
                    "Configuration file not found: {}",
                    path.display()
                )));
            }
            debug!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(File::from(path.as_path()).format(FileFormat::Toml));
        }

        let environment = Environment::with_prefix(ENV_PREFIX)
            .prefix_separator(ENV_SEPARATOR)
            .separator(ENV_SEPARATOR)
            .try_parsing(true);
        let environment = match &self.env_vars {
            Some(vars) => environment.source(Some(vars.clone().into_iter().collect())),
            None => environment,
        };

        let config: BulkConfig = builder.add_source(environment).build()?.try_deserialize()?;
        config.validate()?;

        info!(
            file = ?self.file,
            bucket_size = config.dispatcher.default_bucket_size,
            batch_size = config.dispatcher.default_batch_size,
            partitions = config.channel.partitions,
            "Configuration loaded successfully"
        );
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn no_env() -> HashMap<String, String> {
        HashMap::new()
    }

    #[test]
    fn test_defaults_without_sources() {
        let config = ConfigLoader::new().with_env_vars(no_env()).load().unwrap();
        assert_eq!(config, BulkConfig::default());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[dispatcher]\ndefault_bucket_size = 50\ndefault_batch_size = 10\n\n[channel]\npartitions = 2"
        )
        .unwrap();

        let config = ConfigLoader::new()
            .with_file(file.path())
            .with_env_vars(no_env())
            .load()
            .unwrap();
        assert_eq!(config.dispatcher.default_bucket_size, 50);
        assert_eq!(config.dispatcher.default_batch_size, 10);
        assert_eq!(config.channel.partitions, 2);
        assert_eq!(config.channel.capacity, BulkConfig::default().channel.capacity);
    }

    #[test]
    fn test_env_overrides_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[channel]\npartitions = 2").unwrap();

        let vars = HashMap::from([(
            "BULK__CHANNEL__PARTITIONS".to_string(),
            "16".to_string(),
        )]);
        let config = ConfigLoader::new()
            .with_file(file.path())
            .with_env_vars(vars)
            .load()
            .unwrap();
        assert_eq!(config.channel.partitions, 16);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = ConfigLoader::new()
            .with_file(dir.path().join("absent.toml"))
            .with_env_vars(no_env())
            .load();
        assert!(matches!(result, Err(BulkError::Configuration { .. })));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let vars = HashMap::from([(
            "BULK__DISPATCHER__DEFAULT_BATCH_SIZE".to_string(),
            "1000".to_string(),
        )]);
        let result = ConfigLoader::new().with_env_vars(vars).load();
        assert!(matches!(result, Err(BulkError::Configuration { .. })));
    }
}
