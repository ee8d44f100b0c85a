//! Application configuration
//!
//! Sources, later ones overriding earlier ones:
//! 1. Built-in defaults
//! 2. `<config dir>/imagehoard/imagehoard.toml` (optional)
//! 3. `./imagehoard.toml` (optional)
//! 4. `IMAGEHOARD__*` environment variables, e.g. `IMAGEHOARD__FETCH__CONCURRENCY=8`
//! 5. An explicit `--config` file

use anyhow::{Context, Result};
use asset_storage::StorageConfig;
use collection_fetch::FetchConfig;
use config::{Config, ConfigBuilder, Environment, File};
use gallery::SelectionConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thumbnail_cache::{DerivativeConfig, ThumbnailConfig};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub thumbnails: ThumbnailConfig,
    pub derivatives: DerivativeConfig,
    pub fetch: FetchConfig,
    pub selection: SelectionConfig,
}

impl AppConfig {
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(dir) = dirs::config_dir() {
            let user_config = dir.join("imagehoard").join("imagehoard.toml");
            builder = builder.add_source(File::from(user_config).required(false));
        }
        builder = builder
            .add_source(File::with_name("imagehoard").required(false))
            .add_source(
                Environment::with_prefix("IMAGEHOARD")
                    .separator("__")
                    .try_parsing(true),
            );
        if let Some(path) = explicit {
            builder = builder.add_source(File::from(path));
        }

        Self::build(builder)
    }

    /// A single file, nothing layered on top. Used for migration targets.
    pub fn from_file(path: &Path) -> Result<Self> {
        Self::build(Config::builder().add_source(File::from(path)))
            .with_context(|| format!("Failed to load {}", path.display()))
    }

    fn build(builder: ConfigBuilder<config::builder::DefaultState>) -> Result<Self> {
        let config: AppConfig = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")?;

        Ok(Self {
            storage: config.storage.with_env_credentials(),
            fetch: config.fetch.with_env_key(),
            ..config
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_defaults_when_file_is_empty() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("empty.toml");
        fs::write(&path, "")?;

        let config = AppConfig::from_file(&path)?;
        assert_eq!(config.thumbnails.max_width, 150);
        assert_eq!(config.derivatives.max_entries, 512);
        assert_eq!(config.fetch.concurrency, 4);
        assert_eq!(config.selection.max_retries, 5);
        assert_eq!(config.storage.kind(), "local");
        Ok(())
    }

    #[test]
    fn test_file_sections_override_defaults() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("imagehoard.toml");
        fs::write(
            &path,
            r#"
[storage]
backend = "b2"
bucket = "hoard"
region = "us-west-004"

[thumbnails]
max_width = 300
max_height = 300

[selection]
max_retries = 2
"#,
        )?;

        let config = AppConfig::from_file(&path)?;
        assert_eq!(config.storage.kind(), "b2");
        assert_eq!(config.thumbnails.max_width, 300);
        assert_eq!(config.thumbnails.quality, 80);
        assert_eq!(config.selection.max_retries, 2);
        Ok(())
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        assert!(AppConfig::from_file(Path::new("/nonexistent/imagehoard.toml")).is_err());
    }
}
