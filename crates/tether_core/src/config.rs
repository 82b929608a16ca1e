//! TOML configuration for controllers.
//!
//! ```toml
//! name = "profile"
//!
//! [refresh]
//! type = "min_interval"
//! seconds = 30
//!
//! [params]
//! index = 0
//!
//! [cache]
//! path = "cache/profile.json"
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, CoreError};
use crate::source::FileSource;
use crate::strategy::{AlwaysRefresh, MinIntervalRefresh, OneShotRefresh, RefreshStrategy, RefreshWhenEmpty};
use crate::types::{Payload, SourceParams};
use crate::Result;

/// Which refresh strategy a controller gets.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RefreshConfig {
    #[default]
    Always,
    OneShot,
    WhenEmpty,
    MinInterval { seconds: u64 },
}

impl RefreshConfig {
    pub fn build(&self) -> Arc<dyn RefreshStrategy> {
        match self {
            Self::Always => Arc::new(AlwaysRefresh),
            Self::OneShot => Arc::new(OneShotRefresh::new()),
            Self::WhenEmpty => Arc::new(RefreshWhenEmpty),
            Self::MinInterval { seconds } => {
                Arc::new(MinIntervalRefresh::new(Duration::from_secs(*seconds)))
            }
        }
    }
}

/// On-disk cache location for a controller's resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSourceConfig {
    pub path: PathBuf,
}

impl FileSourceConfig {
    pub fn build<T>(&self) -> FileSource<T>
    where
        T: Payload + Serialize + DeserializeOwned,
    {
        FileSource::new(&self.path)
    }
}

/// Settings for one [`DataController`](crate::DataController).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub name: String,

    #[serde(default)]
    pub refresh: RefreshConfig,

    #[serde(default)]
    pub params: SourceParams,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<FileSourceConfig>,
}

impl ControllerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            refresh: RefreshConfig::default(),
            params: SourceParams::default(),
            cache: None,
        }
    }

    pub fn from_toml_str(content: &str) -> std::result::Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConfigError::TomlParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> std::result::Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::TomlSerialize(e.to_string()))
    }

    fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "name".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if let RefreshConfig::MinInterval { seconds: 0 } = self.refresh {
            return Err(ConfigError::InvalidValue {
                field: "refresh.seconds".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Load from a TOML file. A relative cache path is resolved against the
    /// file's directory.
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CoreError::ConfigurationFile {
                config_path: path.display().to_string(),
                cause: ConfigError::Io(e.to_string()),
            })?;

        let mut config =
            Self::from_toml_str(&content).map_err(|cause| CoreError::ConfigurationFile {
                config_path: path.display().to_string(),
                cause,
            })?;

        let base_dir = path.parent().unwrap_or(Path::new("."));
        if let Some(cache) = config.cache.as_mut() {
            if cache.path.is_relative() {
                cache.path = base_dir.join(&cache.path);
            }
        }

        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        let to_error = |cause: ConfigError| CoreError::ConfigurationFile {
            config_path: path.display().to_string(),
            cause,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| to_error(ConfigError::Io(e.to_string())))?;
            }
        }

        let content = self.to_toml_string().map_err(to_error)?;
        tokio::fs::write(path, content)
            .await
            .map_err(|e| to_error(ConfigError::Io(e.to_string())))?;
        Ok(())
    }
}
