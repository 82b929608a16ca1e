//! JSON file on local disk.

use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::DataSource;
use crate::error::SourceError;
use crate::types::{Payload, Response, SourceParams, SourceType};

/// Persists a single value as a JSON document.
///
/// A missing file reads as [`SourceError::NotFound`]. Writes go to a sibling
/// temp file first and are renamed into place, so a crash mid-write never
/// leaves a truncated document behind.
#[derive(Debug)]
pub struct FileSource<T> {
    path: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> FileSource<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl<T> DataSource<T> for FileSource<T>
where
    T: Payload + Serialize + DeserializeOwned,
{
    fn source_type(&self) -> SourceType {
        SourceType::Disk
    }

    async fn do_get(&self, _params: SourceParams) -> Result<Response<T>, SourceError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(SourceError::not_found(SourceType::Disk));
            }
            Err(e) => {
                return Err(SourceError::io(
                    format!("read {}", self.path.display()),
                    e,
                ));
            }
        };

        let value: T = serde_json::from_slice(&bytes)
            .map_err(|e| SourceError::serialization(std::any::type_name::<T>(), e))?;

        Ok(Response::new(value, SourceType::Disk).with_origin(self.path.display().to_string()))
    }

    async fn do_store(&self, response: Response<T>) -> Result<(), SourceError> {
        let bytes = serde_json::to_vec_pretty(&response.value)
            .map_err(|e| SourceError::serialization(std::any::type_name::<T>(), e))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    SourceError::io(format!("create {}", parent.display()), e)
                })?;
            }
        }

        let temp = self.temp_path();
        tokio::fs::write(&temp, &bytes)
            .await
            .map_err(|e| SourceError::io(format!("write {}", temp.display()), e))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|e| SourceError::io(format!("rename to {}", self.path.display()), e))?;

        debug!(path = %self.path.display(), bytes = bytes.len(), "stored response on disk");
        Ok(())
    }

    async fn clear_stored_data(&self, _params: &SourceParams) -> Result<(), SourceError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SourceError::io(
                format!("remove {}", self.path.display()),
                e,
            )),
        }
    }
}
