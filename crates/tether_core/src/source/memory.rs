use async_trait::async_trait;
use parking_lot::RwLock;

use super::DataSource;
use crate::error::SourceError;
use crate::types::{Payload, Response, SourceParams, SourceType};

/// Keeps a value in process memory.
///
/// The only built-in source that answers `stored_data` synchronously.
#[derive(Debug)]
pub struct MemorySource<T> {
    value: RwLock<Option<T>>,
}

impl<T> MemorySource<T> {
    pub fn new() -> Self {
        Self {
            value: RwLock::new(None),
        }
    }

    pub fn with_value(value: T) -> Self {
        Self {
            value: RwLock::new(Some(value)),
        }
    }
}

impl<T> Default for MemorySource<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Payload> DataSource<T> for MemorySource<T> {
    fn source_type(&self) -> SourceType {
        SourceType::Memory
    }

    async fn do_get(&self, _params: SourceParams) -> Result<Response<T>, SourceError> {
        self.value
            .read()
            .clone()
            .map(|value| Response::new(value, SourceType::Memory))
            .ok_or_else(|| SourceError::not_found(SourceType::Memory))
    }

    async fn do_store(&self, response: Response<T>) -> Result<(), SourceError> {
        *self.value.write() = Some(response.value);
        Ok(())
    }

    fn stored_data(&self, _params: &SourceParams) -> Option<T> {
        self.value.read().clone()
    }

    async fn clear_stored_data(&self, _params: &SourceParams) -> Result<(), SourceError> {
        self.value.write().take();
        Ok(())
    }
}
