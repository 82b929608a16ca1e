//! Disk source backed by the `resources` table.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tether_core::{DataSource, Payload, Response, SourceError, SourceParams, SourceType};
use tracing::{debug, trace};

use crate::connection::ResourceDb;
use crate::error::DbResult;
use crate::queries;

/// Caches one resource as a JSON row keyed by name.
///
/// A non-default `index` addresses a separate slot stored under `key:index`.
/// Clearing with the default params removes the base row and every slot.
/// Rows read or written through this source are mirrored in memory so
/// `stored_data` can answer synchronously.
pub struct SqliteSource<T> {
    db: ResourceDb,
    key: String,
    mirror: RwLock<HashMap<String, T>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for SqliteSource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteSource")
            .field("key", &self.key)
            .field("mirrored", &self.mirror.read().len())
            .finish_non_exhaustive()
    }
}

impl<T> SqliteSource<T>
where
    T: Payload + Serialize + DeserializeOwned,
{
    pub fn new(db: ResourceDb, key: impl Into<String>) -> Self {
        Self {
            db,
            key: key.into(),
            mirror: RwLock::new(HashMap::new()),
            _marker: PhantomData,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn db(&self) -> &ResourceDb {
        &self.db
    }

    fn row_key(&self, params: &SourceParams) -> String {
        if params.is_all() {
            self.key.clone()
        } else {
            format!("{}:{}", self.key, params.index)
        }
    }

    /// Write a response into the slot addressed by `params`.
    pub async fn store_at(&self, params: &SourceParams, response: Response<T>) -> DbResult<()> {
        let row_key = self.row_key(params);
        let payload = serde_json::to_value(&response.value)?;
        queries::upsert_resource(
            self.db.pool(),
            &row_key,
            response.source_type.as_str(),
            response.origin.as_deref(),
            &payload,
        )
        .await?;

        debug!(key = %row_key, from = %response.source_type, "stored resource row");
        self.mirror.write().insert(row_key, response.value);
        Ok(())
    }

    async fn load(&self, params: &SourceParams) -> DbResult<Option<Response<T>>> {
        let row_key = self.row_key(params);
        let Some(row) = queries::get_resource(self.db.pool(), &row_key).await? else {
            trace!(key = %row_key, "no stored row");
            self.mirror.write().remove(&row_key);
            return Ok(None);
        };

        let value: T = serde_json::from_value(row.payload.0)?;
        self.mirror.write().insert(row_key, value.clone());

        let mut response = Response::new(value, SourceType::Disk);
        response.origin = row.origin;
        Ok(Some(response))
    }

    async fn clear(&self, params: &SourceParams) -> DbResult<()> {
        if params.is_all() {
            let removed = queries::delete_resource_family(self.db.pool(), &self.key).await?;
            debug!(key = %self.key, removed, "cleared resource rows");
            let prefix = format!("{}:", self.key);
            self.mirror
                .write()
                .retain(|k, _| k != &self.key && !k.starts_with(&prefix));
        } else {
            let row_key = self.row_key(params);
            queries::delete_resource(self.db.pool(), &row_key).await?;
            self.mirror.write().remove(&row_key);
        }
        Ok(())
    }
}

#[async_trait]
impl<T> DataSource<T> for SqliteSource<T>
where
    T: Payload + Serialize + DeserializeOwned,
{
    fn source_type(&self) -> SourceType {
        SourceType::Disk
    }

    async fn do_get(&self, params: SourceParams) -> Result<Response<T>, SourceError> {
        self.load(&params)
            .await?
            .ok_or_else(|| SourceError::not_found(SourceType::Disk))
    }

    async fn do_store(&self, response: Response<T>) -> Result<(), SourceError> {
        self.store_at(&SourceParams::default(), response).await?;
        Ok(())
    }

    fn stored_data(&self, params: &SourceParams) -> Option<T> {
        self.mirror.read().get(&self.row_key(params)).cloned()
    }

    async fn clear_stored_data(&self, params: &SourceParams) -> Result<(), SourceError> {
        self.clear(params).await?;
        Ok(())
    }
}
