//! Row types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;
use tether_core::SourceType;

use crate::error::{DbError, DbResult};

/// One cached resource.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct StoredResource {
    /// Controller key, or `key:index` for an indexed slot
    pub key: String,

    /// Medium the cached value originally came from
    pub source_type: String,

    pub origin: Option<String>,

    pub payload: Json<serde_json::Value>,

    pub updated_at: DateTime<Utc>,
}

impl StoredResource {
    pub fn source_type(&self) -> DbResult<SourceType> {
        self.source_type.parse::<SourceType>().map_err(DbError::invalid_data)
    }
}
