//! Tether Database Layer
//!
//! SQLite-backed disk source for Tether data controllers.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tether_core::{DataController, Source};
//! use tether_db::{ResourceDb, SqliteSource};
//!
//! let db = ResourceDb::open("cache/resources.db").await?;
//! let controller = DataController::<Profile>::builder("profile")
//!     .source_factory(move || Source::new(SqliteSource::new(db.clone(), "profile")))
//!     .build()?;
//! ```

pub mod connection;
pub mod error;
pub mod models;
pub mod queries;
pub mod source;

pub use connection::ResourceDb;
pub use error::{DbError, DbResult};
pub use models::StoredResource;
pub use source::SqliteSource;
