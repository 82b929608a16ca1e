//! Tether Core
//!
//! Client-side data access: one controller per resource, fed by pluggable
//! sources, with single-flight retrieval and observer fan-out.
//!
//! # Architecture
//!
//! - **Refresh strategies** gate every request attempt
//! - **Sources** wrap one retrieval medium and allow one retrieval in flight
//! - **Chained sources** query memory, disk and network in priority order
//! - **Controllers** own the resource state and notify registered callbacks
//!
//! # Usage
//!
//! ```rust,ignore
//! use tether_core::{DataController, FileSource, Source};
//!
//! let controller = DataController::<Profile>::builder("profile")
//!     .source_factory(|| Source::new(FileSource::new("profile.json")))
//!     .build()?;
//!
//! let cached = controller.request_data();
//! ```

pub mod callback;
pub mod config;
pub mod controller;
pub mod error;
pub mod source;
pub mod store;
pub mod strategy;
pub mod types;

#[cfg(test)]
mod test_helpers;

pub use callback::{BroadcastCallback, CallbackGroup, ControllerEvent, DataControllerCallback};
pub use config::{ControllerConfig, FileSourceConfig, RefreshConfig};
pub use controller::{DataController, DataControllerBuilder, State};
pub use error::{ConfigError, CoreError, ErrorKind, Result, SourceError};
#[cfg(feature = "http")]
pub use source::HttpSource;
pub use source::{
    ChainedSource, DataSource, FetchHandle, FetchResult, FileSource, FnSource, MemorySource, Source,
};
pub use store::{DataStore, MemoryDataStore};
pub use strategy::{
    AlwaysRefresh, MinIntervalRefresh, OneShotRefresh, RefreshStrategy, RefreshWhenEmpty,
    Refreshable,
};
pub use types::{ALL_INDEX, Payload, Response, SourceParams, SourceType};
