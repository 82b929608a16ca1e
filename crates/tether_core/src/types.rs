//! Core types shared by sources, stores and controllers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Describes where a value came from. Used to tell whether information was
/// loaded from network or storage, and to suppress a source re-storing data
/// it produced itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Retrieved from memory.
    Memory,
    /// Retrieved from disk.
    Disk,
    /// Retrieved from network.
    Network,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Disk => "disk",
            Self::Network => "network",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "memory" => Ok(Self::Memory),
            "disk" => Ok(Self::Disk),
            "network" => Ok(Self::Network),
            other => Err(format!("unknown source type: {other}")),
        }
    }
}

/// Index value meaning "retrieve everything".
pub const ALL_INDEX: i64 = -1;

/// Parameters passed uniformly to every source operation.
///
/// Each source decides how to interpret them; a default instance asks for
/// all information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceParams {
    /// Optional index to use. [`ALL_INDEX`] retrieves everything.
    pub index: i64,
    /// Source-specific payload.
    pub data: Option<serde_json::Value>,
}

impl Default for SourceParams {
    fn default() -> Self {
        Self {
            index: ALL_INDEX,
            data: None,
        }
    }
}

impl SourceParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_index(mut self, index: i64) -> Self {
        self.index = index;
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn is_all(&self) -> bool {
        self.index == ALL_INDEX
    }
}

/// A value together with the medium it came from and where it originated.
#[derive(Debug, Clone, PartialEq)]
pub struct Response<T> {
    pub value: T,
    pub source_type: SourceType,
    /// Originating identifier, e.g. the request URL or storage key
    pub origin: Option<String>,
}

impl<T> Response<T> {
    pub fn new(value: T, source_type: SourceType) -> Self {
        Self {
            value,
            source_type,
            origin: None,
        }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Response<U> {
        Response {
            value: f(self.value),
            source_type: self.source_type,
            origin: self.origin,
        }
    }
}

/// Bound for values managed by a controller: cheap enough to clone out of a
/// store and shareable across the tasks that fetch them.
pub trait Payload: Clone + Send + Sync + fmt::Debug + 'static {}

impl<T> Payload for T where T: Clone + Send + Sync + fmt::Debug + 'static {}
