use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a controller is in its fetch lifecycle.
///
/// There is no terminal state: every state can go back to `None` and from
/// there start loading again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    /// Nothing requested yet, or cancelled/closed.
    #[default]
    None,
    Loading,
    Empty,
    Success,
    Failure,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Loading => "loading",
            Self::Empty => "empty",
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }

    /// A fetch has finished, one way or another.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Empty | Self::Success | Self::Failure)
    }

    pub fn can_transition_to(&self, next: State) -> bool {
        match (self, next) {
            (_, Self::None) => true,
            (Self::Loading, Self::Loading) => false,
            (_, Self::Loading) => true,
            (Self::Loading, Self::Empty | Self::Success | Self::Failure) => true,
            _ => false,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
