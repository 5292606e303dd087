//! Session state graph.

use serde::{Deserialize, Serialize};

/// Where a listing-draft session is in its lifecycle.
///
/// CollectingImages → AwaitingLocation → Generating → AwaitingConfirmation →
/// Publishing → Completed. Cancelled, Expired and Error are terminal and
/// reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    CollectingImages,
    AwaitingLocation,
    Generating,
    AwaitingConfirmation,
    Publishing,
    Completed,
    Cancelled,
    Expired,
    Error,
}

impl SessionState {
    pub const ALL: [SessionState; 9] = [
        Self::CollectingImages,
        Self::AwaitingLocation,
        Self::Generating,
        Self::AwaitingConfirmation,
        Self::Publishing,
        Self::Completed,
        Self::Cancelled,
        Self::Expired,
        Self::Error,
    ];

    /// Check if a transition from `self` to `target` is on the graph.
    pub fn can_transition_to(&self, target: SessionState) -> bool {
        use SessionState::*;

        if self.is_active() && matches!(target, Cancelled | Expired | Error) {
            return true;
        }

        matches!(
            (self, target),
            (CollectingImages, AwaitingLocation)
                | (CollectingImages, Generating)
                | (AwaitingLocation, Generating)
                | (Generating, AwaitingConfirmation)
                | (AwaitingConfirmation, Publishing)
                | (Publishing, Completed)
                // explicit user retry of a failed step
                | (Error, Generating)
                | (Error, Publishing)
        )
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Cancelled | Self::Expired | Self::Error
        )
    }

    /// Check if the session is still active (not terminal).
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// States that wait on an external call.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Generating | Self::Publishing)
    }

    /// Stable string form, used as the DB column value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CollectingImages => "COLLECTING_IMAGES",
            Self::AwaitingLocation => "AWAITING_LOCATION",
            Self::Generating => "GENERATING",
            Self::AwaitingConfirmation => "AWAITING_CONFIRMATION",
            Self::Publishing => "PUBLISHING",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
            Self::Expired => "EXPIRED",
            Self::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SessionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| format!("unknown session state: {s}"))
    }
}
