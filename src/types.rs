// =============================================================================
// Shared types used across the pairs analytics service
// =============================================================================

use serde::{Deserialize, Serialize};

/// Lifecycle of the live feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedState {
    Stopped,
    Backfilling,
    Streaming,
    Reconnecting,
}

impl Default for FeedState {
    fn default() -> Self {
        Self::Stopped
    }
}

impl std::fmt::Display for FeedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Backfilling => write!(f, "backfilling"),
            Self::Streaming => write!(f, "streaming"),
            Self::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_state_serialises_lowercase() {
        assert_eq!(serde_json::to_string(&FeedState::Reconnecting).unwrap(), "\"reconnecting\"");
        assert_eq!(FeedState::default(), FeedState::Stopped);
        assert_eq!(FeedState::Streaming.to_string(), "streaming");
    }
}
