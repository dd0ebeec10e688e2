//! Error types for the relay

use chatrelay_core::RegionId;
use thiserror::Error;

/// Relay error types
#[derive(Debug, Error)]
pub enum Error {
    #[error("Registry unavailable: {0}")]
    RegistryUnavailable(String),

    #[error("Relay to region {region} unavailable: {reason}")]
    RelayUnavailable { region: RegionId, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl Error {
    pub(crate) fn relay_unavailable(region: &RegionId, reason: impl ToString) -> Self {
        Self::RelayUnavailable {
            region: region.clone(),
            reason: reason.to_string(),
        }
    }
}

/// Why a single push to the gateway did not land
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PushFailure {
    /// The gateway reports the connection no longer exists
    #[error("connection gone")]
    Gone,

    /// Anything else: network error, timeout, unexpected status
    #[error("transport error: {0}")]
    Transport(String),
}

impl PushFailure {
    /// Metric label for this failure
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Gone => "gone",
            Self::Transport(_) => "transport_error",
        }
    }
}

/// Result type for relay operations
pub type Result<T> = std::result::Result<T, Error>;
