use serde::{Deserialize, Serialize};

/// What the dispatcher does with a connection whose push failed.
///
/// The default leaves stale connections to lease expiry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionFailurePolicy {
    /// Log the failure and rely on lease expiry
    #[default]
    Ignore,
    /// Remove the connection from the registry when the gateway reports it gone
    DeleteOnGone,
}

impl ConnectionFailurePolicy {
    /// Whether a push that failed with `gone` should delete the registry row.
    /// Transport errors never delete: the connection may still be alive.
    #[must_use]
    pub const fn deletes_on_gone(self) -> bool {
        matches!(self, Self::DeleteOnGone)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ignore => "ignore",
            Self::DeleteOnGone => "delete_on_gone",
        }
    }
}

impl std::fmt::Display for ConnectionFailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
