use nanoid::nanoid;
use serde::{Deserialize, Serialize};

/// Generate a 16-character nanoid for event IDs
#[must_use]
pub fn generate_event_id() -> String {
    nanoid!(16)
}

/// Declares a transparent string identifier.
///
/// Identifiers on the relay path are opaque: the transport assigns connection
/// ids, deployment assigns region names, and chat ids come from clients. None
/// of them are generated here, so there is no `new()`.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            #[must_use]
            pub const fn from_string(id: String) -> Self {
                Self(id)
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Logical chat room a connection belongs to
    ChatId
);

string_id!(
    /// Transport-assigned connection id, unique within one region
    ConnectionId
);

string_id!(
    /// Deployment region name (e.g. "eu-west-1")
    RegionId
);

/// Id of the single shared room every connection joins today
pub const DEFAULT_CHAT_ID: &str = "default";

impl ChatId {
    #[must_use]
    pub fn default_chat() -> Self {
        Self(DEFAULT_CHAT_ID.to_string())
    }
}

impl Default for ChatId {
    fn default() -> Self {
        Self::default_chat()
    }
}
