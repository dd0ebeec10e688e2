pub mod id;
pub mod policy;

pub use id::{generate_event_id, ChatId, ConnectionId, RegionId, DEFAULT_CHAT_ID};
pub use policy::ConnectionFailurePolicy;
