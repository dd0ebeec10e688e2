pub mod bootstrap;
pub mod clock;
pub mod config;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod resilience;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use models::{ChatId, ConnectionId, RegionId};
