pub mod batch;
pub mod config;
pub mod constants;
pub mod coordinator;
pub mod decode;
pub mod display;
pub mod error;
pub mod models;
pub mod profiles;
pub mod relay;
pub mod stats;
pub mod store;

// Re-export the types most callers need at crate root
pub use config::{CoreConfig, UndecodedAmountPolicy, ViewConfig};
pub use coordinator::{InitialLoad, SubscriptionCoordinator, ViewId, ViewPhase};
pub use display::{ChannelDisplay, DisplaySink, DisplayUpdate};
pub use error::{Result, ZapError};
pub use models::{Profile, SharedZap, ZapEvent};
pub use stats::{StatsView, ZapStats};

#[cfg(test)]
pub(crate) mod test_support;
