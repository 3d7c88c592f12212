pub mod config;
pub mod error;
pub mod event_bus;
pub mod loyalty;
pub mod thresholds;

pub use config::EngineConfig;
pub use error::{LoyaltyError, LoyaltyResult};
