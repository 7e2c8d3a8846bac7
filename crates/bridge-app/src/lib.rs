pub mod config;
pub mod dispatcher;

pub use config::BridgeConfig;
pub use dispatcher::{DispatchOutcome, Dispatcher};
