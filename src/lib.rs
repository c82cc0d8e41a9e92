pub mod config;
pub mod core;
pub mod services;

// Re-export commonly used items for convenience
pub use config::{ConnectorConfig, ConnectorSettings};
pub use core::*;
