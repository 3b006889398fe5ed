//! Identity-aware reverse-proxy gateway dispatch core.

pub mod config;
pub mod gateway;
pub mod observability;

pub use config::GatewayConfig;
pub use gateway::{Gateway, SetupError};
