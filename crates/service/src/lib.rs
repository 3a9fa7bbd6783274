//! Shared service infrastructure for the Polaris Container.
//!
//! This crate provides the components the container binary is assembled from:
//! - Configuration (environment-sourced, validated at boot)
//! - State management (config + crypto SDK + upstream HTTP client)
//! - The encryption proxy pipeline (unwrap stage, forward/encrypt stage,
//!   streaming cipher transforms, terminal error handler)
//! - HTTP surface (system endpoints + catch-all proxy route)

pub mod config;
pub mod http;
pub mod proxy;
pub mod state;

// Re-export key types for convenience
pub use config::{Config, ConfigError, KeyHandlerKind};
pub use state::{State as ServiceState, StateSetupError};
