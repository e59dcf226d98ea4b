//! Configuration module
//!
//! Loads the service configuration from an optional TOML file and applies
//! environment / command-line overrides on top of it.

mod service;

pub use service::*;
