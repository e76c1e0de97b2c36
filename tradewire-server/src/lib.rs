//! # Tradewire Server
//!
//! Process shell around the Tradewire gateway.
//!
//! This crate provides:
//! - Configuration loading (YAML, TOML, JSON) with environment overrides
//! - Structured logging setup
//! - Listener startup and graceful shutdown on SIGINT/SIGTERM

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod logging;
pub mod server;
pub mod teardown;

pub use config::{ConfigError, ServerConfig};
pub use logging::{LogConfig, LoggingError, init_logging};
pub use server::{GatewayServer, ServerError};
pub use teardown::{StopReason, Teardown};
