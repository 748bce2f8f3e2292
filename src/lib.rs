//! Devgate - a local development reverse proxy
//!
//! This library provides a small proxy for frontend development that:
//! - Serves a static frontend directory over plain HTTP
//! - Forwards requests under a configurable path prefix to one backend
//! - Injects a fixed CORS policy on every response, preflights included
//! - Optionally spawns the backend process and polls it until healthy
//! - Terminates the supervised backend gracefully on shutdown

pub mod config;
pub mod cors;
pub mod error;
pub mod forward;
pub mod proxy;
pub mod static_files;
pub mod supervisor;

/// Package name as compiled
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
/// Package version as compiled
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
