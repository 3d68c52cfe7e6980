//! Server module for a3sist
//!
//! Builds the engine from configuration and runs it.
//!
//! # Module Structure
//!
//! - `config`: Configuration sections for every component
//! - `loader`: Configuration loading from files and environment
//! - `validation`: Startup configuration checks
//! - `background_tasks`: Health check, cleanup and rebalance loops
//! - `init`: Runtime wiring and the `serve` loop

mod background_tasks;
pub mod config;
mod init;
mod loader;
mod validation;

// Re-export public API
pub use init::{run, Runtime};
pub use loader::load_config;
