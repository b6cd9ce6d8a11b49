//! # Transit Centralized Configuration
//!
//! Configuration structures and loading for a transit controller process.
//!
//! ## Features
//!
//! - **Dataset Options**: where and how the schedule is loaded
//! - **Module Settings**: enabled/excluded modules and per-module parameters
//! - **Remote Endpoints**: peers that serve additional operations
//! - **Runtime Sizing**: worker pool, I/O threads, timeouts, frame limits
//!
//! ## Usage
//!
//! ```rust,no_run
//! use transit_config::TransitConfig;
//! use std::path::Path;
//!
//! let config = TransitConfig::load(Some(Path::new("config/transit.toml"))).unwrap();
//! println!("modules: {:?}", config.modules.enabled);
//! ```

pub mod defaults;
pub mod transit_config;

// Re-export commonly used types
pub use transit_config::{
    DatasetFormat, LoaderOptions, LoggingConfig, ModuleParams, ModulesConfig, RemoteEndpoint,
    RuntimeConfig, ServerConfig, TransitConfig,
};
