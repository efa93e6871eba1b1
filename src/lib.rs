pub mod cli;
pub mod config;
pub mod error;
pub mod mcp;
pub mod native;
pub mod tool;

pub use error::{Error, Result};

/// Version of mcp-broker
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
