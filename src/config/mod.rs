//! Configuration
//!
//! Config loading (toolchains, sandbox limits, isolation switches) and the shared error type.

pub mod config;
pub mod types;

pub use config::{
    NativeConfig, SandboxConfig, ScanConfig, ToolchainConfig, ToolchainSet, UdfConfig,
};
pub use types::{Result, UdfError};
