//! udfbox: compile, scan and run user-defined grid functions
//!
//! A UDF is a short program in LuaJIT, C++ or (feature `python`) Python that
//! fills an output grid from named input grids. Each backend splices the user
//! source into a language template, builds an opaque artifact with an external
//! toolchain, and later runs that artifact in a forked, privilege-reduced child
//! so a crashing UDF fails the call instead of the host.
//!
//! # Architecture
//!
//! ## Backends ([`backend`])
//! - [`backend::Backend`]: uniform compile / run / scan contract
//! - [`backend::lua`]: LuaJIT bytecode on an embedded state
//! - [`backend::cpp`]: shared objects through [`backend::native_abi`]
//!
//! ## Build and Scan
//! - [`compile`]: template splicing, toolchain invocation, run workspaces
//! - [`scan`]: lexical `lib.getData` dependency extraction
//!
//! ## Data ([`dataset`])
//! - [`dataset::Dataset`]: named, typed, shaped grid
//! - [`dataset::DatasetTable`]: ordered view handed to a running UDF
//!
//! ## Isolation
//! - [`exec`]: fork isolation, shared-memory output channel, sandbox trait
//! - [`kernel`]: capabilities, rlimits, child process helpers
//!
//! ## Support
//! - [`config`]: `udfbox.json` loading and the shared error type
//! - [`observability`]: logger setup and structured audit events

pub mod backend;
pub mod compile;
pub mod config;
pub mod dataset;
pub mod exec;
pub mod kernel;
pub mod observability;
pub mod scan;

pub use backend::{backend_for, backend_for_path, supported_backends, Backend};
pub use compile::Artifact;
pub use config::types::{Result, UdfError};
pub use config::UdfConfig;
pub use dataset::{Dataset, DatasetTable, Element, ElementType};
pub use observability::init_logging;
