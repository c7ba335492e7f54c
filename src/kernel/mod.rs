//! Thin wrappers around Linux kernel primitives.
//!
//! All `unsafe` code for privileges, limits and child processes is concentrated
//! here with explicit SAFETY comments.

pub mod capabilities;
pub mod limits;
pub mod process;
