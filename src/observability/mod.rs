//! Observability
//!
//! Logger setup and structured audit events.

pub mod audit;

/// Install `env_logger` with an `info` default; `RUST_LOG` overrides it.
/// Safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init();
}
