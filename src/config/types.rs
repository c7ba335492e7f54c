/// Shared error type for udfbox
use thiserror::Error;

/// Errors raised by the compile, scan and run stages
#[derive(Error, Debug)]
pub enum UdfError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Template file missing, unreadable, or without the placeholder marker
    #[error("Template error: {0}")]
    Template(String),

    /// External toolchain could not run or produced no artifact
    #[error("Toolchain error: {0}")]
    Toolchain(String),

    /// Artifact rejected before any user code ran
    #[error("Load error: {0}")]
    Load(String),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("Interpreter error: {0}")]
    Interpreter(String),

    #[error("UDF process exited with status {status}")]
    ChildFailed { status: i32 },

    #[error("UDF process terminated by signal {signal}")]
    ChildSignaled { signal: i32 },
}

pub type Result<T> = std::result::Result<T, UdfError>;

impl UdfError {
    /// True when the failure happened inside the isolated child rather than the host.
    pub fn is_child_fault(&self) -> bool {
        matches!(
            self,
            UdfError::ChildFailed { .. } | UdfError::ChildSignaled { .. }
        )
    }
}
