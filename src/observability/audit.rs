/// Structured audit events for UDF compilation and execution
///
/// Every event carries a uuid and a UTC timestamp and is serialized to one JSON
/// line. Events always go to the `udfbox::audit` log target; an optional
/// append-only file sink can be installed with [`init_audit_log`].
use crate::config::types::{Result, UdfError};
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use uuid::Uuid;

pub const AUDIT_TARGET: &str = "udfbox::audit";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UdfEventType {
    CompileStart,
    CompileSuccess,
    CompileFailure,
    RunStart,
    RunSuccess,
    RunFailure,
    DatasetLookupMiss,
    ChildFault,
    SandboxDegraded,
}

impl UdfEventType {
    pub fn default_severity(self) -> Severity {
        match self {
            UdfEventType::CompileStart
            | UdfEventType::CompileSuccess
            | UdfEventType::RunStart
            | UdfEventType::RunSuccess => Severity::Low,
            UdfEventType::CompileFailure
            | UdfEventType::RunFailure
            | UdfEventType::DatasetLookupMiss
            | UdfEventType::SandboxDegraded => Severity::Medium,
            UdfEventType::ChildFault => Severity::High,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UdfEvent {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: UdfEventType,
    pub severity: Severity,
    pub backend: Option<String>,
    pub details: String,
    pub process_id: u32,
}

impl UdfEvent {
    pub fn new(event_type: UdfEventType, details: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event_type,
            severity: event_type.default_severity(),
            backend: None,
            details: details.into(),
            process_id: std::process::id(),
        }
    }

    pub fn with_backend(mut self, backend: &str) -> Self {
        self.backend = Some(backend.to_string());
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"event_type":"{:?}","serialize_error":"{}"}}"#, self.event_type, e)
        })
    }
}

struct AuditFile {
    file: Mutex<File>,
    path: PathBuf,
}

static AUDIT_FILE: OnceLock<AuditFile> = OnceLock::new();

/// Install an append-only JSON-lines sink in addition to the log target.
pub fn init_audit_log(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            UdfError::Config(format!("Failed to create audit log directory: {}", e))
        })?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| UdfError::Config(format!("Failed to open audit log: {}", e)))?;

    if AUDIT_FILE
        .set(AuditFile {
            file: Mutex::new(file),
            path: path.to_path_buf(),
        })
        .is_err()
    {
        warn!("Audit log already initialized");
    } else {
        info!("Audit log initialized at {}", path.display());
    }
    Ok(())
}

pub fn audit_log_path() -> Option<&'static Path> {
    AUDIT_FILE.get().map(|a| a.path.as_path())
}

pub fn log_event(event: UdfEvent) {
    let line = event.to_json();
    match event.severity {
        Severity::High => error!(target: AUDIT_TARGET, "{}", line),
        Severity::Medium => warn!(target: AUDIT_TARGET, "{}", line),
        Severity::Low => info!(target: AUDIT_TARGET, "{}", line),
    }

    if let Some(sink) = AUDIT_FILE.get() {
        match sink.file.lock() {
            Ok(mut file) => {
                if let Err(e) = writeln!(file, "{}", line).and_then(|_| file.flush()) {
                    error!("Failed to write audit log: {}", e);
                }
            }
            Err(_) => error!("Failed to acquire lock on audit log"),
        }
    }
}

/// Convenience functions for the events the engine emits
pub mod events {
    use super::*;

    pub fn compile_start(backend: &str, template: &Path) {
        log_event(
            UdfEvent::new(
                UdfEventType::CompileStart,
                format!("template {}", template.display()),
            )
            .with_backend(backend),
        );
    }

    pub fn compile_success(backend: &str, artifact_len: usize) {
        log_event(
            UdfEvent::new(
                UdfEventType::CompileSuccess,
                format!("artifact of {} bytes", artifact_len),
            )
            .with_backend(backend),
        );
    }

    pub fn compile_failure(backend: &str, reason: &str) {
        log_event(UdfEvent::new(UdfEventType::CompileFailure, reason).with_backend(backend));
    }

    pub fn run_start(backend: &str, output: &str, inputs: usize) {
        log_event(
            UdfEvent::new(
                UdfEventType::RunStart,
                format!("output {} with {} input(s)", output, inputs),
            )
            .with_backend(backend),
        );
    }

    pub fn run_success(backend: &str, output: &str) {
        log_event(
            UdfEvent::new(UdfEventType::RunSuccess, format!("output {}", output))
                .with_backend(backend),
        );
    }

    pub fn run_failure(backend: &str, reason: &str) {
        log_event(UdfEvent::new(UdfEventType::RunFailure, reason).with_backend(backend));
    }

    pub fn lookup_miss(name: &str) {
        log_event(UdfEvent::new(
            UdfEventType::DatasetLookupMiss,
            format!("dataset {} not found", name),
        ));
    }

    pub fn child_fault(pid: i32, reason: &str) {
        log_event(UdfEvent::new(
            UdfEventType::ChildFault,
            format!("child {}: {}", pid, reason),
        ));
    }

    pub fn sandbox_degraded(control: &str, reason: &str) {
        log_event(UdfEvent::new(
            UdfEventType::SandboxDegraded,
            format!("{} not applied: {}", control, reason),
        ));
    }
}
