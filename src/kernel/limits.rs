/// setrlimit(2) wrappers applied inside the UDF child
use crate::config::types::{Result, UdfError};
use crate::config::SandboxConfig;

#[cfg(target_env = "gnu")]
type Resource = libc::__rlimit_resource_t;
#[cfg(not(target_env = "gnu"))]
type Resource = libc::c_int;

const MB: u64 = 1024 * 1024;

/// Resource limits for one child. `None` leaves the inherited limit alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceLimits {
    pub cpu_time_secs: Option<u64>,
    pub memory_bytes: Option<u64>,
    pub file_size_bytes: Option<u64>,
}

impl From<&SandboxConfig> for ResourceLimits {
    fn from(config: &SandboxConfig) -> Self {
        Self {
            cpu_time_secs: config.cpu_time_limit_secs,
            memory_bytes: config.memory_limit_mb.map(|mb| mb.saturating_mul(MB)),
            file_size_bytes: config.file_size_limit_mb.map(|mb| mb.saturating_mul(MB)),
        }
    }
}

impl ResourceLimits {
    /// Apply every configured limit and disable core dumps.
    ///
    /// In strict mode the first failure is returned; otherwise failures are logged.
    pub fn apply(&self, strict_mode: bool) -> Result<()> {
        if let Some(secs) = self.cpu_time_secs {
            // SIGXCPU at the soft limit, SIGKILL one second later.
            apply_rlimit_value(
                "RLIMIT_CPU",
                libc::RLIMIT_CPU as Resource,
                secs,
                secs.saturating_add(1),
                strict_mode,
            )?;
        }
        if let Some(bytes) = self.memory_bytes {
            apply_rlimit_value("RLIMIT_AS", libc::RLIMIT_AS as Resource, bytes, bytes, strict_mode)?;
        }
        if let Some(bytes) = self.file_size_bytes {
            apply_rlimit_value(
                "RLIMIT_FSIZE",
                libc::RLIMIT_FSIZE as Resource,
                bytes,
                bytes,
                strict_mode,
            )?;
        }
        apply_rlimit_value("RLIMIT_CORE", libc::RLIMIT_CORE as Resource, 0, 0, strict_mode)
    }
}

fn apply_rlimit_value(
    name: &str,
    resource: Resource,
    soft: u64,
    hard: u64,
    strict_mode: bool,
) -> Result<()> {
    let limit = libc::rlimit {
        rlim_cur: soft as libc::rlim_t,
        rlim_max: hard as libc::rlim_t,
    };

    // SAFETY: `limit` is a valid, initialized rlimit living across the call.
    let rc = unsafe { libc::setrlimit(resource, &limit) };
    if rc == 0 {
        return Ok(());
    }

    let err = std::io::Error::last_os_error();
    if strict_mode {
        Err(UdfError::Sandbox(format!(
            "Failed to apply {}={} (hard={}): {}",
            name, soft, hard, err
        )))
    } else {
        log::warn!(
            "Failed to apply {}={} (hard={}) in permissive mode: {}",
            name,
            soft,
            hard,
            err
        );
        crate::observability::audit::events::sandbox_degraded(name, &err.to_string());
        Ok(())
    }
}
