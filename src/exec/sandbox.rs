/// Restrictions a forked UDF child enters before user code runs
use crate::config::types::{Result, UdfError};
use crate::config::SandboxConfig;
use crate::kernel::capabilities::{check_no_new_privs, drop_all_capabilities, set_no_new_privs};
use crate::kernel::limits::ResourceLimits;
use crate::observability::audit::events;
use std::path::Path;

pub trait Sandbox: Send + Sync {
    fn name(&self) -> &'static str;

    /// Called in the child after fork. `sandbox_path` is opaque to the engine.
    fn enter(&self, sandbox_path: &Path) -> Result<()>;
}

/// No restrictions
#[derive(Debug, Clone, Copy, Default)]
pub struct Unconfined;

impl Sandbox for Unconfined {
    fn name(&self) -> &'static str {
        "unconfined"
    }

    fn enter(&self, _sandbox_path: &Path) -> Result<()> {
        Ok(())
    }
}

/// Resource limits, capability drop and `no_new_privs`
#[derive(Debug, Clone)]
pub struct PrivilegeSandbox {
    strict_mode: bool,
    limits: ResourceLimits,
}

impl PrivilegeSandbox {
    pub fn new(limits: ResourceLimits, strict_mode: bool) -> Self {
        Self {
            strict_mode,
            limits,
        }
    }

    pub fn from_config(config: &SandboxConfig) -> Self {
        Self::new(ResourceLimits::from(config), config.strict_mode)
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }
}

impl Sandbox for PrivilegeSandbox {
    fn name(&self) -> &'static str {
        "privilege"
    }

    fn enter(&self, sandbox_path: &Path) -> Result<()> {
        log::debug!("Entering privilege sandbox (path {})", sandbox_path.display());
        self.limits.apply(self.strict_mode)?;
        drop_all_capabilities();
        if let Err(e) = lock_no_new_privs() {
            if self.strict_mode {
                return Err(e);
            }
            events::sandbox_degraded("no_new_privs", &e.to_string());
        }
        Ok(())
    }
}

/// Set `no_new_privs` and read it back.
fn lock_no_new_privs() -> Result<()> {
    set_no_new_privs()?;
    if check_no_new_privs()? {
        Ok(())
    } else {
        Err(UdfError::Sandbox(
            "PR_SET_NO_NEW_PRIVS succeeded but the flag is not set".to_string(),
        ))
    }
}

/// Sandbox selected by `config.enabled`
pub fn sandbox_for(config: &SandboxConfig) -> Box<dyn Sandbox> {
    if config.enabled {
        Box::new(PrivilegeSandbox::from_config(config))
    } else {
        Box::new(Unconfined)
    }
}
