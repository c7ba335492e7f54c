//! Linux capability management for privilege minimization.
//!
//! All capability drops are idempotent, best-effort, and never panic.

mod drop;

pub use drop::{drop_all_capabilities, set_no_new_privs};

use crate::config::types::{Result, UdfError};

/// Highest capability number cleared from the bounding set
pub const MAX_CAP: u32 = 40;

pub(crate) const PR_CAPBSET_DROP: libc::c_int = 24;
pub(crate) const PR_SET_NO_NEW_PRIVS: libc::c_int = 38;
pub(crate) const PR_GET_NO_NEW_PRIVS: libc::c_int = 39;
pub(crate) const PR_CAP_AMBIENT: libc::c_int = 47;
pub(crate) const PR_CAP_AMBIENT_CLEAR_ALL: libc::c_int = 4;
pub(crate) const LINUX_CAPABILITY_VERSION_3: u32 = 0x20080522;

/// Whether `PR_SET_NO_NEW_PRIVS` is set for the calling thread
pub fn check_no_new_privs() -> Result<bool> {
    // SAFETY: PR_GET_NO_NEW_PRIVS takes no pointers and only reads thread state.
    let rc = unsafe { libc::prctl(PR_GET_NO_NEW_PRIVS, 0, 0, 0, 0) };
    match rc {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(UdfError::Sandbox(format!(
            "PR_GET_NO_NEW_PRIVS failed: {}",
            std::io::Error::last_os_error()
        ))),
    }
}
