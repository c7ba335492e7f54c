//! All operations are idempotent and best-effort.
use super::{
    LINUX_CAPABILITY_VERSION_3, MAX_CAP, PR_CAPBSET_DROP, PR_CAP_AMBIENT,
    PR_CAP_AMBIENT_CLEAR_ALL, PR_SET_NO_NEW_PRIVS,
};
use crate::config::types::{Result, UdfError};

/// Drop all capabilities from the bounding, ambient and process sets.
///
/// An unprivileged UDF child usually holds none, so failures here are logged
/// and never returned.
pub fn drop_all_capabilities() {
    drop_bounding_capabilities();
    drop_ambient_capabilities();
    drop_process_capabilities();
}

fn drop_bounding_capabilities() {
    for cap in 0..=MAX_CAP {
        // SAFETY: prctl(PR_CAPBSET_DROP) with any cap number is safe; invalid caps are ignored.
        let _ = unsafe { libc::prctl(PR_CAPBSET_DROP, cap, 0, 0, 0) };
    }
}

fn drop_ambient_capabilities() {
    // SAFETY: prctl(PR_CAP_AMBIENT, PR_CAP_AMBIENT_CLEAR_ALL) is safe. Returns error
    // on older kernels without ambient capability support (non-fatal).
    let result = unsafe { libc::prctl(PR_CAP_AMBIENT, PR_CAP_AMBIENT_CLEAR_ALL, 0, 0, 0) };
    if result != 0 {
        log::debug!("Failed to clear ambient capabilities (may not be supported)");
    }
}

/// Zero the effective, permitted and inheritable sets via raw capset(2).
fn drop_process_capabilities() {
    #[repr(C)]
    struct CapUserHeader {
        version: u32,
        pid: i32,
    }

    #[repr(C)]
    struct CapUserData {
        effective: u32,
        permitted: u32,
        inheritable: u32,
    }

    let header = CapUserHeader {
        version: LINUX_CAPABILITY_VERSION_3,
        pid: 0,
    };

    // Version 3 requires two data entries: caps 0-31 and caps 32-63.
    let data = [
        CapUserData { effective: 0, permitted: 0, inheritable: 0 },
        CapUserData { effective: 0, permitted: 0, inheritable: 0 },
    ];

    // SAFETY: capset(2) with valid header (version 3, pid 0 = current) and
    // two zeroed data entries. Properly initialized structs, valid pointers.
    let rc = unsafe {
        libc::syscall(
            libc::SYS_capset,
            &header as *const CapUserHeader,
            data.as_ptr(),
        )
    };

    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EPERM) {
            log::debug!("capset returned EPERM: {}", err);
        } else {
            log::warn!("capset failed: {}", err);
        }
    } else {
        log::debug!("Zeroed all capability sets via capset(2)");
    }
}

/// Prevent privilege escalation via execve (setuid, file capabilities).
/// Idempotent and irreversible once set.
pub fn set_no_new_privs() -> Result<()> {
    // SAFETY: prctl(PR_SET_NO_NEW_PRIVS, 1) is safe and idempotent.
    let result = unsafe { libc::prctl(PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) };
    if result != 0 {
        return Err(UdfError::Sandbox(format!(
            "Failed to set PR_SET_NO_NEW_PRIVS: {}",
            std::io::Error::last_os_error()
        )));
    }
    log::debug!("Set PR_SET_NO_NEW_PRIVS");
    Ok(())
}
