/// Process lifecycle helpers for forked UDF children
use crate::config::types::{Result, UdfError};
use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;

fn to_process_error(prefix: &str, err: impl std::fmt::Display) -> UdfError {
    UdfError::Process(format!("{prefix}: {err}"))
}

/// Ask the kernel to SIGKILL this process when its parent dies.
/// Must be called in the child after fork.
pub fn setup_parent_death_signal() -> Result<()> {
    use nix::sys::prctl;
    use nix::sys::signal::Signal;

    prctl::set_pdeathsig(Signal::SIGKILL)
        .map_err(|e| to_process_error("Failed to set parent death signal", e))?;
    Ok(())
}

/// How a child terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildExit {
    Exited(i32),
    Signaled(i32),
}

impl ChildExit {
    pub fn success(self) -> bool {
        self == ChildExit::Exited(0)
    }

    pub fn into_result(self) -> Result<()> {
        match self {
            ChildExit::Exited(0) => Ok(()),
            ChildExit::Exited(status) => Err(UdfError::ChildFailed { status }),
            ChildExit::Signaled(signal) => Err(UdfError::ChildSignaled { signal }),
        }
    }
}

/// Block until `pid` terminates, retrying on EINTR.
pub fn wait_for_child(pid: Pid) -> Result<ChildExit> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(ChildExit::Exited(code)),
            Ok(WaitStatus::Signaled(_, sig, _)) => return Ok(ChildExit::Signaled(sig as i32)),
            Ok(_) => continue,
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(to_process_error("waitpid(udf)", e)),
        }
    }
}

/// Leave the child without running atexit handlers or destructors that
/// belong to the parent's copy of the address space. Buffered stdio output
/// from the UDF is flushed first.
pub fn exit_child(code: i32) -> ! {
    use std::io::Write;
    let _ = std::io::stdout().flush();
    // SAFETY: fflush(NULL) flushes every C stdio stream; _exit never returns.
    unsafe {
        libc::fflush(std::ptr::null_mut());
        libc::_exit(code)
    }
}
