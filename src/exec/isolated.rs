/// Fork isolation for UDF bodies
///
/// `spawn_isolated` runs a closure in a forked child that has entered the
/// sandbox. The closure writes the output grid through a [`SharedMemoryChannel`]
/// created before the fork; the parent waits for the child and then copies the
/// channel into the caller's buffer on every path, failure included.
use super::sandbox::Sandbox;
use super::shm::SharedMemoryChannel;
use crate::config::types::{Result, UdfError};
use crate::kernel::process::{exit_child, setup_parent_death_signal, wait_for_child, ChildExit};
use crate::observability::audit::events;
use nix::unistd::{fork, ForkResult};
use std::io::Write;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;

/// Child exit status when the UDF body returned an error
pub const EXIT_UDF_ERROR: i32 = 1;
/// Child exit status when the sandbox could not be entered
pub const EXIT_SANDBOX_FAILED: i32 = 3;
/// Child exit status when the UDF body panicked
pub const EXIT_PANIC: i32 = 101;

/// Run `body` in a sandboxed child and copy `channel` into `dest` afterwards.
///
/// Succeeds iff the child exits normally with status 0.
pub fn spawn_isolated<F>(
    sandbox: &dyn Sandbox,
    sandbox_path: &Path,
    channel: &SharedMemoryChannel,
    dest: &mut [u8],
    body: F,
) -> Result<()>
where
    F: FnOnce() -> Result<()>,
{
    // SAFETY: the child only runs `body` and then _exits; it never returns
    // into the caller's stack frames.
    let pid = match unsafe { fork() }.map_err(|e| UdfError::Process(format!("fork: {e}")))? {
        ForkResult::Child => run_child(sandbox, sandbox_path, body),
        ForkResult::Parent { child } => child,
    };

    let exit = wait_for_child(pid);
    let copied = channel.copy_back(dest);
    let exit = exit?;
    copied?;

    if !exit.success() {
        let reason = match exit {
            ChildExit::Exited(EXIT_SANDBOX_FAILED) => "sandbox setup failed".to_string(),
            ChildExit::Exited(EXIT_PANIC) => "UDF panicked".to_string(),
            ChildExit::Exited(code) => format!("exited with status {code}"),
            ChildExit::Signaled(sig) => format!("terminated by signal {sig}"),
        };
        log::error!("UDF child {} {}", pid, reason);
        events::child_fault(pid.as_raw(), &reason);
    }
    exit.into_result()
}

fn run_child<F>(sandbox: &dyn Sandbox, sandbox_path: &Path, body: F) -> !
where
    F: FnOnce() -> Result<()>,
{
    if let Err(e) = setup_parent_death_signal() {
        let _ = writeln!(std::io::stderr(), "udf child: {e}");
    }

    if let Err(e) = sandbox.enter(sandbox_path) {
        let _ = writeln!(std::io::stderr(), "udf child: {} sandbox: {e}", sandbox.name());
        exit_child(EXIT_SANDBOX_FAILED);
    }

    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(())) => exit_child(0),
        Ok(Err(e)) => {
            let _ = writeln!(std::io::stderr(), "udf child: {e}");
            exit_child(EXIT_UDF_ERROR)
        }
        Err(_) => exit_child(EXIT_PANIC),
    }
}
