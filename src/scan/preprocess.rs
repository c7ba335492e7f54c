/// Preprocessor-backed scanning for compiled sources
///
/// The source is written to a file in a throwaway workspace and the
/// preprocessor is pointed at it through `{input}`; stdout is collected with a
/// blocking read-until-EOF on a helper thread and the caller waits on it with a
/// timeout. Comments are gone from the output, so extraction needs no comment
/// state.
use super::{scan_source, CommentSyntax};
use crate::compile::Workspace;
use crate::config::types::{Result, UdfError};
use crate::config::ToolchainConfig;
use crossbeam_channel::RecvTimeoutError;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::io::Read;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

/// Run `source` through the preprocessor and return its output text.
pub fn preprocess(
    source: &str,
    toolchain: &ToolchainConfig,
    timeout: Duration,
    workspace_root: &Path,
) -> Result<String> {
    let mut workspace = Workspace::new(workspace_root)?;
    let input = workspace.write_file("scan.cpp", source.as_bytes())?;
    let input = input.to_string_lossy();
    let args: Vec<String> = toolchain
        .args
        .iter()
        .map(|arg| arg.replace("{input}", &input))
        .collect();

    log::debug!("Running {} {}", toolchain.program, args.join(" "));
    let mut child = Command::new(&toolchain.program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .spawn()
        .map_err(|e| {
            UdfError::Toolchain(format!("Failed to spawn {}: {}", toolchain.program, e))
        })?;

    let (Some(mut stdout), Some(mut stderr)) = (child.stdout.take(), child.stderr.take()) else {
        kill_group(&mut child);
        return Err(UdfError::Toolchain(format!(
            "{} started without stdio pipes",
            toolchain.program
        )));
    };

    let diagnostics = thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stderr.read_to_end(&mut buf);
        buf
    });

    let (tx, rx) = crossbeam_channel::bounded(1);
    thread::spawn(move || {
        let mut buf = Vec::new();
        let result = stdout.read_to_end(&mut buf).map(|_| buf);
        let _ = tx.send(result);
    });

    let output = match rx.recv_timeout(timeout) {
        Ok(Ok(buf)) => buf,
        Ok(Err(e)) => {
            kill_group(&mut child);
            return Err(UdfError::Toolchain(format!(
                "Failed to read {} output: {}",
                toolchain.program, e
            )));
        }
        Err(RecvTimeoutError::Timeout) => {
            kill_group(&mut child);
            return Err(UdfError::Toolchain(format!(
                "{} did not finish within {:?}",
                toolchain.program, timeout
            )));
        }
        Err(RecvTimeoutError::Disconnected) => {
            kill_group(&mut child);
            return Err(UdfError::Toolchain(format!(
                "{} output reader exited unexpectedly",
                toolchain.program
            )));
        }
    };

    let status = child.wait()?;
    let diagnostics = diagnostics.join().unwrap_or_default();
    let diagnostics = String::from_utf8_lossy(&diagnostics);
    let diagnostics = diagnostics.trim();
    if !diagnostics.is_empty() {
        log::warn!("{}: {}", toolchain.program, diagnostics);
    }

    if !status.success() {
        return Err(UdfError::Toolchain(format!(
            "{} failed ({}): {}",
            toolchain.program, status, diagnostics
        )));
    }

    Ok(String::from_utf8_lossy(&output).into_owned())
}

/// Preprocess `source` and extract its dataset references.
pub fn scan_preprocessed(
    source: &str,
    toolchain: &ToolchainConfig,
    timeout: Duration,
    workspace_root: &Path,
) -> Result<Vec<String>> {
    let text = preprocess(source, toolchain, timeout, workspace_root)?;
    Ok(scan_source(&text, &CommentSyntax::NONE))
}

/// The compiler driver forks helpers (cc1plus), so kill the whole group and reap.
fn kill_group(child: &mut Child) {
    let pgid = Pid::from_raw(child.id() as i32);
    if let Err(e) = killpg(pgid, Signal::SIGKILL) {
        log::debug!("killpg({}) failed: {}", pgid, e);
        let _ = child.kill();
    }
    let _ = child.wait();
}
