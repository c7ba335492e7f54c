//! Artifact compiler
//!
//! Splices user source into a backend template, runs the external toolchain on
//! the result inside a throwaway [`Workspace`] and returns the output file as an
//! opaque [`Artifact`].

pub mod workspace;

pub use workspace::Workspace;

use crate::config::types::{Result, UdfError};
use crate::config::ToolchainConfig;
use crate::observability::audit::events;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::Command;

/// Compiled UDF bytes: bytecode or a shared object. Empty means "no artifact".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Artifact(Vec<u8>);

impl Artifact {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for Artifact {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Artifact {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Read `template` and replace its placeholder with `source`.
pub fn assemble_source(template: &Path, placeholder: &str, source: &str) -> Result<String> {
    let text = fs::read_to_string(template).map_err(|e| {
        UdfError::Template(format!("Failed to read template {}: {}", template.display(), e))
    })?;

    match text.matches(placeholder).count() {
        0 => Err(UdfError::Template(format!(
            "{} has no '{}' placeholder",
            template.display(),
            placeholder
        ))),
        n => {
            if n > 1 {
                log::warn!(
                    "{} has {} placeholders; only the first is replaced",
                    template.display(),
                    n
                );
            }
            Ok(text.replacen(placeholder, source, 1))
        }
    }
}

/// One backend's compile recipe
#[derive(Debug, Clone, Copy)]
pub struct CompileJob<'a> {
    pub backend: &'static str,
    pub placeholder: &'static str,
    /// File name the assembled translation unit is written to
    pub source_file: &'static str,
    /// File name the toolchain is told to produce
    pub artifact_file: &'static str,
    pub toolchain: &'a ToolchainConfig,
    pub workspace_root: &'a Path,
}

impl CompileJob<'_> {
    pub fn compile(&self, source: &str, template: &Path) -> Result<Artifact> {
        events::compile_start(self.backend, template);
        match self.build(source, template) {
            Ok(artifact) => {
                log::info!(
                    "{} compile produced {} bytes",
                    self.backend,
                    artifact.len()
                );
                events::compile_success(self.backend, artifact.len());
                Ok(artifact)
            }
            Err(e) => {
                log::error!("{} compile failed: {}", self.backend, e);
                events::compile_failure(self.backend, &e.to_string());
                Err(e)
            }
        }
    }

    fn build(&self, source: &str, template: &Path) -> Result<Artifact> {
        let unit = assemble_source(template, self.placeholder, source)?;

        let mut workspace = Workspace::new(self.workspace_root)?;
        let input = workspace.write_file(self.source_file, unit.as_bytes())?;
        let output = workspace.path_for(self.artifact_file);

        run_toolchain(self.toolchain, &input, &output)?;

        let bytes = match fs::read(&output) {
            Ok(bytes) => bytes,
            Err(e) => {
                return Err(UdfError::Toolchain(format!(
                    "{} produced no artifact at {}: {}",
                    self.toolchain.program,
                    output.display(),
                    e
                )))
            }
        };
        if bytes.is_empty() {
            return Err(UdfError::Toolchain(format!(
                "{} produced an empty artifact",
                self.toolchain.program
            )));
        }
        Ok(Artifact(bytes))
    }
}

/// Run the toolchain to completion with `{input}`/`{output}` substituted.
pub fn run_toolchain(toolchain: &ToolchainConfig, input: &Path, output: &Path) -> Result<()> {
    let input = input.to_string_lossy();
    let output = output.to_string_lossy();
    let args: Vec<String> = toolchain
        .args
        .iter()
        .map(|arg| arg.replace("{input}", &input).replace("{output}", &output))
        .collect();

    log::debug!("Running {} {}", toolchain.program, args.join(" "));
    let result = Command::new(&toolchain.program)
        .args(&args)
        .output()
        .map_err(|e| {
            UdfError::Toolchain(format!("Failed to spawn {}: {}", toolchain.program, e))
        })?;

    let stdout = String::from_utf8_lossy(&result.stdout);
    let stderr = String::from_utf8_lossy(&result.stderr);
    if !stdout.trim().is_empty() {
        log::info!("{}: {}", toolchain.program, stdout.trim());
    }
    if !stderr.trim().is_empty() {
        log::warn!("{}: {}", toolchain.program, stderr.trim());
    }

    if !result.status.success() {
        return Err(UdfError::Toolchain(format!(
            "{} failed ({}): {}",
            toolchain.program,
            result.status,
            stderr.trim()
        )));
    }
    Ok(())
}

/// Whether `program` resolves to an executable, directly or through `$PATH`
pub fn program_available(program: &str) -> bool {
    let is_executable = |path: &Path| {
        fs::metadata(path)
            .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    };

    if program.contains('/') {
        return is_executable(Path::new(program));
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| is_executable(&dir.join(program))))
        .unwrap_or(false)
}
