//! Backend facade
//!
//! Every UDF language implements [`Backend`]: compile source against a
//! template into an [`Artifact`], run an artifact over a set of datasets, and
//! scan source for the datasets it reads. Callers pick a backend by name or
//! file extension through [`backend_for`] / [`backend_for_path`].

pub mod cpp;
pub mod lua;
pub mod native_abi;
#[cfg(feature = "python")]
pub mod python;

pub use cpp::CppBackend;
pub use lua::LuaBackend;
#[cfg(feature = "python")]
pub use python::PythonBackend;

use crate::compile::Artifact;
use crate::config::types::{Result, UdfError};
use crate::config::UdfConfig;
use crate::dataset::{Dataset, ElementType};
use crate::observability::audit::events;
use std::path::Path;

/// Uniform contract over the UDF languages.
pub trait Backend: Send + Sync {
    /// Human-readable identifier, e.g. `LuaJIT`
    fn name(&self) -> &'static str;

    /// Source suffix this backend handles, with the leading dot
    fn extension(&self) -> &'static str;

    /// Splice `source` into `template` and build an artifact.
    ///
    /// Identical source, template and toolchain give artifacts with identical
    /// run behavior; the bytes themselves may differ across toolchain versions.
    fn compile(&self, source: &str, template: &Path) -> Result<Artifact>;

    /// Execute `artifact`, writing the result into `output`'s buffer.
    ///
    /// `cast_type` overrides the pointer type the UDF sees for the output.
    /// Writes past `output.byte_len()` are undefined behavior on the UDF's side.
    fn run(
        &self,
        sandbox_path: &Path,
        inputs: &[Dataset],
        output: &mut Dataset,
        cast_type: Option<ElementType>,
        artifact: &Artifact,
    ) -> Result<()>;

    /// Dataset names referenced by `source`, in order, duplicates kept
    fn scan_dependencies(&self, source: &str) -> Result<Vec<String>>;

    /// Whether the external compiler this backend shells out to is installed
    fn toolchain_available(&self) -> bool;
}

/// Backend names compiled into this build
pub fn supported_backends() -> &'static [&'static str] {
    #[cfg(feature = "python")]
    {
        &["LuaJIT", "C++", "Python"]
    }
    #[cfg(not(feature = "python"))]
    {
        &["LuaJIT", "C++"]
    }
}

/// Resolve a backend by name (`lua`, `cpp`, `python`, ...) or extension (`.lua`, ...)
pub fn backend_for(name_or_extension: &str, config: &UdfConfig) -> Result<Box<dyn Backend>> {
    match name_or_extension.to_ascii_lowercase().as_str() {
        "lua" | "luajit" | ".lua" => Ok(Box::new(LuaBackend::new(config.clone()))),
        "cpp" | "c++" | "cxx" | "cc" | ".cpp" | ".cc" | ".cxx" => {
            Ok(Box::new(CppBackend::new(config.clone())))
        }
        #[cfg(feature = "python")]
        "python" | "py" | ".py" => Ok(Box::new(PythonBackend::new(config.clone()))),
        other => Err(UdfError::Config(format!(
            "unsupported UDF backend: {other} (available: {})",
            supported_backends().join(", ")
        ))),
    }
}

/// Resolve a backend from a source file's extension
pub fn backend_for_path(path: &Path, config: &UdfConfig) -> Result<Box<dyn Backend>> {
    let extension = path.extension().and_then(|e| e.to_str()).ok_or_else(|| {
        UdfError::Config(format!("{} has no file extension", path.display()))
    })?;
    backend_for(&format!(".{extension}"), config)
}

/// Wrap one `run` with start/success/failure logging and audit events.
pub(crate) fn audited_run<F>(backend: &str, output_name: &str, inputs: usize, run: F) -> Result<()>
where
    F: FnOnce() -> Result<()>,
{
    log::info!(
        "{}: running UDF for {} ({} input(s))",
        backend,
        output_name,
        inputs
    );
    events::run_start(backend, output_name, inputs);
    match run() {
        Ok(()) => {
            events::run_success(backend, output_name);
            Ok(())
        }
        Err(e) => {
            log::error!("{}: UDF for {} failed: {}", backend, output_name, e);
            events::run_failure(backend, &e.to_string());
            Err(e)
        }
    }
}

pub(crate) fn require_artifact(backend: &str, artifact: &Artifact) -> Result<()> {
    if artifact.is_empty() {
        return Err(UdfError::Load(format!("{backend}: empty artifact")));
    }
    Ok(())
}
