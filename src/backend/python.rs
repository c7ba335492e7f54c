//! CPython backend (feature `python`)
//!
//! Source is byte-compiled by the external `python3` into a `.pyc` file. At run
//! time the embedded interpreter checks the bytecode magic against its own,
//! unmarshals the code object and executes it in a fresh module namespace. The
//! UDF then runs in a forked child that writes the output grid into shared
//! memory.
//!
//! The template reaches the dataset table through a `udf_host` object with the
//! same four accessors as the LuaJIT backend; `get_data` returns the grid
//! address as an integer for `ctypes.cast`.

use super::{audited_run, require_artifact, Backend};
use crate::compile::{program_available, Artifact, CompileJob};
use crate::config::types::{Result, UdfError};
use crate::config::UdfConfig;
use crate::dataset::{Dataset, DatasetTable, ElementType};
use crate::exec::{sandbox_for, spawn_isolated, SharedMemoryChannel};
use crate::scan::{scan_source, CommentSyntax};
use pyo3::prelude::*;
use pyo3::types::{PyBytes, PyDict};
use std::path::Path;

pub const PLACEHOLDER: &str = "# user_callback_placeholder";

/// Magic, flags, mtime/hash and source size
const PYC_HEADER_LEN: usize = 16;

/// Accessors over the dataset table, exposed to UDF code as `udf_host`.
#[pyclass(unsendable)]
struct UdfHost {
    table: DatasetTable,
}

#[pymethods]
impl UdfHost {
    fn get_data(&self, name: &str) -> Option<usize> {
        self.table.lookup(name).map(|e| e.data as usize)
    }

    fn get_type(&self, name: &str) -> Option<String> {
        self.table.lookup(name).map(|e| e.type_name().to_string())
    }

    fn get_cast(&self, name: &str) -> Option<String> {
        self.table.lookup(name).map(|e| e.cast.clone())
    }

    fn get_dims(&self, name: &str) -> Option<String> {
        self.table.lookup(name).map(|e| e.dims_text.clone())
    }
}

pub struct PythonBackend {
    config: UdfConfig,
}

impl PythonBackend {
    pub fn new(config: UdfConfig) -> Self {
        Self { config }
    }

    fn execute(
        &self,
        sandbox_path: &Path,
        inputs: &[Dataset],
        output: &mut Dataset,
        cast_type: Option<ElementType>,
        artifact: &Artifact,
    ) -> Result<()> {
        require_artifact(self.name(), artifact)?;

        let channel = SharedMemoryChannel::with_contents(output.as_bytes())?;
        let table = DatasetTable::build(output, channel.as_mut_ptr(), inputs, cast_type)?;
        let sandbox = sandbox_for(&self.config.sandbox);
        let path_arg = sandbox_path.to_string_lossy().into_owned();

        Python::attach(|py| {
            let globals = load_module(py, artifact.as_bytes(), table)?;

            // SAFETY: paired with the AfterFork calls below; the GIL is held
            // across the fork.
            unsafe { pyo3::ffi::PyOS_BeforeFork() };
            let result = spawn_isolated(
                sandbox.as_ref(),
                sandbox_path,
                &channel,
                output.as_bytes_mut(),
                || {
                    // SAFETY: first thing the child does with the interpreter.
                    unsafe { pyo3::ffi::PyOS_AfterFork_Child() };
                    invoke_entry_points(&globals, &path_arg)
                },
            );
            // SAFETY: parent side of PyOS_BeforeFork.
            unsafe { pyo3::ffi::PyOS_AfterFork_Parent() };
            result
        })
    }
}

impl Backend for PythonBackend {
    fn name(&self) -> &'static str {
        "Python"
    }

    fn extension(&self) -> &'static str {
        ".py"
    }

    fn compile(&self, source: &str, template: &Path) -> Result<Artifact> {
        CompileJob {
            backend: self.name(),
            placeholder: PLACEHOLDER,
            source_file: "udf.py",
            artifact_file: "udf.pyc",
            toolchain: &self.config.toolchains.python,
            workspace_root: &self.config.workspace_dir,
        }
        .compile(source, template)
    }

    fn run(
        &self,
        sandbox_path: &Path,
        inputs: &[Dataset],
        output: &mut Dataset,
        cast_type: Option<ElementType>,
        artifact: &Artifact,
    ) -> Result<()> {
        let output_name = output.name().to_string();
        audited_run(self.name(), &output_name, inputs.len(), || {
            self.execute(sandbox_path, inputs, output, cast_type, artifact)
        })
    }

    fn scan_dependencies(&self, source: &str) -> Result<Vec<String>> {
        Ok(scan_source(source, &CommentSyntax::PYTHON))
    }

    fn toolchain_available(&self) -> bool {
        program_available(&self.config.toolchains.python.program)
    }
}

/// Check the magic, unmarshal the code object and execute it in a fresh
/// namespace holding `udf_host`.
fn load_module<'py>(py: Python<'py>, pyc: &[u8], table: DatasetTable) -> Result<Bound<'py, PyDict>> {
    let magic = py
        .import("importlib.util")
        .and_then(|m| m.getattr("MAGIC_NUMBER"))
        .and_then(|m| m.extract::<Vec<u8>>())
        .map_err(|e| py_err(e, "Failed to read the interpreter bytecode magic"))?;
    if pyc.len() <= PYC_HEADER_LEN || !pyc.starts_with(&magic) {
        return Err(UdfError::Load(
            "bytecode was produced by a different Python version".to_string(),
        ));
    }

    let code = py
        .import("marshal")
        .and_then(|m| m.getattr("loads"))
        .and_then(|loads| loads.call1((PyBytes::new(py, &pyc[PYC_HEADER_LEN..]),)))
        .map_err(|e| UdfError::Load(format!("Failed to unmarshal the bytecode: {e}")))?;

    let globals = PyDict::new(py);
    let install = || -> PyResult<()> {
        globals.set_item("__name__", "udf")?;
        globals.set_item("udf_host", Bound::new(py, UdfHost { table })?)?;
        py.import("builtins")?
            .getattr("exec")?
            .call1((code, &globals))?;
        Ok(())
    };
    install().map_err(|e| UdfError::Load(format!("Failed to load the bytecode: {e}")))?;
    Ok(globals)
}

/// `init(sandbox_path)` then `dynamic_dataset()`; runs in the child.
fn invoke_entry_points(globals: &Bound<'_, PyDict>, sandbox_path: &str) -> Result<()> {
    fn callback<'py>(globals: &Bound<'py, PyDict>, name: &str) -> Result<Bound<'py, PyAny>> {
        globals
            .get_item(name)
            .map_err(|e| py_err(e, name))?
            .ok_or_else(|| UdfError::Interpreter(format!("{name} callback missing")))
    }

    callback(globals, "init")?
        .call1((sandbox_path,))
        .map_err(|e| py_err(e, "Failed to invoke the init callback"))?;
    callback(globals, "dynamic_dataset")?
        .call0()
        .map_err(|e| py_err(e, "Failed to invoke the dynamic_dataset callback"))?;
    Ok(())
}

fn py_err(e: PyErr, context: &str) -> UdfError {
    UdfError::Interpreter(format!("{context}: {e}"))
}
