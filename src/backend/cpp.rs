//! C++ backend
//!
//! Source is compiled into a shared object with `g++`, then loaded through the
//! versioned native ABI in [`super::native_abi`]. By default the entry point
//! runs in a forked, sandboxed child that writes the output grid into shared
//! memory, so a crashing UDF fails the run instead of the host. Setting
//! `native.isolate = false` calls it in-process; any fault then takes down the
//! caller.

use super::native_abi::NativeModule;
use super::{audited_run, require_artifact, Backend};
use crate::compile::{program_available, Artifact, CompileJob, Workspace};
use crate::config::types::Result;
use crate::config::UdfConfig;
use crate::dataset::{Dataset, DatasetTable, ElementType};
use crate::exec::{sandbox_for, spawn_isolated, SharedMemoryChannel};
use crate::scan::scan_preprocessed;
use std::path::Path;

pub const PLACEHOLDER: &str = "// user_callback_placeholder";

pub struct CppBackend {
    config: UdfConfig,
}

impl CppBackend {
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

        let mut workspace = Workspace::new(&self.config.workspace_dir)?;
        let module = NativeModule::write(&mut workspace, artifact)?
            .load()?
            .resolve()?;

        if !self.config.native.isolate {
            log::warn!("{}: invoking UDF in-process without isolation", self.name());
            let output_ptr = output.as_mut_ptr();
            let table = DatasetTable::build(output, output_ptr, inputs, cast_type)?;
            let module = module.populate(&table)?;
            // SAFETY: the caller opted out of isolation; see the module docs.
            unsafe { module.invoke() };
            return Ok(());
        }

        let channel = SharedMemoryChannel::with_contents(output.as_bytes())?;
        let table = DatasetTable::build(output, channel.as_mut_ptr(), inputs, cast_type)?;
        let module = module.populate(&table)?;
        let sandbox = sandbox_for(&self.config.sandbox);
        spawn_isolated(
            sandbox.as_ref(),
            sandbox_path,
            &channel,
            output.as_bytes_mut(),
            move || {
                // SAFETY: runs only in the forked child.
                unsafe { module.invoke() };
                Ok(())
            },
        )
    }
}

impl Backend for CppBackend {
    fn name(&self) -> &'static str {
        "C++"
    }

    fn extension(&self) -> &'static str {
        ".cpp"
    }

    fn compile(&self, source: &str, template: &Path) -> Result<Artifact> {
        CompileJob {
            backend: self.name(),
            placeholder: PLACEHOLDER,
            source_file: "udf.cpp",
            artifact_file: "udf.so",
            toolchain: &self.config.toolchains.cpp,
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
        scan_preprocessed(
            source,
            &self.config.toolchains.cpp_preprocessor,
            self.config.scan.preprocessor_timeout(),
            &self.config.workspace_dir,
        )
    }

    fn toolchain_available(&self) -> bool {
        program_available(&self.config.toolchains.cpp.program)
    }
}
