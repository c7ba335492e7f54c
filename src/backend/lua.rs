//! LuaJIT backend
//!
//! Source is compiled to LuaJIT bytecode by the external `luajit -b`. At run
//! time the bytecode is loaded into a fresh embedded LuaJIT state, the dataset
//! table is attached to that state as app data, and the UDF runs in a forked
//! child that writes the output grid into shared memory.
//!
//! The template reaches the table through a global `udf_host` table:
//!
//! | function | returns |
//! |----------|---------|
//! | `get_data(name)` | light userdata pointing at the grid, or `nil` |
//! | `get_type(name)` | element type name (`int32`, `float`, ...) |
//! | `get_cast(name)` | FFI cast declaration (`int32_t*`, ...) |
//! | `get_dims(name)` | dimensions as text (`2x2`) |
//!
//! Bytecode must come from a LuaJIT whose bytecode format matches the embedded
//! one (same 2.1 branch and GC64 mode).

use super::{audited_run, require_artifact, Backend};
use crate::compile::{program_available, Artifact, CompileJob};
use crate::config::types::{Result, UdfError};
use crate::config::UdfConfig;
use crate::dataset::{Dataset, DatasetTable, ElementType, TableEntry};
use crate::exec::{sandbox_for, spawn_isolated, SharedMemoryChannel};
use crate::scan::{scan_source, CommentSyntax};
use mlua::{ChunkMode, Function, LightUserData, Lua, LuaOptions, StdLib, Table, Value};
use std::path::Path;

pub const PLACEHOLDER: &str = "-- user_callback_placeholder";
const CHUNK_NAME: &str = "udf_bytecode";

pub struct LuaBackend {
    config: UdfConfig,
}

impl LuaBackend {
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

        let lua = new_state()?;
        let channel = SharedMemoryChannel::with_contents(output.as_bytes())?;
        let table =
            DatasetTable::build(output, channel.as_mut_ptr(), inputs, cast_type)?.with_sentinel();
        lua.set_app_data(table);
        register_host(&lua)?;

        lua.load(artifact.as_bytes())
            .set_name(CHUNK_NAME)
            .set_mode(ChunkMode::Binary)
            .exec()
            .map_err(|e| UdfError::Load(format!("Failed to load the bytecode: {e}")))?;

        let sandbox = sandbox_for(&self.config.sandbox);
        let path_arg = sandbox_path.to_string_lossy().into_owned();
        spawn_isolated(
            sandbox.as_ref(),
            sandbox_path,
            &channel,
            output.as_bytes_mut(),
            || invoke_entry_points(&lua, &path_arg),
        )
    }
}

impl Backend for LuaBackend {
    fn name(&self) -> &'static str {
        "LuaJIT"
    }

    fn extension(&self) -> &'static str {
        ".lua"
    }

    fn compile(&self, source: &str, template: &Path) -> Result<Artifact> {
        CompileJob {
            backend: self.name(),
            placeholder: PLACEHOLDER,
            source_file: "udf.lua",
            artifact_file: "udf.bytecode",
            toolchain: &self.config.toolchains.lua,
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
        Ok(scan_source(source, &CommentSyntax::LUA))
    }

    fn toolchain_available(&self) -> bool {
        program_available(&self.config.toolchains.lua.program)
    }
}

/// Fresh state with base, math, string, table, bit, jit, ffi and a package
/// library that cannot search the filesystem.
pub(crate) fn new_state() -> Result<Lua> {
    let libs = StdLib::MATH
        | StdLib::STRING
        | StdLib::TABLE
        | StdLib::PACKAGE
        | StdLib::BIT
        | StdLib::JIT
        | StdLib::FFI;
    // SAFETY: the FFI library is unsafe by nature; UDF code only ever runs in a
    // sandboxed child process.
    let lua = unsafe { Lua::unsafe_new_with(libs, LuaOptions::new()) };

    restrict_loading(&lua).map_err(interpreter_error)?;
    Ok(lua)
}

fn restrict_loading(lua: &Lua) -> mlua::Result<()> {
    let globals = lua.globals();
    let package: Table = globals.get("package")?;
    package.set("path", "")?;
    package.set("cpath", "")?;
    package.set("loadlib", Value::Nil)?;
    for name in ["dofile", "loadfile"] {
        globals.set(name, Value::Nil)?;
    }
    Ok(())
}

/// Install the `udf_host` accessor table over the attached [`DatasetTable`].
fn register_host(lua: &Lua) -> Result<()> {
    fn with_entry<R>(
        lua: &Lua,
        name: &str,
        f: impl FnOnce(&TableEntry) -> R,
    ) -> mlua::Result<Option<R>> {
        let table = lua
            .app_data_ref::<DatasetTable>()
            .ok_or_else(|| mlua::Error::RuntimeError("dataset table is not attached".into()))?;
        Ok(table.lookup(name).map(f))
    }

    let install = || -> mlua::Result<()> {
        let host = lua.create_table()?;
        host.set(
            "get_data",
            lua.create_function(|lua, name: String| {
                with_entry(lua, &name, |e| LightUserData(e.data.cast()))
            })?,
        )?;
        host.set(
            "get_type",
            lua.create_function(|lua, name: String| {
                with_entry(lua, &name, |e| e.type_name().to_string())
            })?,
        )?;
        host.set(
            "get_cast",
            lua.create_function(|lua, name: String| with_entry(lua, &name, |e| e.cast.clone()))?,
        )?;
        host.set(
            "get_dims",
            lua.create_function(|lua, name: String| {
                with_entry(lua, &name, |e| e.dims_text.clone())
            })?,
        )?;
        lua.globals().set("udf_host", host)
    };
    install().map_err(interpreter_error)
}

/// `init(sandbox_path)` then `dynamic_dataset()`; runs in the child.
fn invoke_entry_points(lua: &Lua, sandbox_path: &str) -> Result<()> {
    let globals = lua.globals();

    let init: Function = globals
        .get("init")
        .map_err(|e| UdfError::Interpreter(format!("init callback missing: {e}")))?;
    init.call::<_, ()>(sandbox_path)
        .map_err(|e| UdfError::Interpreter(format!("Failed to invoke the init callback: {e}")))?;

    let entry: Function = globals
        .get("dynamic_dataset")
        .map_err(|e| UdfError::Interpreter(format!("dynamic_dataset missing: {e}")))?;
    entry.call::<_, ()>(()).map_err(|e| {
        UdfError::Interpreter(format!("Failed to invoke the dynamic_dataset callback: {e}"))
    })
}

fn interpreter_error(e: mlua::Error) -> UdfError {
    UdfError::Interpreter(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restricted_state_has_ffi_but_no_module_search() {
        let lua = new_state().unwrap();
        let ok: bool = lua
            .load(
                r#"
                local ffi = require("ffi")
                return type(ffi.cast) == "function"
                    and package.path == ""
                    and package.loadlib == nil
                    and dofile == nil
                    and io == nil
                    and os == nil
                "#,
            )
            .eval()
            .unwrap();
        assert!(ok);
    }

    #[test]
    fn host_functions_read_the_attached_table() {
        let lua = new_state().unwrap();
        let mut output = Dataset::new("C", ElementType::Int32, vec![2, 2]).unwrap();
        let inputs = vec![Dataset::from_values("A", vec![2, 2], &[1i32, 2, 3, 4]).unwrap()];
        let ptr = output.as_mut_ptr();
        lua.set_app_data(
            DatasetTable::build(&output, ptr, &inputs, None)
                .unwrap()
                .with_sentinel(),
        );
        register_host(&lua).unwrap();

        let (ty, cast, dims, missing): (String, String, String, bool) = lua
            .load(
                r#"
                return udf_host.get_type("A"), udf_host.get_cast("C"),
                       udf_host.get_dims("A"), udf_host.get_data("nope") == nil
                "#,
            )
            .eval()
            .unwrap();
        assert_eq!(ty, "int32");
        assert_eq!(cast, "int32_t*");
        assert_eq!(dims, "2x2");
        assert!(missing);
    }

    #[test]
    fn text_chunks_are_rejected_as_bytecode() {
        let backend = LuaBackend::new(UdfConfig::default());
        let mut output = Dataset::new("C", ElementType::Int32, vec![1]).unwrap();
        let err = backend
            .run(
                Path::new(""),
                &[],
                &mut output,
                None,
                &Artifact::new(b"function dynamic_dataset() end".to_vec()),
            )
            .unwrap_err();
        assert!(matches!(err, UdfError::Load(_)));
    }

    #[test]
    fn scanner_uses_lua_comments() {
        let backend = LuaBackend::new(UdfConfig::default());
        let names = backend
            .scan_dependencies("--[[ lib.getData(\"X\") ]]\nlocal a = lib.getData(\"A\") -- lib.getData(\"Y\")")
            .unwrap();
        assert_eq!(names, vec!["A"]);
    }
}
