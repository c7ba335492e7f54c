//! End-to-end LuaJIT runs.
//!
//! Bytecode is produced with the embedded LuaJIT (`string.dump` semantics) so
//! these tests do not depend on a `luajit` binary and always match the
//! runtime's bytecode format. Tests that go through the external toolchain
//! skip when it is missing.

use std::path::{Path, PathBuf};

use udfbox::backend::lua::{LuaBackend, PLACEHOLDER};
use udfbox::compile::{assemble_source, Artifact};
use udfbox::{Backend, Dataset, ElementType, UdfConfig, UdfError};

fn template() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("templates/udf_template.lua")
}

fn bytecode(user_source: &str) -> Artifact {
    let unit = assemble_source(&template(), PLACEHOLDER, user_source).unwrap();
    let lua = mlua::Lua::new();
    let function = lua.load(unit.as_str()).set_name("udf").into_function().unwrap();
    Artifact::new(function.dump(false))
}

fn inputs() -> Vec<Dataset> {
    vec![
        Dataset::from_values("A", vec![2, 2], &[1i32, 2, 3, 4]).unwrap(),
        Dataset::from_values("B", vec![2, 2], &[10i32, 20, 30, 40]).unwrap(),
    ]
}

fn backend() -> LuaBackend {
    LuaBackend::new(UdfConfig::default())
}

const ADD: &str = r#"
function dynamic_dataset()
    local a = lib.getData("A")
    local b = lib.getData("B")
    local c = lib.getData("C")
    for i = 0, lib.getGridSize("C") - 1 do
        c[i] = a[i] + b[i]
    end
end
"#;

#[test]
fn sums_two_inputs_into_the_output() {
    let mut output = Dataset::new("C", ElementType::Int32, vec![2, 2]).unwrap();
    backend()
        .run(Path::new("/tmp"), &inputs(), &mut output, None, &bytecode(ADD))
        .unwrap();
    assert_eq!(output.values::<i32>().unwrap(), &[11, 22, 33, 44]);
}

#[test]
fn each_output_gets_its_own_run() {
    let a = vec![Dataset::from_values("A", vec![2, 2], &[1i32, 2, 3, 4]).unwrap()];
    let scale = |output: &str, factor: i32| {
        format!(
            r#"
            function dynamic_dataset()
                local a = lib.getData("A")
                local out = lib.getData("{output}")
                for i = 0, lib.getGridSize("{output}") - 1 do
                    out[i] = a[i] * {factor}
                end
            end
            "#
        )
    };

    let mut b = Dataset::new("B", ElementType::Int32, vec![2, 2]).unwrap();
    backend()
        .run(Path::new(""), &a, &mut b, None, &bytecode(&scale("B", 2)))
        .unwrap();
    let mut c = Dataset::new("C", ElementType::Int32, vec![2, 2]).unwrap();
    backend()
        .run(Path::new(""), &a, &mut c, None, &bytecode(&scale("C", 3)))
        .unwrap();

    assert_eq!(b.values::<i32>().unwrap(), &[2, 4, 6, 8]);
    assert_eq!(c.values::<i32>().unwrap(), &[3, 6, 9, 12]);
}

#[test]
fn udf_sees_types_dims_and_the_sandbox_path() {
    let source = r#"
    function dynamic_dataset()
        local c = lib.getData("C")
        local dims = lib.getDims("A")
        c[0] = dims[1]
        c[1] = dims[2]
        c[2] = (lib.getType("A") == "int32") and 1 or 0
        c[3] = (lib.sandbox_path == "/srv/udf") and 1 or 0
        c[4] = (lib.getData("missing") == nil) and 1 or 0
        c[5] = lib.getGridSize("missing")
    end
    "#;
    let mut output = Dataset::new("C", ElementType::Int64, vec![6]).unwrap();
    backend()
        .run(Path::new("/srv/udf"), &inputs(), &mut output, None, &bytecode(source))
        .unwrap();
    assert_eq!(output.values::<i64>().unwrap(), &[2, 2, 1, 1, 1, 0]);
}

#[test]
fn cast_type_changes_the_output_pointer() {
    let source = r#"
    function dynamic_dataset()
        local c = lib.getData("C")
        c[0] = 1
    end
    "#;
    let mut output = Dataset::new("C", ElementType::Int32, vec![2]).unwrap();
    backend()
        .run(
            Path::new(""),
            &[],
            &mut output,
            Some(ElementType::Uint8),
            &bytecode(source),
        )
        .unwrap();
    assert_eq!(&output.as_bytes()[..4], &[1, 0, 0, 0]);
}

#[test]
fn runtime_errors_fail_the_run() {
    let source = r#"function dynamic_dataset() error("boom") end"#;
    let mut output = Dataset::new("C", ElementType::Int32, vec![4]).unwrap();
    let err = backend()
        .run(Path::new(""), &inputs(), &mut output, None, &bytecode(source))
        .unwrap_err();
    assert!(matches!(err, UdfError::ChildFailed { .. }), "{err}");
}

#[test]
fn crashing_udfs_do_not_take_down_the_host() {
    let segfault = r#"
    function dynamic_dataset()
        local c = lib.getData("C")
        c[0] = 7
        local ffi = require("ffi")
        ffi.cast("int*", 0)[0] = 1
    end
    "#;
    let abort = r#"
    local ffi = require("ffi")
    ffi.cdef("void abort(void);")
    function dynamic_dataset() ffi.C.abort() end
    "#;

    let mut output = Dataset::new("C", ElementType::Int32, vec![4]).unwrap();
    let err = backend()
        .run(Path::new(""), &inputs(), &mut output, None, &bytecode(segfault))
        .unwrap_err();
    assert!(err.is_child_fault(), "{err}");
    // Writes made before the crash are still copied back.
    assert_eq!(output.values::<i32>().unwrap()[0], 7);

    let err = backend()
        .run(Path::new(""), &inputs(), &mut output, None, &bytecode(abort))
        .unwrap_err();
    assert!(matches!(err, UdfError::ChildSignaled { .. }), "{err}");

    let mut output = Dataset::new("C", ElementType::Int32, vec![2, 2]).unwrap();
    backend()
        .run(Path::new(""), &inputs(), &mut output, None, &bytecode(ADD))
        .unwrap();
    assert_eq!(output.values::<i32>().unwrap(), &[11, 22, 33, 44]);
}

#[test]
fn missing_entry_point_fails_the_run() {
    let mut output = Dataset::new("C", ElementType::Int32, vec![1]).unwrap();
    let err = backend()
        .run(Path::new(""), &[], &mut output, None, &bytecode("local x = 1"))
        .unwrap_err();
    assert!(matches!(err, UdfError::ChildFailed { .. }), "{err}");
}

#[test]
fn external_compile_is_repeatable() {
    let backend = backend();
    if !backend.toolchain_available() {
        eprintln!("luajit not installed; skipping");
        return;
    }
    let first = backend.compile(ADD, &template()).unwrap();
    let second = backend.compile(ADD, &template()).unwrap();
    assert!(!first.is_empty());

    for artifact in [first, second] {
        let mut output = Dataset::new("C", ElementType::Int32, vec![2, 2]).unwrap();
        match backend.run(Path::new(""), &inputs(), &mut output, None, &artifact) {
            Ok(()) => assert_eq!(output.values::<i32>().unwrap(), &[11, 22, 33, 44]),
            // The system luajit may emit a different bytecode flavor.
            Err(UdfError::Load(e)) => eprintln!("bytecode format mismatch: {e}"),
            Err(e) => panic!("{e}"),
        }
    }
}

#[test]
fn compile_without_a_placeholder_is_a_template_error() {
    let dir = tempfile::tempdir().unwrap();
    let template = dir.path().join("plain.lua");
    std::fs::write(&template, "lib = {}\n").unwrap();
    let err = backend().compile(ADD, &template).unwrap_err();
    assert!(matches!(err, UdfError::Template(_)));
}
