//! Dependency scanning through the backend facade.

use udfbox::{backend_for, UdfConfig};

#[test]
fn lua_scan_skips_comments() {
    let backend = backend_for("lua", &UdfConfig::default()).unwrap();
    let source = r#"
--[[
    local old = lib.getData("Old")
]]
function dynamic_dataset()
    local a = lib.getData("A") -- lib.getData("Trailing")
    local b = lib.getData("B")
    local again = lib.getData("A")
end
"#;
    assert_eq!(
        backend.scan_dependencies(source).unwrap(),
        vec!["A", "B", "A"]
    );
}

#[test]
fn source_without_references_scans_empty() {
    let backend = backend_for(".lua", &UdfConfig::default()).unwrap();
    assert!(backend
        .scan_dependencies("function dynamic_dataset() end")
        .unwrap()
        .is_empty());
}

#[test]
fn cpp_scan_uses_the_configured_preprocessor() {
    let mut config = UdfConfig::default();
    config.toolchains.cpp_preprocessor.program = "cat".to_string();
    config.toolchains.cpp_preprocessor.args = vec!["{input}".to_string()];
    let backend = backend_for("cpp", &config).unwrap();
    let names = backend
        .scan_dependencies("auto x = lib.getData<int>(\"X\");\nauto y = lib.getData<double>(\"Y\");")
        .unwrap();
    assert_eq!(names, vec!["X", "Y"]);
}

#[test]
fn cpp_scan_fails_when_the_preprocessor_fails() {
    let mut config = UdfConfig::default();
    config.toolchains.cpp_preprocessor.program = "false".to_string();
    config.toolchains.cpp_preprocessor.args.clear();
    let backend = backend_for("cpp", &config).unwrap();
    assert!(backend.scan_dependencies("auto x = 1;").is_err());
}
