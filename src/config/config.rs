use crate::config::types::{Result, UdfError};
/// Configuration loading from udfbox.json
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "UDFBOX_CONFIG";

/// Config file looked up in the current directory when `UDFBOX_CONFIG` is unset
pub const DEFAULT_CONFIG_FILE: &str = "udfbox.json";

/// External program plus argument vector.
///
/// `{input}` and `{output}` in `args` are replaced with the workspace source
/// and artifact paths.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolchainConfig {
    pub program: String,
    pub args: Vec<String>,
}

impl ToolchainConfig {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolchainSet {
    pub lua: ToolchainConfig,
    pub cpp: ToolchainConfig,
    pub cpp_preprocessor: ToolchainConfig,
    pub python: ToolchainConfig,
}

const PY_COMPILE_SCRIPT: &str =
    "import py_compile, sys; py_compile.compile(sys.argv[1], cfile=sys.argv[2], doraise=True)";

impl Default for ToolchainSet {
    fn default() -> Self {
        Self {
            lua: ToolchainConfig::new("luajit", &["-O3", "-b", "{input}", "{output}"]),
            cpp: ToolchainConfig::new(
                "g++",
                &[
                    "-rdynamic", "-shared", "-fPIC", "-flto", "-Os", "-o", "{output}", "{input}",
                ],
            ),
            cpp_preprocessor: ToolchainConfig::new(
                "g++",
                &["-fpreprocessed", "-dD", "-E", "-x", "c++", "{input}"],
            ),
            python: ToolchainConfig::new("python3", &["-c", PY_COMPILE_SCRIPT, "{input}", "{output}"]),
        }
    }
}

/// Restrictions applied inside the isolated child before user code runs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Use the privilege sandbox; when false the child runs unconfined
    pub enabled: bool,
    /// Strict mode: fail the run if a restriction cannot be applied
    pub strict_mode: bool,
    pub cpu_time_limit_secs: Option<u64>,
    pub memory_limit_mb: Option<u64>,
    pub file_size_limit_mb: Option<u64>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strict_mode: false,
            cpu_time_limit_secs: Some(60),
            memory_limit_mb: None,
            file_size_limit_mb: Some(64),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NativeConfig {
    /// Run native entry points in a forked child. Turning this off restores
    /// in-process invocation: a crashing UDF then takes the host down with it.
    pub isolate: bool,
}

impl Default for NativeConfig {
    fn default() -> Self {
        Self { isolate: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScanConfig {
    pub preprocessor_timeout_ms: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            preprocessor_timeout_ms: 30_000,
        }
    }
}

impl ScanConfig {
    pub fn preprocessor_timeout(&self) -> Duration {
        Duration::from_millis(self.preprocessor_timeout_ms)
    }
}

/// Full udfbox.json structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct UdfConfig {
    /// Parent directory for run-scoped workspaces
    pub workspace_dir: PathBuf,
    pub toolchains: ToolchainSet,
    pub sandbox: SandboxConfig,
    pub native: NativeConfig,
    pub scan: ScanConfig,
}

impl Default for UdfConfig {
    fn default() -> Self {
        Self {
            workspace_dir: Self::runtime_root_dir(),
            toolchains: ToolchainSet::default(),
            sandbox: SandboxConfig::default(),
            native: NativeConfig::default(),
            scan: ScanConfig::default(),
        }
    }
}

impl UdfConfig {
    /// Workspace root scoped by effective UID so users don't collide in a shared `$TMPDIR`.
    pub fn runtime_root_dir() -> PathBuf {
        let euid = unsafe { libc::geteuid() };
        std::env::temp_dir().join(format!("udfbox-uid-{}", euid))
    }

    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            UdfError::Config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        let config: UdfConfig = serde_json::from_str(&config_content)
            .map_err(|e| UdfError::Config(format!("Failed to parse config JSON: {}", e)))?;

        Ok(config)
    }

    /// Load `$UDFBOX_CONFIG`, or ./udfbox.json when the variable is unset
    pub fn load_default() -> Result<Self> {
        let config_path = match std::env::var_os(CONFIG_ENV) {
            Some(path) => PathBuf::from(path),
            None => std::env::current_dir()
                .map_err(|e| {
                    UdfError::Config(format!("Failed to get current directory: {}", e))
                })?
                .join(DEFAULT_CONFIG_FILE),
        };

        if !config_path.exists() {
            return Err(UdfError::Config(format!(
                "{} not found",
                config_path.display()
            )));
        }

        Self::load_from_file(config_path)
    }

    /// Like `load_default`, but falls back to built-in defaults with a warning
    pub fn load_or_default() -> Self {
        match Self::load_default() {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Could not load udfbox config ({}), using defaults", e);
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_use_fixed_toolchain_vectors() {
        let config = UdfConfig::default();
        assert_eq!(config.toolchains.lua.program, "luajit");
        assert_eq!(
            config.toolchains.lua.args,
            vec!["-O3", "-b", "{input}", "{output}"]
        );
        assert_eq!(config.toolchains.cpp.program, "g++");
        assert!(config.toolchains.cpp.args.contains(&"-shared".to_string()));
        assert!(config.native.isolate);
        assert!(config.sandbox.enabled);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "native": {{ "isolate": false }}, "scan": {{ "preprocessor_timeout_ms": 500 }} }}"#
        )
        .unwrap();

        let config = UdfConfig::load_from_file(file.path()).unwrap();
        assert!(!config.native.isolate);
        assert_eq!(config.scan.preprocessor_timeout(), Duration::from_millis(500));
        assert_eq!(config.toolchains, ToolchainSet::default());
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();

        let err = UdfConfig::load_from_file(file.path()).unwrap_err();
        assert!(matches!(err, UdfError::Config(_)));
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = UdfConfig::load_from_file("/nonexistent/udfbox.json").unwrap_err();
        assert!(matches!(err, UdfError::Config(_)));
    }
}
