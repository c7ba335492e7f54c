/// Run-scoped scratch directories for toolchain and loader files
///
/// Each workspace is a uuid-named directory under the configured root, so
/// concurrent compiles and runs never share a path. Everything in it is
/// removed on drop. The root must be a real directory owned by the effective
/// user and closed to group and other writes; otherwise another user could
/// swap artifacts between compile and load.
use crate::config::types::{Result, UdfError};
use std::fs;
use std::os::unix::fs::{DirBuilderExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub struct Workspace {
    run_id: String,
    run_dir: PathBuf,
    files: Vec<PathBuf>,
}

impl Workspace {
    /// Create a private (0700) run directory under `base_dir`.
    pub fn new(base_dir: &Path) -> Result<Self> {
        fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(base_dir)
            .map_err(|e| {
                UdfError::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to create workspace root {}: {}", base_dir.display(), e),
                ))
            })?;
        check_private_root(base_dir)?;

        let run_id = Uuid::new_v4().to_string();
        let run_dir = base_dir.join(&run_id);

        fs::DirBuilder::new()
            .mode(0o700)
            .create(&run_dir)
            .map_err(|e| {
                UdfError::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to create workspace directory {}: {}", run_dir.display(), e),
                ))
            })?;

        Ok(Self {
            run_id,
            run_dir,
            files: Vec::new(),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Write `content` to `name` inside the workspace
    pub fn write_file(&mut self, name: &str, content: &[u8]) -> Result<PathBuf> {
        let path = self.path_for(name);
        fs::write(&path, content).map_err(|e| {
            UdfError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to write {}: {}", path.display(), e),
            ))
        })?;
        Ok(path)
    }

    /// Reserve `name` for a file some other process will create
    pub fn path_for(&mut self, name: &str) -> PathBuf {
        let path = self.run_dir.join(name);
        if !self.files.contains(&path) {
            self.files.push(path.clone());
        }
        path
    }

    pub fn set_mode(&self, path: &Path, mode: u32) -> Result<()> {
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
        Ok(())
    }

    /// Remove registered files and the run directory (idempotent)
    pub fn cleanup(&self) -> Result<()> {
        for file in &self.files {
            if file.exists() {
                if let Err(e) = fs::remove_file(file) {
                    log::warn!("Failed to remove {}: {}", file.display(), e);
                }
            }
        }

        if self.run_dir.exists() {
            if let Err(e) = fs::remove_dir_all(&self.run_dir) {
                log::warn!(
                    "Failed to remove workspace {}: {}",
                    self.run_dir.display(),
                    e
                );
            }
        }

        Ok(())
    }
}

/// Reject a workspace root that someone other than us could tamper with.
fn check_private_root(root: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(root)?;
    let unsafe_root = |reason: &str| {
        Err(UdfError::Config(format!(
            "workspace root {} {}",
            root.display(),
            reason
        )))
    };

    if meta.file_type().is_symlink() {
        return unsafe_root("is a symlink");
    }
    if !meta.is_dir() {
        return unsafe_root("is not a directory");
    }
    // SAFETY: geteuid has no preconditions and cannot fail.
    let euid = unsafe { libc::geteuid() };
    if meta.uid() != euid {
        return unsafe_root(&format!("is owned by uid {}, not {}", meta.uid(), euid));
    }
    if meta.mode() & 0o022 != 0 {
        return unsafe_root(&format!("has mode {:o}; group/other may write", meta.mode() & 0o777));
    }
    Ok(())
}

impl Drop for Workspace {
    fn drop(&mut self) {
        let _ = self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspaces_are_unique_and_removed_on_drop() {
        let base = tempfile::tempdir().unwrap();
        let mut first = Workspace::new(base.path()).unwrap();
        let second = Workspace::new(base.path()).unwrap();
        assert_ne!(first.run_dir(), second.run_dir());

        let path = first.write_file("udf.lua", b"return 1").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"return 1");
        let mode = fs::metadata(first.run_dir()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);

        let dir = first.run_dir().to_path_buf();
        drop(first);
        assert!(!dir.exists());
        assert!(second.run_dir().exists());
    }

    #[test]
    fn cleanup_is_idempotent() {
        let base = tempfile::tempdir().unwrap();
        let mut ws = Workspace::new(base.path()).unwrap();
        let out = ws.path_for("udf.so");
        fs::write(&out, b"\x7fELF").unwrap();
        ws.cleanup().unwrap();
        ws.cleanup().unwrap();
        assert!(!out.exists());
    }

    #[test]
    fn shared_writable_root_is_rejected() {
        let base = tempfile::tempdir().unwrap();
        let root = base.path().join("root");
        fs::create_dir(&root).unwrap();
        fs::set_permissions(&root, fs::Permissions::from_mode(0o777)).unwrap();

        let err = Workspace::new(&root).err().unwrap();
        assert!(matches!(err, UdfError::Config(_)), "{err}");
        assert_eq!(fs::read_dir(&root).unwrap().count(), 0);
    }

    #[test]
    fn symlinked_root_is_rejected() {
        let base = tempfile::tempdir().unwrap();
        let target = base.path().join("target");
        fs::create_dir(&target).unwrap();
        let link = base.path().join("link");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        assert!(matches!(Workspace::new(&link), Err(UdfError::Config(_))));
    }

    #[test]
    fn missing_root_is_created_private() {
        let base = tempfile::tempdir().unwrap();
        let root = base.path().join("a").join("b");
        let ws = Workspace::new(&root).unwrap();
        assert!(ws.run_dir().starts_with(&root));
        let mode = fs::metadata(&root).unwrap().permissions().mode();
        assert_eq!(mode & 0o022, 0);
    }
}
