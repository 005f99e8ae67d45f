//! Copy-on-write file cloning for VM overlays.

use std::path::{Path, PathBuf};

use crate::error::{Result, VzError};

/// Clones files into the temp directory with a deterministic name scheme.
///
/// Overlay clones are named `<temp>/<prefix><basename>.<pattern>`, where
/// `pattern` is the pod UID, so a crashed node leaves identifiable litter.
pub struct FileCloner {
    /// Directory receiving the clones.
    pub temp_dir: PathBuf,
    /// Prefix of every clone file name.
    pub filename_prefix: String,
}

impl Default for FileCloner {
    fn default() -> Self {
        Self {
            temp_dir: std::env::temp_dir(),
            filename_prefix: "vzpod_file_".to_string(),
        }
    }
}

impl FileCloner {
    /// Creates a cloner with default temp dir and prefix.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clones `path` and returns the clone's path.
    ///
    /// Any stale file at the target path is removed first. On APFS the
    /// clone shares blocks with the source until written.
    ///
    /// # Errors
    ///
    /// Returns an error when the source has no file name or the clone
    /// syscall fails.
    pub fn clonefile(&self, path: &Path, pattern: &str) -> Result<PathBuf> {
        let base = path
            .file_name()
            .ok_or_else(|| VzError::Configuration(format!("no file name in {}", path.display())))?
            .to_string_lossy();
        let cloned = self
            .temp_dir
            .join(format!("{}{}.{}", self.filename_prefix, base, pattern));

        let _ = std::fs::remove_file(&cloned);
        clone_file(path, &cloned)?;

        Ok(cloned)
    }
}

#[cfg(target_os = "macos")]
fn clone_file(src: &Path, dst: &Path) -> Result<()> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_src = CString::new(src.as_os_str().as_bytes())
        .map_err(|_| VzError::Configuration(format!("path contains NUL: {}", src.display())))?;
    let c_dst = CString::new(dst.as_os_str().as_bytes())
        .map_err(|_| VzError::Configuration(format!("path contains NUL: {}", dst.display())))?;

    // Safety: both paths are valid NUL-terminated C strings.
    let rc = unsafe { libc::clonefile(c_src.as_ptr(), c_dst.as_ptr(), 0) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

/// Plain copy stands in for `clonefile` on hosts without APFS clones.
#[cfg(not(target_os = "macos"))]
fn clone_file(src: &Path, dst: &Path) -> Result<()> {
    std::fs::copy(src, dst)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clonefile_names_clone_after_source_and_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("disk.img");
        std::fs::write(&src, b"image").unwrap();

        let cloner = FileCloner {
            temp_dir: dir.path().to_path_buf(),
            filename_prefix: "vzpod_file_".to_string(),
        };
        let cloned = cloner.clonefile(&src, "U1").unwrap();

        assert_eq!(
            cloned.file_name().unwrap().to_str().unwrap(),
            "vzpod_file_disk.img.U1"
        );
        assert_eq!(std::fs::read(&cloned).unwrap(), b"image");
    }

    #[test]
    fn test_clonefile_replaces_stale_clone() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("disk.img");
        std::fs::write(&src, b"fresh").unwrap();

        let cloner = FileCloner {
            temp_dir: dir.path().to_path_buf(),
            filename_prefix: "vzpod_file_".to_string(),
        };
        std::fs::write(dir.path().join("vzpod_file_disk.img.U1"), b"stale").unwrap();

        let cloned = cloner.clonefile(&src, "U1").unwrap();
        assert_eq!(std::fs::read(&cloned).unwrap(), b"fresh");
    }

    #[test]
    fn test_clonefile_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let cloner = FileCloner {
            temp_dir: dir.path().to_path_buf(),
            filename_prefix: "vzpod_file_".to_string(),
        };
        assert!(cloner.clonefile(&dir.path().join("absent.img"), "U1").is_err());
    }
}
