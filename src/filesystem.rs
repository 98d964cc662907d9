//! Filesystem port used by the mirror synchronizer.

use std::io;
use std::path::Path;

/// Filesystem queries and mutations needed for a backup run
pub trait FileSystem: Send + Sync {
    /// Whether `path` exists. A missing path is `Ok(false)`; any other
    /// failure to stat it is returned as an error.
    fn exists(&self, path: &Path) -> io::Result<bool>;

    /// Create `path` and all missing parents
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;
}

/// [`FileSystem`] backed by `std::fs`
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

impl FileSystem for LocalFileSystem {
    fn exists(&self, path: &Path) -> io::Result<bool> {
        match std::fs::metadata(path) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        std::fs::create_dir_all(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;
    use predicates::prelude::*;

    #[test]
    fn missing_path_is_not_an_error() {
        let temp = assert_fs::TempDir::new().unwrap();
        let fs = LocalFileSystem;

        assert!(!fs.exists(&temp.path().join("owner/repo.git")).unwrap());
        assert!(fs.exists(temp.path()).unwrap());
    }

    #[test]
    fn creates_nested_directories() {
        let temp = assert_fs::TempDir::new().unwrap();
        let fs = LocalFileSystem;

        fs.create_dir_all(&temp.path().join("a/b/c")).unwrap();

        temp.child("a/b/c").assert(predicate::path::is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn path_below_a_file_reports_an_error() {
        let temp = assert_fs::TempDir::new().unwrap();
        let file = temp.child("plain-file");
        file.write_str("not a directory").unwrap();
        let fs = LocalFileSystem;

        // ENOTDIR rather than ENOENT
        assert!(fs.exists(&file.path().join("inside")).is_err());
    }
}
