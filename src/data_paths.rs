use std::path::{Path, PathBuf};

/// Default data directory (relative to current working directory)
pub const DEFAULT_DATA_DIR: &str = "./data";

/// Subdirectory paths relative to the data directory
pub const AUTH_DIR: &str = "auth";
pub const LOGS_DIR: &str = "logs";
pub const DB_DIR: &str = "db";

/// Helper struct to manage data paths
#[derive(Clone, Debug)]
pub struct DataPaths {
    root: PathBuf,
}

impl DataPaths {
    /// Create a new DataPaths instance with the given root directory
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Get the root data directory
    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    /// Get the auth directory
    pub fn auth(&self) -> PathBuf {
        self.root.join(AUTH_DIR)
    }

    /// Get the logs directory
    pub fn logs(&self) -> PathBuf {
        self.root.join(LOGS_DIR)
    }

    /// Get the database directory (both storage engines live under here)
    pub fn db(&self) -> PathBuf {
        self.root.join(DB_DIR)
    }

    /// Path of the flat key-indexed store
    pub fn kv_store(&self) -> PathBuf {
        self.db().join("records-kv")
    }

    /// Path of the structured store database file
    pub fn sqlite_store(&self) -> PathBuf {
        self.db().join("records.sqlite")
    }

    /// Ensure all directories exist
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.auth())?;
        std::fs::create_dir_all(self.logs())?;
        std::fs::create_dir_all(self.db())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subdirectory_layout() {
        let paths = DataPaths::new("/tmp/coinfolio-test");
        assert_eq!(paths.auth(), PathBuf::from("/tmp/coinfolio-test/auth"));
        assert_eq!(paths.logs(), PathBuf::from("/tmp/coinfolio-test/logs"));
        assert!(paths.kv_store().starts_with(paths.db()));
        assert!(paths.sqlite_store().starts_with(paths.db()));
    }
}
