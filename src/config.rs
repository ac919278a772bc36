use crate::error::SheetError;
use anyhow::Context as _;
use serde::Deserialize;
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

/// Name of the directory created under the system temporary directory by default
const DEFAULT_BASE_DIR: &str = "rusty_sheet_pipeline";

/// Pipeline settings shared by every request.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Root under which per-request workspaces are created
    pub work_dir: PathBuf,
    /// Directory receiving `{token}.zip` deliveries
    pub output_dir: PathBuf,
    /// Largest accepted upload, in bytes
    pub max_upload_bytes: usize,
    /// Largest number of files in one request
    pub max_files: usize,
}

impl Default for Config {
    fn default() -> Self {
        let base = std::env::temp_dir().join(DEFAULT_BASE_DIR);
        Self {
            work_dir: base.join("work"),
            output_dir: base.join("output"),
            max_upload_bytes: 50 * 1024 * 1024,
            max_files: 64,
        }
    }
}

impl Config {
    /// Reads a JSON configuration file; absent fields keep their defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Creates the work and output directories.
    pub fn prepare(&self) -> Result<(), SheetError> {
        fs::create_dir_all(&self.work_dir)?;
        fs::create_dir_all(&self.output_dir)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "max_files": 3, "output_dir": "/srv/out" }"#).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.max_files, 3);
        assert_eq!(config.output_dir, PathBuf::from("/srv/out"));
        assert_eq!(config.work_dir, Config::default().work_dir);
        assert_eq!(config.max_upload_bytes, 50 * 1024 * 1024);
    }

    #[test]
    fn invalid_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(Config::load(&path).is_err());
        assert!(Config::load(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn prepare_creates_directories() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            work_dir: dir.path().join("a/work"),
            output_dir: dir.path().join("b/output"),
            ..Config::default()
        };
        config.prepare().unwrap();
        assert!(config.work_dir.is_dir());
        assert!(config.output_dir.is_dir());
    }
}
