//! Per-request scratch storage.
//!
//! Each request gets its own directory under the configured work root, named
//! after a fresh token. Nothing outside that directory is written while the
//! request is processed, and the directory is removed when the [`Workspace`]
//! is released or dropped.
use crate::error::SheetError;
use crate::naming::is_safe_component;
use chrono::Local;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;
use tracing::warn;

/// Length of the random suffix of a token
const TOKEN_SUFFIX_LEN: usize = 8;

#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("Invalid file name '{0}'")]
    InvalidName(String),

    #[error("Workspace '{path}' already exists")]
    Collision { path: String },

    #[error("Cannot create workspace '{path}': {message}")]
    CreateFailed { path: String, message: String },

    #[error("Cannot remove workspace '{path}': {message}")]
    RemoveFailed { path: String, message: String },
}

/// Generates a request token: local timestamp with microseconds, then a random suffix.
pub fn new_token() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_SUFFIX_LEN)
        .map(char::from)
        .collect();
    format!("{}-{}", Local::now().format("%Y%m%d%H%M%S%6f"), suffix)
}

/// An isolated directory owned by one request.
#[derive(Debug)]
pub struct Workspace {
    token: String,
    root: PathBuf,
    released: bool,
}

impl Workspace {
    /// Creates `{root_dir}/{token}` for a fresh token.
    ///
    /// The directory itself is created non-recursively, so an existing one is
    /// reported as a collision instead of being shared.
    pub fn acquire(root_dir: &Path) -> Result<Workspace, SheetError> {
        let token = new_token();
        let root = root_dir.join(&token);
        match fs::create_dir(&root) {
            Ok(()) => (),
            Err(error) if error.kind() == ErrorKind::AlreadyExists => Err(WorkspaceError::Collision {
                path: root.display().to_string(),
            })?,
            Err(error) => Err(WorkspaceError::CreateFailed {
                path: root.display().to_string(),
                message: error.to_string(),
            })?,
        }
        debug!(token = %token, root = %root.display(), "workspace acquired");
        Ok(Workspace {
            token,
            root,
            released: false,
        })
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of `name` inside the workspace.
    ///
    /// `name` must be a single plain file name; separators, `.` and `..` are rejected.
    pub fn path_for(&self, name: &str) -> Result<PathBuf, SheetError> {
        if !is_safe_component(name) {
            Err(WorkspaceError::InvalidName(name.to_owned()))?
        }
        Ok(self.root.join(name))
    }

    /// Writes `bytes` to `name` inside the workspace and returns its path.
    pub fn write(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, SheetError> {
        let path = self.path_for(name)?;
        fs::write(&path, bytes)?;
        Ok(path)
    }

    /// Removes the workspace directory and everything in it.
    pub fn release(mut self) -> Result<(), SheetError> {
        self.remove()
    }

    fn remove(&mut self) -> Result<(), SheetError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        match fs::remove_dir_all(&self.root) {
            Ok(()) => (),
            Err(error) if error.kind() == ErrorKind::NotFound => (),
            Err(error) => Err(WorkspaceError::RemoveFailed {
                path: self.root.display().to_string(),
                message: error.to_string(),
            })?,
        }
        debug!(token = %self.token, "workspace released");
        Ok(())
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Err(error) = self.remove() {
            warn!(token = %self.token, %error, "workspace teardown failed");
        }
    }
}
