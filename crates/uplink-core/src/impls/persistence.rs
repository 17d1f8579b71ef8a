//! Token persistence: in-process and JSON file.

use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

use crate::domain::{ClientError, TokenPair};
use crate::ports::TokenPersistence;

/// Keeps tokens for the life of the process.
#[derive(Debug, Default)]
pub struct InMemoryTokenPersistence {
    tokens: Mutex<Option<TokenPair>>,
}

impl InMemoryTokenPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(tokens: TokenPair) -> Self {
        Self {
            tokens: Mutex::new(Some(tokens)),
        }
    }
}

impl TokenPersistence for InMemoryTokenPersistence {
    fn load(&self) -> Result<Option<TokenPair>, ClientError> {
        Ok(self.tokens.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn save(&self, tokens: &TokenPair) -> Result<(), ClientError> {
        *self.tokens.lock().unwrap_or_else(|e| e.into_inner()) = Some(tokens.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), ClientError> {
        *self.tokens.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}

/// Stores the pair as JSON at `path`. Writes go through a temp file and a
/// rename so a crash never leaves a truncated file behind.
#[derive(Debug, Clone)]
pub struct FileTokenPersistence {
    path: PathBuf,
}

impl FileTokenPersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "tokens.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

fn io_error(action: &str, path: &Path, err: std::io::Error) -> ClientError {
    ClientError::Persistence(format!("{action} {}: {err}", path.display()))
}

impl TokenPersistence for FileTokenPersistence {
    fn load(&self) -> Result<Option<TokenPair>, ClientError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == IoErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(io_error("read", &self.path, err)),
        };
        if raw.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| ClientError::Persistence(format!("parse {}: {e}", self.path.display())))
    }

    fn save(&self, tokens: &TokenPair) -> Result<(), ClientError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| io_error("create", parent, e))?;
        }
        let json = serde_json::to_vec_pretty(tokens)?;
        let temp = self.temp_path();
        std::fs::write(&temp, json).map_err(|e| io_error("write", &temp, e))?;
        std::fs::rename(&temp, &self.path).map_err(|e| io_error("rename", &self.path, e))?;
        debug!(path = %self.path.display(), "tokens persisted");
        Ok(())
    }

    fn clear(&self) -> Result<(), ClientError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == IoErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_error("remove", &self.path, err)),
        }
    }
}
