//! Update cursor persistence.
//!
//! The cursor is the identifier of the next update the bot wants to see,
//! i.e. the last consumed update id + 1. It is kept on disk so a restart
//! does not replay messages that were already handled.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while loading or saving the cursor.
#[derive(Debug, Error)]
pub enum CursorError {
    #[error("Failed to access cursor file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cursor file {path} is corrupt: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Durable storage for a single cursor value.
pub trait CursorStore: Send + Sync {
    /// Returns the stored cursor, or 0 when nothing was stored yet.
    fn load(&self) -> Result<u64, CursorError>;

    /// Replaces the stored cursor.
    fn save(&mut self, cursor: u64) -> Result<(), CursorError>;
}

/// On-disk layout of the cursor file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct CursorRecord {
    pub offset: u64,
}

/// Cursor stored as `{"offset": N}` in a JSON file.
#[derive(Debug, Clone)]
pub struct JsonCursorStore {
    path: PathBuf,
}

impl JsonCursorStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> CursorError {
        CursorError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl CursorStore for JsonCursorStore {
    fn load(&self) -> Result<u64, CursorError> {
        let json = match std::fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(self.io_error(e)),
        };

        serde_json::from_str::<CursorRecord>(&json)
            .map(|record| record.offset)
            .map_err(|source| CursorError::Parse {
                path: self.path.clone(),
                source,
            })
    }

    fn save(&mut self, cursor: u64) -> Result<(), CursorError> {
        let json = serde_json::to_string(&CursorRecord { offset: cursor }).map_err(|source| {
            CursorError::Parse {
                path: self.path.clone(),
                source,
            }
        })?;

        // Write-then-rename so a crash never leaves a half written file.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| self.io_error(e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))
    }
}

/// Cursor kept in memory only; lost on restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryCursorStore {
    value: Option<u64>,
    saves: usize,
}

impl MemoryCursorStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from a previously stored value.
    #[must_use]
    pub fn with_value(value: u64) -> Self {
        Self {
            value: Some(value),
            saves: 0,
        }
    }

    /// Number of successful `save` calls.
    #[must_use]
    pub fn saves(&self) -> usize {
        self.saves
    }
}

impl CursorStore for MemoryCursorStore {
    fn load(&self) -> Result<u64, CursorError> {
        Ok(self.value.unwrap_or_default())
    }

    fn save(&mut self, cursor: u64) -> Result<(), CursorError> {
        self.value = Some(cursor);
        self.saves += 1;
        Ok(())
    }
}
