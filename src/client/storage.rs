// Persistent client-side token storage
//
// The session client keeps its working copy of the token pair in memory;
// storage implementations only have to survive process restarts.

use crate::client::error::ClientError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::RwLock;

/// The access/refresh token pair a client session holds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Storage backend for the token pair
pub trait TokenStorage: Send + Sync {
    fn load(&self) -> Result<Option<TokenPair>, ClientError>;
    fn save(&self, pair: &TokenPair) -> Result<(), ClientError>;
    fn clear(&self) -> Result<(), ClientError>;
}

/// Volatile storage; the session is gone when the process exits
#[derive(Default)]
pub struct MemoryTokenStorage {
    pair: RwLock<Option<TokenPair>>,
}

impl MemoryTokenStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(pair: TokenPair) -> Self {
        Self {
            pair: RwLock::new(Some(pair)),
        }
    }
}

impl TokenStorage for MemoryTokenStorage {
    fn load(&self) -> Result<Option<TokenPair>, ClientError> {
        Ok(self
            .pair
            .read()
            .map_err(|_| ClientError::Storage("storage lock poisoned".to_string()))?
            .clone())
    }

    fn save(&self, pair: &TokenPair) -> Result<(), ClientError> {
        *self
            .pair
            .write()
            .map_err(|_| ClientError::Storage("storage lock poisoned".to_string()))? =
            Some(pair.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), ClientError> {
        *self
            .pair
            .write()
            .map_err(|_| ClientError::Storage("storage lock poisoned".to_string()))? = None;
        Ok(())
    }
}

/// JSON-file storage for long-lived sessions across restarts
pub struct FileTokenStorage {
    path: PathBuf,
}

impl FileTokenStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TokenStorage for FileTokenStorage {
    fn load(&self) -> Result<Option<TokenPair>, ClientError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ClientError::Storage(e.to_string())),
        };

        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| ClientError::Storage(e.to_string()))
    }

    fn save(&self, pair: &TokenPair) -> Result<(), ClientError> {
        let raw = serde_json::to_string(pair).map_err(|e| ClientError::Storage(e.to_string()))?;
        std::fs::write(&self.path, raw).map_err(|e| ClientError::Storage(e.to_string()))
    }

    fn clear(&self) -> Result<(), ClientError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ClientError::Storage(e.to_string())),
        }
    }
}
