//! Access-token storage shared between the transport and the auth calls.
//!
//! A [`Session`] is an explicitly owned, cheaply cloneable handle. The
//! transport reads it on every request; only login, refresh and logout
//! write it. Clones share the same token.

use crate::error::TalkVaultError;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::debug;

#[derive(Clone, Default)]
pub struct Session {
    token: Arc<RwLock<Option<String>>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        let session = Self::new();
        session.set_token(token);
        session
    }

    /// Current bearer token, if any.
    pub fn token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn set_token(&self, token: impl Into<String>) {
        let token = token.into();
        let mut guard = self
            .token
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Some(token).filter(|t| !t.trim().is_empty());
    }

    pub fn clear(&self) {
        let mut guard = self
            .token
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = None;
    }

    pub fn is_authenticated(&self) -> bool {
        self.token().is_some()
    }

    /// Load a session from a token file. A missing file yields an empty
    /// session.
    pub async fn load(path: &Path) -> Result<Self, TalkVaultError> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => {
                debug!(path = %path.display(), "loaded session file");
                let session = Self::new();
                session.set_token(contents.trim());
                Ok(session)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                Err(TalkVaultError::PermissionDenied {
                    path: path.to_path_buf(),
                })
            }
            Err(e) => Err(TalkVaultError::Internal(format!(
                "failed to read session file '{}': {e}",
                path.display()
            ))),
        }
    }

    /// Persist the token to `path`, or remove the file when the session is
    /// empty.
    pub async fn save(&self, path: &Path) -> Result<(), TalkVaultError> {
        let result = match self.token() {
            Some(token) => tokio::fs::write(path, token).await,
            None => match tokio::fs::remove_file(path).await {
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                other => other,
            },
        };
        result.map_err(|source| TalkVaultError::OutputWriteFailed {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}
