//! Input resolution: turn a chosen file or pasted text into an upload body.
//!
//! The conversion endpoint only accepts files, so pasted text is
//! synthesized into a `text/plain` file named `pasted-text.txt`. Exactly one
//! of the two sources must be supplied; anything else is rejected before a
//! request is built.

use crate::error::TalkVaultError;
use crate::messages;
use std::path::Path;
use tracing::debug;

/// What the user asked to convert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadSource {
    /// A file picked by the user.
    File { name: String, bytes: Vec<u8> },
    /// Text pasted into the form.
    Text(String),
}

/// A file ready to be sent as the `file` part of a multipart body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub name: String,
    pub bytes: Vec<u8>,
    /// Content type of the multipart part, guessed from the name.
    pub mime: String,
}

impl UploadFile {
    /// A file whose content type is guessed from its extension, falling back
    /// to `application/octet-stream`.
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        let name = name.into();
        let mime = mime_guess::from_path(&name)
            .first_or_octet_stream()
            .to_string();
        Self {
            name,
            bytes: bytes.into(),
            mime,
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

impl UploadSource {
    pub fn file(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        UploadSource::File {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        UploadSource::Text(text.into())
    }

    /// Build a source from optional form fields.
    ///
    /// Fails with [`TalkVaultError::InvalidInput`] when both or neither are
    /// given, or when the text is blank.
    pub fn from_parts(
        file: Option<(String, Vec<u8>)>,
        text: Option<String>,
    ) -> Result<Self, TalkVaultError> {
        let text = text.filter(|t| !t.trim().is_empty());
        match (file, text) {
            (Some((name, bytes)), None) => Ok(UploadSource::File { name, bytes }),
            (None, Some(text)) => Ok(UploadSource::Text(text)),
            (Some(_), Some(_)) => Err(TalkVaultError::InvalidInput {
                reason: "both a file and pasted text were supplied".into(),
            }),
            (None, None) => Err(TalkVaultError::InvalidInput {
                reason: "neither a file nor pasted text was supplied".into(),
            }),
        }
    }

    /// Read a local file into a source, keeping only its final path
    /// component as the upload name.
    pub async fn read_file(path: &Path) -> Result<Self, TalkVaultError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => TalkVaultError::FileNotFound {
                path: path.to_path_buf(),
            },
            std::io::ErrorKind::PermissionDenied => TalkVaultError::PermissionDenied {
                path: path.to_path_buf(),
            },
            _ => TalkVaultError::ReadFailed {
                path: path.to_path_buf(),
                source: e,
            },
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| messages::PASTED_TEXT_FILE_NAME.to_string());
        debug!(path = %path.display(), bytes = bytes.len(), "read upload file");
        Ok(UploadSource::File { name, bytes })
    }

    /// Resolve to the file that will actually be uploaded.
    pub fn into_file(self) -> Result<UploadFile, TalkVaultError> {
        match self {
            UploadSource::File { name, bytes } => {
                if name.trim().is_empty() {
                    return Err(TalkVaultError::InvalidInput {
                        reason: "file name is empty".into(),
                    });
                }
                Ok(UploadFile::new(name, bytes))
            }
            UploadSource::Text(text) => {
                if text.trim().is_empty() {
                    return Err(TalkVaultError::InvalidInput {
                        reason: "pasted text is empty".into(),
                    });
                }
                Ok(UploadFile {
                    name: messages::PASTED_TEXT_FILE_NAME.to_string(),
                    bytes: text.into_bytes(),
                    mime: mime_guess::mime::TEXT_PLAIN.to_string(),
                })
            }
        }
    }
}
