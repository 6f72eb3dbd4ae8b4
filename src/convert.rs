//! One-call conversion entry points.
//!
//! [`convert`] runs the whole protocol for one input: upload, reconcile if
//! needed, then poll until the artifact is ready. [`convert_to_dir`] also
//! downloads the artifact and writes it to disk. Callers that need live
//! status should drive [`crate::api::ApiClient::submit`] and
//! [`crate::api::ApiClient::poll`] themselves, or use
//! [`crate::stream::status_stream`].

use crate::api::ApiClient;
use crate::config::ClientConfig;
use crate::download::{self, Download};
use crate::error::TalkVaultError;
use crate::output::{ConversionOutput, ConversionStats, SavedArtifact};
use crate::pipeline::input::UploadSource;
use crate::pipeline::submit;
use crate::record::ConversionRecord;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Upload `source` and wait until its conversion is ready.
///
/// # Errors
/// - [`TalkVaultError::InvalidInput`] for an empty source
/// - [`TalkVaultError::UploadFailed`] when the upload could not be confirmed
/// - [`TalkVaultError::PollTimeout`] / [`TalkVaultError::PollError`] when
///   the result never became available
/// - [`TalkVaultError::SessionInvalid`] when the session expired
pub async fn convert(
    source: UploadSource,
    config: &ClientConfig,
) -> Result<ConversionOutput, TalkVaultError> {
    let client = ApiClient::new(config.clone())?;
    convert_with(&client, source).await
}

/// [`convert`] with an existing client, sharing its session.
pub async fn convert_with(
    client: &ApiClient,
    source: UploadSource,
) -> Result<ConversionOutput, TalkVaultError> {
    let total_start = Instant::now();
    let file = source.into_file()?;

    // ── Step 1: Upload (and reconcile) ───────────────────────────────────
    let submitted = submit::submit(client.transport(), &file, client.config()).await?;
    let submit_duration_ms = total_start.elapsed().as_millis() as u64;

    // ── Step 2: Poll ─────────────────────────────────────────────────────
    let poll_start = Instant::now();
    let handle = client.poll(submitted.record.id.clone());
    let session = Arc::clone(handle.session());
    let record = handle.wait().await?;
    let poll_duration_ms = poll_start.elapsed().as_millis() as u64;

    let stats = ConversionStats {
        submit_duration_ms,
        poll_duration_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
        poll_attempts: session.attempts(),
    };
    info!(
        id = %record.id,
        reconciled = submitted.reconciled,
        total_ms = stats.total_duration_ms,
        "conversion complete"
    );

    Ok(ConversionOutput {
        record,
        reconciled: submitted.reconciled,
        stats,
    })
}

/// Convert `source` and save the artifact into `dir`.
///
/// Uses atomic write (temp file in `dir` + rename) so a crash never leaves
/// a partial document behind.
pub async fn convert_to_dir(
    source: UploadSource,
    dir: impl AsRef<Path>,
    config: &ClientConfig,
) -> Result<SavedArtifact, TalkVaultError> {
    let client = ApiClient::new(config.clone())?;
    let output = convert_with(&client, source).await?;
    let download = client.download_artifact(&output.record).await?;
    let bytes = download.len() as u64;
    let path = save_download(&download, &output.record, dir.as_ref()).await?;
    Ok(SavedArtifact {
        path,
        bytes,
        output,
    })
}

/// File name to save a download under: the server's name when it sent one,
/// else the record's base name with the artifact's extension.
pub fn output_file_name(download: &Download, record: &ConversionRecord) -> String {
    if download.file_name != crate::messages::DEFAULT_DOWNLOAD_NAME {
        return download.file_name.clone();
    }
    let ext = match (record.pdf_url.as_deref(), record.excel_url.as_deref()) {
        (Some(_), _) => "pdf",
        (None, Some(url)) if url.to_ascii_lowercase().ends_with(".xls") => "xls",
        (None, Some(_)) => "xlsx",
        (None, None) => "bin",
    };
    let base = download::sanitize_file_name(record.base_name())
        .unwrap_or_else(|| crate::messages::DEFAULT_BASE_NAME.to_string());
    format!("{base}.{ext}")
}

/// Write `download` into `dir` atomically and return the final path.
pub async fn save_download(
    download: &Download,
    record: &ConversionRecord,
    dir: &Path,
) -> Result<PathBuf, TalkVaultError> {
    let path = dir.join(output_file_name(download, record));
    let write_err = |source: std::io::Error| TalkVaultError::OutputWriteFailed {
        path: path.clone(),
        source,
    };

    tokio::fs::create_dir_all(dir).await.map_err(write_err)?;

    let dir = dir.to_path_buf();
    let target = path.clone();
    let bytes = download.bytes.clone();
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&target).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(|e| TalkVaultError::Internal(format!("write task failed: {e}")))?
    .map_err(write_err)?;

    info!(path = %path.display(), bytes = download.len(), "artifact saved");
    Ok(path)
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    source: UploadSource,
    config: &ClientConfig,
) -> Result<ConversionOutput, TalkVaultError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| TalkVaultError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert(source, config))
}
