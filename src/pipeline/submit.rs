//! Upload submission with reconciliation on ambiguous outcomes.
//!
//! ```text
//! POST /upload ──► record with id ─────────────────────────► done
//!       │
//!       ├────────► 2xx, empty/malformed body ─┐
//!       ├────────► no response / timeout ─────┴► reconcile ─► found ──► done
//!       │                                              └────► UploadFailed
//!       └────────► HTTP error, session invalid ───────────────► surfaced as-is
//! ```

use crate::api::HistoryApi;
use crate::config::ClientConfig;
use crate::error::{AmbiguityReason, ApiError, TalkVaultError};
use crate::pipeline::input::UploadFile;
use crate::pipeline::reconcile;
use crate::progress;
use crate::record::{ConversionRecord, PendingSubmission};
use tracing::{info, warn};

/// A record established for an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitted {
    pub record: ConversionRecord,
    /// True when the record came from a history scan rather than the
    /// upload response.
    pub reconciled: bool,
}

/// Decide what an upload response means.
///
/// Returns the record when the response carries one,
/// [`TalkVaultError::AmbiguousOutcome`] when the server may or may not have
/// processed the upload, and any other error unchanged.
pub fn classify(
    file_name: &str,
    response: Result<Option<ConversionRecord>, ApiError>,
) -> Result<ConversionRecord, TalkVaultError> {
    match response {
        Ok(Some(record)) => Ok(record),
        Ok(None) => Err(TalkVaultError::AmbiguousOutcome {
            file_name: file_name.to_string(),
            reason: AmbiguityReason::EmptyOrMalformedBody,
        }),
        Err(e) if e.is_network_like() => Err(TalkVaultError::AmbiguousOutcome {
            file_name: file_name.to_string(),
            reason: AmbiguityReason::NoResponse(e),
        }),
        Err(e) => Err(e.into()),
    }
}

/// Upload `file` and return the record it produced.
pub async fn submit(
    api: &dyn HistoryApi,
    file: &UploadFile,
    config: &ClientConfig,
) -> Result<Submitted, TalkVaultError> {
    let progress = progress::or_noop(config.progress_callback.as_ref());
    let pending = PendingSubmission::new(file.name.clone(), file.size());
    info!(
        file_name = %pending.file_name,
        bytes = pending.file_size,
        request_id = %pending.request_id,
        "uploading"
    );
    progress.on_upload_start(&pending.file_name, pending.file_size, &pending.request_id);

    let response = api.upload(file, &pending.request_id).await;
    let reason = match classify(&pending.file_name, response) {
        Ok(record) => {
            info!(id = %record.id, request_id = %pending.request_id, "upload accepted");
            progress.on_upload_complete(&record, false);
            return Ok(Submitted {
                record,
                reconciled: false,
            });
        }
        Err(TalkVaultError::AmbiguousOutcome { reason, .. }) => reason,
        Err(e) => return Err(e),
    };

    warn!(
        request_id = %pending.request_id,
        reason = %reason,
        "upload outcome ambiguous, scanning history"
    );
    let found = reconcile::find_match(
        api,
        &pending,
        &config.reconcile_delays,
        config.reconcile_window(),
        progress.as_ref(),
    )
    .await;

    match found {
        Some(record) => {
            progress.on_upload_complete(&record, true);
            Ok(Submitted {
                record,
                reconciled: true,
            })
        }
        None => {
            warn!(request_id = %pending.request_id, "upload could not be confirmed");
            Err(TalkVaultError::UploadFailed {
                file_name: pending.file_name,
                attempts: config.reconcile_delays.len(),
                reason,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_is_accepted() {
        let r = classify("chat.txt", Ok(Some(ConversionRecord::new("1", "chat.txt")))).unwrap();
        assert_eq!(r.id, "1");
    }

    #[test]
    fn empty_body_is_ambiguous() {
        let err = classify("chat.txt", Ok(None)).unwrap_err();
        assert!(matches!(
            err,
            TalkVaultError::AmbiguousOutcome {
                reason: AmbiguityReason::EmptyOrMalformedBody,
                ..
            }
        ));
    }

    #[test]
    fn timeout_is_ambiguous() {
        let err = classify("chat.txt", Err(ApiError::timeout("/upload"))).unwrap_err();
        assert!(matches!(
            err,
            TalkVaultError::AmbiguousOutcome {
                reason: AmbiguityReason::NoResponse(_),
                ..
            }
        ));
    }

    #[test]
    fn client_error_is_surfaced() {
        let err = classify(
            "chat.txt",
            Err(ApiError::http("/upload", 400, Some("bad file".into()))),
        )
        .unwrap_err();
        assert!(matches!(err, TalkVaultError::Api(_)));
    }

    #[test]
    fn session_invalid_is_not_ambiguous() {
        let err = classify("chat.txt", Err(ApiError::session_invalid("/upload"))).unwrap_err();
        assert!(matches!(err, TalkVaultError::SessionInvalid));
    }
}
