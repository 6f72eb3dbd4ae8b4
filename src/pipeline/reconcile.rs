//! Reconciliation: find the record an ambiguous upload produced.
//!
//! When an upload's response cannot be trusted, the server may still have
//! created the record. The scanner lists the history on a bounded backoff
//! schedule and picks the newest record with the submitted file's exact name
//! and size, created no earlier than the submission start minus the window.
//! History listings are eventually consistent, so a fetch error simply
//! counts as "no match this attempt".

use crate::api::HistoryApi;
use crate::config::BackoffSchedule;
use crate::progress::ClientProgressCallback;
use crate::record::{ConversionRecord, PendingSubmission};
use std::time::Duration;
use tracing::{debug, info};

/// Pick the record `pending` produced, if it is in `records`.
///
/// Newest `created_at` wins; among equal timestamps the record listed first
/// wins. Pure, so repeated scans over the same list agree.
pub fn select_match<'a>(
    records: &'a [ConversionRecord],
    pending: &PendingSubmission,
    window: Duration,
) -> Option<&'a ConversionRecord> {
    records
        .iter()
        .filter(|r| pending.matches(r, window))
        .rev()
        .max_by_key(|r| r.created_at)
}

/// Scan the history until a match appears or the schedule runs out.
pub async fn find_match(
    api: &dyn HistoryApi,
    pending: &PendingSubmission,
    schedule: &BackoffSchedule,
    window: Duration,
    progress: &dyn ClientProgressCallback,
) -> Option<ConversionRecord> {
    let total = schedule.len();
    for (attempt, delay) in schedule.iter().enumerate() {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        progress.on_reconcile_attempt(attempt + 1, total);

        match api.list_histories().await {
            Ok(records) => {
                if let Some(found) = select_match(&records, pending, window) {
                    info!(
                        request_id = %pending.request_id,
                        file_name = %pending.file_name,
                        id = %found.id,
                        attempt = attempt + 1,
                        "recovered upload from history"
                    );
                    return Some(found.clone());
                }
                debug!(attempt = attempt + 1, total, "no matching record yet");
            }
            Err(e) => {
                debug!(attempt = attempt + 1, total, error = %e, "history scan failed");
            }
        }
    }
    None
}
