//! Find one record by a lookup key.
//!
//! The key handed to the result view is whatever the upload response
//! identified the record by. Most deployments return the history `id`, but
//! some return the saved file name, and older links carry part of an
//! artifact URL. In [`LookupMode::Lenient`] all three are tried, in priority
//! order, each with the raw key and with a trailing `.pdf`/`.xls`/`.xlsx`
//! removed. Matches on anything but the id are logged at WARN: they mean the
//! backend's upload response and history ids disagree.

use crate::api::HistoryApi;
use crate::config::LookupMode;
use crate::error::ApiError;
use crate::record::ConversionRecord;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

static RE_ARTIFACT_EXT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\.(pdf|xlsx?)$").unwrap());

/// Which field a key matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMatch {
    Id,
    SavedFileName,
    ArtifactUrl,
}

/// The raw key plus, when different, the key without its artifact extension.
fn key_variants(key: &str) -> Vec<&str> {
    let stripped = RE_ARTIFACT_EXT
        .find(key)
        .map(|m| &key[..m.start()])
        .unwrap_or(key);
    let mut variants = vec![key];
    if stripped != key {
        variants.push(stripped);
    }
    variants.retain(|v| !v.is_empty());
    variants
}

/// Pure lookup over an already fetched record list.
pub fn find_by_key<'a>(
    records: &'a [ConversionRecord],
    key: &str,
    mode: LookupMode,
) -> Option<(&'a ConversionRecord, KeyMatch)> {
    let variants = key_variants(key.trim());
    if variants.is_empty() {
        return None;
    }

    if let Some(r) = records.iter().find(|r| variants.contains(&r.id.as_str())) {
        return Some((r, KeyMatch::Id));
    }
    if mode == LookupMode::Strict {
        return None;
    }

    if let Some(r) = records.iter().find(|r| {
        r.saved_file_name
            .as_deref()
            .is_some_and(|saved| variants.contains(&saved))
    }) {
        return Some((r, KeyMatch::SavedFileName));
    }

    records
        .iter()
        .find(|r| {
            [r.pdf_url.as_deref(), r.excel_url.as_deref()]
                .into_iter()
                .flatten()
                .any(|url| variants.iter().any(|v| url.contains(v)))
        })
        .map(|r| (r, KeyMatch::ArtifactUrl))
}

/// Fetch the history list and look `key` up in it.
pub async fn fetch_by_key(
    api: &dyn HistoryApi,
    key: &str,
    mode: LookupMode,
) -> Result<Option<ConversionRecord>, ApiError> {
    let records = api.list_histories().await?;
    Ok(find_by_key(&records, key, mode).map(|(record, matched)| {
        if matched != KeyMatch::Id {
            warn!(
                key,
                id = %record.id,
                matched = ?matched,
                "lookup key matched a non-primary field; upload response and history ids disagree"
            );
        }
        record.clone()
    }))
}
