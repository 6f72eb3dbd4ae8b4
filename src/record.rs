//! Conversion records and the in-flight submission used to find them.
//!
//! ## Wire shape vs. canonical shape
//!
//! Backends have shipped two naming schemes for the artifact links:
//! `pdfUrl`/`excelUrl` and the older `pdfPath`/`excelPath`. Records are
//! deserialized through [`WireRecord`], which accepts both, and converted
//! once into [`ConversionRecord`], which only has the canonical fields.
//! Nothing downstream ever branches on the wire shape.
//!
//! List responses are decoded row by row ([`records_from_rows`]): a row that
//! does not describe a record is dropped without failing its neighbours.
//! `createdAt` and `fileSize` values that cannot be read become `None`.

use crate::messages;
use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// One upload-to-document conversion as stored by the server.
///
/// Artifact links are monotonic: once `pdf_url` or `excel_url` is set the
/// server never clears it. The client only distinguishes "no artifact yet"
/// from "at least one artifact" (see [`ConversionRecord::has_artifact`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "WireRecord")]
pub struct ConversionRecord {
    /// Primary key assigned by the server.
    pub id: String,
    pub original_file_name: String,
    /// Secondary key some deployments hand out instead of `id`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved_file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excel_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl ConversionRecord {
    /// Minimal record, mostly useful in tests and fakes.
    pub fn new(id: impl Into<String>, original_file_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            original_file_name: original_file_name.into(),
            saved_file_name: None,
            file_path: None,
            pdf_url: None,
            excel_url: None,
            file_size: None,
            user_id: None,
            created_at: None,
        }
    }

    /// True once the server has produced at least one output document.
    pub fn has_artifact(&self) -> bool {
        self.pdf_url.is_some() || self.excel_url.is_some()
    }

    /// The artifact to download, PDF first.
    pub fn artifact_url(&self) -> Option<&str> {
        self.pdf_url.as_deref().or(self.excel_url.as_deref())
    }

    /// Original file name without its `.txt` extension.
    pub fn base_name(&self) -> &str {
        let name = self.original_file_name.trim();
        let stripped = if name.len() >= 4 && name[name.len() - 4..].eq_ignore_ascii_case(".txt") {
            &name[..name.len() - 4]
        } else {
            name
        };
        if stripped.is_empty() {
            messages::DEFAULT_BASE_NAME
        } else {
            stripped
        }
    }
}

/// A record body as the server may send it, legacy fields included.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireRecord {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: Option<String>,
    pub original_file_name: Option<String>,
    pub saved_file_name: Option<String>,
    pub file_path: Option<String>,
    pub pdf_url: Option<String>,
    pub excel_url: Option<String>,
    pub pdf_path: Option<String>,
    pub excel_path: Option<String>,
    #[serde(default, deserialize_with = "lenient_size")]
    pub file_size: Option<u64>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub user_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

/// A body that decoded but does not describe a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedRecord(&'static str);

impl fmt::Display for MalformedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed record: {}", self.0)
    }
}

impl std::error::Error for MalformedRecord {}

impl TryFrom<WireRecord> for ConversionRecord {
    type Error = MalformedRecord;

    fn try_from(wire: WireRecord) -> Result<Self, Self::Error> {
        let id = non_empty(wire.id).ok_or(MalformedRecord("missing id"))?;
        Ok(Self {
            id,
            original_file_name: wire.original_file_name.unwrap_or_default(),
            saved_file_name: non_empty(wire.saved_file_name),
            file_path: non_empty(wire.file_path),
            pdf_url: non_empty(wire.pdf_url).or_else(|| non_empty(wire.pdf_path)),
            excel_url: non_empty(wire.excel_url).or_else(|| non_empty(wire.excel_path)),
            file_size: wire.file_size,
            user_id: non_empty(wire.user_id),
            created_at: wire.created_at,
        })
    }
}

/// Convert each row of a list response, dropping rows that are not
/// records. Returns the records and the number of rows dropped.
pub fn records_from_rows(rows: Vec<Value>) -> (Vec<ConversionRecord>, usize) {
    let mut records = Vec::with_capacity(rows.len());
    let mut dropped = 0;
    for (index, row) in rows.into_iter().enumerate() {
        let record = serde_json::from_value::<WireRecord>(row)
            .map_err(|e| e.to_string())
            .and_then(|wire| ConversionRecord::try_from(wire).map_err(|e| e.to_string()));
        match record {
            Ok(record) => records.push(record),
            Err(reason) => {
                debug!(index, %reason, "skipping history row");
                dropped += 1;
            }
        }
    }
    (records, dropped)
}

pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

const NAIVE_TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
];

/// RFC 3339, a zone-less `YYYY-MM-DD HH:MM:SS` (read as UTC), or epoch
/// milliseconds.
pub(crate) fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            DateTime::parse_from_rfc3339(s)
                .map(|t| t.with_timezone(&Utc))
                .ok()
                .or_else(|| {
                    NAIVE_TIMESTAMP_FORMATS
                        .iter()
                        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                        .map(|t| t.and_utc())
                })
        }
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

pub(crate) fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Value>::deserialize(deserializer)?
        .as_ref()
        .and_then(parse_timestamp))
}

fn lenient_size<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(
        Option::<Value>::deserialize(deserializer)?.and_then(|v| match v {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }),
    )
}

pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(i64),
    }

    Ok(Option::<Id>::deserialize(deserializer)?.map(|id| match id {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    }))
}

/// An upload in progress, remembered so its record can be found again.
///
/// Exists only for the duration of one submit call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSubmission {
    pub file_name: String,
    pub file_size: u64,
    pub submitted_at: DateTime<Utc>,
    /// Correlation id sent with the upload. Observability only: the server
    /// does not echo it, so it plays no part in matching.
    pub request_id: String,
}

impl PendingSubmission {
    pub fn new(file_name: impl Into<String>, file_size: u64) -> Self {
        Self {
            file_name: file_name.into(),
            file_size,
            submitted_at: Utc::now(),
            request_id: Uuid::new_v4().to_string(),
        }
    }

    /// Earliest creation time a matching record may have.
    pub fn earliest_match(&self, window: Duration) -> DateTime<Utc> {
        let window = TimeDelta::from_std(window).unwrap_or(TimeDelta::MAX);
        self.submitted_at
            .checked_sub_signed(window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Whether `record` could be the result of this submission.
    pub fn matches(&self, record: &ConversionRecord, window: Duration) -> bool {
        record.original_file_name == self.file_name
            && record.file_size == Some(self.file_size)
            && record
                .created_at
                .is_some_and(|created| created >= self.earliest_match(window))
    }
}
