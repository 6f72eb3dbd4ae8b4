//! Result types returned by the convenience entry points.

use crate::record::ConversionRecord;
use serde::Serialize;
use std::path::PathBuf;

/// A finished conversion.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionOutput {
    pub record: ConversionRecord,
    /// True when the upload response was ambiguous and the record was
    /// recovered from the history.
    pub reconciled: bool,
    pub stats: ConversionStats,
}

/// Timing and retry counters for one conversion.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConversionStats {
    /// Upload plus any reconciliation.
    pub submit_duration_ms: u64,
    /// From the first poll until the artifact appeared.
    pub poll_duration_ms: u64,
    pub total_duration_ms: u64,
    /// Polls that found no artifact before the one that did.
    pub poll_attempts: usize,
}

/// An artifact written to disk by [`crate::convert::convert_to_dir`].
#[derive(Debug, Clone, Serialize)]
pub struct SavedArtifact {
    pub path: PathBuf,
    pub bytes: u64,
    pub output: ConversionOutput,
}
