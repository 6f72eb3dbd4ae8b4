//! Downloaded artifacts and `Content-Disposition` file name parsing.

use crate::messages;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{HeaderMap, CONTENT_DISPOSITION, CONTENT_TYPE};

/// Bytes of a downloaded artifact, with the headers it arrived with.
#[derive(Debug, Clone)]
pub struct Download {
    pub bytes: Vec<u8>,
    pub headers: HeaderMap,
    /// Parsed from `Content-Disposition`, or `download` when absent.
    pub file_name: String,
}

impl Download {
    pub fn new(bytes: Vec<u8>, headers: HeaderMap) -> Self {
        let file_name = headers
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_disposition_filename)
            .unwrap_or_else(|| messages::DEFAULT_DOWNLOAD_NAME.to_string());
        Self {
            bytes,
            headers,
            file_name,
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

static RE_FILENAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)filename\*?=([^;]+)").unwrap());

static RE_UTF8_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^UTF-8''").unwrap());

/// Extract the file name from a `Content-Disposition` header value.
///
/// Takes the first `filename=` or `filename*=` parameter, drops an optional
/// `UTF-8''` prefix and surrounding quotes, then percent-decodes. A value
/// that fails to decode is kept as-is. Only the final path component
/// survives, so a hostile header cannot point outside the target directory.
pub fn parse_content_disposition_filename(header: &str) -> Option<String> {
    let raw = RE_FILENAME.captures(header)?.get(1)?.as_str().trim();
    let unprefixed = RE_UTF8_PREFIX.replace(raw, "");
    let unquoted = unprefixed.strip_prefix('"').unwrap_or(&unprefixed);
    let unquoted = unquoted.strip_suffix('"').unwrap_or(unquoted);
    let decoded = urlencoding::decode(unquoted)
        .map(|d| d.into_owned())
        .unwrap_or_else(|_| unquoted.to_string());
    sanitize_file_name(&decoded)
}

/// Reduce a server-supplied name to a safe final path component.
pub fn sanitize_file_name(name: &str) -> Option<String> {
    let last = name.rsplit(['/', '\\']).next()?.trim();
    if last.is_empty() || last == "." || last == ".." {
        None
    } else {
        Some(last.to_string())
    }
}
