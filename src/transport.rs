//! The single HTTP client every API call goes through.
//!
//! ## Responsibilities
//!
//! * Attach `Authorization: Bearer <token>` from the shared [`Session`].
//! * Leave multipart content types to `reqwest`, which generates the
//!   boundary. Setting the header by hand breaks multipart parsing.
//! * On a 401, refresh the token once and replay the request once. A failed
//!   refresh clears the session and reports [`ApiErrorKind::SessionInvalid`].
//! * Decode record bodies through [`WireRecord`] so legacy field names never
//!   reach the rest of the crate. List bodies are decoded row by row.
//!
//! [`WireRecord`]: crate::record::WireRecord
//!
//! Bodies are never logged. Request and response lines go to DEBUG, failures
//! to WARN.
//!
//! [`ApiErrorKind::SessionInvalid`]: crate::error::ApiErrorKind::SessionInvalid

use crate::config::ClientConfig;
use crate::download::Download;
use crate::error::{ApiError, TalkVaultError};
use crate::pipeline::input::UploadFile;
use crate::progress::{self, ProgressCallback};
use crate::record::{self, ConversionRecord};
use crate::session::Session;
use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const UPLOAD_PATH: &str = "/upload";
pub const HISTORIES_PATH: &str = "/histories";
pub const REFRESH_PATH: &str = "/auth/refresh";

/// Header carrying the upload correlation id.
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    access_token: Option<String>,
}

/// HTTP client bound to one API base URL and one session.
#[derive(Clone)]
pub struct Transport {
    client: reqwest::Client,
    base_url: String,
    session: Session,
    progress: ProgressCallback,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("base_url", &self.base_url)
            .field("session", &self.session)
            .finish()
    }
}

impl Transport {
    pub fn new(config: &ClientConfig, session: Session) -> Result<Self, TalkVaultError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.clone())
            .cookie_store(true)
            .build()
            .map_err(|e| TalkVaultError::InvalidConfig(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            session,
            progress: progress::or_noop(config.progress_callback.as_ref()),
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    // ── Request execution ────────────────────────────────────────────────

    async fn send_once<F>(
        &self,
        method: &Method,
        path: &str,
        request_id: Option<&str>,
        decorate: &F,
    ) -> Result<Response, ApiError>
    where
        F: Fn(RequestBuilder) -> Result<RequestBuilder, ApiError>,
    {
        let token = self.session.token();
        let mut builder = decorate(self.client.request(method.clone(), self.url(path)))?;
        if let Some(ref token) = token {
            builder = builder.bearer_auth(token);
        }
        debug!(%method, path, auth = token.is_some(), request_id, "request");

        let response = builder.send().await.map_err(|e| {
            let err = ApiError::from_reqwest(path, &e);
            warn!(%method, path, error = %err, "request failed");
            err
        })?;
        debug!(%method, path, status = response.status().as_u16(), "response");
        Ok(response)
    }

    /// Send a request, recovering from one 401 via a token refresh.
    ///
    /// `decorate` is called again for the replay, so request bodies must be
    /// rebuildable. It fails only when the request itself cannot be built.
    /// Auth endpoints never trigger a refresh.
    async fn execute<F>(
        &self,
        method: Method,
        path: &str,
        request_id: Option<&str>,
        decorate: F,
    ) -> Result<Response, ApiError>
    where
        F: Fn(RequestBuilder) -> Result<RequestBuilder, ApiError>,
    {
        let response = self.send_once(&method, path, request_id, &decorate).await?;
        if response.status() != StatusCode::UNAUTHORIZED || path.starts_with("/auth/") {
            return Ok(response);
        }

        debug!(path, "401 received, refreshing access token");
        if let Err(e) = self.refresh().await {
            warn!(path, error = %e, "token refresh failed, clearing session");
            self.session.clear();
            self.progress.on_session_invalid();
            return Err(ApiError::session_invalid(path));
        }

        // A second 401 is reported as-is by `ensure_success`.
        self.send_once(&method, path, request_id, &decorate).await
    }

    async fn ensure_success(path: &str, response: Response) -> Result<Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response
            .bytes()
            .await
            .ok()
            .and_then(|b| serde_json::from_slice::<ErrorBody>(&b).ok())
            .and_then(|body| body.message)
            .filter(|m| !m.trim().is_empty());
        warn!(path, status = status.as_u16(), "request returned error status");
        Err(ApiError::http(path, status.as_u16(), message))
    }

    async fn body_bytes(path: &str, response: Response) -> Result<Vec<u8>, ApiError> {
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| ApiError::from_reqwest(path, &e))
    }

    // ── Auth ─────────────────────────────────────────────────────────────

    /// Exchange the refresh cookie for a new access token and store it.
    pub async fn refresh(&self) -> Result<String, ApiError> {
        let response = self
            .client
            .post(self.url(REFRESH_PATH))
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| ApiError::from_reqwest(REFRESH_PATH, &e))?;
        debug!(status = response.status().as_u16(), "refresh response");
        let response = Self::ensure_success(REFRESH_PATH, response).await?;
        let bytes = Self::body_bytes(REFRESH_PATH, response).await?;
        let body: RefreshResponse = serde_json::from_slice(&bytes)
            .map_err(|e| ApiError::decode(REFRESH_PATH, e.to_string()))?;
        let token = body
            .access_token
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ApiError::decode(REFRESH_PATH, "response has no accessToken"))?;
        self.session.set_token(token.clone());
        Ok(token)
    }

    // ── Typed calls ──────────────────────────────────────────────────────

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.execute(Method::GET, path, None, Ok).await?;
        let response = Self::ensure_success(path, response).await?;
        let bytes = Self::body_bytes(path, response).await?;
        serde_json::from_slice(&bytes).map_err(|e| ApiError::decode(path, e.to_string()))
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .execute(Method::POST, path, None, |b| Ok(b.json(body)))
            .await?;
        let response = Self::ensure_success(path, response).await?;
        let bytes = Self::body_bytes(path, response).await?;
        serde_json::from_slice(&bytes).map_err(|e| ApiError::decode(path, e.to_string()))
    }

    pub async fn patch_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .execute(Method::PATCH, path, None, |b| Ok(b.json(body)))
            .await?;
        let response = Self::ensure_success(path, response).await?;
        let bytes = Self::body_bytes(path, response).await?;
        serde_json::from_slice(&bytes).map_err(|e| ApiError::decode(path, e.to_string()))
    }

    /// POST a multipart form of text fields and file parts.
    pub async fn post_multipart<T: DeserializeOwned>(
        &self,
        path: &str,
        fields: &[(&str, &str)],
        files: &[(&str, &UploadFile)],
    ) -> Result<T, ApiError> {
        let response = self
            .execute(Method::POST, path, None, |b| {
                let mut form = Form::new();
                for (name, value) in fields {
                    form = form.text(name.to_string(), value.to_string());
                }
                for (name, file) in files {
                    form = form.part(name.to_string(), file_part(path, file)?);
                }
                Ok(b.multipart(form))
            })
            .await?;
        let response = Self::ensure_success(path, response).await?;
        let bytes = Self::body_bytes(path, response).await?;
        serde_json::from_slice(&bytes).map_err(|e| ApiError::decode(path, e.to_string()))
    }

    /// POST without a body, ignoring whatever comes back.
    pub async fn post_empty(&self, path: &str) -> Result<(), ApiError> {
        let response = self.execute(Method::POST, path, None, Ok).await?;
        Self::ensure_success(path, response).await.map(|_| ())
    }

    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        let response = self.execute(Method::DELETE, path, None, Ok).await?;
        Self::ensure_success(path, response).await.map(|_| ())
    }

    /// Fetch a list of records. Rows that are not records (no id, `null`,
    /// wrongly typed fields) are dropped; the rest of the list survives.
    pub async fn get_records(&self, path: &str) -> Result<Vec<ConversionRecord>, ApiError> {
        let rows: Vec<serde_json::Value> = self.get_json(path).await?;
        let (records, dropped) = record::records_from_rows(rows);
        if dropped > 0 {
            debug!(path, dropped, kept = records.len(), "dropped malformed history rows");
        }
        Ok(records)
    }

    /// `POST /upload` with a multipart `file` part.
    ///
    /// `Ok(None)` means the server answered with a success status but the
    /// body was empty or not a record.
    pub async fn upload(
        &self,
        file: &UploadFile,
        request_id: &str,
    ) -> Result<Option<ConversionRecord>, ApiError> {
        let response = self
            .execute(Method::POST, UPLOAD_PATH, Some(request_id), |b| {
                let part = file_part(UPLOAD_PATH, file)?;
                Ok(b.query(&[("requestId", request_id)])
                    .header(REQUEST_ID_HEADER, request_id)
                    .multipart(Form::new().part("file", part)))
            })
            .await?;
        let response = Self::ensure_success(UPLOAD_PATH, response).await?;
        let bytes = Self::body_bytes(UPLOAD_PATH, response).await?;

        if bytes.iter().all(u8::is_ascii_whitespace) {
            debug!(request_id, "upload response body is empty");
            return Ok(None);
        }
        match serde_json::from_slice::<ConversionRecord>(&bytes) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                debug!(request_id, error = %e, "upload response is not a record");
                Ok(None)
            }
        }
    }

    /// Download a binary body with its headers.
    pub async fn download(&self, path: &str) -> Result<Download, ApiError> {
        let response = self.execute(Method::GET, path, None, Ok).await?;
        let response = Self::ensure_success(path, response).await?;
        let headers = response.headers().clone();
        let bytes = Self::body_bytes(path, response).await?;
        Ok(Download::new(bytes, headers))
    }

    /// Download from an absolute artifact URL. No credentials are sent: the
    /// URL may point at a third-party storage host.
    pub async fn fetch_absolute(&self, url: &str) -> Result<Download, ApiError> {
        debug!(url, "fetching artifact");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ApiError::from_reqwest(url, &e))?;
        let response = Self::ensure_success(url, response).await?;
        let headers = response.headers().clone();
        let bytes = Self::body_bytes(url, response).await?;
        Ok(Download::new(bytes, headers))
    }
}

/// A multipart file part carrying the file's name and content type.
fn file_part(path: &str, file: &UploadFile) -> Result<Part, ApiError> {
    Part::bytes(file.bytes.clone())
        .file_name(file.name.clone())
        .mime_str(&file.mime)
        .map_err(|e| ApiError::decode(path, format!("invalid content type '{}': {e}", file.mime)))
}
