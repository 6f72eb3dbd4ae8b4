//! The TalkVault API client and the narrow trait the protocol runs against.
//!
//! [`HistoryApi`] is the seam between the protocol (submit, reconcile, poll)
//! and HTTP. [`ApiClient`] implements it on top of [`Transport`]; tests
//! implement it in memory.

use crate::config::ClientConfig;
use crate::download::Download;
use crate::error::{ApiError, TalkVaultError};
use crate::pipeline::input::{UploadFile, UploadSource};
use crate::pipeline::poll::{PollHandle, PollSession};
use crate::pipeline::{lookup, submit};
use crate::progress;
use crate::record::ConversionRecord;
use crate::session::Session;
use crate::transport::{Transport, HISTORIES_PATH};
use crate::user::{SignupRequest, UserProfile, UserUpdate};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The two calls the upload/poll protocol needs.
#[async_trait]
pub trait HistoryApi: Send + Sync {
    /// `POST /upload`. `Ok(None)` is a success status with an empty or
    /// malformed body.
    async fn upload(
        &self,
        file: &UploadFile,
        request_id: &str,
    ) -> Result<Option<ConversionRecord>, ApiError>;

    /// `GET /histories`.
    async fn list_histories(&self) -> Result<Vec<ConversionRecord>, ApiError>;
}

#[async_trait]
impl HistoryApi for Transport {
    async fn upload(
        &self,
        file: &UploadFile,
        request_id: &str,
    ) -> Result<Option<ConversionRecord>, ApiError> {
        Transport::upload(self, file, request_id).await
    }

    async fn list_histories(&self) -> Result<Vec<ConversionRecord>, ApiError> {
        self.get_records(HISTORIES_PATH).await
    }
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

/// Body of a successful `POST /auth/login` or `POST /auth/signup`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    #[serde(alias = "token")]
    pub access_token: Option<String>,
    /// Profile of the logged-in user. A profile that does not decode is
    /// dropped rather than failing the login.
    #[serde(default, deserialize_with = "optional_user")]
    pub user: Option<UserProfile>,
}

fn optional_user<'de, D>(deserializer: D) -> Result<Option<UserProfile>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<serde_json::Value>::deserialize(deserializer)?
        .and_then(|v| serde_json::from_value(v).ok()))
}

fn user_path(id: &str) -> String {
    format!("/users/{}", urlencoding::encode(id))
}

/// High-level client: auth, history management and the upload protocol.
#[derive(Debug, Clone)]
pub struct ApiClient {
    transport: Transport,
    config: ClientConfig,
}

impl ApiClient {
    /// Create a client with a fresh session seeded from
    /// `config.access_token`.
    pub fn new(config: ClientConfig) -> Result<Self, TalkVaultError> {
        let session = match config.access_token.as_deref() {
            Some(token) => Session::with_token(token),
            None => Session::new(),
        };
        Self::with_session(config, session)
    }

    /// Create a client sharing an existing session.
    pub fn with_session(config: ClientConfig, session: Session) -> Result<Self, TalkVaultError> {
        let transport = Transport::new(&config, session)?;
        Ok(Self { transport, config })
    }

    pub fn session(&self) -> &Session {
        self.transport.session()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    // ── Auth ─────────────────────────────────────────────────────────────

    /// Log in and store the returned access token.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, TalkVaultError> {
        let response: LoginResponse = self
            .transport
            .post_json("/auth/login", &LoginRequest { email, password })
            .await?;
        let token = response
            .access_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ApiError::decode("/auth/login", "response has no access token"))?;
        self.session().set_token(token);
        info!("logged in");
        Ok(response)
    }

    /// Create an account and store the returned access token.
    ///
    /// Sent as multipart so an optional profile image can ride along. A
    /// response without a token is not an error: some deployments require a
    /// separate login after signup.
    pub async fn signup(&self, request: &SignupRequest) -> Result<LoginResponse, TalkVaultError> {
        let image = request.profile_image.as_ref().map(|img| ("profileImage", img));
        let response: LoginResponse = self
            .transport
            .post_multipart(
                "/auth/signup",
                &[
                    ("email", request.email.as_str()),
                    ("password", request.password.as_str()),
                ],
                image.as_slice(),
            )
            .await?;
        match response.access_token.as_deref().filter(|t| !t.trim().is_empty()) {
            Some(token) => {
                self.session().set_token(token);
                info!("signed up and logged in");
            }
            None => info!("signed up"),
        }
        Ok(response)
    }

    /// Log out. The local session is cleared even when the call fails.
    pub async fn logout(&self) -> Result<(), TalkVaultError> {
        let result = self.transport.post_empty("/auth/logout").await;
        self.session().clear();
        if let Err(ref e) = result {
            warn!(error = %e, "logout request failed, session cleared locally");
        }
        result.map_err(TalkVaultError::from)
    }

    /// Exchange the refresh cookie for a new access token.
    pub async fn refresh(&self) -> Result<(), TalkVaultError> {
        self.transport.refresh().await?;
        Ok(())
    }

    // ── Users ────────────────────────────────────────────────────────────

    /// `GET /users/{id}`.
    pub async fn user(&self, id: &str) -> Result<UserProfile, TalkVaultError> {
        Ok(self.transport.get_json(&user_path(id)).await?)
    }

    /// `PATCH /users/{id}` with the fields set in `update`.
    pub async fn update_user(
        &self,
        id: &str,
        update: &UserUpdate,
    ) -> Result<UserProfile, TalkVaultError> {
        if update.is_empty() {
            return Err(TalkVaultError::InvalidInput {
                reason: "no user fields to update".into(),
            });
        }
        let profile = self.transport.patch_json(&user_path(id), update).await?;
        info!(id, "user updated");
        Ok(profile)
    }

    /// `DELETE /users/{id}`. Deleting the logged-in user also clears the
    /// local session.
    pub async fn delete_user(&self, id: &str, is_self: bool) -> Result<(), TalkVaultError> {
        self.transport.delete(&user_path(id)).await?;
        if is_self {
            self.session().clear();
        }
        info!(id, "user deleted");
        Ok(())
    }

    // ── Histories ────────────────────────────────────────────────────────

    pub async fn histories(&self) -> Result<Vec<ConversionRecord>, TalkVaultError> {
        Ok(self.transport.get_records(HISTORIES_PATH).await?)
    }

    /// Find one record by id, saved file name or artifact URL, following
    /// the configured lookup mode.
    pub async fn find_history(&self, key: &str) -> Result<Option<ConversionRecord>, TalkVaultError> {
        Ok(lookup::fetch_by_key(&self.transport, key, self.config.lookup_mode).await?)
    }

    /// `GET /histories/{id}/download`.
    pub async fn download(&self, id: &str) -> Result<Download, TalkVaultError> {
        let path = format!("{HISTORIES_PATH}/{}/download", urlencoding::encode(id));
        Ok(self.transport.download(&path).await?)
    }

    /// Download a record's artifact: straight from its absolute URL when it
    /// has one, otherwise through the download endpoint.
    pub async fn download_artifact(
        &self,
        record: &ConversionRecord,
    ) -> Result<Download, TalkVaultError> {
        match record.artifact_url() {
            Some(url) if url.starts_with("http://") || url.starts_with("https://") => {
                debug!(id = %record.id, "downloading artifact from its URL");
                Ok(self.transport.fetch_absolute(url).await?)
            }
            _ => self.download(&record.id).await,
        }
    }

    /// `DELETE /histories/{id}`.
    pub async fn delete_history(&self, id: &str) -> Result<(), TalkVaultError> {
        let path = format!("{HISTORIES_PATH}/{}", urlencoding::encode(id));
        self.transport.delete(&path).await?;
        info!(id, "history deleted");
        Ok(())
    }

    // ── Protocol ─────────────────────────────────────────────────────────

    /// Upload a file or pasted text and establish its record, reconciling
    /// against the history when the response is ambiguous.
    pub async fn submit(&self, source: UploadSource) -> Result<ConversionRecord, TalkVaultError> {
        let file = source.into_file()?;
        let submitted = submit::submit(&self.transport, &file, &self.config).await?;
        Ok(submitted.record)
    }

    /// Start polling for the record identified by `key`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn poll(&self, key: impl Into<String>) -> PollHandle {
        let api: Arc<dyn HistoryApi> = Arc::new(self.transport.clone());
        PollSession::new(
            api,
            key,
            self.config.poll_delays.clone(),
            self.config.lookup_mode,
            progress::or_noop(self.config.progress_callback.as_ref()),
        )
        .spawn()
    }
}
