//! # talkvault
//!
//! Client library and CLI for the TalkVault chat-log conversion service.
//!
//! Users upload a chat export (or paste its text); the server converts it
//! into PDF and Excel documents. Conversion happens after the upload request
//! returns, and the upload response itself is not always trustworthy: it can
//! arrive empty, or never arrive although the server did the work. This
//! crate implements the client side of that protocol robustly.
//!
//! ## Protocol Overview
//!
//! ```text
//! file / pasted text
//!  │
//!  ├─ 1. Submit     POST /upload with a correlation id
//!  ├─ 2. Reconcile  ambiguous response → scan /histories for the record
//!  ├─ 3. Poll       re-fetch the record with backoff until an artifact exists
//!  └─ 4. Download   fetch the PDF/Excel artifact
//! ```
//!
//! Every request goes through one [`transport::Transport`] that attaches the
//! session's bearer token, refreshes it once on a 401 and normalizes legacy
//! response fields.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use talkvault::{convert, ClientConfig, UploadSource};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Endpoint and token from TALKVAULT_API_URL / TALKVAULT_TOKEN
//!     let config = ClientConfig::from_env()?;
//!     let source = UploadSource::text("[10:01] Alice: hello\n[10:02] Bob: hi");
//!     let output = convert(source, &config).await?;
//!     println!("ready: {:?}", output.record.artifact_url());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `talkvault` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! talkvault = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod api;
pub mod config;
pub mod convert;
pub mod download;
pub mod error;
pub mod messages;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod record;
pub mod session;
pub mod stream;
pub mod transport;
pub mod user;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use api::{ApiClient, HistoryApi, LoginResponse};
pub use config::{BackoffSchedule, ClientConfig, ClientConfigBuilder, LookupMode};
pub use convert::{convert, convert_sync, convert_to_dir, convert_with, save_download};
pub use download::Download;
pub use error::{AmbiguityReason, ApiError, ApiErrorKind, TalkVaultError};
pub use output::{ConversionOutput, ConversionStats, SavedArtifact};
pub use pipeline::input::{UploadFile, UploadSource};
pub use pipeline::poll::{PollHandle, PollOutcome, PollSession, PollStatus};
pub use progress::{
    ClientProgressCallback, Notification, NotificationLevel, NoopProgressCallback,
    ProgressCallback,
};
pub use record::{ConversionRecord, PendingSubmission};
pub use session::Session;
pub use stream::{status_stream, StatusStream};
pub use transport::Transport;
pub use user::{SignupRequest, UserProfile, UserUpdate};
