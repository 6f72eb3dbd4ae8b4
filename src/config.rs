//! Configuration types for the talkvault client.
//!
//! All client behaviour is controlled through [`ClientConfig`], built via its
//! [`ClientConfigBuilder`]. Endpoint, timeouts, both retry schedules and the
//! lookup policy live in one struct so a run can be reproduced from its
//! `Debug` output alone.

use crate::error::TalkVaultError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default API endpoint when none is configured.
pub const DEFAULT_BASE_URL: &str = "http://localhost:3000";

/// Configuration for a talkvault client.
///
/// Built via [`ClientConfig::builder()`] or using
/// [`ClientConfig::default()`].
///
/// # Example
/// ```rust
/// use talkvault::{BackoffSchedule, ClientConfig};
///
/// let config = ClientConfig::builder()
///     .base_url("https://api.example.com")
///     .request_timeout_secs(45)
///     .poll_delays(BackoffSchedule::from_millis([0, 500, 1000]))
///     .build()
///     .unwrap();
/// assert_eq!(config.poll_delays.len(), 3);
/// ```
#[derive(Clone)]
pub struct ClientConfig {
    /// API base URL, without trailing slash. Default: `http://localhost:3000`.
    pub base_url: String,

    /// Per-request timeout in seconds. Default: 30.
    ///
    /// The backend converts synchronously inside `POST /upload`, so uploads of
    /// long chat logs routinely take several seconds. A short timeout turns
    /// slow successes into ambiguous outcomes that then need reconciliation.
    pub request_timeout_secs: u64,

    /// `User-Agent` header sent with every request.
    pub user_agent: String,

    /// Initial bearer token. `None` starts an anonymous session.
    pub access_token: Option<String>,

    /// Delays between history scans after an ambiguous upload.
    /// Default: 0, 400 ms, 800 ms, 1.5 s, 2.5 s, 4 s.
    pub reconcile_delays: BackoffSchedule,

    /// How far before the submission start a record may have been created
    /// and still count as a match, in seconds. Default: 120.
    pub reconcile_window_secs: u64,

    /// Delays between result polls. Default: 0, 1 s, 2 s, 4 s, 8 s, 12 s.
    pub poll_delays: BackoffSchedule,

    /// Which record fields a lookup key may match. Default: lenient.
    pub lookup_mode: LookupMode,

    /// Receives upload, reconciliation and status events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: 30,
            user_agent: format!("talkvault/{}", env!("CARGO_PKG_VERSION")),
            access_token: None,
            reconcile_delays: BackoffSchedule::reconcile_default(),
            reconcile_window_secs: 120,
            poll_delays: BackoffSchedule::poll_default(),
            lookup_mode: LookupMode::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("user_agent", &self.user_agent)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("reconcile_delays", &self.reconcile_delays)
            .field("reconcile_window_secs", &self.reconcile_window_secs)
            .field("poll_delays", &self.poll_delays)
            .field("lookup_mode", &self.lookup_mode)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ClientProgressCallback>"),
            )
            .finish()
    }
}

impl ClientConfig {
    /// Create a new builder for `ClientConfig`.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder {
            config: Self::default(),
        }
    }

    /// Builder pre-filled from `TALKVAULT_API_URL`, `TALKVAULT_TOKEN` and
    /// `TALKVAULT_TIMEOUT_SECS`. Unset variables keep their defaults.
    pub fn builder_from_env() -> Result<ClientConfigBuilder, TalkVaultError> {
        let mut builder = Self::builder();
        if let Some(url) = env_non_empty("TALKVAULT_API_URL") {
            builder = builder.base_url(url);
        }
        if let Some(token) = env_non_empty("TALKVAULT_TOKEN") {
            builder = builder.access_token(token);
        }
        if let Some(secs) = env_non_empty("TALKVAULT_TIMEOUT_SECS") {
            let secs: u64 = secs.parse().map_err(|_| {
                TalkVaultError::InvalidConfig(format!(
                    "TALKVAULT_TIMEOUT_SECS must be a whole number of seconds, got '{secs}'"
                ))
            })?;
            builder = builder.request_timeout_secs(secs);
        }
        Ok(builder)
    }

    /// Build a configuration from the environment (see [`Self::builder_from_env`]).
    pub fn from_env() -> Result<Self, TalkVaultError> {
        Self::builder_from_env()?.build()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn reconcile_window(&self) -> Duration {
        Duration::from_secs(self.reconcile_window_secs)
    }
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Builder for [`ClientConfig`].
#[derive(Debug)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.config.user_agent = ua.into();
        self
    }

    pub fn access_token(mut self, token: impl Into<String>) -> Self {
        self.config.access_token = Some(token.into());
        self
    }

    pub fn reconcile_delays(mut self, schedule: BackoffSchedule) -> Self {
        self.config.reconcile_delays = schedule;
        self
    }

    pub fn reconcile_window_secs(mut self, secs: u64) -> Self {
        self.config.reconcile_window_secs = secs;
        self
    }

    pub fn poll_delays(mut self, schedule: BackoffSchedule) -> Self {
        self.config.poll_delays = schedule;
        self
    }

    pub fn lookup_mode(mut self, mode: LookupMode) -> Self {
        self.config.lookup_mode = mode;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ClientConfig, TalkVaultError> {
        let c = &self.config;
        let parsed = reqwest::Url::parse(&c.base_url).map_err(|e| {
            TalkVaultError::InvalidConfig(format!("base URL '{}' is invalid: {e}", c.base_url))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(TalkVaultError::InvalidConfig(format!(
                "base URL must be http or https, got '{}'",
                parsed.scheme()
            )));
        }
        if c.request_timeout_secs == 0 {
            return Err(TalkVaultError::InvalidConfig(
                "Request timeout must be ≥ 1 second".into(),
            ));
        }
        if c.reconcile_delays.is_empty() {
            return Err(TalkVaultError::InvalidConfig(
                "Reconciliation schedule must have at least one delay".into(),
            ));
        }
        if c.poll_delays.is_empty() {
            return Err(TalkVaultError::InvalidConfig(
                "Poll schedule must have at least one delay".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Which fields of a record a lookup key is compared against.
///
/// Backend deployments disagree on what the upload response's identifier
/// is: some return the history id, others the saved file name, and result
/// links have been shared by artifact URL. `Lenient` accepts all three;
/// `Strict` only the primary id, for backends that honour a single key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LookupMode {
    /// Primary id, then saved file name, then artifact URL substring. (default)
    #[default]
    Lenient,
    /// Primary id only.
    Strict,
}

/// A fixed, finite sequence of delays spacing out retry attempts.
///
/// The schedule length bounds the number of attempts: attempt `n`
/// (0-indexed) waits `delay_for(n)` before running, and there is no attempt
/// `len()`. Computing a delay is a pure function of the attempt index, so
/// retry loops can be tested without real time passing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffSchedule {
    delays_ms: Vec<u64>,
}

impl BackoffSchedule {
    pub fn from_millis(delays: impl Into<Vec<u64>>) -> Self {
        Self {
            delays_ms: delays.into(),
        }
    }

    /// 0, 400 ms, 800 ms, 1.5 s, 2.5 s, 4 s.
    pub fn reconcile_default() -> Self {
        Self::from_millis([0, 400, 800, 1500, 2500, 4000])
    }

    /// 0, 1 s, 2 s, 4 s, 8 s, 12 s.
    pub fn poll_default() -> Self {
        Self::from_millis([0, 1000, 2000, 4000, 8000, 12000])
    }

    /// Number of attempts the schedule allows.
    pub fn len(&self) -> usize {
        self.delays_ms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.delays_ms.is_empty()
    }

    /// Delay before attempt `attempt` (0-indexed), or `None` once the
    /// schedule is exhausted.
    pub fn delay_for(&self, attempt: usize) -> Option<Duration> {
        self.delays_ms
            .get(attempt)
            .map(|&ms| Duration::from_millis(ms))
    }

    /// Delay used when an attempt is skipped because another is still in
    /// flight: the delay after `attempts`, clamped to the last entry.
    pub fn skip_delay(&self, attempts: usize) -> Duration {
        match self.delays_ms.len() {
            0 => Duration::ZERO,
            len => Duration::from_millis(self.delays_ms[(attempts + 1).min(len - 1)]),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Duration> + '_ {
        self.delays_ms.iter().map(|&ms| Duration::from_millis(ms))
    }
}

impl FromStr for BackoffSchedule {
    type Err = TalkVaultError;

    /// Parse a comma-separated list of milliseconds, e.g. `0,400,800`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let delays = s
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| {
                p.parse::<u64>().map_err(|_| {
                    TalkVaultError::InvalidConfig(format!("invalid delay '{p}' (milliseconds expected)"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if delays.is_empty() {
            return Err(TalkVaultError::InvalidConfig(
                "schedule must list at least one delay".into(),
            ));
        }
        Ok(Self::from_millis(delays))
    }
}
