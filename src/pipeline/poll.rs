//! Result polling: wait for a record's output artifact.
//!
//! ## State machine
//!
//! ```text
//! loading ──► processing ──► processing ... ──► ready
//!    │             │                        └─► error (schedule exhausted)
//!    └─────────────┴──► error (fetch failed)
//! ```
//!
//! `ready` and `error` are terminal. A finished session answers every further
//! [`PollSession::attempt`] with its outcome without fetching again. Once a
//! session is cancelled no further transition or notification is emitted.
//! An empty schedule allows no fetch at all and ends in `error` at once.
//!
//! ## Scheduling
//!
//! Attempt `n` waits `schedule[n]` first, so the schedule length bounds the
//! number of fetches. A session never has more than one fetch in flight: an
//! attempt that finds one running is skipped and rescheduled at
//! `schedule[min(attempts + 1, len - 1)]`. Cancellation stops the pending
//! timer but never aborts a fetch already on the wire; its result is simply
//! dropped.

use crate::api::HistoryApi;
use crate::config::{BackoffSchedule, LookupMode};
use crate::error::{ApiError, TalkVaultError};
use crate::messages;
use crate::pipeline::lookup;
use crate::progress::{Notification, ProgressCallback};
use crate::record::ConversionRecord;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Status of a poll session as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollStatus {
    /// No fetch has completed yet.
    Loading,
    /// The record exists (or not yet) but has no artifact.
    Processing,
    /// An artifact is available.
    Ready,
    /// Reserved for hosts that distinguish "gave up" from "failed"; the
    /// poller itself reports exhaustion as [`PollStatus::Error`].
    Timeout,
    /// Fetching failed or the schedule ran out.
    Error,
}

impl PollStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, PollStatus::Ready | PollStatus::Timeout | PollStatus::Error)
    }

    pub fn label(self) -> &'static str {
        match self {
            PollStatus::Loading => "loading",
            PollStatus::Processing => "processing",
            PollStatus::Ready => "ready",
            PollStatus::Timeout => "timeout",
            PollStatus::Error => "error",
        }
    }
}

impl fmt::Display for PollStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How a poll session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Ready(ConversionRecord),
    /// The schedule ran out without an artifact appearing.
    Exhausted { attempts: usize },
    /// A fetch failed.
    Failed(ApiError),
    Cancelled,
}

impl PollOutcome {
    pub fn into_result(self, key: &str) -> Result<ConversionRecord, TalkVaultError> {
        match self {
            PollOutcome::Ready(record) => Ok(record),
            PollOutcome::Exhausted { attempts } => Err(TalkVaultError::PollTimeout {
                key: key.to_string(),
                attempts,
            }),
            PollOutcome::Failed(e) if e.kind() == crate::error::ApiErrorKind::SessionInvalid => {
                Err(TalkVaultError::SessionInvalid)
            }
            PollOutcome::Failed(source) => Err(TalkVaultError::PollError {
                key: key.to_string(),
                source,
            }),
            PollOutcome::Cancelled => Err(TalkVaultError::Cancelled {
                key: key.to_string(),
            }),
        }
    }
}

/// What one attempt decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// No artifact yet; try again after the delay.
    Retry(Duration),
    /// Another fetch was in flight; try again after the delay.
    Skipped(Duration),
    Finished(PollOutcome),
}

/// One polling run for one lookup key.
pub struct PollSession {
    key: String,
    api: Arc<dyn HistoryApi>,
    schedule: BackoffSchedule,
    mode: LookupMode,
    progress: ProgressCallback,
    attempts: AtomicUsize,
    in_flight: AtomicBool,
    cancel: CancellationToken,
    status: watch::Sender<PollStatus>,
    record: Mutex<Option<ConversionRecord>>,
    finished: Mutex<Option<PollOutcome>>,
}

impl fmt::Debug for PollSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollSession")
            .field("key", &self.key)
            .field("status", &*self.status.borrow())
            .field("attempts", &self.attempts())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl PollSession {
    pub fn new(
        api: Arc<dyn HistoryApi>,
        key: impl Into<String>,
        schedule: BackoffSchedule,
        mode: LookupMode,
        progress: ProgressCallback,
    ) -> Arc<Self> {
        let (status, _) = watch::channel(PollStatus::Loading);
        Arc::new(Self {
            key: key.into(),
            api,
            schedule,
            mode,
            progress,
            attempts: AtomicUsize::new(0),
            in_flight: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            status,
            record: Mutex::new(None),
            finished: Mutex::new(None),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn status(&self) -> PollStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PollStatus> {
        self.status.subscribe()
    }

    /// Fetches that found no artifact so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// The last record seen, with or without an artifact.
    pub fn record(&self) -> Option<ConversionRecord> {
        self.record
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            debug!(key = %self.key, "poll cancelled");
        }
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The outcome the session finished with, if it has.
    pub fn finished(&self) -> Option<PollOutcome> {
        self.finished
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Run a single attempt.
    pub async fn attempt(&self) -> Step {
        if let Some(outcome) = self.finished() {
            return Step::Finished(outcome);
        }
        if self.cancel.is_cancelled() {
            return Step::Finished(PollOutcome::Cancelled);
        }
        if self.schedule.is_empty() {
            warn!(key = %self.key, "poll schedule is empty");
            self.transition(PollStatus::Error);
            self.notify(Notification::failure(messages::STATUS_UNAVAILABLE));
            return self.finish(PollOutcome::Exhausted { attempts: 0 });
        }
        if self.in_flight.swap(true, Ordering::SeqCst) {
            let delay = self.schedule.skip_delay(self.attempts());
            debug!(key = %self.key, ?delay, "fetch already in flight, skipping attempt");
            return Step::Skipped(delay);
        }

        let result = lookup::fetch_by_key(self.api.as_ref(), &self.key, self.mode).await;
        self.in_flight.store(false, Ordering::SeqCst);

        if self.cancel.is_cancelled() {
            return Step::Finished(PollOutcome::Cancelled);
        }

        match result {
            Err(e) => {
                warn!(key = %self.key, error = %e, "status fetch failed");
                self.transition(PollStatus::Error);
                self.notify(Notification::failure(messages::STATUS_UNAVAILABLE));
                self.finish(PollOutcome::Failed(e))
            }
            Ok(Some(record)) if record.has_artifact() => {
                info!(key = %self.key, id = %record.id, "conversion ready");
                self.remember(&record);
                self.transition(PollStatus::Ready);
                self.notify(Notification::success(messages::CONVERSION_READY));
                self.finish(PollOutcome::Ready(record))
            }
            Ok(found) => {
                if let Some(ref record) = found {
                    self.remember(record);
                }
                let attempts = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
                match self.schedule.delay_for(attempts) {
                    Some(delay) => {
                        debug!(
                            key = %self.key,
                            attempts,
                            found = found.is_some(),
                            ?delay,
                            "no artifact yet"
                        );
                        self.transition(PollStatus::Processing);
                        Step::Retry(delay)
                    }
                    None => {
                        warn!(key = %self.key, attempts, "gave up waiting for artifact");
                        self.transition(PollStatus::Error);
                        self.notify(Notification::failure(messages::STATUS_UNAVAILABLE));
                        self.finish(PollOutcome::Exhausted { attempts })
                    }
                }
            }
        }
    }

    /// Drive attempts until the session finishes or is cancelled.
    pub async fn run(self: Arc<Self>) -> PollOutcome {
        self.progress.on_status_change(&self.key, PollStatus::Loading);
        let mut delay = self.schedule.delay_for(0).unwrap_or_default();
        loop {
            if !delay.is_zero() {
                tokio::select! {
                    _ = self.cancel.cancelled() => return PollOutcome::Cancelled,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            match self.attempt().await {
                Step::Retry(next) | Step::Skipped(next) => delay = next,
                Step::Finished(outcome) => return outcome,
            }
        }
    }

    /// Run the session on its own task.
    pub fn spawn(self: Arc<Self>) -> PollHandle {
        let task = tokio::spawn(Arc::clone(&self).run());
        PollHandle {
            session: self,
            task: Some(task),
        }
    }

    fn finish(&self, outcome: PollOutcome) -> Step {
        *self
            .finished
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(outcome.clone());
        Step::Finished(outcome)
    }

    fn remember(&self, record: &ConversionRecord) {
        *self
            .record
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(record.clone());
    }

    fn transition(&self, next: PollStatus) {
        if self.cancel.is_cancelled() {
            return;
        }
        let applied = self.status.send_if_modified(|current| {
            if current.is_terminal() {
                false
            } else {
                *current = next;
                true
            }
        });
        if applied {
            self.progress.on_status_change(&self.key, next);
        }
    }

    fn notify(&self, notification: Notification) {
        if !self.cancel.is_cancelled() {
            self.progress.on_notification(&notification);
        }
    }
}

/// Handle to a spawned poll session.
///
/// Dropping the handle without awaiting [`PollHandle::wait`] cancels the
/// session.
#[derive(Debug)]
pub struct PollHandle {
    session: Arc<PollSession>,
    task: Option<JoinHandle<PollOutcome>>,
}

impl PollHandle {
    pub fn key(&self) -> &str {
        self.session.key()
    }

    pub fn status(&self) -> PollStatus {
        self.session.status()
    }

    /// Watch the latest status.
    pub fn subscribe(&self) -> watch::Receiver<PollStatus> {
        self.session.subscribe()
    }

    pub fn attempts(&self) -> usize {
        self.session.attempts()
    }

    pub fn record(&self) -> Option<ConversionRecord> {
        self.session.record()
    }

    pub fn cancel(&self) {
        self.session.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.session.is_cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.session.cancellation_token()
    }

    pub fn session(&self) -> &Arc<PollSession> {
        &self.session
    }

    /// Wait for the session to end.
    ///
    /// A panic inside the poll task is resumed on the caller.
    pub async fn outcome(mut self) -> PollOutcome {
        match self.task.take() {
            Some(task) => match task.await {
                Ok(outcome) => outcome,
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(e) => {
                    warn!(key = %self.session.key(), error = %e, "poll task aborted");
                    PollOutcome::Cancelled
                }
            },
            None => PollOutcome::Cancelled,
        }
    }

    /// Wait for the session to end and map the outcome to a result.
    pub async fn wait(self) -> Result<ConversionRecord, TalkVaultError> {
        let key = self.session.key().to_string();
        self.outcome().await.into_result(&key)
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.session.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!PollStatus::Loading.is_terminal());
        assert!(!PollStatus::Processing.is_terminal());
        assert!(PollStatus::Ready.is_terminal());
        assert!(PollStatus::Timeout.is_terminal());
        assert!(PollStatus::Error.is_terminal());
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&PollStatus::Processing).unwrap(),
            "\"processing\""
        );
        assert_eq!(PollStatus::Ready.to_string(), "ready");
    }

    #[test]
    fn outcomes_map_to_errors() {
        assert!(matches!(
            PollOutcome::Exhausted { attempts: 6 }.into_result("k"),
            Err(TalkVaultError::PollTimeout { attempts: 6, .. })
        ));
        assert!(matches!(
            PollOutcome::Failed(ApiError::http("/histories", 500, None)).into_result("k"),
            Err(TalkVaultError::PollError { .. })
        ));
        assert!(matches!(
            PollOutcome::Failed(ApiError::session_invalid("/histories")).into_result("k"),
            Err(TalkVaultError::SessionInvalid)
        ));
        assert!(matches!(
            PollOutcome::Cancelled.into_result("k"),
            Err(TalkVaultError::Cancelled { .. })
        ));
    }
}
