//! Progress-callback trait for upload, reconciliation and polling events.
//!
//! Inject an [`Arc<dyn ClientProgressCallback>`] via
//! [`crate::config::ClientConfigBuilder::progress_callback`] to observe a
//! submission as it moves through the protocol.
//!
//! Callbacks are the least-invasive integration point: a host can forward
//! events to a channel, a terminal spinner or a toast layer without the
//! library knowing how it communicates. The trait is `Send + Sync` because
//! poll sessions run on spawned tasks.
//!
//! # Example
//!
//! ```rust
//! use talkvault::{ClientConfig, ClientProgressCallback, PollStatus};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     changes: AtomicUsize,
//! }
//!
//! impl ClientProgressCallback for CountingCallback {
//!     fn on_status_change(&self, key: &str, status: PollStatus) {
//!         let n = self.changes.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("{key}: {status} (change #{n})");
//!     }
//! }
//!
//! let cb = Arc::new(CountingCallback { changes: AtomicUsize::new(0) });
//! let config = ClientConfig::builder()
//!     .progress_callback(cb as Arc<dyn ClientProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::pipeline::poll::PollStatus;
use crate::record::ConversionRecord;
use std::sync::Arc;

/// Whether a notification reports a success or a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Success,
    Failure,
}

/// A user-visible message emitted when a poll session ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
}

impl Notification {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Success,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Failure,
            message: message.into(),
        }
    }
}

/// Called by the submitter, the reconciliation scanner and the poller.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
///
/// # Thread safety
///
/// Several poll sessions may report concurrently from different tasks.
/// Implementations must protect shared mutable state themselves.
pub trait ClientProgressCallback: Send + Sync {
    /// Called just before `POST /upload` is sent.
    ///
    /// # Arguments
    /// * `file_name`: name of the uploaded file
    /// * `file_size`: size in bytes
    /// * `request_id`: correlation id attached to the request
    fn on_upload_start(&self, file_name: &str, file_size: u64, request_id: &str) {
        let _ = (file_name, file_size, request_id);
    }

    /// Called once a record for the submission is established.
    ///
    /// `reconciled` is true when the record was found by scanning the history
    /// rather than read from the upload response.
    fn on_upload_complete(&self, record: &ConversionRecord, reconciled: bool) {
        let _ = (record, reconciled);
    }

    /// Called before each history scan of a reconciliation.
    ///
    /// # Arguments
    /// * `attempt`: 1-indexed attempt number
    /// * `total`: attempts the schedule allows
    fn on_reconcile_attempt(&self, attempt: usize, total: usize) {
        let _ = (attempt, total);
    }

    /// Called on every poll status transition, repeated `processing`
    /// included.
    fn on_status_change(&self, key: &str, status: PollStatus) {
        let _ = (key, status);
    }

    /// Called once when a poll session ends in `ready` or `error`.
    fn on_notification(&self, notification: &Notification) {
        let _ = notification;
    }

    /// Called when a token refresh failed and the session was cleared.
    fn on_session_invalid(&self) {}
}

/// A no-op implementation for callers that don't need progress events.
///
/// This is the default when no callback is configured.
pub struct NoopProgressCallback;

impl ClientProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ClientConfig`].
pub type ProgressCallback = Arc<dyn ClientProgressCallback>;

/// The configured callback, or a no-op one.
pub(crate) fn or_noop(cb: Option<&ProgressCallback>) -> ProgressCallback {
    cb.cloned().unwrap_or_else(|| Arc::new(NoopProgressCallback))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct TrackingCallback {
        uploads: AtomicUsize,
        scans: AtomicUsize,
        statuses: Mutex<Vec<PollStatus>>,
        notifications: Mutex<Vec<Notification>>,
    }

    impl ClientProgressCallback for TrackingCallback {
        fn on_upload_start(&self, _file_name: &str, _file_size: u64, _request_id: &str) {
            self.uploads.fetch_add(1, Ordering::SeqCst);
        }

        fn on_reconcile_attempt(&self, _attempt: usize, _total: usize) {
            self.scans.fetch_add(1, Ordering::SeqCst);
        }

        fn on_status_change(&self, _key: &str, status: PollStatus) {
            self.statuses.lock().unwrap().push(status);
        }

        fn on_notification(&self, notification: &Notification) {
            self.notifications.lock().unwrap().push(notification.clone());
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_upload_start("chat.txt", 10, "req");
        cb.on_upload_complete(&ConversionRecord::new("a", "chat.txt"), false);
        cb.on_reconcile_attempt(1, 6);
        cb.on_status_change("a", PollStatus::Processing);
        cb.on_notification(&Notification::failure("nope"));
        cb.on_session_invalid();
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_upload_start("chat.txt", 10, "req");
        tracker.on_reconcile_attempt(1, 6);
        tracker.on_reconcile_attempt(2, 6);
        tracker.on_status_change("a", PollStatus::Loading);
        tracker.on_status_change("a", PollStatus::Ready);
        tracker.on_notification(&Notification::success("done"));

        assert_eq!(tracker.uploads.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.scans.load(Ordering::SeqCst), 2);
        assert_eq!(
            *tracker.statuses.lock().unwrap(),
            vec![PollStatus::Loading, PollStatus::Ready]
        );
        let notes = tracker.notifications.lock().unwrap();
        assert_eq!(notes[0].level, NotificationLevel::Success);
    }

    #[test]
    fn or_noop_falls_back() {
        let cb = or_noop(None);
        cb.on_session_invalid();
        let configured: ProgressCallback = Arc::new(TrackingCallback::default());
        assert!(Arc::ptr_eq(&or_noop(Some(&configured)), &configured));
    }
}
