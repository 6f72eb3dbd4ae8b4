//! Protocol tests: submitter, reconciliation scanner and poller driven
//! against an in-memory `HistoryApi` with paused tokio time.

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use talkvault::pipeline::submit;
use talkvault::{
    status_stream, AmbiguityReason, ApiError, BackoffSchedule, ClientConfig,
    ClientProgressCallback, ConversionRecord, HistoryApi, LookupMode, Notification,
    NotificationLevel, PollOutcome, PollSession, PollStatus, ProgressCallback, TalkVaultError,
    UploadFile, UploadSource,
};
use tokio::sync::Notify;
use tokio::time::Instant;

// ── Fake API ─────────────────────────────────────────────────────────────

type ListResult = Result<Vec<ConversionRecord>, ApiError>;

/// Scripted history API. List responses are consumed in order; the last one
/// repeats. Call `gate_list_call(n)` to make the n-th list call (1-indexed)
/// wait for `release` after signalling `entered`.
struct FakeApi {
    upload: Mutex<Option<Result<Option<ConversionRecord>, ApiError>>>,
    lists: Mutex<VecDeque<ListResult>>,
    last_list: Mutex<ListResult>,
    list_delay: Duration,
    gated_call: Option<usize>,
    panic_on_list: bool,
    entered: Notify,
    release: Notify,
    started: Instant,
    upload_calls: AtomicUsize,
    list_calls: AtomicUsize,
    list_times: Mutex<Vec<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeApi {
    fn new() -> Self {
        Self {
            upload: Mutex::new(None),
            lists: Mutex::new(VecDeque::new()),
            last_list: Mutex::new(Ok(Vec::new())),
            list_delay: Duration::ZERO,
            gated_call: None,
            panic_on_list: false,
            entered: Notify::new(),
            release: Notify::new(),
            started: Instant::now(),
            upload_calls: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
            list_times: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    fn upload_returns(self, result: Result<Option<ConversionRecord>, ApiError>) -> Self {
        *self.upload.lock().unwrap() = Some(result);
        self
    }

    fn lists(self, results: Vec<ListResult>) -> Self {
        *self.lists.lock().unwrap() = results.into();
        self
    }

    fn list_delay(mut self, delay: Duration) -> Self {
        self.list_delay = delay;
        self
    }

    fn gate_list_call(mut self, n: usize) -> Self {
        self.gated_call = Some(n);
        self
    }

    fn panics_on_list(mut self) -> Self {
        self.panic_on_list = true;
        self
    }

    fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    fn upload_calls(&self) -> usize {
        self.upload_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HistoryApi for FakeApi {
    async fn upload(
        &self,
        _file: &UploadFile,
        _request_id: &str,
    ) -> Result<Option<ConversionRecord>, ApiError> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        self.upload
            .lock()
            .unwrap()
            .clone()
            .expect("upload response not scripted")
    }

    async fn list_histories(&self) -> Result<Vec<ConversionRecord>, ApiError> {
        let call = self.list_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.panic_on_list {
            panic!("history backend exploded");
        }
        self.list_times
            .lock()
            .unwrap()
            .push(self.started.elapsed());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if self.gated_call == Some(call) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        if !self.list_delay.is_zero() {
            tokio::time::sleep(self.list_delay).await;
        }

        let result = {
            let mut lists = self.lists.lock().unwrap();
            match lists.pop_front() {
                Some(next) => {
                    *self.last_list.lock().unwrap() = next.clone();
                    next
                }
                None => self.last_list.lock().unwrap().clone(),
            }
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

// ── Recording callback ───────────────────────────────────────────────────

#[derive(Default)]
struct Recorder {
    statuses: Mutex<Vec<PollStatus>>,
    notifications: Mutex<Vec<Notification>>,
    scans: AtomicUsize,
    completed: Mutex<Vec<(String, bool)>>,
}

impl ClientProgressCallback for Recorder {
    fn on_upload_complete(&self, record: &ConversionRecord, reconciled: bool) {
        self.completed
            .lock()
            .unwrap()
            .push((record.id.clone(), reconciled));
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

impl Recorder {
    fn statuses(&self) -> Vec<PollStatus> {
        self.statuses.lock().unwrap().clone()
    }

    fn notification_levels(&self) -> Vec<NotificationLevel> {
        self.notifications
            .lock()
            .unwrap()
            .iter()
            .map(|n| n.level)
            .collect()
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn chat_file() -> UploadFile {
    UploadSource::file("chat.txt", vec![b'x'; 1024])
        .into_file()
        .unwrap()
}

fn config_with(recorder: &Arc<Recorder>) -> ClientConfig {
    ClientConfig::builder()
        .progress_callback(Arc::clone(recorder) as ProgressCallback)
        .build()
        .unwrap()
}

fn pending_record(id: &str) -> ConversionRecord {
    let mut r = ConversionRecord::new(id, "chat.txt");
    r.file_size = Some(1024);
    r.created_at = Some(Utc::now());
    r
}

fn ready_record(id: &str) -> ConversionRecord {
    let mut r = pending_record(id);
    r.pdf_url = Some(format!("https://cdn.example/{id}.pdf"));
    r
}

fn poll_session(api: &Arc<FakeApi>, key: &str, recorder: &Arc<Recorder>) -> Arc<PollSession> {
    PollSession::new(
        Arc::clone(api) as Arc<dyn HistoryApi>,
        key,
        BackoffSchedule::poll_default(),
        LookupMode::Lenient,
        Arc::clone(recorder) as ProgressCallback,
    )
}

// ── Submitter and scanner ────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn upload_with_record_returns_immediately() {
    let api = FakeApi::new().upload_returns(Ok(Some(pending_record("abc"))));
    let recorder = Arc::new(Recorder::default());

    let submitted = submit::submit(&api, &chat_file(), &config_with(&recorder))
        .await
        .unwrap();

    assert_eq!(submitted.record.id, "abc");
    assert!(!submitted.reconciled);
    assert_eq!(api.list_calls(), 0, "happy path must not scan the history");
    assert_eq!(
        *recorder.completed.lock().unwrap(),
        vec![("abc".to_string(), false)]
    );
}

#[tokio::test(start_paused = true)]
async fn timed_out_upload_is_recovered_from_history() {
    let mut matching = pending_record("recovered");
    matching.created_at = Some(Utc::now() + TimeDelta::milliseconds(50));
    let api = FakeApi::new()
        .upload_returns(Err(ApiError::timeout("/upload")))
        .lists(vec![Ok(Vec::new()), Ok(vec![matching])]);
    let recorder = Arc::new(Recorder::default());

    let submitted = submit::submit(&api, &chat_file(), &config_with(&recorder))
        .await
        .unwrap();

    assert_eq!(submitted.record.id, "recovered");
    assert!(submitted.reconciled);
    assert_eq!(api.list_calls(), 2);
    let times = api.list_times.lock().unwrap().clone();
    assert!(times[1] >= Duration::from_millis(400), "second scan at {times:?}");
    assert_eq!(recorder.scans.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn empty_body_is_recovered_from_history() {
    let api = FakeApi::new()
        .upload_returns(Ok(None))
        .lists(vec![Ok(vec![pending_record("from-list")])]);
    let recorder = Arc::new(Recorder::default());

    let submitted =
        tokio_test::assert_ok!(submit::submit(&api, &chat_file(), &config_with(&recorder)).await);
    assert_eq!(submitted.record.id, "from-list");
    assert!(submitted.reconciled);
}

#[tokio::test(start_paused = true)]
async fn unconfirmed_upload_fails_after_six_scans() {
    let mut other = pending_record("someone-else");
    other.file_size = Some(999);
    let api = FakeApi::new()
        .upload_returns(Err(ApiError::network("/upload", "connection reset")))
        .lists(vec![Ok(vec![other])]);
    let recorder = Arc::new(Recorder::default());

    let err = submit::submit(&api, &chat_file(), &config_with(&recorder))
        .await
        .unwrap_err();

    match err {
        TalkVaultError::UploadFailed {
            attempts, reason, ..
        } => {
            assert_eq!(attempts, 6);
            assert!(matches!(reason, AmbiguityReason::NoResponse(_)));
        }
        other => panic!("expected UploadFailed, got {other:?}"),
    }
    assert_eq!(api.list_calls(), 6);
}

#[tokio::test(start_paused = true)]
async fn scan_errors_count_against_the_budget() {
    let api = FakeApi::new()
        .upload_returns(Err(ApiError::timeout("/upload")))
        .lists(vec![Err(ApiError::http("/histories", 503, None))]);
    let recorder = Arc::new(Recorder::default());

    let err = submit::submit(&api, &chat_file(), &config_with(&recorder))
        .await
        .unwrap_err();
    assert!(matches!(err, TalkVaultError::UploadFailed { .. }));
    assert_eq!(api.list_calls(), 6);
}

#[tokio::test(start_paused = true)]
async fn client_error_is_not_reconciled() {
    let api = FakeApi::new().upload_returns(Err(ApiError::http(
        "/upload",
        400,
        Some("Only .txt files are supported".into()),
    )));
    let recorder = Arc::new(Recorder::default());

    let err = tokio_test::assert_err!(
        submit::submit(&api, &chat_file(), &config_with(&recorder)).await
    );
    assert!(matches!(err, TalkVaultError::Api(_)));
    assert_eq!(err.user_message(), "Only .txt files are supported");
    assert_eq!(api.list_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn session_invalid_is_not_reconciled() {
    let api = FakeApi::new().upload_returns(Err(ApiError::session_invalid("/upload")));
    let recorder = Arc::new(Recorder::default());

    let err = submit::submit(&api, &chat_file(), &config_with(&recorder))
        .await
        .unwrap_err();
    assert!(matches!(err, TalkVaultError::SessionInvalid));
    assert_eq!(api.list_calls(), 0);
    assert_eq!(api.upload_calls(), 1);
}

// ── Poller ───────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn poll_reaches_ready_on_fourth_fetch() {
    let api = Arc::new(FakeApi::new().lists(vec![
        Ok(vec![pending_record("abc")]),
        Ok(vec![pending_record("abc")]),
        Ok(vec![pending_record("abc")]),
        Ok(vec![ready_record("abc")]),
    ]));
    let recorder = Arc::new(Recorder::default());

    let handle = poll_session(&api, "abc", &recorder).spawn();
    let record = handle.wait().await.unwrap();

    assert_eq!(record.id, "abc");
    assert!(record.has_artifact());
    assert_eq!(api.list_calls(), 4);
    assert_eq!(
        recorder.statuses(),
        vec![
            PollStatus::Loading,
            PollStatus::Processing,
            PollStatus::Processing,
            PollStatus::Processing,
            PollStatus::Ready,
        ]
    );
    assert_eq!(
        recorder.notification_levels(),
        vec![NotificationLevel::Success]
    );
}

#[tokio::test(start_paused = true)]
async fn poll_follows_the_schedule() {
    let api = Arc::new(FakeApi::new().lists(vec![
        Ok(Vec::new()),
        Ok(Vec::new()),
        Ok(vec![ready_record("abc")]),
    ]));
    let recorder = Arc::new(Recorder::default());

    poll_session(&api, "abc", &recorder)
        .spawn()
        .wait()
        .await
        .unwrap();

    let times = api.list_times.lock().unwrap().clone();
    assert_eq!(times.len(), 3);
    assert!(times[0] < Duration::from_millis(1));
    assert!(times[1] >= Duration::from_secs(1));
    assert!(times[2] >= Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn poll_exhaustion_ends_in_error_after_six_fetches() {
    let api = Arc::new(FakeApi::new().lists(vec![Ok(Vec::new())]));
    let recorder = Arc::new(Recorder::default());

    let handle = poll_session(&api, "missing", &recorder).spawn();
    let session = Arc::clone(handle.session());
    let outcome = handle.outcome().await;

    assert_eq!(outcome, PollOutcome::Exhausted { attempts: 6 });
    assert_eq!(session.status(), PollStatus::Error);
    assert_eq!(session.attempts(), 6);
    assert_eq!(api.list_calls(), 6);
    assert_eq!(
        recorder.notification_levels(),
        vec![NotificationLevel::Failure]
    );

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(api.list_calls(), 6, "no fetch after the schedule ran out");
}

#[tokio::test(start_paused = true)]
async fn poll_exhaustion_maps_to_poll_timeout() {
    let api = Arc::new(FakeApi::new().lists(vec![Ok(vec![pending_record("abc")])]));
    let recorder = Arc::new(Recorder::default());

    let err = poll_session(&api, "abc", &recorder)
        .spawn()
        .wait()
        .await
        .unwrap_err();
    assert!(matches!(err, TalkVaultError::PollTimeout { attempts: 6, .. }));
    assert_eq!(err.user_message(), talkvault::messages::STATUS_UNAVAILABLE);
}

#[tokio::test(start_paused = true)]
async fn poll_fetch_error_is_terminal() {
    let api = Arc::new(FakeApi::new().lists(vec![
        Ok(Vec::new()),
        Err(ApiError::http("/histories", 500, None)),
    ]));
    let recorder = Arc::new(Recorder::default());

    let err = poll_session(&api, "abc", &recorder)
        .spawn()
        .wait()
        .await
        .unwrap_err();

    assert!(matches!(err, TalkVaultError::PollError { .. }));
    assert_eq!(api.list_calls(), 2);
    assert_eq!(recorder.statuses().last(), Some(&PollStatus::Error));
    assert_eq!(
        recorder.notification_levels(),
        vec![NotificationLevel::Failure]
    );
}

#[tokio::test(start_paused = true)]
async fn cancel_during_in_flight_fetch_suppresses_ready() {
    let api = Arc::new(
        FakeApi::new()
            .lists(vec![
                Ok(vec![pending_record("abc")]),
                Ok(vec![ready_record("abc")]),
            ])
            .gate_list_call(2),
    );
    let recorder = Arc::new(Recorder::default());

    let handle = poll_session(&api, "abc", &recorder).spawn();
    let session = Arc::clone(handle.session());

    api.entered.notified().await;
    let status_at_cancel = handle.status();
    handle.cancel();
    api.release.notify_one();

    let outcome = handle.outcome().await;
    assert_eq!(outcome, PollOutcome::Cancelled);
    assert_eq!(status_at_cancel, PollStatus::Processing);
    assert_eq!(session.status(), status_at_cancel);
    assert!(!recorder.statuses().contains(&PollStatus::Ready));
    assert!(recorder.notification_levels().is_empty());
    assert_eq!(api.list_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn cancel_while_waiting_stops_further_fetches() {
    let api = Arc::new(FakeApi::new().lists(vec![Ok(Vec::new())]));
    let recorder = Arc::new(Recorder::default());

    let handle = poll_session(&api, "abc", &recorder).spawn();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(api.list_calls(), 1);

    handle.cancel();
    let err = handle.wait().await.unwrap_err();
    assert!(matches!(err, TalkVaultError::Cancelled { .. }));

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(api.list_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn dropping_the_handle_cancels_the_session() {
    let api = Arc::new(FakeApi::new().lists(vec![Ok(Vec::new())]));
    let recorder = Arc::new(Recorder::default());

    let handle = poll_session(&api, "abc", &recorder).spawn();
    let session = Arc::clone(handle.session());
    tokio::time::sleep(Duration::from_millis(10)).await;
    drop(handle);

    assert!(session.is_cancelled());
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(api.list_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn ready_is_never_left() {
    let api = Arc::new(FakeApi::new().lists(vec![
        Ok(vec![ready_record("abc")]),
        Ok(vec![pending_record("abc")]),
    ]));
    let recorder = Arc::new(Recorder::default());
    let session = poll_session(&api, "abc", &recorder);

    let first = session.attempt().await;
    assert!(matches!(
        first,
        talkvault::pipeline::poll::Step::Finished(PollOutcome::Ready(_))
    ));
    for _ in 0..2 {
        let again = session.attempt().await;
        assert!(matches!(
            again,
            talkvault::pipeline::poll::Step::Finished(PollOutcome::Ready(ref r)) if r.id == "abc"
        ));
    }

    assert_eq!(api.list_calls(), 1);
    assert_eq!(session.status(), PollStatus::Ready);
    assert_eq!(recorder.statuses(), vec![PollStatus::Ready]);
    assert_eq!(recorder.notification_levels(), vec![NotificationLevel::Success]);
    assert!(matches!(session.finished(), Some(PollOutcome::Ready(_))));
}

#[tokio::test(start_paused = true)]
async fn empty_schedule_gives_up_without_fetching() {
    let api = Arc::new(FakeApi::new().lists(vec![Ok(vec![ready_record("abc")])]));
    let recorder = Arc::new(Recorder::default());
    let session = PollSession::new(
        Arc::clone(&api) as Arc<dyn HistoryApi>,
        "abc",
        BackoffSchedule::from_millis(Vec::<u64>::new()),
        LookupMode::Lenient,
        Arc::clone(&recorder) as ProgressCallback,
    );

    let err = Arc::clone(&session).spawn().wait().await.unwrap_err();

    assert!(matches!(
        err,
        TalkVaultError::PollTimeout { attempts: 0, .. }
    ));
    assert_eq!(api.list_calls(), 0);
    assert_eq!(session.status(), PollStatus::Error);
    assert_eq!(recorder.notification_levels(), vec![NotificationLevel::Failure]);
}

#[tokio::test]
#[should_panic(expected = "history backend exploded")]
async fn panic_in_poll_task_reaches_the_caller() {
    let api = Arc::new(FakeApi::new().panics_on_list());
    let recorder = Arc::new(Recorder::default());

    poll_session(&api, "abc", &recorder).spawn().outcome().await;
}

#[tokio::test(start_paused = true)]
async fn at_most_one_fetch_in_flight() {
    let api = Arc::new(
        FakeApi::new()
            .lists(vec![Ok(Vec::new())])
            .list_delay(Duration::from_millis(500)),
    );
    let recorder = Arc::new(Recorder::default());
    let session = poll_session(&api, "abc", &recorder);

    let (a, b) = tokio::join!(session.attempt(), session.attempt());
    let skipped = [&a, &b]
        .iter()
        .filter(|s| matches!(s, talkvault::pipeline::poll::Step::Skipped(_)))
        .count();

    assert_eq!(skipped, 1);
    assert_eq!(api.list_calls(), 1);
    assert_eq!(api.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(session.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn skipped_attempt_uses_next_delay() {
    let api = Arc::new(
        FakeApi::new()
            .lists(vec![Ok(Vec::new())])
            .list_delay(Duration::from_millis(500)),
    );
    let recorder = Arc::new(Recorder::default());
    let session = poll_session(&api, "abc", &recorder);

    let (_, b) = tokio::join!(session.attempt(), async {
        tokio::task::yield_now().await;
        session.attempt().await
    });
    assert_eq!(
        b,
        talkvault::pipeline::poll::Step::Skipped(Duration::from_secs(1))
    );
}

#[tokio::test(start_paused = true)]
async fn status_stream_ends_after_ready() {
    let api = Arc::new(FakeApi::new().lists(vec![
        Ok(vec![pending_record("abc")]),
        Ok(vec![ready_record("abc")]),
    ]));
    let recorder = Arc::new(Recorder::default());

    let handle = poll_session(&api, "abc", &recorder).spawn();
    let statuses: Vec<PollStatus> = status_stream(&handle).collect().await;

    assert_eq!(statuses.first(), Some(&PollStatus::Loading));
    assert_eq!(statuses.last(), Some(&PollStatus::Ready));
    assert!(statuses.iter().all(|s| *s != PollStatus::Error));
    handle.wait().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn lookup_by_saved_file_name_finds_record() {
    let mut record = ready_record("real-id");
    record.saved_file_name = Some("1700000000-chat".into());
    let api = Arc::new(FakeApi::new().lists(vec![Ok(vec![record])]));
    let recorder = Arc::new(Recorder::default());

    let found = poll_session(&api, "1700000000-chat.pdf", &recorder)
        .spawn()
        .wait()
        .await
        .unwrap();
    assert_eq!(found.id, "real-id");
}

#[tokio::test(start_paused = true)]
async fn strict_lookup_ignores_saved_file_name() {
    let mut record = ready_record("real-id");
    record.saved_file_name = Some("1700000000-chat".into());
    let api = Arc::new(FakeApi::new().lists(vec![Ok(vec![record])]));
    let recorder = Arc::new(Recorder::default());

    let session = PollSession::new(
        Arc::clone(&api) as Arc<dyn HistoryApi>,
        "1700000000-chat",
        BackoffSchedule::from_millis([0, 10]),
        LookupMode::Strict,
        Arc::clone(&recorder) as ProgressCallback,
    );
    let err = session.spawn().wait().await.unwrap_err();
    assert!(matches!(err, TalkVaultError::PollTimeout { attempts: 2, .. }));
}
