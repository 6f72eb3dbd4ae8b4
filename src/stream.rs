//! Streaming status API: observe a poll session as a `Stream`.
//!
//! A [`PollHandle`] already exposes the latest status through a `watch`
//! receiver. [`status_stream`] wraps that receiver so hosts built around
//! streams (SSE endpoints, `StreamExt` pipelines) can consume status updates
//! directly. The stream yields the current status first, then every
//! published change, and ends after a terminal status or when the session
//! is cancelled.

use crate::pipeline::poll::{PollHandle, PollStatus};
use futures::stream;
use std::pin::Pin;
use tokio::sync::watch;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;

/// A boxed stream of poll statuses.
pub type StatusStream = Pin<Box<dyn Stream<Item = PollStatus> + Send>>;

struct State {
    rx: watch::Receiver<PollStatus>,
    cancel: CancellationToken,
    started: bool,
    done: bool,
}

/// Stream the statuses of `handle`'s session.
pub fn status_stream(handle: &PollHandle) -> StatusStream {
    let state = State {
        rx: handle.subscribe(),
        cancel: handle.cancellation_token(),
        started: false,
        done: false,
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        if state.done {
            return None;
        }
        if !state.started {
            state.started = true;
            let status = *state.rx.borrow_and_update();
            state.done = status.is_terminal();
            return Some((status, state));
        }
        tokio::select! {
            _ = state.cancel.cancelled() => None,
            changed = state.rx.changed() => {
                changed.ok()?;
                let status = *state.rx.borrow_and_update();
                state.done = status.is_terminal();
                Some((status, state))
            }
        }
    }))
}
