//! Protocol stages for uploading a chat log and waiting for its documents.
//!
//! Each submodule implements one step. They talk to the server only through
//! [`crate::api::HistoryApi`], so every stage can be driven by an in-memory
//! fake in tests.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ submit ──▶ reconcile ──▶ poll ──▶ lookup
//! (file/text) (POST)   (ambiguous    (until    (key → record)
//!                       only)         ready)
//! ```
//!
//! 1. [`input`]: turn a file or pasted text into an upload body
//! 2. [`submit`]: upload and classify the response; ambiguous outcomes
//!    fall through to reconciliation
//! 3. [`reconcile`]: scan the history for the record an ambiguous upload
//!    produced, on a bounded backoff schedule
//! 4. [`poll`]: cancellable session that re-fetches a record until an
//!    artifact appears or the schedule is exhausted
//! 5. [`lookup`]: resolve a lookup key against the history list

pub mod input;
pub mod lookup;
pub mod poll;
pub mod reconcile;
pub mod submit;
