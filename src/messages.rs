//! User-visible messages and fixed names.
//!
//! Every string an end user can see lives here, so wording changes happen in
//! one place and tests can check that none of them leak technical detail.
//! Status codes, paths and server internals belong in `tracing` output, never
//! in these constants.

/// File name given to pasted text when it is synthesized into an upload.
pub const PASTED_TEXT_FILE_NAME: &str = "pasted-text.txt";

/// File name used when a download carries no usable `Content-Disposition`.
pub const DEFAULT_DOWNLOAD_NAME: &str = "download";

/// Base name used when a record has no original file name.
pub const DEFAULT_BASE_NAME: &str = "converted";

pub const CONVERSION_READY: &str = "Conversion complete!";

pub const STATUS_UNAVAILABLE: &str = "Could not load the conversion status.";

pub const UPLOAD_UNCONFIRMED: &str = "The upload may have been processed, but the response could not be confirmed. Check your conversion history.";

pub const SESSION_EXPIRED: &str = "Your session has expired. Please log in again.";

pub const NO_INPUT: &str = "Select a file or enter some text.";

pub const FILE_NOT_FOUND: &str = "The selected file could not be found.";

pub const FILE_UNREADABLE: &str = "The selected file could not be read.";

pub const POLL_CANCELLED: &str = "Stopped waiting for the conversion result.";

pub const DOWNLOAD_FAILED: &str = "The download failed.";

pub const REQUEST_FAILED: &str = "The request failed. Please try again.";

#[cfg(test)]
mod tests {
    use super::*;

    const USER_MESSAGES: &[&str] = &[
        CONVERSION_READY,
        STATUS_UNAVAILABLE,
        UPLOAD_UNCONFIRMED,
        SESSION_EXPIRED,
        NO_INPUT,
        FILE_NOT_FOUND,
        FILE_UNREADABLE,
        POLL_CANCELLED,
        DOWNLOAD_FAILED,
        REQUEST_FAILED,
    ];

    #[test]
    fn user_messages_carry_no_digits() {
        for msg in USER_MESSAGES {
            assert!(
                !msg.chars().any(|c| c.is_ascii_digit()),
                "message leaks a number: {msg}"
            );
        }
    }

    #[test]
    fn user_messages_are_sentences() {
        for msg in USER_MESSAGES {
            assert!(
                msg.ends_with('.') || msg.ends_with('!'),
                "not a sentence: {msg}"
            );
        }
    }

    #[test]
    fn pasted_text_is_a_txt_file() {
        assert!(PASTED_TEXT_FILE_NAME.ends_with(".txt"));
    }
}
