//! Error taxonomy for the session core.
//!
//! Nothing here is fatal: every variant leaves the session in the state it
//! had before the failed operation.

use std::time::Duration;

/// Failure of a call to the remote translation service.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("{endpoint}: request failed: {source}")]
    Transport {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{endpoint}: no response within {}s", .after.as_secs())]
    Timeout {
        endpoint: &'static str,
        after: Duration,
    },
    #[error("{endpoint}: HTTP {status}{}", detail_suffix(.detail))]
    Status {
        endpoint: &'static str,
        status: u16,
        detail: Option<String>,
    },
    #[error("{endpoint}: malformed response: {message}")]
    Decode {
        endpoint: &'static str,
        message: String,
    },
}

fn detail_suffix(detail: &Option<String>) -> String {
    detail.as_deref().map(|d| format!(": {d}")).unwrap_or_default()
}

/// Errors surfaced by the chat session and its controllers.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("speech recognition is not available")]
    CaptureUnavailable,
    #[error("speech recognition is already listening")]
    CaptureAlreadyActive,
    #[error("speech synthesis is not available")]
    PlaybackUnavailable,
    #[error("speech synthesis failed: {0}")]
    Synthesis(String),
    #[error(transparent)]
    RemoteCallFailed(#[from] RemoteError),
    #[error("translation service reported failure")]
    TranslationFailedSentinel,
    #[error("chat session has been closed")]
    SessionClosed,
    #[error("no signed-in user")]
    NotAuthenticated,
}

pub type Result<T, E = ChatError> = std::result::Result<T, E>;
