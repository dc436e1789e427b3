//! Session events for views, and the lifecycle signals that end a session.

use serde::{Deserialize, Serialize};

use super::message::{Message, MessageId};
use crate::language::LanguageCode;
use crate::speech::{CaptureState, PlaybackState};

/// Why a session is being torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// The view is navigating elsewhere.
    NavigationStarted,
    /// The history stack is about to change.
    BeforeHistoryChange,
    SignOut,
    /// The owning view was disposed.
    Disposed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// State change published to subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    MessageAppended {
        message: Message,
    },
    TranslationAdded {
        message_id: MessageId,
        lang: LanguageCode,
        text: String,
    },
    PlaybackChanged {
        state: PlaybackState,
    },
    CaptureChanged {
        state: CaptureState,
    },
    /// Transient toast; never part of the thread.
    Notice {
        level: NoticeLevel,
        text: String,
    },
    Closed {
        reason: LifecycleEvent,
    },
}
