//! Chat thread entries.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use super::translation::TranslationCache;
use crate::language::LanguageCode;

/// Session-unique, increasing message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    /// The signed-in user.
    Me,
    /// The remote care provider.
    Provider,
    System,
}

/// How a self-authored message was entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageOrigin {
    #[default]
    Typed,
    Voice,
}

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: MessageId,
    pub text: String,
    pub lang: LanguageCode,
    pub sender: Sender,
    /// Display name of the author.
    pub author: String,
    pub origin: MessageOrigin,
    /// System notice reporting a failure.
    pub is_error: bool,
    pub created_at: DateTime<Utc>,
    pub translations: TranslationCache,
}

impl Message {
    fn new(id: MessageId, text: String, lang: LanguageCode, sender: Sender, author: String) -> Self {
        Self {
            id,
            text,
            lang,
            sender,
            author,
            origin: MessageOrigin::Typed,
            is_error: false,
            created_at: Utc::now(),
            translations: TranslationCache::default(),
        }
    }

    pub fn mine(
        id: MessageId,
        text: String,
        lang: LanguageCode,
        author: &str,
        origin: MessageOrigin,
    ) -> Self {
        Self {
            origin,
            ..Self::new(id, text, lang, Sender::Me, author.to_string())
        }
    }

    pub fn provider(id: MessageId, text: String, lang: LanguageCode) -> Self {
        Self::new(id, text, lang, Sender::Provider, "Provider".to_string())
    }

    pub fn system(id: MessageId, text: String, lang: LanguageCode) -> Self {
        Self::new(id, text, lang, Sender::System, "System".to_string())
    }

    pub fn system_error(id: MessageId, text: String, lang: LanguageCode) -> Self {
        Self {
            is_error: true,
            ..Self::system(id, text, lang)
        }
    }

    /// Text of the given rendition: the original, or a cached translation.
    pub fn text_in(&self, lang: LanguageCode) -> Option<&str> {
        if lang == self.lang {
            Some(&self.text)
        } else {
            self.translations.get(lang)
        }
    }
}
