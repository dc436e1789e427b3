//! Remote translation service contract.
//!
//! The session core talks to three endpoints:
//!
//! ```text
//! POST /provider-response {text, lang}                      → {response}
//! POST /translate         {text, source_lang, target_lang}  → {translated_text}
//! POST /text-to-speech    {text, lang}                      → {text, lang}
//! ```
//!
//! [`ChatBackend`] is the seam the session depends on; [`HttpBackend`] is the
//! production implementation over `reqwest`.

pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RemoteError;
use crate::language::LanguageCode;

pub use http::HttpBackend;

/// Payload value the translate endpoint returns on a domain-level failure.
pub const TRANSLATION_FAILED_SENTINEL: &str = "Translation failed";

// ── Wire types ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ProviderRequest<'a> {
    pub text: &'a str,
    pub lang: LanguageCode,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderReply {
    pub response: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TranslateRequest<'a> {
    pub text: &'a str,
    pub source_lang: LanguageCode,
    pub target_lang: LanguageCode,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranslateReply {
    #[serde(default)]
    pub translated_text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpeechRequest<'a> {
    pub text: &'a str,
    pub lang: LanguageCode,
}

/// Synthesis parameters returned by `/text-to-speech`.
///
/// The service echoes the text to speak together with the locale to speak it
/// in; the locale may carry a region (`"es-ES"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesisParams {
    pub text: String,
    pub lang: String,
}

/// Error body shape used by the service for non-2xx responses.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    pub detail: Option<String>,
}

// ── Backend trait ────────────────────────────────────────────────

/// Remote calls the chat session depends on.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Ask the care provider for a reply to `text`.
    async fn provider_response(&self, text: &str, lang: LanguageCode)
        -> Result<String, RemoteError>;

    /// Translate `text`. The raw `translated_text` is returned untouched;
    /// sentinel detection is the caller's concern.
    async fn translate(
        &self,
        text: &str,
        source: LanguageCode,
        target: LanguageCode,
    ) -> Result<String, RemoteError>;

    /// Fetch synthesis parameters for `text`. Implementations enforce the
    /// caller-side timeout and report it as [`RemoteError::Timeout`].
    async fn text_to_speech(
        &self,
        text: &str,
        lang: LanguageCode,
    ) -> Result<SynthesisParams, RemoteError>;
}

/// Whether a translate payload denotes failure despite a successful transport.
pub fn is_failed_translation(translated: &str) -> bool {
    let trimmed = translated.trim();
    trimmed.is_empty() || trimmed == TRANSLATION_FAILED_SENTINEL
}
