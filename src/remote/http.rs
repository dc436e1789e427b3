//! `reqwest` implementation of [`ChatBackend`].

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

use super::{
    ChatBackend, ErrorBody, ProviderReply, ProviderRequest, SpeechRequest, SynthesisParams,
    TranslateReply, TranslateRequest,
};
use crate::config::Config;
use crate::error::RemoteError;
use crate::language::LanguageCode;

const PROVIDER_ENDPOINT: &str = "provider-response";
const TRANSLATE_ENDPOINT: &str = "translate";
const SPEECH_ENDPOINT: &str = "text-to-speech";

/// HTTP client for the translation service.
pub struct HttpBackend {
    base_url: String,
    api_token: Option<String>,
    tts_timeout: Duration,
    http: reqwest::Client,
}

impl HttpBackend {
    /// Build a client from the loaded configuration.
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            base_url: config.api_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
            tts_timeout: config.tts_timeout(),
            http,
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint)
    }

    async fn post<B, R>(
        &self,
        endpoint: &'static str,
        body: &B,
        timeout: Option<Duration>,
        authorize: bool,
    ) -> Result<R, RemoteError>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let mut request = self.http.post(self.url(endpoint)).json(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        if authorize {
            if let Some(token) = &self.api_token {
                request = request.bearer_auth(token);
            }
        }

        let transport = |source: reqwest::Error| match timeout {
            Some(after) if source.is_timeout() => RemoteError::Timeout { endpoint, after },
            _ => RemoteError::Transport { endpoint, source },
        };

        let resp = request.send().await.map_err(transport)?;
        let status = resp.status();
        if !status.is_success() {
            let detail = resp
                .json::<ErrorBody>()
                .await
                .ok()
                .and_then(|body| body.detail);
            tracing::warn!(endpoint, status = status.as_u16(), ?detail, "Remote call rejected");
            return Err(RemoteError::Status {
                endpoint,
                status: status.as_u16(),
                detail,
            });
        }

        let bytes = resp.bytes().await.map_err(transport)?;
        serde_json::from_slice(&bytes).map_err(|e| RemoteError::Decode {
            endpoint,
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn provider_response(
        &self,
        text: &str,
        lang: LanguageCode,
    ) -> Result<String, RemoteError> {
        tracing::debug!(lang = lang.as_str(), text_len = text.len(), "Requesting provider response");
        let reply: ProviderReply = self
            .post(PROVIDER_ENDPOINT, &ProviderRequest { text, lang }, None, false)
            .await?;
        Ok(reply.response)
    }

    async fn translate(
        &self,
        text: &str,
        source: LanguageCode,
        target: LanguageCode,
    ) -> Result<String, RemoteError> {
        tracing::debug!(
            source = source.as_str(),
            target = target.as_str(),
            "Requesting translation"
        );
        let body = TranslateRequest {
            text,
            source_lang: source,
            target_lang: target,
        };
        let reply: TranslateReply = self.post(TRANSLATE_ENDPOINT, &body, None, true).await?;
        Ok(reply.translated_text)
    }

    async fn text_to_speech(
        &self,
        text: &str,
        lang: LanguageCode,
    ) -> Result<SynthesisParams, RemoteError> {
        tracing::debug!(lang = lang.as_str(), text_len = text.len(), "Requesting speech parameters");
        self.post(
            SPEECH_ENDPOINT,
            &SpeechRequest { text, lang },
            Some(self.tts_timeout),
            false,
        )
        .await
    }
}

// ── Tests ────────────────────────────────────────────────────────
