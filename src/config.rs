//! Client configuration.
//!
//! Resolution order, later wins:
//! 1. built-in defaults
//! 2. `config.toml` in the platform config directory (or `--config <path>`)
//! 3. `HEALTHTRANSLATE_*` environment variables
//! 4. command-line flags (applied by the binary)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::language::LanguageCode;

/// Default remote service.
pub const DEFAULT_API_URL: &str = "https://healthtranslate.onrender.com";

/// Text-to-speech requests are abandoned after this many seconds.
const DEFAULT_TTS_TIMEOUT_SECS: u64 = 30;

/// Transport timeout for provider-response and translate calls.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

const ENV_API_URL: &str = "HEALTHTRANSLATE_API_URL";
const ENV_API_TOKEN: &str = "HEALTHTRANSLATE_API_TOKEN";
const ENV_USER: &str = "HEALTHTRANSLATE_USER";
const ENV_LANGUAGE: &str = "HEALTHTRANSLATE_LANG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the translation service.
    pub api_url: String,
    /// Bearer token sent with translate requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    /// Signed-in user. No user means no chat session can be opened.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Language of outgoing messages.
    pub my_language: LanguageCode,
    pub tts_timeout_secs: u64,
    pub request_timeout_secs: u64,
    /// `tracing` filter directive; `RUST_LOG` takes precedence.
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_token: None,
            username: None,
            my_language: LanguageCode::default(),
            tts_timeout_secs: DEFAULT_TTS_TIMEOUT_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            log_filter: "info".to_string(),
        }
    }
}

impl Config {
    /// Platform default location of `config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "healthtranslate")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from `path` (or the default location) and apply env overrides.
    ///
    /// A missing file is not an error; a malformed one is.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).or_else(Self::default_path);
        let mut config = match path {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        tracing::debug!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    /// Apply `HEALTHTRANSLATE_*` overrides. Empty values are ignored.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get(ENV_API_URL) {
            self.api_url = url;
        }
        if let Some(token) = get(ENV_API_TOKEN) {
            self.api_token = Some(token);
        }
        if let Some(user) = get(ENV_USER) {
            self.username = Some(user);
        }
        if let Some(code) = get(ENV_LANGUAGE) {
            match LanguageCode::from_str_code(&code) {
                Some(lang) => self.my_language = lang,
                None => tracing::warn!(code = %code, "Ignoring unsupported {ENV_LANGUAGE}"),
            }
        }
    }

    pub fn tts_timeout(&self) -> Duration {
        Duration::from_secs(self.tts_timeout_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Render as TOML (for `healthtranslate config`). The token is masked.
    pub fn to_toml_masked(&self) -> Result<String> {
        let mut shown = self.clone();
        if shown.api_token.is_some() {
            shown.api_token = Some("********".to_string());
        }
        Ok(toml::to_string_pretty(&shown)?)
    }
}
