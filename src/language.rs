//! Languages offered by the chat client.
//!
//! Codes are ISO 639-1. Region-tagged locales coming from the platform
//! (`es-MX`, `zh_CN`) are accepted by their base subtag.

use serde::{Deserialize, Serialize};
use std::fmt;

// ── Language codes ───────────────────────────────────────────────

/// ISO 639-1 language codes a conversation can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LanguageCode {
    #[default]
    En, // English
    Es, // Spanish
    Fr, // French
    Ar, // Arabic
    Ur, // Urdu
    Zh, // Chinese
    Hi, // Hindi
    Pt, // Portuguese
}

impl LanguageCode {
    /// Get the ISO 639-1 code string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Es => "es",
            Self::Fr => "fr",
            Self::Ar => "ar",
            Self::Ur => "ur",
            Self::Zh => "zh",
            Self::Hi => "hi",
            Self::Pt => "pt",
        }
    }

    /// Get the human-readable language name.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::En => "English",
            Self::Es => "Spanish",
            Self::Fr => "French",
            Self::Ar => "Arabic",
            Self::Ur => "Urdu",
            Self::Zh => "Chinese",
            Self::Hi => "Hindi",
            Self::Pt => "Portuguese",
        }
    }

    /// Parse from a code or locale string (case-insensitive, region ignored).
    pub fn from_str_code(code: &str) -> Option<Self> {
        match base_subtag(code).to_ascii_lowercase().as_str() {
            "en" => Some(Self::En),
            "es" => Some(Self::Es),
            "fr" => Some(Self::Fr),
            "ar" => Some(Self::Ar),
            "ur" => Some(Self::Ur),
            "zh" => Some(Self::Zh),
            "hi" => Some(Self::Hi),
            "pt" => Some(Self::Pt),
            _ => None,
        }
    }

    /// Return all supported language codes, in menu order.
    pub fn all() -> &'static [LanguageCode] {
        &[
            Self::En,
            Self::Es,
            Self::Fr,
            Self::Ar,
            Self::Ur,
            Self::Zh,
            Self::Hi,
            Self::Pt,
        ]
    }
}

impl fmt::Display for LanguageCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LanguageCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_code(s).ok_or_else(|| format!("unsupported language code: {s}"))
    }
}

/// Primary language subtag of a locale: `"es-MX"` → `"es"`, `"zh_CN"` → `"zh"`.
pub fn base_subtag(locale: &str) -> &str {
    locale
        .split(['-', '_'])
        .next()
        .unwrap_or(locale)
        .trim()
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_code_roundtrip() {
        for lang in LanguageCode::all() {
            let code = lang.as_str();
            assert_eq!(
                LanguageCode::from_str_code(code),
                Some(*lang),
                "Roundtrip failed for {code}"
            );
        }
    }

    #[test]
    fn parse_is_case_insensitive_and_ignores_region() {
        assert_eq!(LanguageCode::from_str_code("ES"), Some(LanguageCode::Es));
        assert_eq!(LanguageCode::from_str_code("es-MX"), Some(LanguageCode::Es));
        assert_eq!(LanguageCode::from_str_code("zh_CN"), Some(LanguageCode::Zh));
        assert_eq!(LanguageCode::from_str_code("xx"), None);
        assert_eq!(LanguageCode::from_str_code(""), None);
    }

    #[test]
    fn base_subtag_strips_region() {
        assert_eq!(base_subtag("en-US"), "en");
        assert_eq!(base_subtag("pt_BR"), "pt");
        assert_eq!(base_subtag("ar"), "ar");
    }

    #[test]
    fn serde_uses_lowercase_codes() {
        assert_eq!(serde_json::to_string(&LanguageCode::Ur).unwrap(), "\"ur\"");
        let parsed: LanguageCode = serde_json::from_str("\"hi\"").unwrap();
        assert_eq!(parsed, LanguageCode::Hi);
    }

    #[test]
    fn display_names() {
        assert_eq!(LanguageCode::En.display_name(), "English");
        assert_eq!(LanguageCode::Ur.display_name(), "Urdu");
        assert_eq!(LanguageCode::default(), LanguageCode::En);
    }
}
