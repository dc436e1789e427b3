//! Per-message translation memo.
//!
//! A language is marked pending the moment a request is issued, so a second
//! request for the same language is turned away before the first resolves.
//! Entries are write-once.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::language::LanguageCode;

/// Whether a translation request may go to the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TranslationGate {
    /// Target equals the message language.
    SameLanguage,
    /// Already translated.
    Cached,
    /// A request for this language is in flight.
    Pending,
    /// Caller now owns the request and must `complete` or `release` it.
    Reserved,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TranslationCache {
    entries: BTreeMap<LanguageCode, String>,
    #[serde(skip)]
    pending: BTreeSet<LanguageCode>,
}

impl TranslationCache {
    pub fn reserve(&mut self, source: LanguageCode, target: LanguageCode) -> TranslationGate {
        if source == target {
            TranslationGate::SameLanguage
        } else if self.entries.contains_key(&target) {
            TranslationGate::Cached
        } else if !self.pending.insert(target) {
            TranslationGate::Pending
        } else {
            TranslationGate::Reserved
        }
    }

    /// Store a translation. Returns `false` if one was already present, in
    /// which case the existing text is kept.
    pub fn complete(&mut self, target: LanguageCode, text: String) -> bool {
        self.pending.remove(&target);
        if self.entries.contains_key(&target) {
            return false;
        }
        self.entries.insert(target, text);
        true
    }

    /// Give up a reservation after a failed request.
    pub fn release(&mut self, target: LanguageCode) {
        self.pending.remove(&target);
    }

    pub fn get(&self, lang: LanguageCode) -> Option<&str> {
        self.entries.get(&lang).map(String::as_str)
    }

    pub fn is_pending(&self, lang: LanguageCode) -> bool {
        self.pending.contains(&lang)
    }

    pub fn iter(&self) -> impl Iterator<Item = (LanguageCode, &str)> {
        self.entries.iter().map(|(lang, text)| (*lang, text.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LanguageCode::{En, Es, Fr};

    #[test]
    fn same_language_is_never_reserved() {
        let mut cache = TranslationCache::default();
        assert_eq!(cache.reserve(En, En), TranslationGate::SameLanguage);
        assert!(!cache.is_pending(En));
    }

    #[test]
    fn second_reservation_sees_pending() {
        let mut cache = TranslationCache::default();
        assert_eq!(cache.reserve(En, Es), TranslationGate::Reserved);
        assert_eq!(cache.reserve(En, Es), TranslationGate::Pending);
        assert_eq!(cache.reserve(En, Fr), TranslationGate::Reserved);
    }

    #[test]
    fn entries_are_write_once() {
        let mut cache = TranslationCache::default();
        cache.reserve(En, Es);
        assert!(cache.complete(Es, "Hola".into()));
        assert!(!cache.complete(Es, "Buenas".into()));
        assert_eq!(cache.get(Es), Some("Hola"));
        assert_eq!(cache.reserve(En, Es), TranslationGate::Cached);
    }

    #[test]
    fn release_allows_retry_without_caching() {
        let mut cache = TranslationCache::default();
        cache.reserve(En, Es);
        cache.release(Es);
        assert!(cache.is_empty());
        assert_eq!(cache.reserve(En, Es), TranslationGate::Reserved);
    }

    #[test]
    fn serializes_entries_only() {
        let mut cache = TranslationCache::default();
        cache.reserve(En, Es);
        cache.complete(Es, "Hola".into());
        cache.reserve(En, Fr);
        assert_eq!(
            serde_json::to_value(&cache).unwrap(),
            serde_json::json!({"es": "Hola"})
        );
    }
}
