//! Scripted capabilities and backend for unit tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};

use crate::error::RemoteError;
use crate::language::LanguageCode;
use crate::remote::{ChatBackend, SynthesisParams};
use crate::speech::{
    CaptureRun, RecognizerEvent, SpeechRecognizer, SpeechSynthesizer, SynthesisEvent, Utterance,
    Voice,
};

pub fn voice(name: &str, locale: &str, is_default: bool) -> Voice {
    Voice {
        name: name.into(),
        locale: locale.into(),
        is_default,
    }
}

// ── Synthesizer ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthCall {
    Speak(Utterance),
    Pause,
    Resume,
    Cancel,
}

#[derive(Default)]
struct SynthInner {
    voices: Vec<Voice>,
    calls: Vec<SynthCall>,
    fail_next: Option<String>,
    events: Option<mpsc::UnboundedSender<SynthesisEvent>>,
}

#[derive(Clone, Default)]
pub struct MockSynthesizer {
    inner: Arc<Mutex<SynthInner>>,
}

impl MockSynthesizer {
    pub fn with_voices(voices: Vec<Voice>) -> Self {
        let synth = Self::default();
        synth.set_voices(voices);
        synth
    }

    pub fn set_voices(&self, voices: Vec<Voice>) {
        self.inner.lock().voices = voices;
    }

    pub fn fail_next_speak(&self, message: &str) {
        self.inner.lock().fail_next = Some(message.to_string());
    }

    pub fn calls(&self) -> Vec<SynthCall> {
        self.inner.lock().calls.clone()
    }

    pub fn spoken(&self) -> Vec<Utterance> {
        self.inner
            .lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                SynthCall::Speak(u) => Some(u.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn is_subscribed(&self) -> bool {
        self.inner.lock().events.is_some()
    }

    /// Deliver an event as the engine would.
    pub fn emit(&self, event: SynthesisEvent) {
        if let Some(tx) = &self.inner.lock().events {
            let _ = tx.send(event);
        }
    }
}

impl SpeechSynthesizer for MockSynthesizer {
    fn voices(&self) -> Vec<Voice> {
        self.inner.lock().voices.clone()
    }

    fn speak(&self, utterance: Utterance) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        if let Some(message) = inner.fail_next.take() {
            anyhow::bail!(message);
        }
        inner.calls.push(SynthCall::Speak(utterance));
        Ok(())
    }

    fn pause(&self) {
        self.inner.lock().calls.push(SynthCall::Pause);
    }

    fn resume(&self) {
        self.inner.lock().calls.push(SynthCall::Resume);
    }

    fn cancel(&self) {
        self.inner.lock().calls.push(SynthCall::Cancel);
    }

    fn subscribe(&self, events: mpsc::UnboundedSender<SynthesisEvent>) {
        self.inner.lock().events = Some(events);
    }

    fn unsubscribe(&self) {
        self.inner.lock().events = None;
    }
}

// ── Recognizer ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognizerCall {
    Start(LanguageCode),
    Stop,
    Abort,
    SetLanguage(LanguageCode),
}

#[derive(Default)]
struct RecognizerInner {
    calls: Vec<RecognizerCall>,
    fail_next: Option<String>,
    last_run: Option<CaptureRun>,
    events: Option<mpsc::UnboundedSender<RecognizerEvent>>,
}

#[derive(Clone, Default)]
pub struct MockRecognizer {
    inner: Arc<Mutex<RecognizerInner>>,
}

impl MockRecognizer {
    pub fn fail_next_start(&self, message: &str) {
        self.inner.lock().fail_next = Some(message.to_string());
    }

    pub fn calls(&self) -> Vec<RecognizerCall> {
        self.inner.lock().calls.clone()
    }

    pub fn is_subscribed(&self) -> bool {
        self.inner.lock().events.is_some()
    }

    /// Run handed to the latest successful `start`.
    pub fn last_run(&self) -> Option<CaptureRun> {
        self.inner.lock().last_run
    }

    pub fn emit(&self, event: RecognizerEvent) {
        if let Some(tx) = &self.inner.lock().events {
            let _ = tx.send(event);
        }
    }
}

impl SpeechRecognizer for MockRecognizer {
    fn start(&self, run: CaptureRun, lang: LanguageCode) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        if let Some(message) = inner.fail_next.take() {
            anyhow::bail!(message);
        }
        inner.last_run = Some(run);
        inner.calls.push(RecognizerCall::Start(lang));
        Ok(())
    }

    fn stop(&self) {
        self.inner.lock().calls.push(RecognizerCall::Stop);
    }

    fn abort(&self) {
        self.inner.lock().calls.push(RecognizerCall::Abort);
    }

    fn set_language(&self, lang: LanguageCode) -> bool {
        self.inner.lock().calls.push(RecognizerCall::SetLanguage(lang));
        true
    }

    fn subscribe(&self, events: mpsc::UnboundedSender<RecognizerEvent>) {
        self.inner.lock().events = Some(events);
    }

    fn unsubscribe(&self) {
        self.inner.lock().events = None;
    }
}

// ── Backend ──────────────────────────────────────────────────────

/// Scripted remote service. Each endpoint pops its next scripted result;
/// an empty script yields a canned success. While held, every call parks
/// until [`MockBackend::release`].
#[derive(Clone, Default)]
pub struct MockBackend {
    inner: Arc<BackendInner>,
}

#[derive(Default)]
struct BackendInner {
    replies: Mutex<VecDeque<Result<String, RemoteError>>>,
    translations: Mutex<VecDeque<Result<String, RemoteError>>>,
    speech: Mutex<VecDeque<Result<SynthesisParams, RemoteError>>>,
    provider_calls: AtomicUsize,
    translate_calls: AtomicUsize,
    tts_calls: AtomicUsize,
    held: Mutex<Option<Arc<Notify>>>,
    parked: AtomicUsize,
    parked_changed: Notify,
}

impl MockBackend {
    pub fn reply(&self, result: Result<&str, RemoteError>) -> &Self {
        self.inner
            .replies
            .lock()
            .push_back(result.map(str::to_string));
        self
    }

    pub fn translation(&self, result: Result<&str, RemoteError>) -> &Self {
        self.inner
            .translations
            .lock()
            .push_back(result.map(str::to_string));
        self
    }

    pub fn speech(&self, result: Result<SynthesisParams, RemoteError>) -> &Self {
        self.inner.speech.lock().push_back(result);
        self
    }

    /// Park calls until [`release`](Self::release).
    pub fn hold(&self) {
        self.inner.parked.store(0, Ordering::SeqCst);
        *self.inner.held.lock() = Some(Arc::new(Notify::new()));
    }

    pub fn release(&self) {
        if let Some(gate) = self.inner.held.lock().take() {
            gate.notify_waiters();
        }
    }

    /// Resolves once `count` calls are parked since [`hold`](Self::hold).
    pub async fn wait_parked(&self, count: usize) {
        loop {
            let changed = self.inner.parked_changed.notified();
            if self.inner.parked.load(Ordering::SeqCst) >= count {
                return;
            }
            changed.await;
        }
    }

    pub fn provider_calls(&self) -> usize {
        self.inner.provider_calls.load(Ordering::SeqCst)
    }

    pub fn translate_calls(&self) -> usize {
        self.inner.translate_calls.load(Ordering::SeqCst)
    }

    pub fn tts_calls(&self) -> usize {
        self.inner.tts_calls.load(Ordering::SeqCst)
    }

    async fn gate(&self) {
        let held = self.inner.held.lock().clone();
        let Some(gate) = held else {
            return;
        };
        let released = gate.notified();
        self.inner.parked.fetch_add(1, Ordering::SeqCst);
        self.inner.parked_changed.notify_waiters();
        if self.inner.held.lock().is_none() {
            return;
        }
        released.await;
    }
}

#[async_trait]
impl ChatBackend for MockBackend {
    async fn provider_response(
        &self,
        text: &str,
        _lang: LanguageCode,
    ) -> Result<String, RemoteError> {
        self.inner.provider_calls.fetch_add(1, Ordering::SeqCst);
        self.gate().await;
        let scripted = self.inner.replies.lock().pop_front();
        scripted.unwrap_or_else(|| Ok(format!("Provider reply to: {text}")))
    }

    async fn translate(
        &self,
        text: &str,
        _source: LanguageCode,
        target: LanguageCode,
    ) -> Result<String, RemoteError> {
        self.inner.translate_calls.fetch_add(1, Ordering::SeqCst);
        self.gate().await;
        let scripted = self.inner.translations.lock().pop_front();
        scripted.unwrap_or_else(|| Ok(format!("[{target}] {text}")))
    }

    async fn text_to_speech(
        &self,
        text: &str,
        lang: LanguageCode,
    ) -> Result<SynthesisParams, RemoteError> {
        self.inner.tts_calls.fetch_add(1, Ordering::SeqCst);
        self.gate().await;
        let scripted = self.inner.speech.lock().pop_front();
        scripted.unwrap_or_else(|| {
            Ok(SynthesisParams {
                text: text.to_string(),
                lang: lang.as_str().to_string(),
            })
        })
    }
}
