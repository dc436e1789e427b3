//! Chat session controller.
//!
//! Ties together:
//! - the message thread and per-message [`TranslationCache`]s
//! - [`SpeechPlaybackController`] for exclusive read-aloud
//! - [`SpeechCaptureController`] for voice input
//! - a [`ChatBackend`] for provider replies, translation and synthesis
//!
//! ## Architecture
//!
//! ```text
//!  view ─▸ send / translate / play ─▸ ChatSession ─▸ ChatBackend
//!                                         │
//!  recognizer ─▸ RecognizerEvent ─┐       ├─ SessionEvent ─▸ subscribers
//!  synthesizer ─▸ SynthesisEvent ─┼─▸ run │
//!  lifecycle ─▸ LifecycleEvent ───┘       └─ teardown
//! ```
//!
//! ## Design
//! - State sits behind `parking_lot` mutexes and no guard is held across an
//!   `.await`; the thread and the two controllers are never locked together.
//! - Exclusive playback is claimed inside one critical section before the
//!   text-to-speech call suspends.
//! - Every remote call is raced against the session's cancellation token, and
//!   results are re-checked against the current state before they land.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use super::events::{LifecycleEvent, NoticeLevel, SessionEvent};
use super::message::{Message, MessageId, MessageOrigin};
use super::translation::TranslationGate;
use crate::auth::{Authenticator, UserProfile};
use crate::error::{ChatError, Result};
use crate::language::LanguageCode;
use crate::remote::{is_failed_translation, ChatBackend};
use crate::speech::{
    CaptureOutput, CaptureState, PlaybackState, PlaybackStatus, PlaybackUpdate, RecognizerEvent,
    RenditionSpec, SourceId, SpeechCaptureController, SpeechPlaybackController, SpeechRecognizer,
    SpeechSynthesizer, SynthesisEvent, Variant,
};

pub const WELCOME_TEXT: &str = "Welcome to Healthcare Chat! How can I assist you today?";
pub const PROVIDER_FAILURE_TEXT: &str = "Error: Could not get provider response.";

/// Buffered events per subscriber before the slowest one starts lagging.
const EVENT_CAPACITY: usize = 256;

// ── Construction inputs ───────────────────────────────────────────

/// Local speech capabilities. Either may be absent.
#[derive(Default)]
pub struct Capabilities {
    pub recognizer: Option<Box<dyn SpeechRecognizer>>,
    pub synthesizer: Option<Box<dyn SpeechSynthesizer>>,
}

/// Capability event streams, consumed by [`ChatSession::run`].
pub struct SessionChannels {
    pub recognizer: mpsc::UnboundedReceiver<RecognizerEvent>,
    pub synthesis: mpsc::UnboundedReceiver<SynthesisEvent>,
}

// ── Outcomes ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Blank input; nothing was sent.
    Ignored,
    Replied { sent: MessageId, reply: MessageId },
    /// The provider call failed and an error notice joined the thread.
    ProviderFailed { sent: MessageId, notice: MessageId },
    /// The session closed before the reply arrived.
    Discarded { sent: MessageId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranslationOutcome {
    /// No such message.
    Skipped,
    /// No request was needed or allowed.
    NotRequested(TranslationGate),
    Translated(String),
    Discarded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayOutcome {
    /// Unknown message, or the translation does not exist yet.
    Skipped,
    /// The source was already active and has been stopped.
    Stopped,
    Started(SourceId),
    /// Superseded or closed while synthesis parameters were loading.
    Discarded,
}

// ── Thread ────────────────────────────────────────────────────────

struct Thread {
    messages: Vec<Message>,
    my_language: LanguageCode,
    next_id: u64,
}

impl Thread {
    fn append(&mut self, build: impl FnOnce(MessageId) -> Message) -> Message {
        let message = build(MessageId(self.next_id));
        self.next_id += 1;
        self.messages.push(message.clone());
        message
    }

    fn find(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    fn find_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == id)
    }
}

/// Counts a provider call for `is_awaiting_reply` until dropped.
struct AwaitingReply<'a>(&'a AtomicUsize);

impl<'a> AwaitingReply<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for AwaitingReply<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

// ── Session ───────────────────────────────────────────────────────

pub struct ChatSession {
    user: UserProfile,
    backend: Arc<dyn ChatBackend>,
    thread: Mutex<Thread>,
    playback: Mutex<SpeechPlaybackController>,
    capture: Mutex<SpeechCaptureController>,
    events: broadcast::Sender<SessionEvent>,
    cancel: CancellationToken,
    closed: AtomicBool,
    awaiting: AtomicUsize,
}

impl ChatSession {
    /// Open a session for the signed-in user. The thread starts with the
    /// welcome message.
    pub fn open(
        auth: &dyn Authenticator,
        backend: Arc<dyn ChatBackend>,
        capabilities: Capabilities,
        my_language: LanguageCode,
    ) -> Result<(Arc<Self>, SessionChannels)> {
        let user = auth.current_user().ok_or(ChatError::NotAuthenticated)?;

        let (recognizer_tx, recognizer_rx) = mpsc::unbounded_channel();
        let (synthesis_tx, synthesis_rx) = mpsc::unbounded_channel();
        let capture =
            SpeechCaptureController::new(capabilities.recognizer, my_language, recognizer_tx);
        let playback = SpeechPlaybackController::new(capabilities.synthesizer, synthesis_tx);

        let mut thread = Thread {
            messages: Vec::new(),
            my_language,
            next_id: 1,
        };
        thread.append(|id| Message::system(id, WELCOME_TEXT.to_string(), LanguageCode::En));

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        tracing::info!(
            user = %user.username,
            lang = my_language.as_str(),
            capture = capture.is_available(),
            playback = playback.is_available(),
            "Chat session opened"
        );

        let session = Arc::new(Self {
            user,
            backend,
            thread: Mutex::new(thread),
            playback: Mutex::new(playback),
            capture: Mutex::new(capture),
            events,
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
            awaiting: AtomicUsize::new(0),
        });
        let channels = SessionChannels {
            recognizer: recognizer_rx,
            synthesis: synthesis_rx,
        };
        Ok((session, channels))
    }

    // ── Views ────────────────────────────────────────────────────

    pub fn user(&self) -> &UserProfile {
        &self.user
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.thread.lock().messages.clone()
    }

    pub fn message(&self, id: MessageId) -> Option<Message> {
        self.thread.lock().find(id).cloned()
    }

    pub fn my_language(&self) -> LanguageCode {
        self.thread.lock().my_language
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.playback.lock().state().clone()
    }

    pub fn capture_state(&self) -> CaptureState {
        self.capture.lock().state().clone()
    }

    /// A provider reply is outstanding.
    pub fn is_awaiting_reply(&self) -> bool {
        self.awaiting.load(Ordering::SeqCst) > 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(ChatError::SessionClosed)
        } else {
            Ok(())
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn notice(&self, level: NoticeLevel, text: String) {
        self.emit(SessionEvent::Notice { level, text });
    }

    fn emit_playback(&self) {
        let state = self.playback_state();
        self.emit(SessionEvent::PlaybackChanged { state });
    }

    fn emit_capture(&self) {
        let state = self.capture_state();
        self.emit(SessionEvent::CaptureChanged { state });
    }

    // ── Messaging ────────────────────────────────────────────────

    /// Append `text` as the user's message and ask the provider for a reply.
    ///
    /// The user's message is visible before the reply arrives and is never
    /// withdrawn. A failed provider call appends an error notice instead of
    /// failing the call.
    pub async fn send_message(&self, text: &str, origin: MessageOrigin) -> Result<SendOutcome> {
        self.ensure_open()?;
        if text.trim().is_empty() {
            return Ok(SendOutcome::Ignored);
        }

        let (sent, lang) = {
            let mut thread = self.thread.lock();
            let lang = thread.my_language;
            let username = self.user.username.as_str();
            let sent =
                thread.append(|id| Message::mine(id, text.to_string(), lang, username, origin));
            (sent, lang)
        };
        let sent_id = sent.id;
        tracing::debug!(message_id = %sent_id, lang = lang.as_str(), ?origin, "Message sent");
        self.emit(SessionEvent::MessageAppended { message: sent });

        let reply = {
            let _awaiting = AwaitingReply::enter(&self.awaiting);
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => None,
                reply = self.backend.provider_response(text, lang) => Some(reply),
            }
        };
        let Some(reply) = reply.filter(|_| !self.is_closed()) else {
            tracing::debug!(message_id = %sent_id, "Session closed; provider reply dropped");
            return Ok(SendOutcome::Discarded { sent: sent_id });
        };

        match reply {
            Ok(response) => {
                let message = self
                    .thread
                    .lock()
                    .append(|id| Message::provider(id, response, lang));
                let reply_id = message.id;
                self.emit(SessionEvent::MessageAppended { message });
                Ok(SendOutcome::Replied {
                    sent: sent_id,
                    reply: reply_id,
                })
            }
            Err(e) => {
                tracing::warn!(message_id = %sent_id, error = %e, "Provider response failed");
                let message = self.thread.lock().append(|id| {
                    Message::system_error(id, PROVIDER_FAILURE_TEXT.to_string(), LanguageCode::En)
                });
                let notice_id = message.id;
                self.emit(SessionEvent::MessageAppended { message });
                Ok(SendOutcome::ProviderFailed {
                    sent: sent_id,
                    notice: notice_id,
                })
            }
        }
    }

    /// Translate message `id` into `target`, at most once per language.
    pub async fn translate(
        &self,
        id: MessageId,
        target: LanguageCode,
    ) -> Result<TranslationOutcome> {
        self.ensure_open()?;

        let (text, source) = {
            let mut thread = self.thread.lock();
            let Some(message) = thread.find_mut(id) else {
                return Ok(TranslationOutcome::Skipped);
            };
            let gate = message.translations.reserve(message.lang, target);
            if gate != TranslationGate::Reserved {
                tracing::trace!(message_id = %id, lang = target.as_str(), ?gate, "Translation not requested");
                return Ok(TranslationOutcome::NotRequested(gate));
            }
            (message.text.clone(), message.lang)
        };

        let result = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Ok(TranslationOutcome::Discarded),
            result = self.backend.translate(&text, source, target) => result,
        };
        if self.is_closed() {
            return Ok(TranslationOutcome::Discarded);
        }

        let failure = match result {
            Ok(translated) if !is_failed_translation(&translated) => {
                let stored = self
                    .thread
                    .lock()
                    .find_mut(id)
                    .map(|m| m.translations.complete(target, translated.clone()))
                    .unwrap_or(false);
                if stored {
                    tracing::debug!(message_id = %id, lang = target.as_str(), "Translation cached");
                    self.emit(SessionEvent::TranslationAdded {
                        message_id: id,
                        lang: target,
                        text: translated.clone(),
                    });
                }
                return Ok(TranslationOutcome::Translated(translated));
            }
            Ok(_) => ChatError::TranslationFailedSentinel,
            Err(e) => ChatError::from(e),
        };

        if let Some(message) = self.thread.lock().find_mut(id) {
            message.translations.release(target);
        }
        tracing::warn!(message_id = %id, lang = target.as_str(), error = %failure, "Translation failed");
        self.notice(
            NoticeLevel::Error,
            format!("Could not translate to {}: {failure}", target.display_name()),
        );
        Err(failure)
    }

    // ── Playback ─────────────────────────────────────────────────

    fn rendition(&self, id: MessageId, variant: Variant) -> Option<(String, LanguageCode)> {
        let thread = self.thread.lock();
        let message = thread.find(id)?;
        let lang = match variant {
            Variant::Original => message.lang,
            Variant::Translation(lang) => lang,
        };
        message.text_in(lang).map(|text| (text.to_string(), lang))
    }

    /// Read a rendition aloud. Asking for the active source again stops it.
    pub async fn play(&self, id: MessageId, variant: Variant) -> Result<PlayOutcome> {
        self.ensure_open()?;
        let Some((text, lang)) = self.rendition(id, variant) else {
            return Ok(PlayOutcome::Skipped);
        };
        let source = SourceId::new(id.0, variant);

        let claimed = {
            let mut playback = self.playback.lock();
            if playback.active_source() == Some(&source) {
                playback.stop();
                Ok(false)
            } else {
                playback.begin_loading(source.clone()).map(|()| true)
            }
        };
        match claimed {
            Ok(true) => self.emit_playback(),
            Ok(false) => {
                self.emit_playback();
                return Ok(PlayOutcome::Stopped);
            }
            Err(e) => {
                self.notice(NoticeLevel::Warning, format!("Cannot play audio: {e}"));
                return Err(e);
            }
        }

        let params = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Ok(PlayOutcome::Discarded),
            params = self.backend.text_to_speech(&text, lang) => params,
        };
        let params = match params {
            Ok(params) => params,
            Err(e) => {
                tracing::warn!(source = %source, error = %e, "Text-to-speech failed");
                let was_active = self.playback.lock().fail_loading(&source);
                if was_active {
                    self.emit_playback();
                }
                if !self.is_closed() {
                    self.notice(NoticeLevel::Error, format!("Could not play audio: {e}"));
                }
                return Err(e.into());
            }
        };

        let spoken_lang = if params.lang.trim().is_empty() {
            lang.as_str().to_string()
        } else {
            params.lang
        };
        let played = {
            let mut playback = self.playback.lock();
            let still_active = playback.status() == PlaybackStatus::Loading
                && playback.active_source() == Some(&source);
            if self.is_closed() || !still_active {
                None
            } else {
                Some(playback.play(RenditionSpec {
                    source_id: source.clone(),
                    text: params.text,
                    lang: spoken_lang,
                }))
            }
        };
        let Some(played) = played else {
            tracing::debug!(source = %source, "Rendition superseded while loading");
            return Ok(PlayOutcome::Discarded);
        };

        self.emit_playback();
        match played {
            Ok(()) => Ok(PlayOutcome::Started(source)),
            Err(e) => {
                self.notice(NoticeLevel::Error, format!("Could not play audio: {e}"));
                Err(e)
            }
        }
    }

    pub fn pause_playback(&self) -> bool {
        let paused = self.playback.lock().pause();
        if paused {
            self.emit_playback();
        }
        paused
    }

    pub fn resume_playback(&self) -> bool {
        let resumed = self.playback.lock().resume();
        if resumed {
            self.emit_playback();
        }
        resumed
    }

    pub fn stop_playback(&self) {
        let was_active = {
            let mut playback = self.playback.lock();
            let active = playback.status() != PlaybackStatus::Idle;
            playback.stop();
            active
        };
        if was_active {
            self.emit_playback();
        }
    }

    // ── Capture ──────────────────────────────────────────────────

    pub fn start_capture(&self) -> Result<()> {
        let state = {
            let mut capture = self.capture.lock();
            capture.start()?;
            capture.state().clone()
        };
        if let Some(error) = &state.last_error {
            self.notice(NoticeLevel::Warning, format!("Voice input error: {error}"));
        }
        self.emit(SessionEvent::CaptureChanged { state });
        Ok(())
    }

    pub fn stop_capture(&self) {
        self.capture.lock().stop();
        self.emit_capture();
    }

    /// Change the language the user writes and speaks in.
    pub fn set_my_language(&self, lang: LanguageCode) {
        self.thread.lock().my_language = lang;
        self.capture.lock().set_language(lang);
        tracing::info!(lang = lang.as_str(), "Language changed");
        self.emit_capture();
    }

    // ── Event pump ───────────────────────────────────────────────

    fn apply_synthesis_event(&self, event: SynthesisEvent) {
        let update = self.playback.lock().handle_event(event);
        match update {
            PlaybackUpdate::Unchanged => {}
            PlaybackUpdate::VoicesRefreshed(count) => {
                tracing::debug!(voices = count, "Voice list refreshed");
            }
            PlaybackUpdate::Finished(_) => self.emit_playback(),
            PlaybackUpdate::Failed { message, .. } => {
                self.emit_playback();
                self.notice(NoticeLevel::Warning, format!("Playback stopped: {message}"));
            }
        }
    }

    /// Returns a finished transcript to send.
    fn apply_recognizer_event(&self, event: RecognizerEvent) -> Option<String> {
        let output = self.capture.lock().handle_event(event);
        match output {
            CaptureOutput::None => {
                self.emit_capture();
                None
            }
            CaptureOutput::Interim(_) => {
                self.emit_capture();
                None
            }
            CaptureOutput::Final(text) => {
                self.emit_capture();
                Some(text)
            }
            CaptureOutput::Failed(message) => {
                self.emit_capture();
                self.notice(NoticeLevel::Warning, format!("Voice input error: {message}"));
                None
            }
        }
    }

    /// Drive capability callbacks and lifecycle signals until the session is
    /// torn down. A closed lifecycle channel counts as disposal.
    pub async fn run(
        self: Arc<Self>,
        mut channels: SessionChannels,
        mut lifecycle: mpsc::UnboundedReceiver<LifecycleEvent>,
    ) {
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                signal = lifecycle.recv() => {
                    self.teardown(signal.unwrap_or(LifecycleEvent::Disposed));
                    break;
                }
                Some(event) = channels.synthesis.recv() => self.apply_synthesis_event(event),
                Some(event) = channels.recognizer.recv() => {
                    if let Some(text) = self.apply_recognizer_event(event) {
                        let session = Arc::clone(&self);
                        tokio::spawn(async move {
                            if let Err(e) = session.send_message(&text, MessageOrigin::Voice).await {
                                tracing::debug!(error = %e, "Voice message not sent");
                            }
                        });
                    }
                }
            }
        }
        tracing::debug!("Session event pump stopped");
    }

    // ── Teardown ─────────────────────────────────────────────────

    /// Close the session: cancel outstanding calls, stop playback and abort
    /// capture. Returns `false` if it was already closed.
    pub fn teardown(&self, reason: LifecycleEvent) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.cancel.cancel();
        self.playback.lock().teardown();
        self.capture.lock().teardown();
        tracing::info!(user = %self.user.username, ?reason, "Chat session closed");
        self.emit(SessionEvent::Closed { reason });
        true
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.teardown(LifecycleEvent::Disposed);
    }
}

// ── Tests ─────────────────────────────────────────────────────────
