//! Exclusive speech playback.
//!
//! [`SpeechPlaybackController`] wraps a [`SpeechSynthesizer`] and guarantees
//! that at most one rendition is active at any time:
//!
//! ```text
//! Idle ─▸ Loading ─▸ Playing ⇄ Paused
//!   ▴        │          │        │
//!   └────────┴──────────┴────────┘   stop / end / error / load failure
//! ```
//!
//! Every utterance handed to the synthesizer gets a fresh [`UtteranceId`].
//! Completion and error events name the utterance they belong to, so the late
//! `Ended` of a cancelled rendition can never reset the one that replaced it.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

use crate::error::{ChatError, Result};
use crate::language::{base_subtag, LanguageCode};

// ── Capability surface ───────────────────────────────────────────

/// A voice offered by the synthesis capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voice {
    pub name: String,
    /// BCP-47 locale, e.g. `"es-ES"`.
    pub locale: String,
    /// The capability's own default voice.
    pub is_default: bool,
}

/// Identity of one speak request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UtteranceId(pub u64);

/// One speak request handed to the synthesizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    pub id: UtteranceId,
    pub text: String,
    /// Locale requested by the caller.
    pub lang: String,
    /// Chosen voice; `None` lets the capability pick.
    pub voice: Option<Voice>,
}

/// Callback events from the synthesis capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisEvent {
    /// The utterance reached end-of-audio.
    Ended { utterance: UtteranceId },
    /// The utterance failed mid-flight.
    Failed {
        utterance: UtteranceId,
        message: String,
    },
    /// The voice list changed (voices often load asynchronously).
    VoicesChanged,
}

/// Utterance-based text-to-speech capability.
///
/// All calls are synchronous; results arrive later as [`SynthesisEvent`]s on
/// the channel registered with [`subscribe`](SpeechSynthesizer::subscribe).
pub trait SpeechSynthesizer: Send + Sync {
    fn voices(&self) -> Vec<Voice>;
    fn speak(&self, utterance: Utterance) -> anyhow::Result<()>;
    fn pause(&self);
    fn resume(&self);
    /// Drop the current and any queued utterances.
    fn cancel(&self);
    fn subscribe(&self, events: mpsc::UnboundedSender<SynthesisEvent>);
    fn unsubscribe(&self);
}

// ── Rendition identity ───────────────────────────────────────────

/// Which rendition of a message is meant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    Original,
    Translation(LanguageCode),
}

/// Key of one playable (message, variant) pair: `"<id>-original"` or
/// `"<id>-<lang>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub struct SourceId {
    pub message: u64,
    pub variant: Variant,
}

impl SourceId {
    pub fn new(message: u64, variant: Variant) -> Self {
        Self { message, variant }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.variant {
            Variant::Original => write!(f, "{}-original", self.message),
            Variant::Translation(lang) => write!(f, "{}-{}", self.message, lang.as_str()),
        }
    }
}

impl From<SourceId> for String {
    fn from(id: SourceId) -> Self {
        id.to_string()
    }
}

/// What to play.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenditionSpec {
    pub source_id: SourceId,
    pub text: String,
    /// Locale to speak in; may carry a region.
    pub lang: String,
}

// ── State ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackStatus {
    #[default]
    Idle,
    Loading,
    Playing,
    Paused,
}

/// Observable playback state. `active_source` is `Some` exactly when
/// `status` is not `Idle`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct PlaybackState {
    pub status: PlaybackStatus,
    pub active_source: Option<SourceId>,
}

/// What a capability event did to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackUpdate {
    /// The event was stale or irrelevant.
    Unchanged,
    /// The active rendition finished normally.
    Finished(SourceId),
    /// The active rendition failed.
    Failed { source: SourceId, message: String },
    VoicesRefreshed(usize),
}

// ── Controller ───────────────────────────────────────────────────

pub struct SpeechPlaybackController {
    synth: Option<Box<dyn SpeechSynthesizer>>,
    voices: Vec<Voice>,
    state: PlaybackState,
    current_utterance: Option<UtteranceId>,
    next_utterance: u64,
    torn_down: bool,
}

impl SpeechPlaybackController {
    /// Attach to a synthesis capability, or `None` when the environment has
    /// none. Capability events are delivered to `events`.
    pub fn new(
        synth: Option<Box<dyn SpeechSynthesizer>>,
        events: mpsc::UnboundedSender<SynthesisEvent>,
    ) -> Self {
        let voices = match &synth {
            Some(synth) => {
                synth.subscribe(events);
                synth.voices()
            }
            None => {
                tracing::info!("Speech synthesis not available; playback disabled");
                Vec::new()
            }
        };

        Self {
            synth,
            voices,
            state: PlaybackState::default(),
            current_utterance: None,
            next_utterance: 1,
            torn_down: false,
        }
    }

    pub fn is_available(&self) -> bool {
        self.synth.is_some()
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn status(&self) -> PlaybackStatus {
        self.state.status
    }

    pub fn active_source(&self) -> Option<&SourceId> {
        self.state.active_source.as_ref()
    }

    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    /// Claim playback for `source` while its audio parameters are fetched.
    /// Whatever was active before is stopped.
    pub fn begin_loading(&mut self, source: SourceId) -> Result<()> {
        if self.torn_down {
            return Err(ChatError::SessionClosed);
        }
        if self.synth.is_none() {
            return Err(ChatError::PlaybackUnavailable);
        }
        self.stop();
        tracing::debug!(source = %source, "Loading rendition");
        self.state = PlaybackState {
            status: PlaybackStatus::Loading,
            active_source: Some(source),
        };
        Ok(())
    }

    /// Abandon a load for `source`. Returns whether it was still active.
    pub fn fail_loading(&mut self, source: &SourceId) -> bool {
        let is_current = self.state.status == PlaybackStatus::Loading
            && self.state.active_source.as_ref() == Some(source);
        if is_current {
            self.state = PlaybackState::default();
        }
        is_current
    }

    /// Start `spec`, stopping any active rendition first.
    pub fn play(&mut self, spec: RenditionSpec) -> Result<()> {
        if self.torn_down {
            return Err(ChatError::SessionClosed);
        }
        if self.synth.is_none() {
            return Err(ChatError::PlaybackUnavailable);
        }
        self.stop();

        let id = UtteranceId(self.next_utterance);
        self.next_utterance += 1;
        let voice = select_voice(&self.voices, &spec.lang).cloned();
        tracing::info!(
            source = %spec.source_id,
            lang = %spec.lang,
            voice = voice.as_ref().map(|v| v.name.as_str()).unwrap_or("<default>"),
            "Starting playback"
        );

        let utterance = Utterance {
            id,
            text: spec.text,
            lang: spec.lang,
            voice,
        };
        let Some(synth) = self.synth.as_ref() else {
            return Err(ChatError::PlaybackUnavailable);
        };
        if let Err(e) = synth.speak(utterance) {
            tracing::warn!(source = %spec.source_id, error = %e, "Synthesizer refused utterance");
            return Err(ChatError::Synthesis(e.to_string()));
        }

        self.current_utterance = Some(id);
        self.state = PlaybackState {
            status: PlaybackStatus::Playing,
            active_source: Some(spec.source_id),
        };
        Ok(())
    }

    pub fn pause(&mut self) -> bool {
        if self.state.status != PlaybackStatus::Playing {
            return false;
        }
        if let Some(synth) = &self.synth {
            synth.pause();
        }
        self.state.status = PlaybackStatus::Paused;
        true
    }

    pub fn resume(&mut self) -> bool {
        if self.state.status != PlaybackStatus::Paused {
            return false;
        }
        if let Some(synth) = &self.synth {
            synth.resume();
        }
        self.state.status = PlaybackStatus::Playing;
        true
    }

    /// Cancel whatever is active. Idempotent.
    pub fn stop(&mut self) {
        if self.state.status == PlaybackStatus::Idle && self.current_utterance.is_none() {
            return;
        }
        if let Some(synth) = &self.synth {
            synth.cancel();
        }
        if let Some(source) = &self.state.active_source {
            tracing::debug!(source = %source, "Playback stopped");
        }
        self.current_utterance = None;
        self.state = PlaybackState::default();
    }

    /// Apply a capability event. Ignored after teardown and for utterances
    /// other than the current one.
    pub fn handle_event(&mut self, event: SynthesisEvent) -> PlaybackUpdate {
        if self.torn_down {
            return PlaybackUpdate::Unchanged;
        }
        match event {
            SynthesisEvent::VoicesChanged => {
                if let Some(synth) = &self.synth {
                    self.voices = synth.voices();
                }
                PlaybackUpdate::VoicesRefreshed(self.voices.len())
            }
            SynthesisEvent::Ended { utterance } => match self.finish(utterance) {
                Some(source) => {
                    tracing::debug!(source = %source, "Playback finished");
                    PlaybackUpdate::Finished(source)
                }
                None => PlaybackUpdate::Unchanged,
            },
            SynthesisEvent::Failed { utterance, message } => match self.finish(utterance) {
                Some(source) => {
                    tracing::warn!(source = %source, error = %message, "Playback failed");
                    PlaybackUpdate::Failed { source, message }
                }
                None => PlaybackUpdate::Unchanged,
            },
        }
    }

    fn finish(&mut self, utterance: UtteranceId) -> Option<SourceId> {
        if self.current_utterance != Some(utterance) {
            tracing::trace!(utterance = utterance.0, "Ignoring stale synthesis event");
            return None;
        }
        self.current_utterance = None;
        std::mem::take(&mut self.state).active_source
    }

    /// Stop and release the capability hook. Later events are ignored.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.stop();
        if let Some(synth) = &self.synth {
            synth.cancel();
            synth.unsubscribe();
        }
        self.torn_down = true;
    }
}

impl Drop for SpeechPlaybackController {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Prefer a voice whose locale shares the base subtag of `lang`, then the
/// capability default, then nothing.
pub fn select_voice<'a>(voices: &'a [Voice], lang: &str) -> Option<&'a Voice> {
    let wanted = base_subtag(lang);
    voices
        .iter()
        .find(|v| base_subtag(&v.locale).eq_ignore_ascii_case(wanted))
        .or_else(|| voices.iter().find(|v| v.is_default))
}

// ── Tests ────────────────────────────────────────────────────────
