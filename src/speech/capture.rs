//! Continuous speech capture.
//!
//! [`SpeechCaptureController`] turns a [`SpeechRecognizer`] into finalized
//! transcripts. Only final transcripts leave the controller as
//! [`CaptureOutput::Final`]; interim hypotheses are kept for live display.
//!
//! ```text
//! Ready ─start─▸ Listening ─final / stop─▸ Processing ─ended─▸ Ready
//!   ▴               │
//!   └──start── Error ◂─error─┘
//! ```
//!
//! Every `start` opens a new [`CaptureRun`]. Recognizer events name the run
//! they belong to, so the late `Ended` of a finished run can never close the
//! one that replaced it.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{ChatError, Result};
use crate::language::LanguageCode;

// ── Capability surface ───────────────────────────────────────────

/// Identity of one recognition run, from `start` to `Ended`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CaptureRun(pub u64);

/// Callback events from the recognition capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognizerEvent {
    Started { run: CaptureRun },
    /// Transcript hypothesis for the current utterance.
    Result {
        run: CaptureRun,
        transcript: String,
        is_final: bool,
    },
    /// Recognition run closed (after stop, abort, or silence).
    Ended { run: CaptureRun },
    Error { run: CaptureRun, message: String },
}

impl RecognizerEvent {
    pub fn run(&self) -> CaptureRun {
        match self {
            Self::Started { run }
            | Self::Result { run, .. }
            | Self::Ended { run }
            | Self::Error { run, .. } => *run,
        }
    }
}

/// Continuous speech-to-text capability.
pub trait SpeechRecognizer: Send + Sync {
    /// Begin a run. Every event of the run must carry `run`.
    fn start(&self, run: CaptureRun, lang: LanguageCode) -> anyhow::Result<()>;
    /// Stop listening and flush a final result if one is pending.
    fn stop(&self);
    /// Stop listening and discard everything.
    fn abort(&self);
    /// Change language while listening. Returns `false` when the capability
    /// only picks the language up at the next `start`.
    fn set_language(&self, lang: LanguageCode) -> bool;
    fn subscribe(&self, events: mpsc::UnboundedSender<RecognizerEvent>);
    fn unsubscribe(&self);
}

// ── State ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureStatus {
    #[default]
    Ready,
    Listening,
    Processing,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct CaptureState {
    pub status: CaptureStatus,
    pub language_hint: LanguageCode,
    /// Latest non-final hypothesis, for live display only.
    pub interim: Option<String>,
    /// Reason for the `Error` status.
    pub last_error: Option<String>,
}

/// What a recognizer event produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutput {
    /// Nothing for the caller.
    None,
    Interim(String),
    /// A finished utterance to send.
    Final(String),
    Failed(String),
}

// ── Controller ───────────────────────────────────────────────────

pub struct SpeechCaptureController {
    recognizer: Option<Box<dyn SpeechRecognizer>>,
    state: CaptureState,
    /// Run whose events are accepted.
    current_run: Option<CaptureRun>,
    next_run: u64,
    /// An explicit stop is waiting for the recognizer to flush.
    awaiting_flush: bool,
    torn_down: bool,
}

impl SpeechCaptureController {
    /// Attach to a recognition capability, or `None` when the environment has
    /// none. Capability events are delivered to `events`.
    pub fn new(
        recognizer: Option<Box<dyn SpeechRecognizer>>,
        language: LanguageCode,
        events: mpsc::UnboundedSender<RecognizerEvent>,
    ) -> Self {
        match &recognizer {
            Some(recognizer) => recognizer.subscribe(events),
            None => tracing::info!("Speech recognition not available; voice input disabled"),
        }

        Self {
            recognizer,
            state: CaptureState {
                language_hint: language,
                ..CaptureState::default()
            },
            current_run: None,
            next_run: 1,
            awaiting_flush: false,
            torn_down: false,
        }
    }

    pub fn is_available(&self) -> bool {
        self.recognizer.is_some()
    }

    pub fn state(&self) -> &CaptureState {
        &self.state
    }

    pub fn status(&self) -> CaptureStatus {
        self.state.status
    }

    /// Begin listening in the current language hint.
    ///
    /// A recognizer that refuses to start puts the controller in `Error`
    /// rather than failing the call; the caller offers a retry. Starting
    /// while a previous run is still `Processing` abandons that run.
    pub fn start(&mut self) -> Result<()> {
        if self.torn_down {
            return Err(ChatError::SessionClosed);
        }
        let Some(recognizer) = &self.recognizer else {
            return Err(ChatError::CaptureUnavailable);
        };
        if self.state.status == CaptureStatus::Listening {
            return Err(ChatError::CaptureAlreadyActive);
        }

        let run = CaptureRun(self.next_run);
        self.next_run += 1;
        self.current_run = None;
        self.awaiting_flush = false;
        self.state.interim = None;
        self.state.last_error = None;
        match recognizer.start(run, self.state.language_hint) {
            Ok(()) => {
                tracing::info!(run = run.0, lang = self.state.language_hint.as_str(), "Listening");
                self.current_run = Some(run);
                self.state.status = CaptureStatus::Listening;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to start speech recognition");
                self.state.status = CaptureStatus::Error;
                self.state.last_error = Some(e.to_string());
            }
        }
        Ok(())
    }

    /// End capture. A final result the recognizer flushes in response is
    /// still delivered. No-op unless listening.
    pub fn stop(&mut self) {
        if self.state.status != CaptureStatus::Listening {
            return;
        }
        if let Some(recognizer) = &self.recognizer {
            recognizer.stop();
        }
        self.state.status = CaptureStatus::Processing;
        self.state.interim = None;
        self.awaiting_flush = true;
    }

    pub fn set_language(&mut self, lang: LanguageCode) {
        self.state.language_hint = lang;
        if self.state.status != CaptureStatus::Listening {
            return;
        }
        if let Some(recognizer) = &self.recognizer {
            if !recognizer.set_language(lang) {
                tracing::debug!(lang = lang.as_str(), "Language change applies from next capture");
            }
        }
    }

    /// Apply a capability event. Ignored after teardown and for runs other
    /// than the current one.
    pub fn handle_event(&mut self, event: RecognizerEvent) -> CaptureOutput {
        if self.torn_down {
            return CaptureOutput::None;
        }
        if self.current_run != Some(event.run()) {
            tracing::trace!(run = event.run().0, "Ignoring stale recognizer event");
            return CaptureOutput::None;
        }
        match event {
            // `start()` already moved to Listening.
            RecognizerEvent::Started { .. } => CaptureOutput::None,
            RecognizerEvent::Result {
                transcript,
                is_final,
                ..
            } => {
                let accepting = match self.state.status {
                    CaptureStatus::Listening => true,
                    CaptureStatus::Processing => self.awaiting_flush && is_final,
                    _ => false,
                };
                if !accepting {
                    return CaptureOutput::None;
                }
                if !is_final {
                    self.state.interim = Some(transcript.clone());
                    return CaptureOutput::Interim(transcript);
                }
                let trimmed = transcript.trim();
                if trimmed.is_empty() {
                    return CaptureOutput::None;
                }
                let text = trimmed.to_string();
                if self.state.status == CaptureStatus::Listening {
                    if let Some(recognizer) = &self.recognizer {
                        recognizer.stop();
                    }
                }
                self.state.status = CaptureStatus::Processing;
                self.state.interim = None;
                self.awaiting_flush = false;
                tracing::debug!(chars = text.len(), "Final transcript");
                CaptureOutput::Final(text)
            }
            RecognizerEvent::Ended { .. } => {
                self.current_run = None;
                self.awaiting_flush = false;
                if matches!(
                    self.state.status,
                    CaptureStatus::Listening | CaptureStatus::Processing
                ) {
                    self.state.status = CaptureStatus::Ready;
                    self.state.interim = None;
                }
                CaptureOutput::None
            }
            RecognizerEvent::Error { message, .. } => {
                tracing::warn!(error = %message, "Speech recognition error");
                self.current_run = None;
                self.awaiting_flush = false;
                self.state.status = CaptureStatus::Error;
                self.state.interim = None;
                self.state.last_error = Some(message.clone());
                CaptureOutput::Failed(message)
            }
        }
    }

    /// Abort unconditionally and release the capability hook. Later events
    /// are ignored.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        if let Some(recognizer) = &self.recognizer {
            recognizer.abort();
            recognizer.unsubscribe();
        }
        self.current_run = None;
        self.awaiting_flush = false;
        self.state.status = CaptureStatus::Ready;
        self.state.interim = None;
        self.state.last_error = None;
        self.torn_down = true;
    }
}

impl Drop for SpeechCaptureController {
    fn drop(&mut self) {
        self.teardown();
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockRecognizer, RecognizerCall};

    fn controller(rec: &MockRecognizer) -> SpeechCaptureController {
        let (tx, _rx) = mpsc::unbounded_channel();
        SpeechCaptureController::new(Some(Box::new(rec.clone())), LanguageCode::En, tx)
    }

    fn live_run(rec: &MockRecognizer) -> CaptureRun {
        rec.last_run().expect("recognizer was started")
    }

    fn final_result(run: CaptureRun, text: &str) -> RecognizerEvent {
        RecognizerEvent::Result {
            run,
            transcript: text.into(),
            is_final: true,
        }
    }

    #[test]
    fn unavailable_without_capability() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut capture = SpeechCaptureController::new(None, LanguageCode::En, tx);
        assert!(matches!(capture.start(), Err(ChatError::CaptureUnavailable)));
        assert_eq!(capture.status(), CaptureStatus::Ready);
    }

    #[test]
    fn start_twice_is_rejected() {
        let rec = MockRecognizer::default();
        let mut capture = controller(&rec);

        capture.start().unwrap();
        assert_eq!(capture.status(), CaptureStatus::Listening);
        assert!(matches!(capture.start(), Err(ChatError::CaptureAlreadyActive)));
        assert_eq!(rec.calls(), vec![RecognizerCall::Start(LanguageCode::En)]);
    }

    #[test]
    fn each_start_opens_a_new_run() {
        let rec = MockRecognizer::default();
        let mut capture = controller(&rec);

        capture.start().unwrap();
        let first = live_run(&rec);
        capture.stop();
        capture.start().unwrap();
        assert_ne!(live_run(&rec), first);
    }

    #[test]
    fn stop_is_idempotent() {
        let rec = MockRecognizer::default();
        let mut capture = controller(&rec);

        capture.stop();
        assert!(rec.calls().is_empty());

        capture.start().unwrap();
        let run = live_run(&rec);
        capture.stop();
        capture.stop();
        assert_eq!(capture.status(), CaptureStatus::Processing);
        assert_eq!(
            rec.calls(),
            vec![RecognizerCall::Start(LanguageCode::En), RecognizerCall::Stop]
        );

        capture.handle_event(RecognizerEvent::Ended { run });
        assert_eq!(capture.status(), CaptureStatus::Ready);
    }

    #[test]
    fn stop_delivers_the_flushed_final_result() {
        let rec = MockRecognizer::default();
        let mut capture = controller(&rec);
        capture.start().unwrap();
        let run = live_run(&rec);

        capture.stop();
        let out = capture.handle_event(final_result(run, "I need a doctor"));
        assert_eq!(out, CaptureOutput::Final("I need a doctor".into()));
        assert_eq!(capture.status(), CaptureStatus::Processing);
        assert_eq!(
            rec.calls(),
            vec![RecognizerCall::Start(LanguageCode::En), RecognizerCall::Stop]
        );

        // Only one flushed result per stop.
        assert_eq!(
            capture.handle_event(final_result(run, "again")),
            CaptureOutput::None
        );
        capture.handle_event(RecognizerEvent::Ended { run });
        assert_eq!(capture.status(), CaptureStatus::Ready);
    }

    #[test]
    fn interim_after_stop_is_ignored() {
        let rec = MockRecognizer::default();
        let mut capture = controller(&rec);
        capture.start().unwrap();
        let run = live_run(&rec);

        capture.stop();
        let out = capture.handle_event(RecognizerEvent::Result {
            run,
            transcript: "I need".into(),
            is_final: false,
        });
        assert_eq!(out, CaptureOutput::None);
        assert!(capture.state().interim.is_none());
    }

    #[test]
    fn interim_results_are_never_final() {
        let rec = MockRecognizer::default();
        let mut capture = controller(&rec);
        capture.start().unwrap();

        let out = capture.handle_event(RecognizerEvent::Result {
            run: live_run(&rec),
            transcript: "my head".into(),
            is_final: false,
        });
        assert_eq!(out, CaptureOutput::Interim("my head".into()));
        assert_eq!(capture.state().interim.as_deref(), Some("my head"));
        assert_eq!(capture.status(), CaptureStatus::Listening);
    }

    #[test]
    fn final_result_auto_stops() {
        let rec = MockRecognizer::default();
        let mut capture = controller(&rec);
        capture.start().unwrap();
        let run = live_run(&rec);

        let out = capture.handle_event(final_result(run, "  my head hurts "));
        assert_eq!(out, CaptureOutput::Final("my head hurts".into()));
        assert_eq!(capture.status(), CaptureStatus::Processing);
        assert_eq!(rec.calls().last(), Some(&RecognizerCall::Stop));

        capture.handle_event(RecognizerEvent::Ended { run });
        assert_eq!(capture.status(), CaptureStatus::Ready);
    }

    #[test]
    fn restart_ignores_the_previous_run_ending() {
        let rec = MockRecognizer::default();
        let mut capture = controller(&rec);
        capture.start().unwrap();
        let first = live_run(&rec);
        assert_eq!(
            capture.handle_event(final_result(first, "first")),
            CaptureOutput::Final("first".into())
        );

        capture.start().unwrap();
        let second = live_run(&rec);
        assert_eq!(capture.handle_event(RecognizerEvent::Ended { run: first }), CaptureOutput::None);
        assert_eq!(capture.status(), CaptureStatus::Listening);

        assert_eq!(
            capture.handle_event(final_result(second, "second")),
            CaptureOutput::Final("second".into())
        );
    }

    #[test]
    fn results_from_an_abandoned_run_are_dropped() {
        let rec = MockRecognizer::default();
        let mut capture = controller(&rec);
        capture.start().unwrap();
        let first = live_run(&rec);
        capture.stop();
        capture.start().unwrap();

        assert_eq!(capture.handle_event(final_result(first, "old")), CaptureOutput::None);
        assert_eq!(
            capture.handle_event(RecognizerEvent::Error {
                run: first,
                message: "aborted".into(),
            }),
            CaptureOutput::None
        );
        assert_eq!(capture.status(), CaptureStatus::Listening);
    }

    #[test]
    fn blank_final_result_is_dropped() {
        let rec = MockRecognizer::default();
        let mut capture = controller(&rec);
        capture.start().unwrap();

        assert_eq!(
            capture.handle_event(final_result(live_run(&rec), "   ")),
            CaptureOutput::None
        );
        assert_eq!(capture.status(), CaptureStatus::Listening);
    }

    #[test]
    fn error_allows_retry() {
        let rec = MockRecognizer::default();
        let mut capture = controller(&rec);
        capture.start().unwrap();
        let first = live_run(&rec);

        let out = capture.handle_event(RecognizerEvent::Error {
            run: first,
            message: "no-speech".into(),
        });
        assert_eq!(out, CaptureOutput::Failed("no-speech".into()));
        assert_eq!(capture.status(), CaptureStatus::Error);
        assert_eq!(capture.state().last_error.as_deref(), Some("no-speech"));

        capture.start().unwrap();
        assert_eq!(capture.status(), CaptureStatus::Listening);
        assert!(capture.state().last_error.is_none());

        // The failed run still reports its end afterwards.
        capture.handle_event(RecognizerEvent::Ended { run: first });
        assert_eq!(capture.status(), CaptureStatus::Listening);
    }

    #[test]
    fn refused_start_becomes_error_state() {
        let rec = MockRecognizer::default();
        rec.fail_next_start("not-allowed");
        let mut capture = controller(&rec);

        capture.start().unwrap();
        assert_eq!(capture.status(), CaptureStatus::Error);
        assert_eq!(capture.state().last_error.as_deref(), Some("not-allowed"));
    }

    #[test]
    fn language_hint_applies_live_or_next_start() {
        let rec = MockRecognizer::default();
        let mut capture = controller(&rec);

        capture.set_language(LanguageCode::Es);
        assert!(rec.calls().is_empty());
        capture.start().unwrap();
        assert_eq!(rec.calls(), vec![RecognizerCall::Start(LanguageCode::Es)]);

        capture.set_language(LanguageCode::Ar);
        assert_eq!(capture.state().language_hint, LanguageCode::Ar);
        assert_eq!(rec.calls().last(), Some(&RecognizerCall::SetLanguage(LanguageCode::Ar)));
    }

    #[test]
    fn teardown_aborts_and_ignores_later_events() {
        let rec = MockRecognizer::default();
        let mut capture = controller(&rec);
        capture.start().unwrap();
        let run = live_run(&rec);

        capture.teardown();
        assert_eq!(rec.calls().last(), Some(&RecognizerCall::Abort));
        assert!(!rec.is_subscribed());

        assert_eq!(capture.handle_event(final_result(run, "late")), CaptureOutput::None);
        assert_eq!(
            capture.handle_event(RecognizerEvent::Error {
                run,
                message: "late".into(),
            }),
            CaptureOutput::None
        );
        assert_eq!(capture.status(), CaptureStatus::Ready);
        assert!(matches!(capture.start(), Err(ChatError::SessionClosed)));
    }

    #[test]
    fn teardown_aborts_even_when_idle() {
        let rec = MockRecognizer::default();
        let mut capture = controller(&rec);
        capture.teardown();
        capture.teardown();
        assert_eq!(rec.calls(), vec![RecognizerCall::Abort]);
    }
}
