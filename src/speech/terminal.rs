//! Speech synthesis stand-in for terminals.
//!
//! Renders an utterance as a narrated line on stdout and holds it "on air"
//! for the time a voice would take to read it, honouring pause, resume and
//! cancel. Completion is reported through [`SynthesisEvent`]s like a real
//! engine, so the playback controller cannot tell the difference.

use console::{style, Term};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::playback::{SpeechSynthesizer, SynthesisEvent, Utterance, UtteranceId, Voice};
use crate::language::LanguageCode;

/// Reading speed used to size an utterance.
const CHARS_PER_SECOND: f64 = 15.0;

/// Shortest time an utterance stays on air.
const MIN_DURATION: Duration = Duration::from_millis(800);

/// Granularity of the playback clock.
const TICK: Duration = Duration::from_millis(50);

struct Running {
    id: UtteranceId,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Shared {
    events: Mutex<Option<mpsc::UnboundedSender<SynthesisEvent>>>,
    current: Mutex<Option<Running>>,
}

impl Shared {
    fn emit(&self, event: SynthesisEvent) {
        if let Some(tx) = self.events.lock().as_ref() {
            let _ = tx.send(event);
        }
    }
}

/// Terminal narration synthesizer. Requires a running tokio runtime.
#[derive(Clone)]
pub struct TerminalSynthesizer {
    shared: Arc<Shared>,
    paused: Arc<watch::Sender<bool>>,
    term: Term,
}

impl Default for TerminalSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalSynthesizer {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared::default()),
            paused: Arc::new(paused),
            term: Term::stdout(),
        }
    }

    fn print(&self, line: &str) {
        if let Err(e) = self.term.write_line(line) {
            tracing::debug!(error = %e, "Terminal write failed");
        }
    }
}

/// Time a voice needs for `text`.
pub fn reading_time(text: &str) -> Duration {
    let chars = text.chars().filter(|c| !c.is_whitespace()).count() as f64;
    Duration::from_secs_f64(chars / CHARS_PER_SECOND).max(MIN_DURATION)
}

fn locale_for(lang: LanguageCode) -> &'static str {
    match lang {
        LanguageCode::En => "en-US",
        LanguageCode::Es => "es-ES",
        LanguageCode::Fr => "fr-FR",
        LanguageCode::Ar => "ar-SA",
        LanguageCode::Ur => "ur-PK",
        LanguageCode::Zh => "zh-CN",
        LanguageCode::Hi => "hi-IN",
        LanguageCode::Pt => "pt-BR",
    }
}

impl SpeechSynthesizer for TerminalSynthesizer {
    fn voices(&self) -> Vec<Voice> {
        LanguageCode::all()
            .iter()
            .map(|lang| Voice {
                name: format!("Narrator ({})", lang.display_name()),
                locale: locale_for(*lang).to_string(),
                is_default: *lang == LanguageCode::En,
            })
            .collect()
    }

    fn speak(&self, utterance: Utterance) -> anyhow::Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| anyhow::anyhow!("terminal narration needs a tokio runtime"))?;
        self.cancel();
        self.paused.send_replace(false);

        let cancel = CancellationToken::new();
        *self.shared.current.lock() = Some(Running {
            id: utterance.id,
            cancel: cancel.clone(),
        });

        let voice = utterance
            .voice
            .as_ref()
            .map(|v| v.name.clone())
            .unwrap_or_else(|| "Narrator".to_string());
        self.print(&format!(
            "{} {} {}",
            style("🔊").cyan(),
            style(format!("[{voice} · {}]", utterance.lang)).dim(),
            style(&utterance.text).italic()
        ));

        let shared = Arc::clone(&self.shared);
        let mut paused = self.paused.subscribe();
        let mut remaining = reading_time(&utterance.text);
        let id = utterance.id;
        runtime.spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        shared.emit(SynthesisEvent::Failed {
                            utterance: id,
                            message: "interrupted".to_string(),
                        });
                        return;
                    }
                    () = tokio::time::sleep(TICK) => {
                        if *paused.borrow_and_update() {
                            continue;
                        }
                        remaining = remaining.saturating_sub(TICK);
                        if remaining.is_zero() {
                            break;
                        }
                    }
                }
            }
            {
                let mut current = shared.current.lock();
                if current.as_ref().is_some_and(|r| r.id == id) {
                    *current = None;
                }
            }
            shared.emit(SynthesisEvent::Ended { utterance: id });
        });
        Ok(())
    }

    fn pause(&self) {
        self.paused.send_replace(true);
    }

    fn resume(&self) {
        self.paused.send_replace(false);
    }

    fn cancel(&self) {
        if let Some(running) = self.shared.current.lock().take() {
            running.cancel.cancel();
        }
        self.paused.send_replace(false);
    }

    fn subscribe(&self, events: mpsc::UnboundedSender<SynthesisEvent>) {
        *self.shared.events.lock() = Some(events);
    }

    fn unsubscribe(&self) {
        self.shared.events.lock().take();
    }
}
