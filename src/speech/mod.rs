//! Local speech capabilities and the controllers that own them.
//!
//! ## Design
//! - Capabilities are traits (`SpeechRecognizer`, `SpeechSynthesizer`) with a
//!   synchronous call surface; their callbacks arrive as enum events over
//!   `tokio::sync::mpsc` channels registered at construction.
//! - Each controller is the sole owner of its capability and of its state;
//!   the chat session drives both and consumes their events.
//! - Teardown is explicit and idempotent, and also runs on `Drop`.

pub mod capture;
pub mod playback;
pub mod terminal;

pub use capture::{
    CaptureOutput, CaptureRun, CaptureState, CaptureStatus, RecognizerEvent,
    SpeechCaptureController, SpeechRecognizer,
};
pub use playback::{
    select_voice, PlaybackState, PlaybackStatus, PlaybackUpdate, RenditionSpec, SourceId,
    SpeechPlaybackController, SpeechSynthesizer, SynthesisEvent, Utterance, UtteranceId, Variant,
    Voice,
};
pub use terminal::TerminalSynthesizer;
