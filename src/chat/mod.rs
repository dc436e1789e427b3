//! The chat session core: message thread, translation memo and the session
//! controller that coordinates remote calls with local speech.

pub mod events;
pub mod message;
pub mod session;
pub mod translation;

pub use events::{LifecycleEvent, NoticeLevel, SessionEvent};
pub use message::{Message, MessageId, MessageOrigin, Sender};
pub use session::{
    Capabilities, ChatSession, PlayOutcome, SendOutcome, SessionChannels, TranslationOutcome,
};
pub use translation::{TranslationCache, TranslationGate};
