//! Session core for cross-language healthcare chat.
//!
//! A [`ChatSession`] keeps the message thread, memoizes translations per
//! message and language, plays one rendition aloud at a time, and turns
//! finished voice transcripts into messages. Remote work goes through a
//! [`remote::ChatBackend`]; local speech goes through the capability traits
//! in [`speech`].

pub mod auth;
pub mod chat;
pub mod config;
pub mod error;
pub mod language;
pub mod remote;
pub mod speech;

#[cfg(test)]
mod testing;

pub use chat::{ChatSession, LifecycleEvent, MessageId, SessionEvent};
pub use config::Config;
pub use error::{ChatError, RemoteError};
pub use language::LanguageCode;
