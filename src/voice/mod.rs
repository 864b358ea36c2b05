//! Voice turn upload
//!
//! Sends one recorded turn to the kiosk backend as multipart form data,
//! under a 30 s deadline merged with any caller cancellation, and decodes
//! the structured reply.

pub mod cancel;
pub mod client;
pub mod error;
pub mod messages;

pub use cancel::{CancelCause, RequestCancellation};
pub use client::{VoiceTurnClient, VoiceTurnRequest, VOICE_TURN_DEADLINE};
pub use error::VoiceTurnError;
pub use messages::{TurnLatency, VoiceTurnResult};
