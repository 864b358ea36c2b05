//! Voice-turn recording
//!
//! This module provides the `RecordingSession` state machine that manages:
//! - Input device acquisition and exclusive ownership
//! - Encoding negotiation with the capture host
//! - Chunk buffering and elapsed-time reporting
//! - The hard per-turn duration ceiling
//! - Stop/cancel semantics that always release the device

mod completion;
mod config;
mod session;
mod state;

pub use completion::StopResult;
pub use config::RecorderConfig;
pub use session::RecordingSession;
pub use state::{RecordedAudio, RecorderError, RecorderState, RecorderStatus, StopReason};
