use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::audio::{AudioClip, AudioFormat, DeviceError};

/// Lifecycle of a recording session
///
/// ```text
/// idle -> requesting -> recording -> stopping -> idle
///              \             \            \
///               +-------------+------------+--> error -> idle
/// ```
///
/// `cancel` forces any state back to `idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecorderState {
    Idle,
    Requesting,
    Recording,
    Stopping,
    Error,
}

impl RecorderState {
    /// Allowed transitions, excluding the forced return to `idle` on cancel
    pub fn can_transition_to(self, next: RecorderState) -> bool {
        use RecorderState::*;

        matches!(
            (self, next),
            (Idle, Requesting)
                | (Requesting, Recording)
                | (Requesting, Error)
                | (Recording, Stopping)
                | (Recording, Error)
                | (Stopping, Idle)
                | (Stopping, Error)
                | (Error, Idle)
        )
    }

    /// States during which the session owns (or is acquiring) the input device
    pub fn holds_device(self) -> bool {
        matches!(
            self,
            RecorderState::Requesting | RecorderState::Recording | RecorderState::Stopping
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RecorderState::Idle => "idle",
            RecorderState::Requesting => "requesting",
            RecorderState::Recording => "recording",
            RecorderState::Stopping => "stopping",
            RecorderState::Error => "error",
        }
    }
}

impl std::fmt::Display for RecorderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot published to observers on every change
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecorderStatus {
    pub state: RecorderState,

    /// Milliseconds since recording began; 0 outside `recording`
    pub elapsed_ms: u64,

    /// Last user-facing failure, cleared when a new attempt starts
    pub error: String,
}

impl Default for RecorderStatus {
    fn default() -> Self {
        Self {
            state: RecorderState::Idle,
            elapsed_ms: 0,
            error: String::new(),
        }
    }
}

/// What ended a recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StopReason {
    /// `stop()` was called
    Requested,
    /// The per-turn duration ceiling fired
    Ceiling,
}

/// A finished recording
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedAudio {
    /// Captured fragments concatenated in arrival order
    pub data: Vec<u8>,
    /// Encoding negotiated with the capture host
    pub format: AudioFormat,
    /// Time between recording start and the stop request
    pub duration: Duration,
    pub stop_reason: StopReason,
    /// Number of fragments the device delivered
    pub chunk_count: usize,
}

impl RecordedAudio {
    pub fn duration_ms(&self) -> u64 {
        self.duration.as_millis() as u64
    }

    /// Upload filename for this recording (`turn.webm`, `turn.ogg`, ...)
    pub fn filename(&self, stem: &str) -> String {
        format!("{}.{}", stem, self.format.extension())
    }

    pub fn into_clip(self) -> AudioClip {
        AudioClip::new(self.data, self.format.mime())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecorderError {
    #[error("Microphone permission denied. Enable it to use voice.")]
    PermissionDenied { detail: String },

    #[error("Could not access the microphone.")]
    DeviceUnavailable { detail: String },

    #[error("A recording is already in progress ({0}).")]
    AlreadyActive(RecorderState),

    #[error("There is no active recording to stop.")]
    NoActiveRecording,

    #[error("Audio recording failed.")]
    CaptureFailed { detail: String },

    #[error("Could not assemble the recorded audio.")]
    FinalizeFailed { detail: String },

    #[error("Error while stopping the recording.")]
    StopFailed { detail: String },

    #[error("The recording was cancelled.")]
    Cancelled,
}

impl RecorderError {
    /// Technical detail behind the user-facing message, if any
    pub fn detail(&self) -> Option<&str> {
        match self {
            RecorderError::PermissionDenied { detail }
            | RecorderError::DeviceUnavailable { detail }
            | RecorderError::CaptureFailed { detail }
            | RecorderError::FinalizeFailed { detail }
            | RecorderError::StopFailed { detail } => Some(detail),
            _ => None,
        }
    }
}

impl From<DeviceError> for RecorderError {
    fn from(err: DeviceError) -> Self {
        match err {
            DeviceError::PermissionDenied(detail) => RecorderError::PermissionDenied { detail },
            DeviceError::Unavailable(detail) => RecorderError::DeviceUnavailable { detail },
            DeviceError::Capture(detail) => RecorderError::CaptureFailed { detail },
        }
    }
}
