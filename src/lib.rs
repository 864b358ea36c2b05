pub mod audio;
pub mod chat;
pub mod config;
pub mod recording;
pub mod turn;
pub mod voice;

pub use audio::{
    decode_base64_audio, play_audio, wrap_as_upload, AudioClip, AudioFormat, AudioOutput,
    CaptureBackend, CaptureDevice, CaptureEvent, FileCaptureBackend, PlaybackError, UploadFile,
    WavFileOutput,
};
pub use chat::{ChatLog, ChatTurnLogEntry, SourceKind};
pub use config::RuntimeConfig;
pub use recording::{
    RecordedAudio, RecorderConfig, RecorderError, RecorderState, RecorderStatus, RecordingSession,
    StopReason,
};
pub use turn::{PlaybackStatus, ToggleOutcome, TurnError, TurnReport, TurnSettings, VoiceTurnController};
pub use voice::{VoiceTurnClient, VoiceTurnError, VoiceTurnRequest, VoiceTurnResult};
