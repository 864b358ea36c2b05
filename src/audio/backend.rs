use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;

use super::format::AudioFormat;

/// Event emitted by a capture device while it is running
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    /// An encoded audio fragment became available
    Data(Vec<u8>),
    /// Finalization requested via `request_stop` completed; no more data follows
    Stopped,
    /// The device failed; no more data follows
    Failed(String),
}

/// Why a capture device could not be acquired or driven
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// The user or host policy refused microphone access
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// No usable input device, or it is held elsewhere
    #[error("microphone unavailable: {0}")]
    Unavailable(String),

    /// The device was acquired but rejected a command
    #[error("capture device error: {0}")]
    Capture(String),
}

/// Configuration handed to a capture device when it starts
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Encoding requested by the session (`None` = host default)
    pub format: Option<AudioFormat>,
    /// How often the device should flush buffered audio as a `CaptureEvent::Data`
    pub timeslice: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            format: None,
            timeslice: Duration::from_millis(250),
        }
    }
}

/// Host capability able to hand out exclusive audio-input devices
///
/// Implementations:
/// - `FileCaptureBackend`: replays an audio file as if it were a microphone
/// - test fakes that script grants, denials and callbacks
#[async_trait::async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Acquire an exclusive input device (may prompt the user for permission)
    async fn acquire(&self) -> Result<Box<dyn CaptureDevice>, DeviceError>;

    /// Whether the host can encode captured audio as `format`
    fn supports(&self, format: &AudioFormat) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// An acquired input device. Dropping it without `release` is a leak on real hosts.
pub trait CaptureDevice: Send {
    /// Start capturing
    ///
    /// Returns a channel receiver that will receive capture events
    fn start(&mut self, config: CaptureConfig) -> Result<mpsc::Receiver<CaptureEvent>, DeviceError>;

    /// Ask the device to flush and finalize; completion arrives as `CaptureEvent::Stopped`
    fn request_stop(&mut self) -> Result<(), DeviceError>;

    /// Release the underlying stream. Must be idempotent.
    fn release(&mut self);

    /// Check if the device is currently capturing
    fn is_capturing(&self) -> bool;

    /// Encoding the device actually produces, once started
    fn format(&self) -> Option<AudioFormat>;
}
