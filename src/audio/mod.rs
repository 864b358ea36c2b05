pub mod backend;
pub mod codec;
pub mod file;
pub mod format;
pub mod playback;

pub use backend::{CaptureBackend, CaptureConfig, CaptureDevice, CaptureEvent, DeviceError};
pub use codec::{
    decode_base64_audio, encode_base64_audio, wrap_as_upload, AudioClip, CodecError, UploadFile,
};
pub use file::{FileCaptureBackend, WavFileOutput};
pub use format::{negotiate_format, AudioFormat, PREFERRED_CAPTURE_FORMATS};
pub use playback::{
    play_audio, AudioOutput, PlaybackError, PlaybackEvent, PlaybackHandle, SourceHandle,
    StartRejection,
};
