use base64::Engine;
use thiserror::Error;

/// Media type assumed for synthesized replies
pub const REPLY_MIME: &str = "audio/wav";

/// Media type used when a blob carries none
pub const FALLBACK_MIME: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("the audio payload is not valid base64: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
}

/// Raw audio bytes tagged with a declared media type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub bytes: Vec<u8>,
    pub media_type: String,
}

impl AudioClip {
    pub fn new(bytes: Vec<u8>, media_type: impl Into<String>) -> Self {
        Self {
            bytes,
            media_type: media_type.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// A clip ready to be attached to a multipart request as a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub filename: String,
    pub media_type: String,
    pub bytes: Vec<u8>,
}

/// Decode a base64 payload into a clip tagged with `media_type`.
///
/// A `data:<mime>;base64,` prefix is stripped; only the text after the first
/// comma is decoded. ASCII whitespace inside the payload is ignored.
pub fn decode_base64_audio(payload: &str, media_type: &str) -> Result<AudioClip, CodecError> {
    let body = match payload.split_once(',') {
        Some((_, rest)) => rest,
        None => payload,
    };
    let compact: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = base64::engine::general_purpose::STANDARD.decode(compact)?;
    Ok(AudioClip::new(bytes, media_type))
}

pub fn encode_base64_audio(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Attach a filename to a clip for transport
pub fn wrap_as_upload(clip: AudioClip, filename: impl Into<String>) -> UploadFile {
    let media_type = if clip.media_type.trim().is_empty() {
        FALLBACK_MIME.to_string()
    } else {
        clip.media_type
    };

    UploadFile {
        filename: filename.into(),
        media_type,
        bytes: clip.bytes,
    }
}
