use serde::{Deserialize, Serialize};

/// Media type used when the capture host negotiated nothing specific
pub const DEFAULT_CAPTURE_MIME: &str = "audio/webm";

/// Capture encodings in descending order of preference
pub const PREFERRED_CAPTURE_FORMATS: &[&str] = &[
    "audio/webm;codecs=opus",
    "audio/webm",
    "audio/ogg;codecs=opus",
];

/// Encoding of a captured recording (a MIME type, optionally with codec parameters)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    mime: String,
}

impl AudioFormat {
    pub fn new(mime: impl Into<String>) -> Self {
        Self { mime: mime.into() }
    }

    /// Full MIME string, including codec parameters
    pub fn mime(&self) -> &str {
        &self.mime
    }

    /// MIME essence without parameters (`audio/webm;codecs=opus` -> `audio/webm`)
    pub fn essence(&self) -> &str {
        self.mime.split(';').next().unwrap_or("").trim()
    }

    /// File extension matching the container, used for upload filenames
    pub fn extension(&self) -> &'static str {
        match self.essence() {
            "audio/webm" => "webm",
            "audio/ogg" => "ogg",
            "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
            "audio/mpeg" => "mp3",
            "audio/mp4" => "m4a",
            _ => "bin",
        }
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::new(DEFAULT_CAPTURE_MIME)
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.mime)
    }
}

/// Pick the first entry of `preferred` the host supports.
///
/// Returns `None` when nothing matches, in which case the host's own default
/// encoding is used.
pub fn negotiate_format<S, F>(preferred: &[S], supports: F) -> Option<AudioFormat>
where
    S: AsRef<str>,
    F: Fn(&AudioFormat) -> bool,
{
    preferred
        .iter()
        .map(|mime| AudioFormat::new(mime.as_ref()))
        .find(|format| supports(format))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiate_prefers_first_supported() {
        let chosen = negotiate_format(PREFERRED_CAPTURE_FORMATS, |f| f.essence() == "audio/webm");
        assert_eq!(chosen, Some(AudioFormat::new("audio/webm;codecs=opus")));
    }

    #[test]
    fn test_negotiate_falls_through_list() {
        let chosen = negotiate_format(PREFERRED_CAPTURE_FORMATS, |f| f.mime() == "audio/ogg;codecs=opus");
        assert_eq!(chosen.map(|f| f.extension()), Some("ogg"));
    }

    #[test]
    fn test_negotiate_nothing_supported() {
        assert_eq!(negotiate_format(PREFERRED_CAPTURE_FORMATS, |_| false), None);
    }

    #[test]
    fn test_essence_strips_parameters() {
        let format = AudioFormat::new("audio/webm;codecs=opus");
        assert_eq!(format.essence(), "audio/webm");
        assert_eq!(format.extension(), "webm");
        assert_eq!(AudioFormat::new("application/x-unknown").extension(), "bin");
    }
}
