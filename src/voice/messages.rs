use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::audio::codec::{decode_base64_audio, REPLY_MIME};
use crate::audio::{AudioClip, CodecError};

/// Backend-reported stage latencies in milliseconds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnLatency {
    pub stt: Option<f64>,
    pub llm: Option<f64>,
    pub tts: Option<f64>,
}

/// Structured reply to one voice turn
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VoiceTurnResult {
    /// Recognized speech; empty means no speech was detected
    pub stt_text: String,
    /// Reply text; may be empty
    pub bot_text: String,
    /// Synthesized reply (base64 WAV), only when the backend produced one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_wav_base64: Option<String>,
    /// Speech recognition mode the backend used
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stt_mode_used: Option<String>,
    /// Whether a degraded recognition path was used
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_used: Option<bool>,
    #[serde(rename = "latency_ms", skip_serializing_if = "Option::is_none")]
    pub latency: Option<TurnLatency>,
    /// Why synthesis failed, when the backend answered without audio
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts_error: Option<String>,
}

impl VoiceTurnResult {
    /// Decode a response body leniently: text fields always come out as
    /// strings, optional fields only when the backend supplied them.
    pub fn from_json(value: &Value) -> Self {
        Self {
            stt_text: coerce_string(value.get("stt_text")),
            bot_text: coerce_string(value.get("bot_text")),
            audio_wav_base64: non_empty(value.get("audio_wav_base64")),
            stt_mode_used: non_empty(value.get("stt_mode_used")),
            fallback_used: value.get("fallback_used").and_then(Value::as_bool),
            latency: value.get("latency_ms").filter(|v| v.is_object()).map(|v| TurnLatency {
                stt: v.get("stt").and_then(Value::as_f64),
                llm: v.get("llm").and_then(Value::as_f64),
                tts: v.get("tts").and_then(Value::as_f64),
            }),
            tts_error: non_empty(value.get("tts_error")),
        }
    }

    pub fn speech_detected(&self) -> bool {
        !self.stt_text.trim().is_empty()
    }

    pub fn has_audio(&self) -> bool {
        self.audio_wav_base64.is_some()
    }

    /// Decode the synthesized reply, if there is one
    pub fn decode_audio(&self) -> Option<Result<AudioClip, CodecError>> {
        self.audio_wav_base64
            .as_deref()
            .map(|b64| decode_base64_audio(b64, REPLY_MIME))
    }
}

/// Message for a non-success response: `error`, then `detail`, then the status
pub fn error_message(body: &Value, status: StatusCode) -> String {
    non_empty(body.get("error"))
        .or_else(|| non_empty(body.get("detail")))
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
}

/// Falsy JSON values (null, false, zero) read as empty text
fn coerce_string(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => String::new(),
        Some(Value::Number(n)) if n.as_f64() == Some(0.0) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn non_empty(value: Option<&Value>) -> Option<String> {
    Some(coerce_string(value)).filter(|s| !s.is_empty())
}
