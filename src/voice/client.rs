use std::time::Duration;

use reqwest::multipart::{Form, Part};
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::cancel::{CancelCause, RequestCancellation};
use super::error::VoiceTurnError;
use super::messages::{error_message, VoiceTurnResult};
use crate::audio::UploadFile;
use crate::config::RuntimeConfig;

/// Hard deadline for one voice turn request
pub const VOICE_TURN_DEADLINE: Duration = Duration::from_secs(30);

pub const DEVICE_ID_HEADER: &str = "X-Device-Id";
pub const KIOSK_TOKEN_HEADER: &str = "X-Kiosk-Token";

/// One recorded turn to submit
#[derive(Debug, Clone)]
pub struct VoiceTurnRequest {
    pub audio: UploadFile,
    /// Ask the backend for a synthesized reply
    pub include_audio: bool,
    /// Retrieval depth override; omitted from the request when `None`
    pub top_k: Option<u32>,
}

impl VoiceTurnRequest {
    pub fn new(audio: UploadFile) -> Self {
        Self {
            audio,
            include_audio: true,
            top_k: None,
        }
    }

    pub fn include_audio(mut self, include: bool) -> Self {
        self.include_audio = include;
        self
    }

    pub fn top_k(mut self, top_k: u32) -> Self {
        self.top_k = Some(top_k);
        self
    }

    fn into_form(self) -> Result<Form, VoiceTurnError> {
        let part = Part::bytes(self.audio.bytes)
            .file_name(self.audio.filename)
            .mime_str(&self.audio.media_type)
            .map_err(|e| VoiceTurnError::InvalidRequest(e.to_string()))?;

        let mut form = Form::new()
            .part("audio", part)
            .text("include_audio", if self.include_audio { "true" } else { "false" });

        if let Some(top_k) = self.top_k {
            form = form.text("top_k", top_k.to_string());
        }

        Ok(form)
    }
}

/// Uploads recorded turns to the kiosk backend
///
/// Exactly one HTTP request per call and no retries; concurrent calls are
/// the caller's business.
#[derive(Debug, Clone)]
pub struct VoiceTurnClient {
    http: reqwest::Client,
    deadline: Duration,
}

impl VoiceTurnClient {
    pub fn new() -> Result<Self, VoiceTurnError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| VoiceTurnError::Network(e.to_string()))?;

        Ok(Self::with_http(http))
    }

    pub fn with_http(http: reqwest::Client) -> Self {
        Self {
            http,
            deadline: VOICE_TURN_DEADLINE,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Submit one turn and wait for the structured reply.
    ///
    /// The request is abandoned when `cancel` fires or the deadline passes,
    /// whichever comes first.
    pub async fn send_voice_turn(
        &self,
        runtime: &RuntimeConfig,
        request: VoiceTurnRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<VoiceTurnResult, VoiceTurnError> {
        let endpoint = runtime.voice_endpoint().ok_or(VoiceTurnError::NotConfigured)?;

        let upload_bytes = request.audio.bytes.len();
        let upload_name = request.audio.filename.clone();
        let include_audio = request.include_audio;
        let form = request.into_form()?;

        let mut builder = self.http.post(&endpoint).multipart(form);
        if let Some(device_id) = runtime.device_id.as_deref() {
            builder = builder.header(DEVICE_ID_HEADER, device_id);
        }
        if let Some(token) = runtime.kiosk_token.as_deref() {
            builder = builder.header(KIOSK_TOKEN_HEADER, token);
        }

        info!(
            "Sending voice turn to {} ({}, {} bytes, include_audio={})",
            endpoint, upload_name, upload_bytes, include_audio
        );

        let started = Instant::now();
        let cancellation = RequestCancellation::new(self.deadline, cancel);

        let outcome = tokio::select! {
            biased;
            cause = cancellation.cancelled() => match cause {
                CancelCause::Deadline => Err(VoiceTurnError::DeadlineExceeded(self.deadline)),
                CancelCause::Caller => Err(VoiceTurnError::Cancelled),
            },
            result = Self::execute(builder) => result,
        };

        match &outcome {
            Ok(result) => info!(
                "Voice turn answered in {}ms (speech={}, audio={}, stt_mode={})",
                started.elapsed().as_millis(),
                result.speech_detected(),
                result.has_audio(),
                result.stt_mode_used.as_deref().unwrap_or("-")
            ),
            Err(e) => warn!(
                "Voice turn failed after {}ms: {}",
                started.elapsed().as_millis(),
                e
            ),
        }

        outcome
    }

    async fn execute(builder: reqwest::RequestBuilder) -> Result<VoiceTurnResult, VoiceTurnError> {
        let response = builder
            .send()
            .await
            .map_err(|e| VoiceTurnError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| VoiceTurnError::Network(e.to_string()))?;

        let value: Value = serde_json::from_slice(&body).unwrap_or_else(|e| {
            warn!("Voice response ({}) is not JSON: {}", status, e);
            Value::Object(Default::default())
        });

        if !status.is_success() {
            return Err(VoiceTurnError::Http {
                status: status.as_u16(),
                message: error_message(&value, status),
            });
        }

        Ok(VoiceTurnResult::from_json(&value))
    }
}
