//! Voice turn workflow behind the kiosk's microphone button
//!
//! One toggle starts a recording; the next one stops it, uploads it, appends
//! both sides of the exchange to the chat log and tries to play the reply.
//! When the host blocks autoplay the reply is kept for a manual `play_last`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::audio::{
    play_audio, wrap_as_upload, AudioClip, AudioOutput, CodecError, PlaybackError, PlaybackHandle,
};
use crate::chat::{ChatLog, SourceKind};
use crate::config::RuntimeConfig;
use crate::recording::{RecordedAudio, RecorderError, RecorderState, RecordingSession, StopReason};
use crate::voice::{VoiceTurnClient, VoiceTurnError, VoiceTurnRequest, VoiceTurnResult};

pub const NO_SPEECH_TEXT: &str = "(no speech detected)";
pub const NO_REPLY_TEXT: &str = "(no response)";

/// Labels and switches for the voice panel
#[derive(Debug, Clone)]
pub struct TurnSettings {
    pub bot_name: String,
    pub user_label: String,
    pub welcome_message: String,
    pub offline_message: String,
    /// Host can capture audio at all
    pub voice_supported: bool,
    /// Upload filename stem; the extension follows the recorded format
    pub upload_stem: String,
    pub top_k: Option<u32>,
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self {
            bot_name: "NatuBot".to_string(),
            user_label: "You".to_string(),
            welcome_message: "Hi! Press the microphone and ask your question.".to_string(),
            offline_message: "No internet connection. This service does not work offline."
                .to_string(),
            voice_supported: true,
            upload_stem: "turn".to_string(),
            top_k: None,
        }
    }
}

/// Status pills shown under the voice button
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoiceDiagnostics {
    pub had_audio: bool,
    pub autoplay_blocked: bool,
    pub last_error: String,
    pub stt_mode: String,
    pub fallback: bool,
}

impl Default for VoiceDiagnostics {
    fn default() -> Self {
        Self {
            had_audio: false,
            autoplay_blocked: false,
            last_error: String::new(),
            stt_mode: "-".to_string(),
            fallback: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("Voice capture is not supported on this device.")]
    VoiceUnsupported,

    #[error("{0}")]
    Offline(String),

    #[error("This kiosk is not configured. Check kiosk-config.json.")]
    NotConfigured,

    #[error("A voice turn is already being processed.")]
    Busy,

    #[error("There is no reply audio to play.")]
    NoLastAudio,

    #[error(transparent)]
    Recorder(#[from] RecorderError),

    #[error(transparent)]
    Voice(#[from] VoiceTurnError),

    #[error("The reply audio could not be decoded: {0}")]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Playback(#[from] PlaybackError),
}

/// What happened to the reply audio
#[derive(Debug)]
pub enum PlaybackStatus {
    Started(PlaybackHandle),
    /// Autoplay was blocked; offer `play_last`
    ManualPlayRequired,
    /// The backend answered without audio
    NoAudio,
    Failed(PlaybackError),
}

/// A completed voice turn
#[derive(Debug)]
pub struct TurnReport {
    pub result: VoiceTurnResult,
    pub recorded: Duration,
    pub stop_reason: StopReason,
    pub playback: PlaybackStatus,
}

#[derive(Debug)]
pub enum ToggleOutcome {
    /// Recording began; toggle again to send it
    RecordingStarted,
    Completed(TurnReport),
}

struct PanelState {
    log: ChatLog,
    last_audio: Option<AudioClip>,
    diagnostics: VoiceDiagnostics,
}

/// Clears the busy flag when the turn ends, however it ends
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct VoiceTurnController {
    session: RecordingSession,
    client: VoiceTurnClient,
    output: Arc<dyn AudioOutput>,
    runtime: RuntimeConfig,
    settings: TurnSettings,
    online: AtomicBool,
    busy: AtomicBool,
    panel: Mutex<PanelState>,
}

impl VoiceTurnController {
    pub fn new(
        session: RecordingSession,
        client: VoiceTurnClient,
        output: Arc<dyn AudioOutput>,
        runtime: RuntimeConfig,
        settings: TurnSettings,
    ) -> Self {
        let log = ChatLog::with_welcome(&settings.bot_name, &settings.welcome_message);

        Self {
            session,
            client,
            output,
            runtime,
            settings,
            online: AtomicBool::new(true),
            busy: AtomicBool::new(false),
            panel: Mutex::new(PanelState {
                log,
                last_audio: None,
                diagnostics: VoiceDiagnostics::default(),
            }),
        }
    }

    fn panel(&self) -> MutexGuard<'_, PanelState> {
        self.panel.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Connectivity as reported by the host
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst) || self.session.state() == RecorderState::Stopping
    }

    fn preflight(&self) -> Result<(), TurnError> {
        if !self.settings.voice_supported {
            return Err(TurnError::VoiceUnsupported);
        }
        if !self.online.load(Ordering::SeqCst) {
            return Err(TurnError::Offline(self.settings.offline_message.clone()));
        }
        if !self.runtime.auth_ready() {
            return Err(TurnError::NotConfigured);
        }
        Ok(())
    }

    fn claim_busy(&self) -> Result<BusyGuard<'_>, TurnError> {
        self.busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| TurnError::Busy)?;
        Ok(BusyGuard(&self.busy))
    }

    /// The microphone button: start recording, or finish and send the current one.
    ///
    /// A recording finalized (or still being finalized) by the duration
    /// ceiling is sent instead of starting a new one.
    pub async fn toggle(&self, cancel: Option<&CancellationToken>) -> Result<ToggleOutcome, TurnError> {
        self.preflight()?;
        if self.busy.load(Ordering::SeqCst) {
            return Err(TurnError::Busy);
        }

        if self.session.state() == RecorderState::Recording {
            let _busy = self.claim_busy()?;
            let audio = self.session.stop().await?;
            return self.submit(audio, cancel).await.map(ToggleOutcome::Completed);
        }

        if self.session.state() == RecorderState::Stopping {
            let _busy = self.claim_busy()?;
            info!("Waiting for the ceiling stop to finish before sending");
            let audio = self.finish_ceiling_stop().await?;
            return self.submit(audio, cancel).await.map(ToggleOutcome::Completed);
        }

        match self.session.try_take_auto_stopped() {
            Some(Ok(audio)) => {
                let _busy = self.claim_busy()?;
                info!("Sending recording finalized by the ceiling");
                return self.submit(audio, cancel).await.map(ToggleOutcome::Completed);
            }
            Some(Err(e)) => warn!("Discarding failed ceiling stop: {}", e),
            None => {}
        }

        self.session.start().await?;
        Ok(ToggleOutcome::RecordingStarted)
    }

    /// Collect the recording a ceiling stop in flight is finalizing.
    ///
    /// The result is queued before the session publishes `idle`, so reaching
    /// `idle` with nothing queued means the stop belonged to someone else.
    async fn finish_ceiling_stop(&self) -> Result<RecordedAudio, TurnError> {
        let mut status = self.session.subscribe();

        let queued = tokio::select! {
            biased;
            result = self.session.next_auto_stopped() => result,
            idle = status.wait_for(|s| s.state == RecorderState::Idle) => {
                drop(idle);
                None
            }
        };

        let result = match queued {
            Some(result) => result,
            None => self
                .session
                .try_take_auto_stopped()
                .ok_or(RecorderError::NoActiveRecording)?,
        };
        Ok(result?)
    }

    async fn submit(
        &self,
        audio: RecordedAudio,
        cancel: Option<&CancellationToken>,
    ) -> Result<TurnReport, TurnError> {
        let recorded = audio.duration;
        let stop_reason = audio.stop_reason;
        let filename = audio.filename(&self.settings.upload_stem);
        let upload = wrap_as_upload(audio.into_clip(), filename);

        let mut request = VoiceTurnRequest::new(upload).include_audio(true);
        if let Some(top_k) = self.settings.top_k {
            request = request.top_k(top_k);
        }

        let result = match self.client.send_voice_turn(&self.runtime, request, cancel).await {
            Ok(result) => result,
            Err(e) => {
                self.panel().diagnostics.last_error = e.to_string();
                return Err(e.into());
            }
        };

        {
            let mut panel = self.panel();

            let user_text = match result.stt_text.trim() {
                "" => NO_SPEECH_TEXT,
                text => text,
            };
            let bot_text = match result.bot_text.trim() {
                "" => NO_REPLY_TEXT,
                text => text,
            };
            panel.log.push(&self.settings.user_label, user_text, SourceKind::Voice);
            panel.log.push(&self.settings.bot_name, bot_text, SourceKind::Voice);

            panel.diagnostics = VoiceDiagnostics {
                had_audio: result.has_audio(),
                autoplay_blocked: false,
                last_error: if result.has_audio() {
                    String::new()
                } else {
                    result
                        .tts_error
                        .clone()
                        .unwrap_or_else(|| "The backend answered without audio.".to_string())
                },
                stt_mode: result.stt_mode_used.clone().unwrap_or_else(|| "-".to_string()),
                fallback: result.fallback_used.unwrap_or(false),
            };
        }

        let playback = match result.decode_audio() {
            None => PlaybackStatus::NoAudio,
            Some(Err(e)) => {
                warn!("Reply audio is not valid base64: {}", e);
                self.panel().diagnostics.last_error = e.to_string();
                PlaybackStatus::Failed(PlaybackError::Failed(e.to_string()))
            }
            Some(Ok(clip)) => {
                self.panel().last_audio = Some(clip.clone());
                self.try_play(&clip).await
            }
        };

        Ok(TurnReport {
            result,
            recorded,
            stop_reason,
            playback,
        })
    }

    async fn try_play(&self, clip: &AudioClip) -> PlaybackStatus {
        match play_audio(Arc::clone(&self.output), clip).await {
            Ok(handle) => {
                let mut panel = self.panel();
                panel.diagnostics.autoplay_blocked = false;
                panel.diagnostics.last_error.clear();
                PlaybackStatus::Started(handle)
            }
            Err(PlaybackError::AutoplayBlocked) => {
                let mut panel = self.panel();
                panel.diagnostics.autoplay_blocked = true;
                panel.diagnostics.last_error = PlaybackError::AutoplayBlocked.to_string();
                PlaybackStatus::ManualPlayRequired
            }
            Err(e) => {
                self.panel().diagnostics.last_error = e.to_string();
                PlaybackStatus::Failed(e)
            }
        }
    }

    /// Replay the last reply; this is the manual play control
    pub async fn play_last(&self) -> Result<PlaybackHandle, TurnError> {
        let clip = self.panel().last_audio.clone().ok_or(TurnError::NoLastAudio)?;

        match play_audio(Arc::clone(&self.output), &clip).await {
            Ok(handle) => {
                self.panel().diagnostics.autoplay_blocked = false;
                Ok(handle)
            }
            Err(e) => {
                let mut panel = self.panel();
                panel.diagnostics.autoplay_blocked = true;
                panel.diagnostics.last_error = format!("Could not play the last reply: {}", e);
                Err(e.into())
            }
        }
    }

    /// Drop the conversation and any recording in progress
    pub fn reset(&self) {
        self.session.cancel();
        let mut panel = self.panel();
        panel.log = ChatLog::with_welcome(&self.settings.bot_name, &self.settings.welcome_message);
        panel.last_audio = None;
        panel.diagnostics = VoiceDiagnostics::default();
    }

    pub fn session(&self) -> &RecordingSession {
        &self.session
    }

    pub fn log(&self) -> ChatLog {
        self.panel().log.clone()
    }

    pub fn diagnostics(&self) -> VoiceDiagnostics {
        self.panel().diagnostics.clone()
    }

    pub fn last_audio(&self) -> Option<AudioClip> {
        self.panel().last_audio.clone()
    }
}
