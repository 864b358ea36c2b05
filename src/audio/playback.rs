use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::codec::AudioClip;

/// Temporary playable handle created by the host for one clip
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceHandle(pub Uuid);

impl SourceHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SourceHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Why the host refused to begin playback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartRejection {
    /// Playback requires a preceding user gesture (autoplay policy)
    NotAllowed(String),
    /// Any other refusal (unsupported source, device busy, ...)
    Other(String),
}

/// Event emitted by the host once playback has started
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    Ended,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaybackError {
    /// Start refused by autoplay policy; the caller should offer a manual play control
    #[error("Automatic playback was blocked. Press play to hear the reply.")]
    AutoplayBlocked,

    #[error("Could not start audio playback: {0}")]
    StartRejected(String),

    /// The clip could not be decoded or playback broke off mid-stream
    #[error("Could not play the audio: {0}")]
    Failed(String),
}

impl PlaybackError {
    pub fn is_autoplay_blocked(&self) -> bool {
        matches!(self, PlaybackError::AutoplayBlocked)
    }
}

/// Host audio output
#[async_trait::async_trait]
pub trait AudioOutput: Send + Sync {
    /// Make `clip` playable, returning a handle that must be released later
    fn create_source(&self, clip: &AudioClip) -> Result<SourceHandle, PlaybackError>;

    /// Begin playback. Resolves as soon as the host accepts or rejects the start.
    async fn start(
        &self,
        source: &SourceHandle,
    ) -> Result<mpsc::Receiver<PlaybackEvent>, StartRejection>;

    /// Free a handle from `create_source`. Must be idempotent.
    fn release_source(&self, source: &SourceHandle);

    /// Get output name for logging
    fn name(&self) -> &str;
}

/// Releases the playable handle when dropped, whichever path ends playback
struct SourceLease {
    output: Arc<dyn AudioOutput>,
    source: SourceHandle,
}

impl Drop for SourceLease {
    fn drop(&mut self) {
        debug!("Releasing playback source {}", self.source.0);
        self.output.release_source(&self.source);
    }
}

/// Playback that the host accepted. Awaiting it is optional.
#[derive(Debug)]
pub struct PlaybackHandle {
    task: JoinHandle<Result<(), PlaybackError>>,
}

impl PlaybackHandle {
    /// Wait until playback ends or fails mid-stream
    pub async fn finished(self) -> Result<(), PlaybackError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(PlaybackError::Failed(format!("playback task aborted: {}", e))),
        }
    }
}

/// Play `clip` through `output`.
///
/// Returns as soon as the host accepts the start; the outcome of the playback
/// itself is available through [`PlaybackHandle::finished`]. A start refused by
/// autoplay policy maps to [`PlaybackError::AutoplayBlocked`].
pub async fn play_audio(
    output: Arc<dyn AudioOutput>,
    clip: &AudioClip,
) -> Result<PlaybackHandle, PlaybackError> {
    let source = output.create_source(clip)?;
    let lease = SourceLease {
        output: Arc::clone(&output),
        source,
    };

    let mut events = match output.start(&lease.source).await {
        Ok(events) => events,
        Err(StartRejection::NotAllowed(reason)) => {
            warn!("Playback on {} blocked by autoplay policy: {}", output.name(), reason);
            return Err(PlaybackError::AutoplayBlocked);
        }
        Err(StartRejection::Other(reason)) => {
            warn!("Playback on {} rejected: {}", output.name(), reason);
            return Err(PlaybackError::StartRejected(reason));
        }
    };

    info!("Playback started on {} ({} bytes)", output.name(), clip.len());

    let task = tokio::spawn(async move {
        let _lease = lease;
        match events.recv().await {
            Some(PlaybackEvent::Ended) => Ok(()),
            Some(PlaybackEvent::Failed(reason)) => {
                warn!("Playback failed: {}", reason);
                Err(PlaybackError::Failed(reason))
            }
            None => Err(PlaybackError::Failed("playback stream closed".to_string())),
        }
    });

    Ok(PlaybackHandle { task })
}
