// File-backed capture and playback hosts, used by the CLI and for kiosk bring-up
// on machines without a microphone or speakers.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{Context, Result};
use hound::WavReader;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::backend::{CaptureBackend, CaptureConfig, CaptureDevice, CaptureEvent, DeviceError};
use super::codec::AudioClip;
use super::format::AudioFormat;
use super::playback::{AudioOutput, PlaybackError, PlaybackEvent, SourceHandle, StartRejection};

/// Bytes delivered per timeslice when replaying a file
const REPLAY_CHUNK_BYTES: usize = 4096;

/// Media type implied by a file extension
pub fn format_for_path(path: &Path) -> AudioFormat {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "webm" => AudioFormat::new("audio/webm;codecs=opus"),
        "ogg" | "opus" => AudioFormat::new("audio/ogg;codecs=opus"),
        "wav" => AudioFormat::new("audio/wav"),
        "mp3" => AudioFormat::new("audio/mpeg"),
        "m4a" => AudioFormat::new("audio/mp4"),
        _ => AudioFormat::new(""),
    }
}

/// Load an audio file from disk as a clip tagged with its media type
pub fn read_clip(path: impl AsRef<Path>) -> Result<AudioClip> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read audio file: {}", path.display()))?;

    info!("Loaded audio file {} ({} bytes)", path.display(), bytes.len());

    Ok(AudioClip::new(bytes, format_for_path(path).mime()))
}

/// Capture backend that replays an audio file as if it were a microphone
pub struct FileCaptureBackend {
    path: PathBuf,
    format: AudioFormat,
}

impl FileCaptureBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let format = format_for_path(&path);
        Self { path, format }
    }
}

#[async_trait::async_trait]
impl CaptureBackend for FileCaptureBackend {
    async fn acquire(&self) -> Result<Box<dyn CaptureDevice>, DeviceError> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => {
                DeviceError::PermissionDenied(format!("{}: {}", self.path.display(), e))
            }
            _ => DeviceError::Unavailable(format!("{}: {}", self.path.display(), e)),
        })?;

        info!("File capture device opened: {} ({} bytes)", self.path.display(), bytes.len());

        Ok(Box::new(FileCaptureDevice {
            bytes: Some(bytes),
            format: self.format.clone(),
            stop_tx: None,
            task: None,
            capturing: false,
        }))
    }

    fn supports(&self, format: &AudioFormat) -> bool {
        format.essence() == self.format.essence()
    }

    fn name(&self) -> &str {
        "file replay"
    }
}

struct FileCaptureDevice {
    bytes: Option<Vec<u8>>,
    format: AudioFormat,
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    capturing: bool,
}

impl CaptureDevice for FileCaptureDevice {
    fn start(&mut self, config: CaptureConfig) -> Result<mpsc::Receiver<CaptureEvent>, DeviceError> {
        let bytes = self
            .bytes
            .take()
            .ok_or_else(|| DeviceError::Capture("file replay already consumed".to_string()))?;

        if let Some(requested) = &config.format {
            if requested.essence() != self.format.essence() {
                warn!("Requested {} but file is {}; replaying as-is", requested, self.format);
            }
        }

        let (event_tx, event_rx) = mpsc::channel(64);
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let timeslice = config.timeslice;

        let task = tokio::spawn(async move {
            let mut pending = bytes.chunks(REPLAY_CHUNK_BYTES);
            let mut ticker = tokio::time::interval(timeslice);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = &mut stop_rx => {
                        // Flush what the replay has not delivered yet, then finalize
                        let rest: Vec<u8> = pending.by_ref().flatten().copied().collect();
                        if !rest.is_empty() && event_tx.send(CaptureEvent::Data(rest)).await.is_err() {
                            return;
                        }
                        let _ = event_tx.send(CaptureEvent::Stopped).await;
                        return;
                    }
                    _ = ticker.tick() => {
                        if let Some(chunk) = pending.next() {
                            if event_tx.send(CaptureEvent::Data(chunk.to_vec())).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        });

        self.stop_tx = Some(stop_tx);
        self.task = Some(task);
        self.capturing = true;

        Ok(event_rx)
    }

    fn request_stop(&mut self) -> Result<(), DeviceError> {
        let stop_tx = self
            .stop_tx
            .take()
            .ok_or_else(|| DeviceError::Capture("file replay is not running".to_string()))?;
        stop_tx
            .send(())
            .map_err(|_| DeviceError::Capture("file replay already finished".to_string()))
    }

    fn release(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.stop_tx = None;
        self.bytes = None;
        self.capturing = false;
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn format(&self) -> Option<AudioFormat> {
        Some(self.format.clone())
    }
}

/// Audio output that "plays" WAV replies into a directory
///
/// Each accepted clip is validated with `hound` and written as
/// `reply-NNN.wav`; unreadable WAV data is refused at start.
pub struct WavFileOutput {
    out_dir: PathBuf,
    sources: Mutex<HashMap<SourceHandle, AudioClip>>,
    played: AtomicUsize,
}

impl WavFileOutput {
    pub fn new(out_dir: impl Into<PathBuf>) -> Result<Self> {
        let out_dir = out_dir.into();
        std::fs::create_dir_all(&out_dir)
            .with_context(|| format!("Failed to create output directory: {}", out_dir.display()))?;

        Ok(Self {
            out_dir,
            sources: Mutex::new(HashMap::new()),
            played: AtomicUsize::new(0),
        })
    }

    /// Number of sources created but not yet released
    pub fn live_sources(&self) -> usize {
        self.sources.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl AudioOutput for WavFileOutput {
    fn create_source(&self, clip: &AudioClip) -> Result<SourceHandle, PlaybackError> {
        let handle = SourceHandle::new();
        self.sources
            .lock()
            .map_err(|_| PlaybackError::Failed("source registry poisoned".to_string()))?
            .insert(handle.clone(), clip.clone());
        Ok(handle)
    }

    async fn start(
        &self,
        source: &SourceHandle,
    ) -> Result<mpsc::Receiver<PlaybackEvent>, StartRejection> {
        let clip = self
            .sources
            .lock()
            .map_err(|_| StartRejection::Other("source registry poisoned".to_string()))?
            .get(source)
            .cloned()
            .ok_or_else(|| StartRejection::Other("unknown playback source".to_string()))?;

        let reader = WavReader::new(Cursor::new(&clip.bytes))
            .map_err(|e| StartRejection::Other(format!("unsupported source: {}", e)))?;
        let spec = reader.spec();
        let duration_secs = reader.duration() as f64 / spec.sample_rate.max(1) as f64;

        let index = self.played.fetch_add(1, Ordering::SeqCst);
        let path = self.out_dir.join(format!("reply-{:03}.wav", index));

        info!(
            "Playing {:.1}s reply ({}Hz, {} channels) into {}",
            duration_secs,
            spec.sample_rate,
            spec.channels,
            path.display()
        );

        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            let event = match tokio::fs::write(&path, &clip.bytes).await {
                Ok(()) => PlaybackEvent::Ended,
                Err(e) => PlaybackEvent::Failed(format!("{}: {}", path.display(), e)),
            };
            let _ = tx.send(event).await;
        });

        Ok(rx)
    }

    fn release_source(&self, source: &SourceHandle) {
        if let Ok(mut sources) = self.sources.lock() {
            sources.remove(source);
        }
    }

    fn name(&self) -> &str {
        "wav file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_for_path() {
        assert_eq!(format_for_path(Path::new("turn.webm")).essence(), "audio/webm");
        assert_eq!(format_for_path(Path::new("reply.WAV")).mime(), "audio/wav");
        assert_eq!(format_for_path(Path::new("noext")).mime(), "");
    }
}
