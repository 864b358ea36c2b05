use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::completion::{Completion, CompletionTarget, StopResult};
use super::config::RecorderConfig;
use super::state::{RecordedAudio, RecorderError, RecorderState, RecorderStatus, StopReason};
use crate::audio::{
    negotiate_format, AudioFormat, CaptureBackend, CaptureConfig, CaptureDevice, CaptureEvent,
};

/// Microphone capture for one voice turn at a time
///
/// Owns the input device exclusively while `requesting`, `recording` or
/// `stopping`, and releases it on every way back to `idle`. Host callbacks
/// (data, finalize, failure) are fed through [`Shared::on_capture_event`]; the
/// elapsed-time tick and the duration ceiling run as tasks that are aborted
/// whenever the session leaves `recording`.
pub struct RecordingSession {
    shared: Arc<Shared>,
    auto_stopped: tokio::sync::Mutex<mpsc::UnboundedReceiver<StopResult>>,
}

struct Shared {
    backend: Arc<dyn CaptureBackend>,
    config: RecorderConfig,
    inner: Mutex<Inner>,
    status_tx: watch::Sender<RecorderStatus>,
    auto_tx: mpsc::UnboundedSender<StopResult>,
}

struct Inner {
    state: RecorderState,
    error: String,
    elapsed_ms: u64,
    chunks: Vec<Vec<u8>>,
    device: Option<Box<dyn CaptureDevice>>,
    format: Option<AudioFormat>,
    started_at: Option<Instant>,
    stopped_after: Option<std::time::Duration>,
    stop_reason: StopReason,
    tick_task: Option<JoinHandle<()>>,
    ceiling_task: Option<JoinHandle<()>>,
    pump_task: Option<JoinHandle<()>>,
    completion: Completion,
    /// Bumped on every return to idle; stale tasks compare against it
    generation: u64,
    attempt_id: Option<Uuid>,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: RecorderState::Idle,
            error: String::new(),
            elapsed_ms: 0,
            chunks: Vec::new(),
            device: None,
            format: None,
            started_at: None,
            stopped_after: None,
            stop_reason: StopReason::Requested,
            tick_task: None,
            ceiling_task: None,
            pump_task: None,
            completion: Completion::default(),
            generation: 0,
            attempt_id: None,
        }
    }

    fn attempt(&self) -> String {
        self.attempt_id.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string())
    }

    fn cancel_timers(&mut self) {
        if let Some(task) = self.tick_task.take() {
            task.abort();
        }
        if let Some(task) = self.ceiling_task.take() {
            task.abort();
        }
    }

    fn release_device(&mut self) {
        if let Some(mut device) = self.device.take() {
            device.release();
            debug!("[{}] Input device released", self.attempt());
        }
    }

    /// Release everything the attempt owned. Safe to call repeatedly.
    fn finish_idle(&mut self) {
        self.cancel_timers();
        if let Some(task) = self.pump_task.take() {
            task.abort();
        }
        self.release_device();
        self.chunks.clear();
        self.format = None;
        self.started_at = None;
        self.stopped_after = None;
        self.elapsed_ms = 0;
        self.generation += 1;
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, inner: &Inner) {
        self.status_tx.send_replace(RecorderStatus {
            state: inner.state,
            elapsed_ms: inner.elapsed_ms,
            error: inner.error.clone(),
        });
    }

    fn transition(&self, inner: &mut Inner, next: RecorderState) {
        if !inner.state.can_transition_to(next) {
            error!(
                "[{}] Invalid recorder transition {} -> {}",
                inner.attempt(),
                inner.state,
                next
            );
        }
        debug!("[{}] Recorder {} -> {}", inner.attempt(), inner.state, next);
        inner.state = next;
        self.publish(inner);
    }

    /// Record `err`, pass through `error`, release everything and return to `idle`
    fn fail(&self, inner: &mut Inner, err: RecorderError) {
        warn!(
            "[{}] Recording failed in {}: {} ({})",
            inner.attempt(),
            inner.state,
            err,
            err.detail().unwrap_or("-")
        );

        inner.error = err.to_string();
        inner.finish_idle();
        self.transition(inner, RecorderState::Error);
        inner.completion.resolve(Err(err));
        self.transition(inner, RecorderState::Idle);
    }

    /// Assemble the buffered fragments and resolve the pending stop
    fn finalize(&self, inner: &mut Inner) {
        let chunks = std::mem::take(&mut inner.chunks);
        let audio = RecordedAudio {
            chunk_count: chunks.len(),
            data: chunks.concat(),
            format: inner.format.clone().unwrap_or_default(),
            duration: inner.stopped_after.unwrap_or_default(),
            stop_reason: inner.stop_reason,
        };

        info!(
            "[{}] Recording finalized: {} bytes in {} chunks, {}ms ({:?}, {})",
            inner.attempt(),
            audio.data.len(),
            audio.chunk_count,
            audio.duration_ms(),
            audio.stop_reason,
            audio.format
        );

        inner.finish_idle();
        inner.completion.resolve(Ok(audio));
        self.transition(inner, RecorderState::Idle);
    }

    /// Single entry point for host capture callbacks. `None` means the event
    /// stream closed. Returns true once the attempt is over.
    fn on_capture_event(&self, inner: &mut Inner, event: Option<CaptureEvent>) -> bool {
        match (inner.state, event) {
            (RecorderState::Recording | RecorderState::Stopping, Some(CaptureEvent::Data(bytes))) => {
                if !bytes.is_empty() {
                    inner.chunks.push(bytes);
                }
                false
            }
            (RecorderState::Stopping, Some(CaptureEvent::Stopped)) => {
                self.finalize(inner);
                true
            }
            (RecorderState::Stopping, Some(CaptureEvent::Failed(detail))) => {
                self.fail(inner, RecorderError::FinalizeFailed { detail });
                true
            }
            (RecorderState::Stopping, None) => {
                self.fail(
                    inner,
                    RecorderError::FinalizeFailed {
                        detail: "capture stream closed before finalizing".to_string(),
                    },
                );
                true
            }
            (RecorderState::Recording, Some(CaptureEvent::Failed(detail))) => {
                self.fail(inner, RecorderError::CaptureFailed { detail });
                true
            }
            (RecorderState::Recording, Some(CaptureEvent::Stopped) | None) => {
                self.fail(
                    inner,
                    RecorderError::CaptureFailed {
                        detail: "capture ended without a stop request".to_string(),
                    },
                );
                true
            }
            (state, event) => {
                debug!("[{}] Ignoring {:?} in {}", inner.attempt(), event, state);
                true
            }
        }
    }

    /// Move `recording -> stopping` and ask the device to finalize.
    ///
    /// `generation` restricts the stop to one attempt (used by the ceiling
    /// timer). Fails without side effects unless the session is recording.
    fn begin_stop(
        &self,
        generation: Option<u64>,
        reason: StopReason,
        target: CompletionTarget,
    ) -> Result<(), RecorderError> {
        let mut inner = self.lock();

        if inner.state != RecorderState::Recording
            || generation.is_some_and(|g| g != inner.generation)
        {
            debug!("Stop rejected in {}", inner.state);
            return Err(RecorderError::NoActiveRecording);
        }

        info!("[{}] Stopping recording ({:?})", inner.attempt(), reason);

        inner.stopped_after = inner.started_at.map(|t| t.elapsed());
        inner.stop_reason = reason;
        inner.elapsed_ms = 0;
        inner.cancel_timers();
        inner.completion.arm(target);
        self.transition(&mut inner, RecorderState::Stopping);

        let requested = match inner.device.as_mut() {
            Some(device) => device.request_stop(),
            None => Err(crate::audio::DeviceError::Capture("no device held".to_string())),
        };

        if let Err(e) = requested {
            let err = RecorderError::StopFailed {
                detail: e.to_string(),
            };
            self.fail(&mut inner, err.clone());
            return Err(err);
        }

        Ok(())
    }
}

async fn run_ticker(shared: Arc<Shared>, generation: u64) {
    let mut ticker = tokio::time::interval(shared.config.tick_interval);
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let mut inner = shared.lock();
        if inner.generation != generation || inner.state != RecorderState::Recording {
            break;
        }
        if let Some(started_at) = inner.started_at {
            inner.elapsed_ms = started_at.elapsed().as_millis() as u64;
            shared.publish(&inner);
        }
    }
}

async fn run_ceiling(shared: Arc<Shared>, generation: u64) {
    tokio::time::sleep(shared.config.max_turn).await;

    info!("Recording reached the {:?} ceiling", shared.config.max_turn);
    let target = CompletionTarget::AutoStop(shared.auto_tx.clone());
    if let Err(e) = shared.begin_stop(Some(generation), StopReason::Ceiling, target) {
        debug!("Ceiling stop skipped: {}", e);
    }
}

async fn run_pump(
    shared: Arc<Shared>,
    generation: u64,
    mut events: mpsc::Receiver<CaptureEvent>,
) {
    loop {
        let event = events.recv().await;

        let mut inner = shared.lock();
        if inner.generation != generation {
            break;
        }
        if shared.on_capture_event(&mut inner, event) {
            break;
        }
    }
}

impl RecordingSession {
    pub fn new(backend: Arc<dyn CaptureBackend>, config: RecorderConfig) -> Self {
        let (status_tx, _) = watch::channel(RecorderStatus::default());
        let (auto_tx, auto_rx) = mpsc::unbounded_channel();

        info!(
            "Recording session created on {} (ceiling {:?}, tick {:?})",
            backend.name(),
            config.max_turn,
            config.tick_interval
        );

        Self {
            shared: Arc::new(Shared {
                backend,
                config,
                inner: Mutex::new(Inner::new()),
                status_tx,
                auto_tx,
            }),
            auto_stopped: tokio::sync::Mutex::new(auto_rx),
        }
    }

    /// Acquire the input device and begin recording.
    ///
    /// Only valid from `idle`. On denial or unavailability the reason is kept
    /// in [`error_message`](Self::error_message) and the session is back in
    /// `idle` when this returns.
    pub async fn start(&self) -> Result<(), RecorderError> {
        let shared = &self.shared;

        let generation = {
            let mut inner = shared.lock();
            if inner.state != RecorderState::Idle {
                warn!("Recording start rejected in {}", inner.state);
                return Err(RecorderError::AlreadyActive(inner.state));
            }

            inner.error.clear();
            inner.chunks.clear();
            inner.elapsed_ms = 0;
            inner.attempt_id = Some(Uuid::new_v4());
            info!("[{}] Requesting input device from {}", inner.attempt(), shared.backend.name());
            shared.transition(&mut inner, RecorderState::Requesting);
            inner.generation
        };

        let negotiated = negotiate_format(&shared.config.preferred_formats, |f| {
            shared.backend.supports(f)
        });
        let acquired = shared.backend.acquire().await;

        let mut inner = shared.lock();

        if inner.generation != generation || inner.state != RecorderState::Requesting {
            if let Ok(mut device) = acquired {
                device.release();
            }
            info!("Device acquisition finished after cancel; released");
            return Err(RecorderError::Cancelled);
        }

        let mut device = match acquired {
            Ok(device) => device,
            Err(e) => {
                let err = RecorderError::from(e);
                shared.fail(&mut inner, err.clone());
                return Err(err);
            }
        };

        let capture_config = CaptureConfig {
            format: negotiated.clone(),
            timeslice: shared.config.timeslice,
        };
        let events = match device.start(capture_config) {
            Ok(events) => events,
            Err(e) => {
                device.release();
                let err = RecorderError::from(e);
                shared.fail(&mut inner, err.clone());
                return Err(err);
            }
        };

        let format = device
            .format()
            .filter(|f| !f.mime().is_empty())
            .or(negotiated)
            .unwrap_or_default();

        inner.device = Some(device);
        inner.format = Some(format.clone());
        inner.started_at = Some(Instant::now());
        inner.elapsed_ms = 0;

        inner.pump_task = Some(tokio::spawn(run_pump(Arc::clone(shared), generation, events)));
        inner.tick_task = Some(tokio::spawn(run_ticker(Arc::clone(shared), generation)));
        inner.ceiling_task = Some(tokio::spawn(run_ceiling(Arc::clone(shared), generation)));

        shared.transition(&mut inner, RecorderState::Recording);
        info!("[{}] Recording started ({})", inner.attempt(), format);

        Ok(())
    }

    /// Finalize the current recording and return the assembled audio.
    ///
    /// Fails immediately with [`RecorderError::NoActiveRecording`] unless the
    /// session is `recording`; in that case nothing is touched.
    pub async fn stop(&self) -> Result<RecordedAudio, RecorderError> {
        let (tx, rx) = oneshot::channel();
        self.shared
            .begin_stop(None, StopReason::Requested, CompletionTarget::Caller(tx))?;

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(RecorderError::Cancelled),
        }
    }

    /// Abandon whatever is in progress and return to `idle`. Always succeeds;
    /// calling it on an idle session changes nothing.
    ///
    /// Recordings the ceiling already finalized but nobody collected are
    /// dropped too.
    pub fn cancel(&self) {
        let discarded = self.discard_auto_stopped();
        if discarded > 0 {
            info!("Discarded {} uncollected ceiling recording(s)", discarded);
        }

        let shared = &self.shared;
        let mut inner = shared.lock();

        let was = inner.state;
        if let Some(device) = inner.device.as_mut() {
            if device.is_capturing() {
                if let Err(e) = device.request_stop() {
                    debug!("Best-effort device stop on cancel failed: {}", e);
                }
            }
        }

        inner.finish_idle();
        if inner.completion.is_pending() {
            inner.completion.resolve(Err(RecorderError::Cancelled));
        }

        let changed = was != RecorderState::Idle || !inner.error.is_empty();
        inner.state = RecorderState::Idle;
        inner.error.clear();

        if changed {
            info!("[{}] Recording cancelled (was {})", inner.attempt(), was);
            shared.publish(&inner);
        }
    }

    /// Wait for the next recording finalized by the duration ceiling
    pub async fn next_auto_stopped(&self) -> Option<StopResult> {
        self.auto_stopped.lock().await.recv().await
    }

    /// Take a ceiling-finalized recording if one is waiting
    pub fn try_take_auto_stopped(&self) -> Option<StopResult> {
        self.auto_stopped.try_lock().ok()?.try_recv().ok()
    }

    /// Drop every queued ceiling-finalized recording; returns how many
    pub fn discard_auto_stopped(&self) -> usize {
        let mut discarded = 0;
        while self.try_take_auto_stopped().is_some() {
            discarded += 1;
        }
        discarded
    }

    pub fn state(&self) -> RecorderState {
        self.shared.lock().state
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.shared.lock().elapsed_ms
    }

    pub fn error_message(&self) -> String {
        self.shared.lock().error.clone()
    }

    /// Whether an acquired device is currently held
    pub fn holds_device(&self) -> bool {
        self.shared.lock().device.is_some()
    }

    pub fn status(&self) -> RecorderStatus {
        self.shared.status_tx.borrow().clone()
    }

    /// Observe status changes (state, elapsed time, error)
    pub fn subscribe(&self) -> watch::Receiver<RecorderStatus> {
        self.shared.status_tx.subscribe()
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.shared.config
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        self.cancel();
    }
}
