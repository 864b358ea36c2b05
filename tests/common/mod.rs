// Shared fakes for the integration tests: a scripted capture host, a scripted
// audio output and an in-process mock of the kiosk backend.
#![allow(dead_code)]

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Multipart, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use kiosk_voice::audio::{
    AudioClip, AudioFormat, AudioOutput, CaptureBackend, CaptureConfig, CaptureDevice,
    CaptureEvent, DeviceError, PlaybackError, PlaybackEvent, SourceHandle, StartRejection,
};
use serde_json::Value;
use tokio::sync::{mpsc, Notify};

// ============================================================================
// Capture host
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    Grant,
    Deny,
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnStop {
    /// Flush a tail fragment, then report `Stopped`
    Finalize,
    /// Report an encoder failure instead of `Stopped`
    FailFinalize,
    /// Refuse the stop command itself
    Reject,
    /// Close the event stream without finalizing
    CloseStream,
    /// Accept the command and never answer
    Hang,
}

pub const TAIL: &[u8] = b"tail";

/// What the test can observe about devices handed out
#[derive(Default)]
pub struct DeviceTap {
    pub held: AtomicUsize,
    pub acquired: AtomicUsize,
    pub events: Mutex<Option<mpsc::Sender<CaptureEvent>>>,
}

impl DeviceTap {
    pub fn held(&self) -> usize {
        self.held.load(Ordering::SeqCst)
    }

    /// Push a host callback into the running device
    pub async fn emit(&self, event: CaptureEvent) {
        let tx = self.events.lock().unwrap().clone().expect("no running device");
        tx.send(event).await.expect("device event stream closed");
    }
}

pub struct FakeBackend {
    pub acquire: Mutex<Acquire>,
    pub on_stop: Mutex<OnStop>,
    pub supported: Vec<&'static str>,
    /// When set, `acquire` waits for a notification first
    pub gate: Option<Arc<Notify>>,
    pub tap: Arc<DeviceTap>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(None))
    }

    pub fn gated(gate: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self::build(Some(gate)))
    }

    fn build(gate: Option<Arc<Notify>>) -> Self {
        Self {
            acquire: Mutex::new(Acquire::Grant),
            on_stop: Mutex::new(OnStop::Finalize),
            supported: vec!["audio/webm;codecs=opus", "audio/webm"],
            gate,
            tap: Arc::new(DeviceTap::default()),
        }
    }

    pub fn set_acquire(&self, acquire: Acquire) {
        *self.acquire.lock().unwrap() = acquire;
    }

    pub fn set_on_stop(&self, on_stop: OnStop) {
        *self.on_stop.lock().unwrap() = on_stop;
    }
}

#[async_trait::async_trait]
impl CaptureBackend for FakeBackend {
    async fn acquire(&self) -> Result<Box<dyn CaptureDevice>, DeviceError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        let acquire = *self.acquire.lock().unwrap();
        match acquire {
            Acquire::Deny => Err(DeviceError::PermissionDenied("NotAllowedError".into())),
            Acquire::Unavailable => Err(DeviceError::Unavailable("NotFoundError".into())),
            Acquire::Grant => {
                self.tap.held.fetch_add(1, Ordering::SeqCst);
                self.tap.acquired.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(FakeDevice {
                    tap: Arc::clone(&self.tap),
                    on_stop: *self.on_stop.lock().unwrap(),
                    tx: None,
                    format: None,
                    released: false,
                }))
            }
        }
    }

    fn supports(&self, format: &AudioFormat) -> bool {
        self.supported.contains(&format.mime())
    }

    fn name(&self) -> &str {
        "fake"
    }
}

struct FakeDevice {
    tap: Arc<DeviceTap>,
    on_stop: OnStop,
    tx: Option<mpsc::Sender<CaptureEvent>>,
    format: Option<AudioFormat>,
    released: bool,
}

impl CaptureDevice for FakeDevice {
    fn start(&mut self, config: CaptureConfig) -> Result<mpsc::Receiver<CaptureEvent>, DeviceError> {
        let (tx, rx) = mpsc::channel(64);
        *self.tap.events.lock().unwrap() = Some(tx.clone());
        self.tx = Some(tx);
        self.format = config.format;
        Ok(rx)
    }

    fn request_stop(&mut self) -> Result<(), DeviceError> {
        match self.on_stop {
            OnStop::Finalize => {
                let tx = self.tx.as_ref().expect("not started");
                let _ = tx.try_send(CaptureEvent::Data(TAIL.to_vec()));
                let _ = tx.try_send(CaptureEvent::Stopped);
            }
            OnStop::FailFinalize => {
                let tx = self.tx.as_ref().expect("not started");
                let _ = tx.try_send(CaptureEvent::Failed("encoder crashed".into()));
            }
            OnStop::Reject => return Err(DeviceError::Capture("InvalidStateError".into())),
            OnStop::CloseStream => {
                self.tx = None;
                *self.tap.events.lock().unwrap() = None;
            }
            OnStop::Hang => {}
        }
        Ok(())
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.tap.held.fetch_sub(1, Ordering::SeqCst);
        }
        self.tx = None;
    }

    fn is_capturing(&self) -> bool {
        self.tx.is_some() && !self.released
    }

    fn format(&self) -> Option<AudioFormat> {
        self.format.clone()
    }
}

// ============================================================================
// Audio output
// ============================================================================

/// Output that refuses to start until `allow_autoplay` is set
pub struct GatedOutput {
    pub autoplay_allowed: AtomicBool,
    pub live: Mutex<Vec<SourceHandle>>,
    pub played: AtomicUsize,
}

impl GatedOutput {
    pub fn new(autoplay_allowed: bool) -> Arc<Self> {
        Arc::new(Self {
            autoplay_allowed: AtomicBool::new(autoplay_allowed),
            live: Mutex::new(Vec::new()),
            played: AtomicUsize::new(0),
        })
    }

    pub fn allow_autoplay(&self) {
        self.autoplay_allowed.store(true, Ordering::SeqCst);
    }

    pub fn live_sources(&self) -> usize {
        self.live.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl AudioOutput for GatedOutput {
    fn create_source(&self, _clip: &AudioClip) -> Result<SourceHandle, PlaybackError> {
        let handle = SourceHandle::new();
        self.live.lock().unwrap().push(handle.clone());
        Ok(handle)
    }

    async fn start(
        &self,
        _source: &SourceHandle,
    ) -> Result<mpsc::Receiver<PlaybackEvent>, StartRejection> {
        if !self.autoplay_allowed.load(Ordering::SeqCst) {
            return Err(StartRejection::NotAllowed(
                "play() failed because the user didn't interact with the document first".into(),
            ));
        }
        self.played.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(1);
        tx.try_send(PlaybackEvent::Ended).unwrap();
        Ok(rx)
    }

    fn release_source(&self, source: &SourceHandle) {
        self.live.lock().unwrap().retain(|h| h != source);
    }

    fn name(&self) -> &str {
        "gated"
    }
}

// ============================================================================
// Mock backend
// ============================================================================

/// One voice turn request as seen by the mock backend
#[derive(Debug, Clone, Default)]
pub struct Captured {
    pub device_id: Option<String>,
    pub kiosk_token: Option<String>,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub audio: Vec<u8>,
    pub include_audio: Option<String>,
    pub top_k: Option<String>,
}

#[derive(Clone)]
pub struct MockBackend {
    pub requests: Arc<Mutex<Vec<Captured>>>,
    status: StatusCode,
    body: Value,
}

impl MockBackend {
    pub fn requests(&self) -> Vec<Captured> {
        self.requests.lock().unwrap().clone()
    }
}

async fn voice_turn(
    State(mock): State<MockBackend>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> (StatusCode, Json<Value>) {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
    };

    let mut captured = Captured {
        device_id: header("x-device-id"),
        kiosk_token: header("x-kiosk-token"),
        ..Default::default()
    };

    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "audio" => {
                captured.filename = field.file_name().map(String::from);
                captured.content_type = field.content_type().map(String::from);
                captured.audio = field.bytes().await.unwrap().to_vec();
            }
            "include_audio" => captured.include_audio = Some(field.text().await.unwrap()),
            "top_k" => captured.top_k = Some(field.text().await.unwrap()),
            _ => {}
        }
    }

    mock.requests.lock().unwrap().push(captured);
    (mock.status, Json(mock.body.clone()))
}

async fn hang() -> StatusCode {
    std::future::pending::<()>().await;
    StatusCode::OK
}

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Serve `/api/voice/turn` answering every request with `status` and `body`.
/// Returns the base URL and the recorder of received requests.
pub async fn spawn_backend(status: StatusCode, body: Value) -> (String, MockBackend) {
    let mock = MockBackend {
        requests: Arc::new(Mutex::new(Vec::new())),
        status,
        body,
    };
    let router = Router::new()
        .route("/api/voice/turn", post(voice_turn))
        .with_state(mock.clone());

    (serve(router).await, mock)
}

/// Serve a backend that accepts the connection and never answers
pub async fn spawn_silent_backend() -> String {
    serve(Router::new().route("/api/voice/turn", post(hang))).await
}

/// Serve a backend answering with a non-JSON body
pub async fn spawn_text_backend(status: StatusCode, text: &'static str) -> String {
    serve(Router::new().route("/api/voice/turn", post(move || async move { (status, text) }))).await
}

// ============================================================================
// Audio samples
// ============================================================================

/// Mono 16-bit WAV with `samples` of a simple ramp
pub fn wav_bytes(samples: usize) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut buf = Vec::new();
    {
        let mut writer = hound::WavWriter::new(Cursor::new(&mut buf), spec).unwrap();
        for i in 0..samples {
            writer.write_sample((i % 2000) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    buf
}
