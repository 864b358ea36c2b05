// Integration tests for the file-backed capture and playback hosts

mod common;

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use common::wav_bytes;
use kiosk_voice::audio::file::read_clip;
use kiosk_voice::{
    play_audio, AudioClip, AudioOutput, FileCaptureBackend, PlaybackError, RecorderConfig,
    RecorderError, RecorderState, RecordingSession, WavFileOutput,
};
use tempfile::TempDir;

#[tokio::test]
async fn test_file_replay_records_the_whole_file() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("question.webm");
    let bytes: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    fs::write(&path, &bytes)?;

    let session = RecordingSession::new(
        Arc::new(FileCaptureBackend::new(&path)),
        RecorderConfig::default(),
    );

    session.start().await?;
    tokio::time::sleep(Duration::from_millis(600)).await;
    let audio = session.stop().await?;

    // Whatever the timeslices did not deliver is flushed on stop
    assert_eq!(audio.data, bytes);
    assert!(audio.chunk_count >= 1);
    assert_eq!(audio.format.mime(), "audio/webm;codecs=opus");
    assert_eq!(audio.filename("turn"), "turn.webm");
    assert_eq!(session.state(), RecorderState::Idle);
    assert!(!session.holds_device());

    Ok(())
}

#[tokio::test]
async fn test_wav_replay_keeps_the_file_format() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("question.wav");
    fs::write(&path, wav_bytes(4000))?;

    let session = RecordingSession::new(
        Arc::new(FileCaptureBackend::new(&path)),
        RecorderConfig::default(),
    );

    session.start().await?;
    let audio = session.stop().await?;

    assert_eq!(audio.format.mime(), "audio/wav");
    assert_eq!(audio.filename("turn"), "turn.wav");
    assert_eq!(audio.data, fs::read(&path)?);

    Ok(())
}

#[tokio::test]
async fn test_missing_file_is_an_unavailable_device() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let session = RecordingSession::new(
        Arc::new(FileCaptureBackend::new(temp_dir.path().join("nope.webm"))),
        RecorderConfig::default(),
    );

    let err = session.start().await.unwrap_err();

    assert!(matches!(err, RecorderError::DeviceUnavailable { .. }));
    assert_eq!(session.state(), RecorderState::Idle);
    assert_eq!(session.error_message(), "Could not access the microphone.");

    Ok(())
}

#[tokio::test]
async fn test_wav_output_writes_reply_and_releases_source() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let wav_output = Arc::new(WavFileOutput::new(temp_dir.path().join("replies"))?);
    let output: Arc<dyn AudioOutput> = wav_output.clone();

    let reply = wav_bytes(1600);
    let handle = play_audio(output, &AudioClip::new(reply.clone(), "audio/wav")).await?;
    handle.finished().await?;

    let written = fs::read(temp_dir.path().join("replies").join("reply-000.wav"))?;
    assert_eq!(written, reply);
    assert_eq!(wav_output.live_sources(), 0);

    Ok(())
}

#[tokio::test]
async fn test_wav_output_refuses_unreadable_audio() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let wav_output = Arc::new(WavFileOutput::new(temp_dir.path())?);
    let output: Arc<dyn AudioOutput> = wav_output.clone();

    let err = play_audio(output, &AudioClip::new(b"not a wav".to_vec(), "audio/wav"))
        .await
        .unwrap_err();

    assert!(matches!(err, PlaybackError::StartRejected(_)));
    assert!(!err.is_autoplay_blocked());
    assert_eq!(wav_output.live_sources(), 0);
    assert!(!temp_dir.path().join("reply-000.wav").exists());

    Ok(())
}

#[test]
fn test_read_clip_tags_media_type() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("sample.ogg");
    fs::write(&path, b"OggS")?;

    let clip = read_clip(&path)?;

    assert_eq!(clip.bytes, b"OggS");
    assert_eq!(clip.media_type, "audio/ogg;codecs=opus");
    assert!(read_clip(temp_dir.path().join("missing.ogg")).is_err());

    Ok(())
}
