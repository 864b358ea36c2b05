use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kiosk_voice::audio::file::read_clip;
use kiosk_voice::config::DEFAULT_CONFIG_FILE;
use kiosk_voice::turn::PlaybackStatus;
use kiosk_voice::{
    play_audio, wrap_as_upload, AudioOutput, FileCaptureBackend, RecorderConfig, RecorderState,
    RecordingSession, RuntimeConfig, ToggleOutcome, TurnSettings, VoiceTurnClient,
    VoiceTurnController, VoiceTurnRequest, WavFileOutput,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kiosk-voice", version, about = "Kiosk voice turn client")]
struct Cli {
    /// Runtime config file (JSON, TOML or YAML)
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Directory that receives played replies
    #[arg(long, default_value = "replies")]
    out_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the resolved runtime configuration
    Config,

    /// Upload an existing audio file as one voice turn
    Send {
        file: PathBuf,

        /// Do not ask for a synthesized reply
        #[arg(long)]
        no_audio: bool,

        #[arg(long)]
        top_k: Option<u32>,
    },

    /// Replay a file through the recorder, then run the whole turn
    Record {
        file: PathBuf,

        /// How long to "speak" before pressing stop (the 20s ceiling still applies)
        #[arg(long, default_value_t = 3.0)]
        seconds: f64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let runtime = RuntimeConfig::load(&cli.config)?;

    info!("Kiosk voice v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&runtime)?);
            println!(
                "voice endpoint: {}",
                runtime.voice_endpoint().as_deref().unwrap_or("(none)")
            );
            Ok(())
        }
        Command::Send {
            file,
            no_audio,
            top_k,
        } => send(&runtime, &cli.out_dir, file, !no_audio, top_k).await,
        Command::Record { file, seconds } => record(runtime, &cli.out_dir, file, seconds).await,
    }
}

/// Cancelled on Ctrl-C
fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; cancelling voice request");
            child.cancel();
        }
    });
    token
}

async fn send(
    runtime: &RuntimeConfig,
    out_dir: &Path,
    file: PathBuf,
    include_audio: bool,
    top_k: Option<u32>,
) -> Result<()> {
    let clip = read_clip(&file)?;
    let filename = file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("turn.bin")
        .to_string();

    let mut request = VoiceTurnRequest::new(wrap_as_upload(clip, filename)).include_audio(include_audio);
    if let Some(top_k) = top_k {
        request = request.top_k(top_k);
    }

    let client = VoiceTurnClient::new()?;
    let cancel = interrupt_token();
    let result = client
        .send_voice_turn(runtime, request, Some(&cancel))
        .await
        .context("Voice turn failed")?;

    println!("{}", serde_json::to_string_pretty(&result)?);

    if let Some(decoded) = result.decode_audio() {
        let clip = decoded.context("Reply audio is not valid base64")?;
        let output: Arc<dyn AudioOutput> = Arc::new(WavFileOutput::new(out_dir)?);
        let handle = play_audio(output, &clip).await?;
        handle.finished().await?;
    }

    Ok(())
}

async fn record(runtime: RuntimeConfig, out_dir: &Path, file: PathBuf, seconds: f64) -> Result<()> {
    let backend = Arc::new(FileCaptureBackend::new(&file));
    let session = RecordingSession::new(backend, RecorderConfig::default());
    let output: Arc<dyn AudioOutput> = Arc::new(WavFileOutput::new(out_dir)?);
    let controller = VoiceTurnController::new(
        session,
        VoiceTurnClient::new()?,
        output,
        runtime,
        TurnSettings::default(),
    );

    match controller.toggle(None).await? {
        ToggleOutcome::RecordingStarted => info!("Recording from {}", file.display()),
        ToggleOutcome::Completed(_) => anyhow::bail!("Unexpected completed turn before recording"),
    }

    let mut status = controller.session().subscribe();
    let speak = tokio::time::sleep(Duration::from_secs_f64(seconds.max(0.0)));
    tokio::pin!(speak);
    loop {
        tokio::select! {
            _ = &mut speak => break,
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                // Ceiling reached; the finalized recording is waiting
                if current.state == RecorderState::Idle {
                    break;
                }
            }
        }
    }

    let cancel = interrupt_token();
    let report = match controller.toggle(Some(&cancel)).await? {
        ToggleOutcome::Completed(report) => report,
        ToggleOutcome::RecordingStarted => anyhow::bail!("Recording restarted instead of finishing"),
    };

    info!(
        "Turn recorded for {}ms ({:?})",
        report.recorded.as_millis(),
        report.stop_reason
    );
    for entry in controller.log().entries() {
        println!("[{:?}] {}: {}", entry.source_kind, entry.speaker, entry.text);
    }

    match report.playback {
        PlaybackStatus::Started(handle) => handle.finished().await?,
        PlaybackStatus::ManualPlayRequired => controller.play_last().await?.finished().await?,
        PlaybackStatus::NoAudio => info!("Reply had no audio"),
        PlaybackStatus::Failed(e) => warn!("Reply playback failed: {}", e),
    }

    println!("{}", serde_json::to_string_pretty(&controller.diagnostics())?);

    Ok(())
}
