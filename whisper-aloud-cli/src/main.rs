//! whisper_aloud CLI / daemon entry point.
//!
//! Two roles live in this one binary, mirroring the teacher's split between
//! a long-lived host process and short commands issued to it:
//!
//! - `whisper-aloud daemon` starts the background service: builds the
//!   Session Controller and binds the D-Bus control surface, then runs until
//!   `quit` (via the control surface) or an interrupt signal.
//! - every other subcommand is a thin client that sends one control-surface
//!   call to an already-running daemon and prints its reply, except
//!   `transcribe <file>`, which runs the Transcriber directly with no daemon
//!   involved at all.

mod client;
mod composition;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use whisper_aloud_core::buffering::chunk::AudioChunk;
use whisper_aloud_core::config;
use whisper_aloud_core::control;
use whisper_aloud_core::controller::SessionController;

#[derive(Parser)]
#[command(name = "whisper-aloud", version, about = "Desktop voice-dictation engine")]
struct Cli {
    /// Path to the configuration file (defaults to the platform config dir).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the background service and bind the control surface.
    Daemon,
    /// Start a recording session.
    Start,
    /// Stop the active recording session, blocking until transcription is ready.
    Stop,
    /// Print the current session state and configuration identity.
    Status,
    /// Start if idle, stop if recording.
    Toggle,
    /// Abort the active session without producing a transcript.
    Cancel,
    /// Reload configuration from disk (only accepted while idle).
    Reload {
        /// Config file to reload; defaults to the daemon's own path.
        path: Option<PathBuf>,
    },
    /// Print recent history entries as JSON.
    History {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Print the daemon's current configuration as JSON.
    GetConfig,
    /// Merge a JSON document of changes into the daemon's configuration.
    SetConfig {
        /// Partial configuration document, e.g. '{"model":{"name":"tiny"}}'.
        changes: String,
    },
    /// Cleanly terminate the running daemon.
    Quit,
    /// One-shot: transcribe an audio file directly, no daemon required.
    Transcribe {
        file: PathBuf,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "whisper_aloud=info".parse().unwrap()),
        )
        .init();
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    let runtime = tokio::runtime::Runtime::new().expect("failed to start tokio runtime");
    let exit_code = runtime.block_on(run(cli));
    std::process::exit(exit_code);
}

async fn run(cli: Cli) -> i32 {
    let config_path = cli.config.clone().unwrap_or_else(config::default_config_path);

    let result = match cli.command {
        Command::Daemon => run_daemon(&config_path).await,
        Command::Start => client::start().await,
        Command::Stop => client::stop().await,
        Command::Status => client::status().await,
        Command::Toggle => client::toggle().await,
        Command::Cancel => client::cancel().await,
        Command::Reload { path } => {
            let target = path.unwrap_or(config_path);
            client::reload(&target.display().to_string()).await
        }
        Command::History { limit } => client::history(limit).await,
        Command::GetConfig => client::get_config().await,
        Command::SetConfig { changes } => client::set_config(&changes).await,
        Command::Quit => client::quit().await,
        Command::Transcribe { file } => run_transcribe_file(&config_path, &file).await,
    };

    match result {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %e, "command failed");
            eprintln!("error: {e:#}");
            1
        }
    }
}

async fn run_daemon(config_path: &std::path::Path) -> anyhow::Result<()> {
    let config = composition::load_or_default_config(config_path)?;
    let transcriber = composition::build_transcriber(&config);
    let history = composition::open_history_store(&config)?;
    let capture_factory = composition::cpal_capture_factory();

    let controller = SessionController::new(config, transcriber, history, capture_factory);

    let connection = match control::serve(controller.clone()).await {
        Ok(conn) => conn,
        Err(e) => {
            // Another daemon already owns the bus name; it keeps serving and
            // this instance exits cleanly rather than erroring out. The
            // `Daemon` subcommand carries no arguments to forward.
            info!(error = %e, "control surface already bound, exiting in favor of the incumbent daemon");
            return Ok(());
        }
    };
    info!("whisper_aloud daemon ready");

    tokio::select! {
        _ = controller.wait_for_shutdown() => {
            info!("shutdown requested via control surface");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
            let _ = controller.quit();
            drop(connection);
            std::process::exit(130);
        }
    }

    drop(connection);
    Ok(())
}

async fn run_transcribe_file(config_path: &std::path::Path, file: &std::path::Path) -> anyhow::Result<()> {
    let config = composition::load_or_default_config(config_path)?;
    let mut transcriber = composition::build_transcriber(&config);

    let mut reader = hound::WavReader::open(file)
        .map_err(|e| anyhow::anyhow!("failed to open {}: {e}", file.display()))?;
    let spec = reader.spec();
    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| anyhow::anyhow!("failed to read samples: {e}"))?,
        hound::SampleFormat::Int => {
            let max = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| anyhow::anyhow!("failed to read samples: {e}"))?
        }
    };

    let mono: Vec<f32> = if spec.channels > 1 {
        samples
            .chunks(spec.channels as usize)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    } else {
        samples
    };

    let mut chunk = AudioChunk::new(mono, spec.sample_rate);
    chunk.sanitize();

    let language_hint = match config.transcription.language_hint.as_str() {
        "auto" => None,
        hint => Some(hint),
    };
    let result = transcriber
        .transcribe(&chunk, language_hint)
        .map_err(|e| anyhow::anyhow!(e))?;
    println!("{}", result.text);
    Ok(())
}
