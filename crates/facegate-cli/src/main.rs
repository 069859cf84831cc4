use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facegate_core::capture::{self, CancelToken, CaptureSession, CaptureState, Verified};
use facegate_core::{ImageDirSource, OnnxFaceEmbedder};
use facegate_store::FaceStore;
use std::path::PathBuf;
use tokio::process::Command;
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "facegate", about = "Face registration, recognition and verified chatbot access")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register the first face found in the frames under a name
    Register {
        /// Name to register
        #[arg(short, long)]
        name: String,
        /// Directory of frames to read, in file-name order
        #[arg(short, long)]
        frames: PathBuf,
        /// Give up after this many seconds (0 = read until frames run out)
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Label every face in every frame
    Recognize {
        #[arg(short, long)]
        frames: PathBuf,
        /// Emit one JSON object per frame
        #[arg(long)]
        json: bool,
    },
    /// List registered users
    List {
        #[arg(long)]
        json: bool,
    },
    /// Verify a registered face, then launch the chatbot
    Verify {
        #[arg(short, long)]
        frames: PathBuf,
        /// Only verify; do not start the chatbot
        #[arg(long)]
        no_launch: bool,
    },
    /// Show configuration and store status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    tracing::debug!(?config, "configuration loaded");

    match cli.command {
        Commands::Register { name, frames, timeout_secs } => {
            let name = name.trim().to_string();
            if name.is_empty() {
                bail!("name must not be empty");
            }
            let timeout = match timeout_secs {
                Some(secs) => config::timeout_from_secs(secs),
                None => config.capture_timeout,
            };
            let cfg = config.clone();
            with_cancel(move |cancel| register(&cfg, &name, frames, timeout, cancel)).await?;
        }
        Commands::Recognize { frames, json } => {
            let cfg = config.clone();
            with_cancel(move |cancel| recognize(&cfg, frames, json, cancel)).await?;
        }
        Commands::List { json } => list(&config, json)?,
        Commands::Verify { frames, no_launch } => {
            let cfg = config.clone();
            let verified = with_cancel(move |cancel| verify(&cfg, frames, cancel)).await?;
            let Some(verified) = verified else {
                bail!("No known face detected.");
            };
            println!("Verified as {}", verified.name);
            if !no_launch {
                launch_chat(&config).await?;
            }
        }
        Commands::Status => status(&config)?,
    }

    Ok(())
}

/// Run a capture job on a blocking thread; Ctrl-C cancels it.
async fn with_cancel<T, F>(job: F) -> Result<T>
where
    F: FnOnce(CancelToken) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let cancel = CancelToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received; stopping capture");
                cancel.cancel();
            }
        })
    };

    let result = tokio::task::spawn_blocking(move || job(cancel))
        .await
        .context("capture thread panicked")?;
    watcher.abort();
    result
}

fn register(
    config: &Config,
    name: &str,
    frames: PathBuf,
    timeout: Option<std::time::Duration>,
    cancel: CancelToken,
) -> Result<()> {
    let store = FaceStore::open(&config.db_path)
        .with_context(|| format!("opening {}", config.db_path.display()))?;
    let mut embedder = OnnxFaceEmbedder::load(&config.model_dir)?;
    let mut source = ImageDirSource::open(&frames)?;
    let mut session = CaptureSession::new(timeout, cancel);

    match capture::capture_face(&mut session, &mut source, &mut embedder)? {
        CaptureState::Captured(face) => {
            tracing::info!(confidence = face.bbox.confidence, "face captured");
            store.register(name, &face.embedding)?;
            println!("Face registered for {name}");
            Ok(())
        }
        CaptureState::Cancelled => bail!("registration cancelled"),
        CaptureState::TimedOut => bail!("no face detected before the timeout"),
        _ => bail!("no face detected in {} frames", session.frames_seen()),
    }
}

fn recognize(config: &Config, frames: PathBuf, json: bool, cancel: CancelToken) -> Result<()> {
    let gallery = FaceStore::open(&config.db_path)?.load_gallery()?;
    let matcher = config.match_policy.matcher(config.match_tolerance);
    let mut embedder = OnnxFaceEmbedder::load(&config.model_dir)?;
    let mut source = ImageDirSource::open(&frames)?;
    let mut session = CaptureSession::new(config.capture_timeout, cancel);

    let state = capture::recognize(
        &mut session,
        &mut source,
        &mut embedder,
        &*matcher,
        &gallery,
        |frame, labels| {
            if json {
                println!("{}", serde_json::json!({ "frame": frame, "faces": labels }));
                return;
            }
            for label in labels {
                let b = &label.bbox;
                println!(
                    "frame {frame}: {} at ({:.0}, {:.0}, {:.0}x{:.0})",
                    label.identity, b.x, b.y, b.width, b.height
                );
            }
        },
    )?;
    tracing::info!(frames = session.frames_seen(), ?state, "recognition stopped");
    Ok(())
}

fn list(config: &Config, json: bool) -> Result<()> {
    let users = FaceStore::open(&config.db_path)?.list_users()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&users)?);
    } else if users.is_empty() {
        println!("No faces registered yet.");
    } else {
        for (i, user) in users.iter().enumerate() {
            println!("{}. {} registered at {}", i + 1, user.name, user.registered_at);
        }
    }
    Ok(())
}

/// `Ok(None)` when the frames ran out (or the session stopped) without a
/// known face.
fn verify(config: &Config, frames: PathBuf, cancel: CancelToken) -> Result<Option<Verified>> {
    let gallery = FaceStore::open(&config.db_path)?.load_gallery()?;
    if gallery.is_empty() {
        tracing::warn!("no faces registered; every face will be unknown");
    }
    let matcher = config.match_policy.matcher(config.match_tolerance);
    let mut embedder = OnnxFaceEmbedder::load(&config.model_dir)?;
    let mut source = ImageDirSource::open(&frames)?;
    let mut session = CaptureSession::new(config.capture_timeout, cancel);

    let state = capture::verify(&mut session, &mut source, &mut embedder, &*matcher, &gallery)?;
    match state {
        CaptureState::Captured(verified) => {
            tracing::info!(name = %verified.name, distance = verified.distance, "verified");
            Ok(Some(verified))
        }
        other => {
            tracing::info!(frames = session.frames_seen(), state = ?other, "verification failed");
            Ok(None)
        }
    }
}

/// Run the chatbot on the same store and terminal until it exits.
async fn launch_chat(config: &Config) -> Result<()> {
    let mut child = Command::new(&config.chat_bin)
        .env("FACEGATE_DB_PATH", &config.db_path)
        .spawn()
        .with_context(|| format!("launching {}", config.chat_bin.display()))?;
    tracing::info!(pid = ?child.id(), bin = %config.chat_bin.display(), "chatbot launched");

    let status = child.wait().await.context("waiting for chatbot")?;
    if !status.success() {
        bail!("{} exited with {status}", config.chat_bin.display());
    }
    tracing::info!("chatbot exited");
    Ok(())
}

fn status(config: &Config) -> Result<()> {
    let records = FaceStore::open(&config.db_path)?.count()?;
    let models_present = [
        facegate_core::embedder::DETECTOR_MODEL_FILE,
        facegate_core::embedder::RECOGNIZER_MODEL_FILE,
    ]
    .iter()
    .all(|f| config.model_dir.join(f).exists());

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "db_path": config.db_path,
            "records": records,
            "model_dir": config.model_dir,
            "models_present": models_present,
            "match_policy": config.match_policy,
            "match_tolerance": config.match_tolerance,
            "capture_timeout_secs": config.capture_timeout.map(|t| t.as_secs()),
            "chat_bin": config.chat_bin,
        }))?
    );
    Ok(())
}
