//! Main Entrypoint for the Lecturer
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment and the lecture file.
//! 2. Wiring the native microphone and speaker into a live session.
//! 3. Printing the lecture as it happens and forwarding typed commands.
//! 4. Ending the session cleanly on `/quit` or `Ctrl+C`.

use anyhow::Context;
use clap::Parser;
use gemini_live::ClientConfig;
use lecture_core::{Lecture, SessionSnapshot};
use lecture_live::{
    Collaborators, FileStore, GeminiConnector, LiveSession, ReconnectPolicy, ResumptionStore,
    SessionEvent, SessionOptions,
};
use lecturer::audio_device::{self, CpalMicrophone, CpalSpeaker};
use lecturer::config::{self, Config};
use lecturer::console::{self, ConsoleCommand};
use lecturer::host::ConsoleHost;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

/// How long `/quit` waits for the closing snapshot.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(version, about = "Delivers a slide lecture by voice")]
struct Args {
    /// Lecture file (JSON with slides, generalInfo and config).
    #[arg(long, required_unless_present = "list_devices")]
    lecture: Option<PathBuf>,
    /// Scopes the stored resumption handle.
    #[arg(long)]
    session_id: Option<String>,
    #[arg(long)]
    input_device: Option<String>,
    #[arg(long)]
    output_device: Option<String>,
    /// Start with the microphone muted.
    #[arg(long)]
    muted: bool,
    /// Print the available audio devices and exit.
    #[arg(long)]
    list_devices: bool,
    /// Write session snapshots (slides, transcript, current slide) here.
    #[arg(long)]
    snapshot: Option<PathBuf>,
}

fn load_lecture(path: &Path) -> anyhow::Result<Lecture> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read lecture file {}", path.display()))?;
    let lecture: Lecture = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse lecture file {}", path.display()))?;
    anyhow::ensure!(!lecture.slides.is_empty(), "The lecture has no slides");
    Ok(lecture)
}

fn write_snapshot(path: &Path, snapshot: &SessionSnapshot) {
    let result = serde_json::to_vec_pretty(snapshot)
        .map_err(anyhow::Error::from)
        .and_then(|bytes| std::fs::write(path, bytes).map_err(anyhow::Error::from));
    match result {
        Ok(()) => tracing::debug!(path = %path.display(), "Snapshot written"),
        Err(e) => tracing::warn!(path = %path.display(), "Failed to write snapshot: {:#}", e),
    }
}

fn handle_event(event: &SessionEvent, slide_count: usize, snapshot_path: Option<&Path>) {
    if let SessionEvent::Snapshot(snapshot) = event {
        if let Some(path) = snapshot_path {
            write_snapshot(path, snapshot);
        }
        return;
    }
    if let Some(line) = console::render_event(event, slide_count) {
        println!("{line}");
    }
}

/// Applies one typed command. Returns `false` once the user asked to leave.
async fn apply_command(
    command: ConsoleCommand,
    session: &LiveSession,
    host: &ConsoleHost,
    slide_count: usize,
) -> anyhow::Result<bool> {
    match command {
        ConsoleCommand::Mute => session.set_muted(true).await?,
        ConsoleCommand::Unmute => session.set_muted(false).await?,
        ConsoleCommand::Stop => session.stop_speaking().await?,
        ConsoleCommand::Reconnect => session.reconnect().await?,
        ConsoleCommand::Help => println!("{}", console::HELP),
        ConsoleCommand::Canvas => match host.canvas_markdown() {
            Some(markdown) => println!("{markdown}"),
            None => println!("The canvas is empty."),
        },
        ConsoleCommand::Slide(number) => {
            if number > slide_count {
                println!("There are only {slide_count} slides.");
            } else {
                // Resolves once the model reacts, which must not hold up the prompt.
                let session = session.clone();
                tokio::spawn(async move {
                    if let Err(e) = session.navigate_to_slide(number - 1).await {
                        println!("! {e}");
                    }
                });
            }
        }
        ConsoleCommand::Say(text) => {
            session
                .send_text(text, Vec::new(), host.canvas_markdown())
                .await?
        }
        ConsoleCommand::Quit => return Ok(false),
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    if args.list_devices {
        println!("{}", audio_device::list_devices()?);
        return Ok(());
    }

    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    // --- 3. Load the Lecture ---
    let lecture_path = args
        .lecture
        .as_deref()
        .context("--lecture is required")?;
    let mut lecture = load_lecture(lecture_path)?;
    config.apply_overrides(&mut lecture.config);
    let slide_count = lecture.slide_count();
    let prompt_template = config::load_prompt_template(&config.prompts_path)?;
    info!(
        slides = slide_count,
        model = %lecture.config.model,
        voice = %lecture.config.voice,
        "Lecture loaded."
    );

    // --- 4. Wire Collaborators ---
    let mut client_config = ClientConfig::new(config.gemini_api_key.clone());
    if let Some(endpoint) = &config.live_endpoint {
        client_config = client_config.with_endpoint(endpoint.clone());
    }
    let resumption = match &config.resumption_dir {
        Some(dir) => ResumptionStore::new(Arc::new(
            FileStore::new(dir.clone()).context("Failed to open the resumption directory")?,
        )),
        None => ResumptionStore::in_memory(),
    };
    let host = ConsoleHost::new(slide_count, 0);
    let collaborators = Collaborators {
        connector: Arc::new(GeminiConnector::new(client_config)),
        microphone: Arc::new(CpalMicrophone::new(args.input_device.clone())),
        output: Arc::new(CpalSpeaker::new(args.output_device.clone())),
        resumption,
        host: Box::new(host.clone()),
    };
    let options = SessionOptions {
        session_id: args.session_id.clone(),
        start_muted: args.muted,
        reconnect: if config.auto_reconnect {
            ReconnectPolicy::default()
        } else {
            ReconnectPolicy::disabled()
        },
        prompt_template,
        ..SessionOptions::default()
    };

    // --- 5. Run the Session ---
    let (session, mut events) = LiveSession::spawn(lecture, options, collaborators);
    session.start().await?;
    println!("{}", console::HELP);

    let snapshot_path = args.snapshot.as_deref();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                match console::parse_command(&line) {
                    Ok(Some(command)) => {
                        if !apply_command(command, &session, &host, slide_count).await? {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => println!("{e}"),
                }
            }
            Some(event) = events.recv() => handle_event(&event, slide_count, snapshot_path),
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal. Ending the lecture...");
                break;
            }
        }
    }

    // --- 6. Shut Down ---
    session.end().await?;
    let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
        while let Some(event) = events.recv().await {
            let done = matches!(event, SessionEvent::Snapshot(_));
            handle_event(&event, slide_count, snapshot_path);
            if done {
                break;
            }
        }
    })
    .await;
    if drained.is_err() {
        tracing::warn!("Timed out waiting for the final snapshot");
    }

    info!("Lecture ended.");
    Ok(())
}
