use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pulsera_companion::audio::{FileSink, PlaybackEvent};
use pulsera_companion::session::{ChatMessage, Role, TriageContext};
use pulsera_companion::{
    create_router, AppState, AudioBackendConfig, AudioSource, ChatSession, Config, ConnectionState,
    EndpointKind, SessionEvent, VitalsSnapshot,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "pulsera-companion")]
#[command(about = "Heart-failure companion chat client")]
struct Cli {
    /// Configuration file (extension optional)
    #[arg(short, long, default_value = "config/pulsera-companion")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Chat with the agent from the terminal
    Chat {
        /// Patient identifier
        #[arg(short, long)]
        patient: String,

        /// Agent endpoint: chat, health-chat or triage
        #[arg(short, long, default_value = "chat")]
        endpoint: EndpointKind,

        /// WAV file replayed in place of the microphone for /record
        #[arg(long)]
        mic_file: Option<PathBuf>,

        /// Heart rate from a completed measurement (bpm)
        #[arg(long, requires = "hrv")]
        heart_rate: Option<f64>,

        /// Heart rate variability from a completed measurement (ms)
        #[arg(long, requires = "heart_rate")]
        hrv: Option<f64>,
    },

    /// Serve the HTTP control API
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)
        .with_context(|| format!("Failed to load config '{}'", cli.config))?;

    info!("Loaded config: {}", cfg.service.name);

    match cli.command {
        Command::Chat {
            patient,
            endpoint,
            mic_file,
            heart_rate,
            hrv,
        } => {
            let vitals = heart_rate.zip(hrv).map(|(hr, hrv)| VitalsSnapshot::new(hr, hrv));
            chat(&cfg, patient, endpoint, mic_file, vitals).await
        }
        Command::Serve => serve(cfg).await,
    }
}

async fn chat(
    cfg: &Config,
    patient: String,
    endpoint: EndpointKind,
    mic_file: Option<PathBuf>,
    vitals: Option<VitalsSnapshot>,
) -> Result<()> {
    let mut session_config = cfg.session_config(&patient, endpoint);
    if let (EndpointKind::Triage, Some(vitals)) = (endpoint, vitals) {
        session_config = session_config.with_triage(TriageContext {
            vitals,
            conversation_history: Vec::new(),
        });
    }

    let playback_dir = cfg.audio.playback_path()?;
    let sink = FileSink::new(&playback_dir, session_config.session_id.clone())?;
    let show_header = session_config.show_header;

    let mut builder = ChatSession::builder(session_config).sink(Arc::new(sink));
    if let Some(path) = mic_file {
        let capture_config = AudioBackendConfig {
            target_sample_rate: cfg.audio.sample_rate,
            target_channels: cfg.audio.channels,
            ..AudioBackendConfig::default()
        };
        builder = builder.capture_source(AudioSource::File(path), capture_config);
    }
    let session = builder.build();

    if show_header {
        println!("Pulsera companion ({}) for {}", endpoint, patient);
        println!("Commands: /mute /record /stop /vitals HR HRV /end /quit");
    }
    info!("Speech is written to {}", playback_dir.display());

    let printer = tokio::spawn(print_events(session.subscribe()));
    let mut playback = session.subscribe_playback().await;
    let playback_log = tokio::spawn(async move {
        while let Ok(event) = playback.recv().await {
            if let PlaybackEvent::Failed { utterance, error } = event {
                warn!("Playback of utterance {} failed: {}", utterance, error);
            }
        }
    });

    session.open().await;

    if endpoint != EndpointKind::Triage {
        if let Some(vitals) = vitals {
            session.send_vitals(vitals).await;
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let mut words = line.split_whitespace();

        match words.next() {
            Some("/quit") => break,
            Some("/end") => {
                let summary = session.end_session().await;
                println!("{}", serde_json::to_string_pretty(&summary)?);
                break;
            }
            Some("/mute") => {
                let muted = session.toggle_mute().await;
                println!("[{}]", if muted { "muted" } else { "unmuted" });
            }
            Some("/record") => {
                if let Err(e) = session.start_recording().await {
                    warn!("Could not start recording: {:#}", e);
                }
            }
            Some("/stop") => {
                if let Err(e) = session.stop_recording().await {
                    warn!("Could not finish recording: {:#}", e);
                }
            }
            Some("/vitals") => {
                let reading = (
                    words.next().and_then(|w| w.parse::<f64>().ok()),
                    words.next().and_then(|w| w.parse::<f64>().ok()),
                );
                match reading {
                    (Some(hr), Some(hrv)) => {
                        session.send_vitals(VitalsSnapshot::new(hr, hrv)).await;
                    }
                    _ => println!("usage: /vitals HEART_RATE HRV"),
                }
            }
            Some(_) => {
                if !session.send_text(line).await {
                    println!("[not connected]");
                }
            }
            None => {}
        }
    }

    session.close().await;
    printer.abort();
    playback_log.abort();

    Ok(())
}

async fn print_events(mut events: tokio::sync::broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::MessageAppended(message)) => print_message(&message),
            Ok(SessionEvent::Connection(ConnectionState::Open)) => println!("[connected]"),
            Ok(SessionEvent::Connection(ConnectionState::Closed)) => println!("[disconnected]"),
            Ok(SessionEvent::Processing(true)) => println!("..."),
            Ok(SessionEvent::Recording(recording)) => {
                println!("[{}]", if recording { "recording" } else { "recording stopped" })
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => warn!("Event printer skipped {} events", skipped),
            Err(RecvError::Closed) => break,
        }
    }
}

fn print_message(message: &ChatMessage) {
    let speaker = match message.role {
        Role::User if message.is_transcription => "you (voice)",
        Role::User => "you",
        Role::Assistant => "companion",
        Role::System => "system",
    };
    println!("{}: {}", speaker, message.content);
}

async fn serve(cfg: Config) -> Result<()> {
    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let state = AppState::from_config(Arc::new(cfg))?;
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("HTTP API listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
