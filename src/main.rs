use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tutor_live::{
    create_router, AppState, AudioOutput, AudioSource, ChatTurn, Config, GeminiTransport,
    LiveSession, Role, Subject, SystemAudio, TutorSession,
};

#[derive(Parser)]
#[command(name = "tutor-live")]
#[command(about = "Voice tutor over a live duplex audio session", version)]
struct Cli {
    /// Config file (extension optional)
    #[arg(short, long, global = true, default_value = "config/tutor-live")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP control API
    Serve {
        /// Override the configured port
        #[arg(short, long)]
        port: Option<u16>,

        /// Stream a WAV file instead of the microphone
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Play the tutor's voice on the default speaker (needs cpal-audio)
        #[arg(long)]
        speaker: bool,
    },

    /// Talk to the tutor from the terminal
    Chat {
        /// Subject to start with (universal, math, science, history, coding)
        #[arg(short, long)]
        subject: Option<String>,

        /// Stream a WAV file instead of the microphone
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Play the tutor's voice on the default speaker (needs cpal-audio)
        #[arg(long)]
        speaker: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // TLS for the live websocket
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Serve {
            port,
            input,
            speaker,
        } => serve(cfg, port, input, speaker).await,
        Command::Chat {
            subject,
            input,
            speaker,
        } => chat(cfg, subject, input, speaker).await,
    }
}

fn build_tutor(
    cfg: &Config,
    input: Option<PathBuf>,
    speaker: bool,
    subject: Subject,
) -> Result<Arc<TutorSession>> {
    let transport = GeminiTransport::new(
        cfg.live.endpoint.clone(),
        cfg.live.api_key.clone(),
        Duration::from_secs(cfg.live.setup_timeout_secs),
    )
    .context("Live transport not configured (set TUTOR_LIVE__LIVE__API_KEY)")?;

    let source = match input {
        Some(path) => {
            info!("Capturing from {}", path.display());
            AudioSource::File(path)
        }
        None => AudioSource::Microphone,
    };
    let output = if speaker {
        AudioOutput::Speaker
    } else {
        AudioOutput::Null
    };

    let session = LiveSession::new(
        cfg.session_config(),
        Arc::new(transport),
        Arc::new(SystemAudio::new(source, output)),
    );
    Ok(Arc::new(TutorSession::new(Arc::new(session), subject)))
}

async fn serve(
    cfg: Config,
    port: Option<u16>,
    input: Option<PathBuf>,
    speaker: bool,
) -> Result<()> {
    let tutor = build_tutor(&cfg, input, speaker, cfg.tutor.default_subject)?;
    let app = create_router(AppState::new(Arc::clone(&tutor)));

    let addr = match port {
        Some(port) => format!("{}:{}", cfg.service.http.bind, port),
        None => cfg.http_addr(),
    };
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .context("HTTP server failed")?;

    tutor.session().shutdown().await;
    Ok(())
}

async fn chat(
    cfg: Config,
    subject: Option<String>,
    input: Option<PathBuf>,
    speaker: bool,
) -> Result<()> {
    let subject = match subject {
        Some(id) => match Subject::parse(&id) {
            Some(subject) => subject,
            None => bail!("Unknown subject: {}", id),
        },
        None => cfg.tutor.default_subject,
    };
    let tutor = build_tutor(&cfg, input, speaker, subject)?;

    let mut turns = tutor.session().subscribe_turns();
    let printer = tokio::spawn(async move {
        loop {
            match turns.recv().await {
                Ok(turn) => print_turn(&turn),
                Err(RecvError::Lagged(missed)) => warn!("Missed {} turns", missed),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut states = tutor.session().subscribe();
    let watcher = tokio::spawn(async move {
        let mut last = states.borrow().connection_state;
        while states.changed().await.is_ok() {
            let current = states.borrow().connection_state;
            if current != last {
                println!("-- {} --", current);
                last = current;
            }
        }
    });

    println!("Subject: {} ({})", subject, subject.description());
    println!("Type to chat, /subject <id> to switch, /quit to exit.");

    if let Err(e) = tutor.start().await {
        error!("Could not connect: {}", e);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        let line = line.trim();

        if line == "/quit" {
            break;
        } else if let Some(id) = line.strip_prefix("/subject") {
            match Subject::parse(id) {
                Some(subject) => {
                    tutor.switch_subject(subject);
                    println!("Subject: {} ({})", subject, subject.description());
                }
                None => println!("Unknown subject '{}'", id.trim()),
            }
        } else if let Err(e) = tutor.send_text(line).await {
            error!("Message not sent: {}", e);
        }
    }

    tutor.stop();
    tutor.session().shutdown().await;
    printer.abort();
    watcher.abort();
    Ok(())
}

fn print_turn(turn: &ChatTurn) {
    let speaker = match turn.role {
        Role::User => "You",
        Role::Assistant => "Tutor",
    };
    println!("[{}] {}: {}", turn.timestamp.format("%H:%M:%S"), speaker, turn.text);
    for citation in turn.citations.iter().flatten() {
        match &citation.title {
            Some(title) => println!("    source: {} ({})", title, citation.uri),
            None => println!("    source: {}", citation.uri),
        }
    }
}
