use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use talkie::{
    create_router, AppState, CaptureSource, Config, Engine, EngineError, EngineHandle,
    Notification, SessionState, Speaker, WebSocketConnector,
};

/// Talkie - push-to-talk voice assistant client
#[derive(Parser)]
#[command(name = "talkie", version, about)]
struct Cli {
    /// Config file (extension optional)
    #[arg(short, long, global = true, default_value = "config/talkie")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Stream the microphone, controlled through the HTTP API
    Serve,
    /// Send a WAV file as one utterance and print the conversation
    Play {
        /// 16-bit PCM WAV file
        path: PathBuf,

        /// Give up waiting for the reply after this many seconds
        #[arg(long, default_value = "60")]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("talkie=info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("Talkie v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);
    info!("Voice server: {}", cfg.transport.url);

    let connector = Arc::new(WebSocketConnector::new(
        cfg.transport.url.clone(),
        cfg.transport.api_key.clone(),
    ));

    match cli.command {
        Command::Serve => {
            let engine = Engine::spawn(
                cfg.engine_config(),
                connector,
                Arc::new(CaptureSource::Microphone),
            );
            serve(&cfg, engine).await
        }
        Command::Play { path, timeout } => {
            let engine = Engine::spawn(
                cfg.engine_config(),
                connector,
                Arc::new(CaptureSource::file(path)),
            );
            play(engine, Duration::from_secs(timeout)).await
        }
    }
}

async fn serve(cfg: &Config, engine: EngineHandle) -> Result<()> {
    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("HTTP API listening on {}", addr);

    let app = create_router(AppState::new(engine.clone()));
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .context("HTTP server failed")?;

    engine.shutdown().await?;
    Ok(())
}

/// One utterance from a file: stop once the reply is complete, then wait for idle
async fn play(engine: EngineHandle, timeout: Duration) -> Result<()> {
    let mut notifications = engine.subscribe();
    engine.start().await.context("Failed to start session")?;

    let finished = tokio::time::timeout(timeout, async {
        loop {
            let notification = match notifications.recv().await {
                Ok(notification) => notification,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Missed {} notifications", skipped);
                    continue;
                }
                Err(RecvError::Closed) => return,
            };

            let reply_complete = match notification {
                Notification::Turn(turn) => {
                    println!("[{:?}] {}", turn.speaker, turn.content);
                    for call in &turn.tool_calls {
                        println!(
                            "  tool call {}: {} {}",
                            call.id,
                            call.name.as_deref().unwrap_or("?"),
                            call.arguments
                        );
                    }
                    turn.speaker == Speaker::Assistant && !turn.tool_calls.is_empty()
                }
                Notification::ResponseAudioEnded => true,
                Notification::StateChanged {
                    to: SessionState::Idle | SessionState::Error,
                    ..
                } => return,
                Notification::Error(e) => {
                    eprintln!("error: {}", e);
                    false
                }
                _ => false,
            };

            if reply_complete {
                match engine.stop().await {
                    Ok(_) | Err(EngineError::InvalidState(_)) => {}
                    Err(e) => warn!("Stop failed: {}", e),
                }
            }
        }
    })
    .await;

    if finished.is_err() {
        warn!("No complete reply within {:?}", timeout);
    }

    engine.shutdown().await?;
    Ok(())
}
