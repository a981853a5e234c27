//! CLI for livesub
//!
//! Subcommands:
//! - `listen`: subscribe a fresh session to topics and log what arrives
//! - `publish`: broadcast one message and exit
//!
//! Run `listen` in one terminal and `publish` in another with
//! `LIVESUB_PUBSUB__BACKEND=redis` (or `postgres`) to watch a message cross
//! process boundaries.

use std::sync::Arc;

use clap::Parser;
use livesub::backend::{self, PubSubBackend};
use livesub::config::load_config;
use livesub::{Message, SessionPubSub, handler};
use serde_json::Value;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "livesub")]
enum Command {
    /// Subscribe to one or more topics and log every message until Ctrl-C
    Listen {
        #[arg(long = "topic", required = true)]
        topics: Vec<String>,
    },
    /// Broadcast a single message
    Publish {
        #[arg(long)]
        topic: String,
        /// JSON value to send; anything that is not valid JSON is sent as a string
        #[arg(long)]
        message: String,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cmd = Command::parse();

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            livesub::utils::logging::init("info");
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    livesub::utils::logging::init(&config.logging.level);

    let backend = match backend::from_settings(&config.pubsub) {
        Ok(backend) => backend,
        Err(e) => {
            error!("Failed to build backend: {}", e);
            std::process::exit(1);
        }
    };

    let result = match cmd {
        Command::Listen { topics } => run_listen(backend, topics).await,
        Command::Publish { topic, message } => run_publish(backend, &topic, &message).await,
    };
    if let Err(e) = result {
        error!("livesub failed: {}", e);
        std::process::exit(1);
    }
}

async fn run_listen(
    backend: Arc<dyn PubSubBackend>,
    topics: Vec<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    backend.start().await?;

    let session: SessionPubSub = SessionPubSub::new(backend.clone(), Uuid::new_v4().to_string());
    for topic in &topics {
        session
            .subscribe(
                topic,
                handler(|topic, message| async move {
                    info!(%topic, %message, "received");
                    Ok(())
                }),
            )
            .await?;
    }
    info!(session = session.session_id(), ?topics, "listening; press Ctrl-C to exit");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting gracefully.");

    session.close().await?;
    backend.stop().await?;
    Ok(())
}

async fn run_publish(
    backend: Arc<dyn PubSubBackend>,
    topic: &str,
    raw: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    backend.start().await?;
    let sent = backend.broadcast(topic, parse_message(raw)).await;
    backend.stop().await?;
    sent?;
    info!(%topic, "published");
    Ok(())
}

fn parse_message(raw: &str) -> Message {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
