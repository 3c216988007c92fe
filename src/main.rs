//! CLI for chat-relay
//!
//! Subcommands:
//! - `serve`: run the relay server
//! - `send`: submit one message
//! - `users`: print the user directory
//! - `pull`: take every pending message (volatile backend)
//! - `subscribe`: stream a recipient's messages until interrupted

use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use tracing::{error, info};

use chat_relay::broker::DeliveryEngine;
use chat_relay::client::RelayClient;
use chat_relay::config::{Settings, load_config};
use chat_relay::transport::start_websocket_server;
use chat_relay::utils::logging;

#[derive(Parser)]
#[command(name = "chat-relay", about = "Minimal chat message relay")]
struct Cli {
    /// Relay URL used by the client commands
    #[arg(long, global = true, default_value = "ws://127.0.0.1:50052")]
    url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the relay server
    Serve,
    #[command(flatten)]
    Client(ClientCommand),
}

#[derive(Subcommand)]
enum ClientCommand {
    /// Send a message
    Send {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        body: String,
    },
    /// List known users
    Users,
    /// Take every pending message from the shared queue
    Pull,
    /// Stream messages addressed to a recipient
    Subscribe {
        recipient: String,
        /// Only deliver messages newer than this timestamp
        #[arg(long, default_value_t = 0)]
        since: i64,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Serve => match load_config() {
            Ok(config) => {
                logging::init(&config.log.level);
                run_server(config).await
            }
            Err(e) => {
                logging::init("info");
                Err(e.into())
            }
        },
        Command::Client(command) => {
            logging::init("warn");
            run_client(&cli.url, command).await
        }
    };

    if let Err(e) = result {
        error!("chat-relay failed: {e}");
        std::process::exit(1);
    }
}

async fn run_server(config: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let engine = Arc::new(DeliveryEngine::from_settings(&config)?);

    tokio::select! {
        result = start_websocket_server(addr, engine.clone()) => {
            result?;
            error!("WebSocket server exited unexpectedly.");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    engine.shutdown();
    Ok(())
}

async fn run_client(url: &str, command: ClientCommand) -> Result<(), Box<dyn std::error::Error>> {
    let mut client = RelayClient::connect(url).await?;

    match command {
        ClientCommand::Send { from, to, body } => {
            let timestamp = client.submit(&from, &to, &body, None).await?;
            println!("Message sent successfully! (timestamp {timestamp})");
        }
        ClientCommand::Users => {
            println!("User List:");
            for user in client.list_users().await? {
                println!("  {}: {}", user.login, user.full_name);
            }
        }
        ClientCommand::Pull => {
            for message in client.get_messages().await? {
                println!(
                    "From: {}, To: {}, Message: {}",
                    message.from_user(),
                    message.to_user(),
                    message.body()
                );
            }
        }
        ClientCommand::Subscribe { recipient, since } => {
            let mut messages = client.subscribe(&recipient, since).await?;
            while let Some(message) = messages.next().await {
                let message = message?;
                println!(
                    "[{}] From: {}, Message: {}",
                    message.timestamp(),
                    message.from_user(),
                    message.body()
                );
            }
        }
    }

    Ok(())
}
