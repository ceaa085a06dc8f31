//! Interactive chat session driven from stdin

pub mod commands;
pub mod demo;

use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::config::Config;
use crate::engine::ChatEngineFactory;
use crate::session::{P2PClientObserver, SessionManager};
use crate::signaling::WebSocketSignaling;
use crate::stream::RemoteStream;

use commands::{InteractiveCommand, parse_interactive_command, print_help};

/// Prints notifications to the terminal
pub struct ConsoleObserver;

impl P2PClientObserver for ConsoleObserver {
    fn on_server_disconnected(&self) {
        println!("{}", "Signaling server disconnected".red().bold());
    }

    fn on_chat_started(&self, remote_id: &str) {
        println!("{} {}", "Chat started with".green(), remote_id.bold());
    }

    fn on_chat_stopped(&self, remote_id: &str) {
        println!("{} {}", "Chat stopped with".yellow(), remote_id.bold());
    }

    fn on_denied(&self, remote_id: &str) {
        println!("{} {}", remote_id.bold(), "denied the chat".red());
    }

    fn on_data_received(&self, remote_id: &str, message: &str) {
        println!("{} {}", format!("[{}]", remote_id).cyan().bold(), message);
    }

    fn on_stream_added(&self, stream: &RemoteStream) {
        println!(
            "{} {} ({}) from {}",
            "Stream added:".blue(),
            stream.label,
            stream.id.dimmed(),
            stream.origin
        );
    }

    fn on_stream_removed(&self, stream: &RemoteStream) {
        println!(
            "{} {} from {}",
            "Stream removed:".blue(),
            stream.id.dimmed(),
            stream.origin
        );
    }
}

/// Connect to the configured signaling server and chat until `/quit`
pub async fn run_session(config: Config) -> Result<()> {
    config.validate().context("Invalid configuration")?;

    let transport = Arc::new(WebSocketSignaling::new(config.signaling.clone()));
    let manager = SessionManager::new(
        config.client.clone(),
        transport,
        Arc::new(ChatEngineFactory),
    );
    manager.add_observer(Arc::new(ConsoleObserver));

    let local_id = manager
        .connect(&config.signaling.server_url, &config.signaling.token)
        .await
        .with_context(|| {
            format!(
                "Failed to connect to signaling server {}",
                config.signaling.server_url
            )
        })?;

    for remote_id in &config.allowed_remote_ids {
        manager.add_allowed_remote_id(remote_id);
    }

    println!(
        "{} {}",
        "Connected as".green().bold(),
        local_id.bold()
    );
    println!("Type /help for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    info!("stdin closed");
                    break;
                };
                match parse_interactive_command(&line) {
                    Ok(Some(InteractiveCommand::Quit)) => break,
                    Ok(Some(command)) => handle_command(&manager, command).await,
                    Ok(None) => {}
                    Err(e) => println!("{}", e.to_string().red()),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    manager.shutdown().await;
    if let Err(e) = manager.disconnect().await {
        warn!("Disconnect failed: {}", e);
    }
    println!("Bye.");
    Ok(())
}

async fn handle_command(manager: &SessionManager, command: InteractiveCommand) {
    match command {
        InteractiveCommand::Send { target, message } => {
            // acceptance by the remote can take a while; keep the prompt responsive
            let manager = manager.clone();
            tokio::spawn(async move {
                if let Err(e) = manager.send(&target, &message).await {
                    println!("{} {}: {}", "Send to".red(), target, e);
                }
            });
        }
        InteractiveCommand::Allow { target } => {
            manager.add_allowed_remote_id(&target);
            println!("Allowed {}", target.bold());
        }
        InteractiveCommand::Remove { target } => {
            match manager.remove_allowed_remote_id(&target).await {
                Ok(()) => println!("Removed {}", target.bold()),
                Err(e) => println!("{}", e.to_string().red()),
            }
        }
        InteractiveCommand::Stop { target } => match manager.stop(&target).await {
            Ok(()) => println!("Stopped session with {}", target.bold()),
            Err(e) => println!("{}", e.to_string().red()),
        },
        InteractiveCommand::Stats { target } => {
            match manager.get_connection_stats(&target).await {
                Ok(stats) => match serde_json::to_string_pretty(&stats) {
                    Ok(json) => {
                        println!("{}", json);
                        println!("{:.2} msg/s", stats.messages_per_second());
                    }
                    Err(e) => println!("{}", e.to_string().red()),
                },
                Err(e) => println!("{}", e.to_string().red()),
            }
        }
        InteractiveCommand::List => {
            println!("Allowed: {}", manager.allowed_remote_ids().join(", "));
            for remote_id in manager.active_remote_ids() {
                if let Some(state) = manager.channel_state(&remote_id) {
                    println!("  {} {:?}", remote_id.bold(), state);
                }
            }
        }
        InteractiveCommand::Help => print_help(),
        InteractiveCommand::Quit => {}
    }
}
