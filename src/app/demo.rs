//! Loopback demo: two clients in one process

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use colored::Colorize;
use tokio::sync::mpsc;

use crate::config::ClientConfig;
use crate::engine::ChatEngineFactory;
use crate::session::{ClientEvent, EventForwarder, SessionManager};
use crate::signaling::LoopbackHub;
use crate::stream::LocalStream;

/// How long a step may take before the demo gives up on it
const STEP_TIMEOUT: Duration = Duration::from_secs(5);

struct DemoClient {
    name: &'static str,
    manager: SessionManager,
    events: mpsc::UnboundedReceiver<ClientEvent>,
}

impl DemoClient {
    async fn connect(hub: &LoopbackHub, name: &'static str, peer: &str) -> Result<Self> {
        let manager = SessionManager::new(
            ClientConfig::default(),
            Arc::new(hub.endpoint(name)),
            Arc::new(ChatEngineFactory),
        );
        let (forwarder, events) = EventForwarder::new();
        manager.add_observer(forwarder);
        manager
            .connect("loopback", "")
            .await
            .with_context(|| format!("{} failed to connect", name))?;
        manager.add_allowed_remote_id(peer);

        Ok(Self {
            name,
            manager,
            events,
        })
    }

    /// Wait for the next `count` notifications and print them
    async fn expect(&mut self, count: usize) -> Result<()> {
        for _ in 0..count {
            let event = tokio::time::timeout(STEP_TIMEOUT, self.events.recv())
                .await
                .with_context(|| format!("{} saw no notification in time", self.name))?
                .with_context(|| format!("{} stopped receiving notifications", self.name))?;
            println!("  {} {}", format!("{:>5} <-", self.name).cyan(), describe(&event));
        }
        Ok(())
    }
}

fn describe(event: &ClientEvent) -> String {
    match event {
        ClientEvent::ServerDisconnected => "server disconnected".red().to_string(),
        ClientEvent::ChatStarted { remote_id } => format!("chat started with {}", remote_id),
        ClientEvent::ChatStopped { remote_id } => format!("chat stopped with {}", remote_id),
        ClientEvent::Denied { remote_id } => format!("denied by {}", remote_id),
        ClientEvent::DataReceived { remote_id, message } => {
            format!("{} says {}", remote_id, message.bold())
        }
        ClientEvent::StreamAdded(stream) => {
            format!("stream '{}' added by {}", stream.label, stream.origin)
        }
        ClientEvent::StreamRemoved(stream) => {
            format!("stream {} removed by {}", stream.id, stream.origin)
        }
    }
}

fn step(text: &str) {
    println!("{} {}", "==>".green().bold(), text);
}

pub async fn run_demo() -> Result<()> {
    println!("{}", "peerchat loopback demo".bold());

    let hub = LoopbackHub::new();
    let mut alice = DemoClient::connect(&hub, "alice", "bob").await?;
    let mut bob = DemoClient::connect(&hub, "bob", "alice").await?;

    step("alice sends a message to bob");
    alice
        .manager
        .send("bob", "Hello Bob!")
        .await
        .context("alice could not reach bob")?;
    alice.expect(1).await?;
    bob.expect(2).await?;

    step("bob replies");
    bob.manager.send("alice", "Hi Alice, loud and clear.").await?;
    alice.expect(1).await?;

    step("alice publishes a camera stream");
    let camera = LocalStream::new("camera");
    let publication = alice.manager.publish("bob", &camera).await?;
    bob.expect(1).await?;

    let stats = publication.connection_stats().await?;
    println!(
        "  stats: {} sent, {} received, {} published, {:.2} msg/s",
        stats.messages_sent,
        stats.messages_received,
        stats.published_streams,
        stats.messages_per_second()
    );

    step("alice unpublishes the stream");
    publication.stop().await?;
    bob.expect(1).await?;

    step("alice stops the chat");
    alice.manager.stop("bob").await?;
    alice.expect(1).await?;
    bob.expect(1).await?;
    println!(
        "  bob still allowed by alice: {}",
        alice.manager.is_allowed("bob")
    );

    alice.manager.shutdown().await;
    bob.manager.shutdown().await;
    println!("{}", "Demo completed".green().bold());
    Ok(())
}
