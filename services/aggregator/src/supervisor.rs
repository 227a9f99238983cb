//! Connection supervisor.
//!
//! One task owns the live-connection map; everything else talks to it over
//! a command channel, so the map is never touched concurrently. Hosts use
//! [`SupervisorHandle::connect`] / [`SupervisorHandle::disconnect`];
//! connection tasks report status changes and their final outcome over the
//! same channel.
//!
//! Connection failures never propagate: every outcome lands here and is
//! turned into a status line plus a refreshed handle snapshot.

use std::collections::HashMap;

use agg_protocol::{ConnectionHandle, ConnectionKind, ConnectionStatus};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::events::EventSender;
use crate::input::{self, ConnectTarget};
use crate::niconico::connection::{ConnectionParams, run as run_niconico};
use crate::twitch::{TWITCH_WS_URL, TwitchParams, run as run_twitch};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// External endpoints, overridable for tests.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Watch-page base URL without trailing slash.
    pub watch_page_base: String,
    /// Twitch chat WebSocket URL.
    pub twitch_ws_url: String,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        SupervisorConfig {
            watch_page_base: "https://live.nicovideo.jp/watch".to_owned(),
            twitch_ws_url: TWITCH_WS_URL.to_owned(),
        }
    }
}

// ---------------------------------------------------------------------------
// Commands and outcomes
// ---------------------------------------------------------------------------

/// Everything the supervisor task reacts to.
#[derive(Debug)]
pub enum Command {
    /// Host request: classify the input and open a connection.
    Connect(String),
    /// Host request: tear down one connection, or all with `None`.
    /// `Disconnect(None)` also ends the supervisor once the map drains.
    Disconnect(Option<String>),
    /// A connection task moved through its lifecycle.
    StatusChanged { id: String, status: ConnectionStatus },
    /// A connection task finished; the handle leaves the live set.
    Finished { id: String, outcome: ConnectionOutcome },
}

/// Terminal result of a connection task.
#[derive(Debug)]
pub enum ConnectionOutcome {
    /// Shutdown requested by the host.
    Cancelled,
    /// The subtree ended on its own without an error.
    Closed,
    /// Server-directed disconnect (signaling `disconnect`).
    Disconnected { reason: Option<String> },
    /// Unrecoverable error; terminal for this handle.
    Failed { reason: String },
}

/// Cloneable host-side handle to the supervisor task.
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl SupervisorHandle {
    pub fn connect(&self, input: &str) {
        let _ = self.tx.send(Command::Connect(input.to_owned()));
    }

    pub fn disconnect(&self, id: Option<&str>) {
        let _ = self.tx.send(Command::Disconnect(id.map(str::to_owned)));
    }
}

// ---------------------------------------------------------------------------
// Supervisor task
// ---------------------------------------------------------------------------

struct ConnectionEntry {
    handle: ConnectionHandle,
    shutdown: watch::Sender<bool>,
    /// Kept for ownership; the task reports `Finished` on its own.
    _task: JoinHandle<()>,
}

/// Spawn the supervisor task.
pub fn spawn(events: EventSender, config: SupervisorConfig) -> (SupervisorHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = SupervisorHandle { tx: tx.clone() };
    let task = tokio::spawn(run(events, config, tx, rx));
    (handle, task)
}

async fn run(
    events: EventSender,
    config: SupervisorConfig,
    control_tx: mpsc::UnboundedSender<Command>,
    mut rx: mpsc::UnboundedReceiver<Command>,
) {
    let mut connections: HashMap<String, ConnectionEntry> = HashMap::new();
    let mut draining = false;

    while let Some(command) = rx.recv().await {
        match command {
            Command::Connect(input) => {
                if draining {
                    continue;
                }
                handle_connect(&input, &mut connections, &events, &config, &control_tx);
            }
            Command::Disconnect(None) => {
                info!(count = connections.len(), "disconnecting all connections");
                draining = true;
                for entry in connections.values() {
                    let _ = entry.shutdown.send(true);
                }
                if connections.is_empty() {
                    break;
                }
            }
            Command::Disconnect(Some(id)) => match connections.get(&id) {
                Some(entry) => {
                    info!(connection = %id, "disconnect requested");
                    let _ = entry.shutdown.send(true);
                }
                None => events.status(format!("no such connection: {id}")),
            },
            Command::StatusChanged { id, status } => {
                if let Some(entry) = connections.get_mut(&id) {
                    entry.handle.status = status;
                    emit_snapshot(&events, &connections);
                }
            }
            Command::Finished { id, outcome } => {
                let Some(_entry) = connections.remove(&id) else {
                    continue;
                };
                let text = match outcome {
                    ConnectionOutcome::Cancelled => format!("{id}: disconnected"),
                    ConnectionOutcome::Closed => format!("{id}: connection closed"),
                    ConnectionOutcome::Disconnected { reason: Some(reason) } => {
                        format!("{id}: disconnected by server ({reason})")
                    }
                    ConnectionOutcome::Disconnected { reason: None } => {
                        format!("{id}: disconnected by server")
                    }
                    ConnectionOutcome::Failed { reason } => {
                        warn!(connection = %id, %reason, "connection failed");
                        format!("{id}: failed: {reason}")
                    }
                };
                events.status(text);
                emit_snapshot(&events, &connections);
                if draining && connections.is_empty() {
                    break;
                }
            }
        }
    }
}

fn handle_connect(
    input: &str,
    connections: &mut HashMap<String, ConnectionEntry>,
    events: &EventSender,
    config: &SupervisorConfig,
    control_tx: &mpsc::UnboundedSender<Command>,
) {
    let target = match input::classify(input) {
        Ok(target) => target,
        Err(e) => {
            events.status(format!("cannot connect '{input}': {e}"));
            return;
        }
    };

    let handle = match &target {
        ConnectTarget::Niconico(id) => ConnectionHandle::new(ConnectionKind::Niconico, id.as_str()),
        ConnectTarget::Twitch(channel) => ConnectionHandle::new(ConnectionKind::Twitch, channel),
    };
    if connections.contains_key(&handle.id) {
        events.status(format!("already connected: {}", handle.id));
        return;
    }

    let id = handle.id.clone();
    info!(connection = %id, "connecting");
    events.status(format!("{id}: connecting"));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let control = control_tx.clone();
    let task = match target {
        ConnectTarget::Niconico(broadcast_id) => {
            let params = ConnectionParams {
                connection_id: id.clone(),
                broadcast_id,
                watch_page_base: config.watch_page_base.clone(),
                events: events.clone(),
                control: control_tx.clone(),
                shutdown: shutdown_rx,
            };
            tokio::spawn(async move {
                let outcome = run_niconico(params).await;
                let _ = control.send(Command::Finished { id, outcome });
            })
        }
        ConnectTarget::Twitch(channel) => {
            let params = TwitchParams {
                ws_url: config.twitch_ws_url.clone(),
                channel,
                connection_id: id.clone(),
                events: events.clone(),
                control: control_tx.clone(),
                shutdown: shutdown_rx,
            };
            tokio::spawn(async move {
                let outcome = run_twitch(params).await;
                let _ = control.send(Command::Finished { id, outcome });
            })
        }
    };

    connections.insert(
        handle.id.clone(),
        ConnectionEntry {
            handle,
            shutdown: shutdown_tx,
            _task: task,
        },
    );
    emit_snapshot(events, connections);
}

fn emit_snapshot(events: &EventSender, connections: &HashMap<String, ConnectionEntry>) {
    let mut handles: Vec<ConnectionHandle> = connections
        .values()
        .map(|entry| entry.handle.clone())
        .collect();
    handles.sort_by(|a, b| a.id.cmp(&b.id));
    events.connections(handles);
}
