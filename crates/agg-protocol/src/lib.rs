// agg-protocol: Shared aggregation types and serialization.
//
// The host consumes one JSON event stream; every event carries a top-level
// `kind` field for discriminated deserialization. The signaling-socket JSON
// messages live in [`signaling`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub mod signaling;

// ---------------------------------------------------------------------------
// Connection identity
// ---------------------------------------------------------------------------

/// Which chat service a connection talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    Twitch,
    Niconico,
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionKind::Twitch => write!(f, "twitch"),
            ConnectionKind::Niconico => write!(f, "niconico"),
        }
    }
}

/// Lifecycle state of a connection, as shown to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connecting,
    Open,
    Closed,
    /// Terminal: the connection hit an unrecoverable error.
    Failed,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Open => write!(f, "open"),
            ConnectionStatus::Closed => write!(f, "closed"),
            ConnectionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One live connection as the host sees it.
///
/// `id` is `"<kind>:<natural-key>"` (e.g. `niconico:lv42`, `twitch:chan`)
/// and is globally unique in the supervisor's live set. Only the supervisor
/// mutates handles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionHandle {
    pub id: String,
    pub kind: ConnectionKind,
    /// Human-readable label (broadcast id or channel name).
    pub label: String,
    pub status: ConnectionStatus,
}

impl ConnectionHandle {
    pub fn new(kind: ConnectionKind, natural_key: &str) -> Self {
        ConnectionHandle {
            id: format!("{kind}:{natural_key}"),
            kind,
            label: natural_key.to_owned(),
            status: ConnectionStatus::Connecting,
        }
    }
}

// ---------------------------------------------------------------------------
// Normalized chat
// ---------------------------------------------------------------------------

/// A chat message normalized across services.
///
/// `badges` maps badge name to version (`"subscriber" -> "12"`); empty for
/// services without badges. `emotes` maps emote id to the character ranges
/// it covers in `text`; `None` for services without emote metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedMessage {
    pub connection_id: String,
    pub source: ConnectionKind,
    pub user: String,
    pub text: String,
    #[serde(default)]
    pub badges: BTreeMap<String, String>,
    #[serde(default)]
    pub emotes: Option<BTreeMap<String, Vec<(u32, u32)>>>,
}

// ---------------------------------------------------------------------------
// Host event stream
// ---------------------------------------------------------------------------

/// All events delivered to the host.
///
/// Serializes/deserializes using the `kind` field as a tag.
///
/// ```json
/// { "kind": "status", "global": "connected" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
#[serde(rename_all = "snake_case")]
pub enum HostEvent {
    /// Transient human-readable status line.
    Status { global: String },
    /// One normalized chat message.
    Message(NormalizedMessage),
    /// Snapshot of all live handles, emitted after any change.
    Connections { connections: Vec<ConnectionHandle> },
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

// The serialized shapes of these types are pinned by `tests/contract.rs`.
