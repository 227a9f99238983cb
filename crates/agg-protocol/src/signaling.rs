//! Signaling-socket JSON messages.
//!
//! The broadcast signaling endpoint speaks JSON text frames with a top-level
//! `type` field. Client messages are the fixed start-watching request plus
//! the keep-alive pair; server messages are classified by `type` with an
//! explicit catch-all, since the endpoint ships message kinds this client
//! has no use for.

use serde::{Deserialize, Serialize};

/// Hostname+path fragment identifying the NDGR view endpoint in signaling
/// payloads.
pub const VIEW_ENDPOINT_MARKER: &str = "mpn.live.nicovideo.jp/api/view";

// ---------------------------------------------------------------------------
// Client -> server
// ---------------------------------------------------------------------------

/// Messages this client sends over the signaling socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    StartWatching { data: StartWatchingData },
    KeepSeat,
    Pong,
}

/// Fixed per-broadcast start request payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartWatchingData {
    pub stream: StreamSelection,
    pub room: RoomSelection,
    pub reconnect: bool,
}

impl Default for StartWatchingData {
    fn default() -> Self {
        StartWatchingData {
            stream: StreamSelection {
                quality: "abr".to_owned(),
                protocol: "hls+fmp4".to_owned(),
                latency: "low".to_owned(),
                chase_play: false,
            },
            room: RoomSelection {
                protocol: "webSocket".to_owned(),
                commentable: true,
            },
            reconnect: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSelection {
    pub quality: String,
    pub protocol: String,
    pub latency: String,
    pub chase_play: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSelection {
    pub protocol: String,
    pub commentable: bool,
}

// ---------------------------------------------------------------------------
// Server -> client
// ---------------------------------------------------------------------------

/// Messages the signaling endpoint sends.
///
/// Unknown `type` values land in `Unknown` and are ignored by the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "camelCase")]
pub enum ServerMessage {
    Ping,
    Seat {
        data: SeatData,
    },
    MessageServer {
        data: MessageServerData,
    },
    Room {
        data: RoomData,
    },
    /// Out-of-band experimental endpoint; deliberately not followed.
    AkashicMessageServer {
        #[serde(default)]
        data: serde_json::Value,
    },
    Disconnect {
        #[serde(default)]
        data: DisconnectData,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatData {
    #[serde(default)]
    pub keep_interval_sec: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageServerData {
    #[serde(default)]
    pub view_uri: Option<String>,
    #[serde(default)]
    pub vpos_base_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomData {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub message_server: Option<MessageServerData>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectData {
    #[serde(default)]
    pub reason: Option<String>,
}

impl ServerMessage {
    /// The NDGR view endpoint carried by this message, if any.
    ///
    /// Both `messageServer` and `room` messages can carry the URL; anything
    /// not matching [`VIEW_ENDPOINT_MARKER`] is ignored.
    pub fn view_endpoint(&self) -> Option<&str> {
        let uri = match self {
            ServerMessage::MessageServer { data } => data.view_uri.as_deref(),
            ServerMessage::Room { data } => data
                .message_server
                .as_ref()
                .and_then(|ms| ms.view_uri.as_deref()),
            _ => None,
        }?;
        uri.contains(VIEW_ENDPOINT_MARKER).then_some(uri)
    }
}

// The JSON wire shapes themselves are pinned by `tests/contract.rs`.
