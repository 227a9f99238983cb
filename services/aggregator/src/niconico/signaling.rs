//! Signaling session.
//!
//! Owns the bidirectional text-framed socket to the broadcast signaling
//! endpoint and drives the watch handshake:
//!
//! 1. Send `startWatching` with the fixed per-broadcast defaults.
//! 2. Every 30 seconds, send `keepSeat` plus a socket-level ping.
//! 3. Answer `{type:"ping"}` with `{type:"pong"}`.
//! 4. Report the NDGR view endpoint the first time it appears (repeats of
//!    the same URL are suppressed across reconnects).
//! 5. `disconnect` ends the connection with its reason; a plain socket
//!    close reconnects with 1 s -> 16 s backoff.

use std::time::Duration;

use agg_protocol::signaling::{ClientMessage, ServerMessage, StartWatchingData};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, warn};

use crate::backoff::{Backoff, sleep_unless_shutdown};
use crate::events::EventSender;
use crate::niconico::{ConnEvent, USER_AGENT};

pub const KEEP_SEAT_INTERVAL: Duration = Duration::from_secs(30);

/// How one socket session ended.
#[derive(Debug)]
pub enum SessionEnd {
    /// Socket closed without a server directive; reconnect.
    Closed,
    /// Shutdown observed.
    Cancelled,
    /// Server-directed disconnect; terminal for the connection.
    Disconnected { reason: Option<String> },
}

// ---------------------------------------------------------------------------
// Reconnecting outer loop
// ---------------------------------------------------------------------------

pub struct SignalingParams {
    pub url: String,
    pub connection_id: String,
    pub events: EventSender,
    pub conn_tx: mpsc::UnboundedSender<ConnEvent>,
    pub shutdown: watch::Receiver<bool>,
}

/// Connect, run the session, and reconnect with backoff until cancelled or
/// the server disconnects us.
pub async fn run_signaling(params: SignalingParams) {
    let SignalingParams {
        url,
        connection_id,
        events,
        conn_tx,
        mut shutdown,
    } = params;

    let mut backoff = Backoff::signaling();
    let mut reported: Option<String> = None;

    loop {
        if *shutdown.borrow() {
            return;
        }

        let request = match build_ws_request(&url) {
            Ok(request) => request,
            Err(e) => {
                // A URL the WS client cannot even parse never becomes
                // connectable; treat as a server-side disconnect.
                let _ = conn_tx.send(ConnEvent::SignalingDisconnected {
                    reason: Some(format!("invalid signaling URL: {e}")),
                });
                return;
            }
        };

        match tokio_tungstenite::connect_async(request).await {
            Err(e) => {
                warn!(connection = %connection_id, error = %e, "signaling connect failed");
            }
            Ok((ws, _response)) => {
                events.status(format!("{connection_id}: signaling open"));
                match run_session(ws, &conn_tx, &mut reported, &mut shutdown).await {
                    Ok(SessionEnd::Cancelled) => return,
                    Ok(SessionEnd::Disconnected { reason }) => {
                        let _ = conn_tx.send(ConnEvent::SignalingDisconnected { reason });
                        return;
                    }
                    Ok(SessionEnd::Closed) => {
                        warn!(connection = %connection_id, "signaling socket closed");
                    }
                    Err(e) => {
                        warn!(connection = %connection_id, error = %e, "signaling socket error");
                    }
                }
            }
        }

        if sleep_unless_shutdown(backoff.next_delay(), &mut shutdown).await {
            return;
        }
    }
}

// ---------------------------------------------------------------------------
// One socket session
// ---------------------------------------------------------------------------

/// Drive a single signaling socket until it ends.
///
/// Generic over the stream so tests can drive it against a local mock.
/// `reported` is the cross-session suppression state for the single-shot
/// view-endpoint report.
pub async fn run_session<S>(
    mut ws: S,
    conn_tx: &mpsc::UnboundedSender<ConnEvent>,
    reported: &mut Option<String>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<SessionEnd, WsError>
where
    S: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Unpin,
{
    send_json(
        &mut ws,
        &ClientMessage::StartWatching {
            data: StartWatchingData::default(),
        },
    )
    .await?;

    let mut keep_seat = tokio::time::interval(KEEP_SEAT_INTERVAL);
    keep_seat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; the start request just went out.
    keep_seat.tick().await;

    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return Ok(SessionEnd::Cancelled);
                }
            }
            _ = keep_seat.tick() => {
                send_json(&mut ws, &ClientMessage::KeepSeat).await?;
                ws.send(Message::Ping(Vec::new().into())).await?;
            }
            msg = ws.next() => match msg {
                None => return Ok(SessionEnd::Closed),
                Some(Err(e)) => return Err(e),
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(server_msg) => {
                            if let Some(end) =
                                handle_server_message(&mut ws, server_msg, conn_tx, reported).await?
                            {
                                return Ok(end);
                            }
                        }
                        Err(e) => warn!(error = %e, "signaling deserialize"),
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = ws.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) => return Ok(SessionEnd::Closed),
                Some(Ok(_)) => {}
            }
        }
    }
}

async fn handle_server_message<S>(
    ws: &mut S,
    msg: ServerMessage,
    conn_tx: &mpsc::UnboundedSender<ConnEvent>,
    reported: &mut Option<String>,
) -> Result<Option<SessionEnd>, WsError>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    if let Some(uri) = msg.view_endpoint() {
        if reported.as_deref() != Some(uri) {
            *reported = Some(uri.to_owned());
            let _ = conn_tx.send(ConnEvent::ViewEndpoint(uri.to_owned()));
        }
    }

    match msg {
        ServerMessage::Ping => send_json(ws, &ClientMessage::Pong).await?,
        ServerMessage::Seat { .. } | ServerMessage::Room { .. } => {
            send_json(ws, &ClientMessage::KeepSeat).await?;
        }
        ServerMessage::Disconnect { data } => {
            return Ok(Some(SessionEnd::Disconnected {
                reason: data.reason,
            }));
        }
        ServerMessage::MessageServer { .. } => {}
        ServerMessage::AkashicMessageServer { .. } | ServerMessage::Unknown => {
            debug!("ignoring signaling message");
        }
    }
    Ok(None)
}

async fn send_json<S>(ws: &mut S, msg: &ClientMessage) -> Result<(), WsError>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    let json = serde_json::to_string(msg).expect("client messages always serialize");
    ws.send(Message::Text(json.into())).await
}

fn build_ws_request(
    url: &str,
) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request, WsError> {
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;

    let mut request = url.into_client_request()?;
    if let Ok(value) = USER_AGENT.parse() {
        request.headers_mut().insert("User-Agent", value);
    }
    Ok(request)
}
