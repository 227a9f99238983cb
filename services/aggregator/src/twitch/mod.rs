//! Twitch adaptation layer.
//!
//! A thin IRC-over-WebSocket client with anonymous login. Its only contract
//! with the core is the event sender: PRIVMSG lines become normalized
//! messages, everything else is plumbing (PING/PONG, server-directed
//! RECONNECT, reconnect backoff).

use agg_protocol::{ConnectionKind, ConnectionStatus, NormalizedMessage};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

use crate::backoff::{Backoff, sleep_unless_shutdown};
use crate::events::EventSender;
use crate::supervisor::{Command, ConnectionOutcome};

pub mod irc;

use irc::IrcMessage;

/// Production chat endpoint.
pub const TWITCH_WS_URL: &str = "wss://irc-ws.chat.twitch.tv:443";

pub struct TwitchParams {
    /// WebSocket URL of the chat endpoint (overridable for tests).
    pub ws_url: String,
    /// Normalized channel name, without `#`.
    pub channel: String,
    pub connection_id: String,
    pub events: EventSender,
    pub control: mpsc::UnboundedSender<Command>,
    pub shutdown: watch::Receiver<bool>,
}

/// How one IRC socket session ended.
#[derive(Debug)]
enum IrcSessionEnd {
    Closed,
    /// Server-directed RECONNECT.
    Reconnect,
    Cancelled,
}

/// Run the channel connection until cancelled. Transient failures reconnect
/// with 1 s -> 16 s backoff.
pub async fn run(params: TwitchParams) -> ConnectionOutcome {
    let TwitchParams {
        ws_url,
        channel,
        connection_id,
        events,
        control,
        mut shutdown,
    } = params;

    let mut backoff = Backoff::signaling();
    loop {
        if *shutdown.borrow() {
            return ConnectionOutcome::Cancelled;
        }

        match tokio_tungstenite::connect_async(&ws_url).await {
            Err(e) => {
                warn!(connection = %connection_id, error = %e, "chat connect failed");
            }
            Ok((ws, _response)) => {
                let session = run_irc_session(
                    ws,
                    &channel,
                    &connection_id,
                    &events,
                    &control,
                    &mut shutdown,
                )
                .await;
                match session {
                    Ok(IrcSessionEnd::Cancelled) => return ConnectionOutcome::Cancelled,
                    Ok(IrcSessionEnd::Reconnect) => {
                        info!(connection = %connection_id, "server requested reconnect");
                    }
                    Ok(IrcSessionEnd::Closed) => {
                        warn!(connection = %connection_id, "chat socket closed");
                    }
                    Err(e) => {
                        warn!(connection = %connection_id, error = %e, "chat socket error");
                    }
                }
            }
        }

        if sleep_unless_shutdown(backoff.next_delay(), &mut shutdown).await {
            return ConnectionOutcome::Cancelled;
        }
    }
}

async fn run_irc_session<S>(
    mut ws: S,
    channel: &str,
    connection_id: &str,
    events: &EventSender,
    control: &mpsc::UnboundedSender<Command>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<IrcSessionEnd, WsError>
where
    S: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Unpin,
{
    let nick = format!("justinfan{}", rand::thread_rng().gen_range(10_000..100_000));
    send_line(&mut ws, "CAP REQ :twitch.tv/tags twitch.tv/commands").await?;
    send_line(&mut ws, &format!("NICK {nick}")).await?;
    send_line(&mut ws, &format!("JOIN #{channel}")).await?;

    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return Ok(IrcSessionEnd::Cancelled);
                }
            }
            msg = ws.next() => match msg {
                None => return Ok(IrcSessionEnd::Closed),
                Some(Err(e)) => return Err(e),
                Some(Ok(Message::Text(text))) => {
                    for line in text.lines() {
                        let Some(msg) = IrcMessage::parse(line) else {
                            continue;
                        };
                        match msg.command.as_str() {
                            "PING" => {
                                let arg = msg.text().unwrap_or("tmi.twitch.tv");
                                send_line(&mut ws, &format!("PONG :{arg}")).await?;
                            }
                            "PRIVMSG" => emit_privmsg(events, connection_id, &msg),
                            "RECONNECT" => return Ok(IrcSessionEnd::Reconnect),
                            "001" => {
                                info!(connection = %connection_id, %nick, "chat login accepted");
                                events.status(format!("{connection_id}: joined #{channel}"));
                                let _ = control.send(Command::StatusChanged {
                                    id: connection_id.to_owned(),
                                    status: ConnectionStatus::Open,
                                });
                            }
                            "NOTICE" => {
                                info!(connection = %connection_id, notice = ?msg.text(), "chat notice");
                            }
                            _ => debug!(command = %msg.command, "ignoring chat line"),
                        }
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = ws.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) => return Ok(IrcSessionEnd::Closed),
                Some(Ok(_)) => {}
            }
        }
    }
}

fn emit_privmsg(events: &EventSender, connection_id: &str, msg: &IrcMessage) {
    let Some(text) = msg.text().filter(|t| !t.is_empty()) else {
        return;
    };
    let user = msg
        .display_name()
        .or_else(|| msg.nick())
        .unwrap_or("twitch")
        .to_owned();
    let badges = msg
        .tags
        .get("badges")
        .map(|tag| irc::parse_badges(tag))
        .unwrap_or_default();
    let emotes = msg
        .tags
        .get("emotes")
        .filter(|tag| !tag.is_empty())
        .map(|tag| irc::parse_emotes(tag));
    events.message(NormalizedMessage {
        connection_id: connection_id.to_owned(),
        source: ConnectionKind::Twitch,
        user,
        text: text.to_owned(),
        badges,
        emotes,
    });
}

async fn send_line<S>(ws: &mut S, line: &str) -> Result<(), WsError>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    ws.send(Message::Text(format!("{line}\r\n").into())).await
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
