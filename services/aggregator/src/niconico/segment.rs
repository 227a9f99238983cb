//! Segment runner.
//!
//! One runner per discovered segment endpoint: long-poll the URL, decode
//! chunked messages, and emit normalized chat events in server-delivered
//! order. Server-issued reconnect directives carry a cursor and sometimes a
//! new stream URL; a differing URL spawns a replacement runner (via the
//! connection task, which enforces exact-URL uniqueness) while this one
//! drains its body and stops. A plain body end restarts the poll with the
//! last-known cursor on 1 s -> 30 s backoff.

use agg_protocol::{ConnectionKind, NormalizedMessage};
use ndgr_core::{
    ChatMessage, Cursor, FrameAssembler, OpaqueCursor, SegmentMessage, decode_chunked_message,
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::backoff::{Backoff, sleep_unless_shutdown};
use crate::events::EventSender;
use crate::niconico::{ConnEvent, ndgr_get};

/// Attribution fallback when a chat payload carries no name at all.
const ANONYMOUS_USER: &str = "niconico";

// ---------------------------------------------------------------------------
// URL construction
// ---------------------------------------------------------------------------

/// Build the fully-qualified segment URL: an opaque `cursor` wins over a
/// numeric `at`; with neither, `at=now`. Any previous `at`/`cursor` params
/// on the URI are replaced.
pub fn build_segment_url(
    uri: &str,
    cursor: Option<&OpaqueCursor>,
    at: Option<Cursor>,
) -> Result<String, url::ParseError> {
    let mut parsed = url::Url::parse(uri)?;
    let retained: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| k != "at" && k != "cursor")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    {
        let mut pairs = parsed.query_pairs_mut();
        pairs.clear();
        for (k, v) in &retained {
            pairs.append_pair(k, v);
        }
        match (cursor, at) {
            (Some(cursor), _) => pairs.append_pair("cursor", cursor.as_param()),
            (None, Some(at)) => pairs.append_pair("at", &at.to_string()),
            (None, None) => pairs.append_pair("at", "now"),
        };
    }
    Ok(parsed.into())
}

/// Compare two segment URLs ignoring query parameters: a reconnect
/// directive naming the stream we are already on is a cursor update, not a
/// migration.
fn same_endpoint(a: &str, b: &str) -> bool {
    match (url::Url::parse(a), url::Url::parse(b)) {
        (Ok(a), Ok(b)) => {
            a.scheme() == b.scheme() && a.host() == b.host() && a.path() == b.path()
        }
        _ => a == b,
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

pub struct RunnerParams {
    pub client: reqwest::Client,
    /// Exact fully-qualified URL this runner is keyed by.
    pub url: String,
    pub connection_id: String,
    pub events: EventSender,
    pub conn_tx: mpsc::UnboundedSender<ConnEvent>,
    pub shutdown: watch::Receiver<bool>,
}

/// Why one poll of the segment body finished.
enum PollEnd {
    /// Body ended without a directive; restart with the last cursor.
    BodyEnded,
    /// Server sent the end marker; stop for good.
    End,
    /// A reconnect directive moved us to a different stream URL; the
    /// replacement was requested, stop after this body.
    Replaced,
    Cancelled,
    /// Connect or read failure; restart with backoff.
    Transient,
}

/// Carryover state across polls of one runner.
#[derive(Default)]
struct RunnerState {
    cursor: Option<OpaqueCursor>,
    at: Option<Cursor>,
}

/// Run the segment stream until it ends, is replaced, or is cancelled.
/// Always reports `SegmentEnded` with the runner's key so the connection
/// frees the URL.
pub async fn run_runner(params: RunnerParams) {
    let RunnerParams {
        client,
        url: key_url,
        connection_id,
        events,
        conn_tx,
        mut shutdown,
    } = params;

    let mut backoff = Backoff::segment();
    let mut state = RunnerState::default();
    let mut url = key_url.clone();

    loop {
        if *shutdown.borrow() {
            break;
        }
        match poll_once(
            &client,
            &url,
            &connection_id,
            &events,
            &conn_tx,
            &mut state,
            &mut shutdown,
        )
        .await
        {
            PollEnd::Cancelled | PollEnd::End | PollEnd::Replaced => break,
            PollEnd::BodyEnded | PollEnd::Transient => {
                if sleep_unless_shutdown(backoff.next_delay(), &mut shutdown).await {
                    break;
                }
                // Restart from the last-known cursor (or at=now).
                match build_segment_url(&key_url, state.cursor.as_ref(), state.at) {
                    Ok(next) => url = next,
                    Err(e) => {
                        warn!(connection = %connection_id, error = %e, "segment URL rebuild");
                        break;
                    }
                }
            }
        }
    }

    let _ = conn_tx.send(ConnEvent::SegmentEnded { key: key_url });
}

async fn poll_once(
    client: &reqwest::Client,
    url: &str,
    connection_id: &str,
    events: &EventSender,
    conn_tx: &mpsc::UnboundedSender<ConnEvent>,
    state: &mut RunnerState,
    shutdown: &mut watch::Receiver<bool>,
) -> PollEnd {
    debug!(connection = %connection_id, %url, "segment poll");
    let sent = tokio::select! {
        biased;
        _ = shutdown.changed() => return PollEnd::Cancelled,
        sent = ndgr_get(client, url).send() => sent,
    };
    let mut response = match sent {
        Ok(response) => response,
        Err(e) => {
            warn!(connection = %connection_id, error = %e, "segment poll failed");
            return PollEnd::Transient;
        }
    };
    if !response.status().is_success() {
        warn!(
            connection = %connection_id,
            status = response.status().as_u16(),
            "segment endpoint status"
        );
        return PollEnd::Transient;
    }

    let mut assembler = FrameAssembler::default();
    let mut replaced = false;
    loop {
        let chunk = tokio::select! {
            biased;
            _ = shutdown.changed() => return PollEnd::Cancelled,
            chunk = response.chunk() => chunk,
        };
        let chunk = match chunk {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(e) => {
                debug!(connection = %connection_id, error = %e, "segment body ended");
                break;
            }
        };
        let frames = match assembler.feed(&chunk) {
            Ok(frames) => frames,
            Err(e) => {
                warn!(connection = %connection_id, error = %e, "segment frame assembly");
                continue;
            }
        };
        for frame in frames {
            let messages = match decode_chunked_message(&frame) {
                Ok(messages) => messages,
                Err(e) => {
                    warn!(connection = %connection_id, error = %e, "dropping segment frame");
                    continue;
                }
            };
            for message in messages {
                match message {
                    SegmentMessage::Chat(chat) => emit_chat(events, connection_id, chat),
                    SegmentMessage::Reconnect {
                        at,
                        stream_uri,
                        cursor,
                    } => {
                        if let Some(cursor) = cursor {
                            state.cursor = Some(cursor);
                        }
                        if let Some(at) = at {
                            state.at = Some(Cursor::from_at(at));
                        }
                        if let Some(stream_uri) = stream_uri {
                            if !same_endpoint(&stream_uri, url) {
                                let _ = conn_tx.send(ConnEvent::StartSegment {
                                    uri: stream_uri,
                                    cursor: state.cursor.clone(),
                                    at: state.at,
                                });
                                replaced = true;
                            }
                        }
                    }
                    SegmentMessage::End => return PollEnd::End,
                    SegmentMessage::Statistics(stats) => {
                        debug!(
                            connection = %connection_id,
                            viewers = ?stats.viewers,
                            comments = ?stats.comments,
                            "segment statistics"
                        );
                    }
                    SegmentMessage::Ping => {}
                }
            }
        }
    }

    if replaced {
        PollEnd::Replaced
    } else {
        PollEnd::BodyEnded
    }
}

fn emit_chat(events: &EventSender, connection_id: &str, chat: ChatMessage) {
    let Some(content) = chat.content.filter(|c| !c.is_empty()) else {
        return;
    };
    let user = chat
        .name
        .filter(|n| !n.is_empty())
        .or(chat.user_id.filter(|u| !u.is_empty()))
        .unwrap_or_else(|| ANONYMOUS_USER.to_owned());
    events.message(NormalizedMessage {
        connection_id: connection_id.to_owned(),
        source: ConnectionKind::Niconico,
        user,
        text: content,
        badges: std::collections::BTreeMap::new(),
        emotes: None,
    });
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_defaults_to_at_now() {
        assert_eq!(
            build_segment_url("https://a.example/data/segment/v4/s1", None, None).unwrap(),
            "https://a.example/data/segment/v4/s1?at=now"
        );
    }

    #[test]
    fn cursor_wins_over_at() {
        let cursor = OpaqueCursor::Text("c-123".to_owned());
        assert_eq!(
            build_segment_url(
                "https://a.example/data/segment/v4/s1",
                Some(&cursor),
                Some(Cursor::At(1_700_000_000)),
            )
            .unwrap(),
            "https://a.example/data/segment/v4/s1?cursor=c-123"
        );
    }

    #[test]
    fn stale_params_are_replaced() {
        assert_eq!(
            build_segment_url(
                "https://a.example/s1?at=now&room=2",
                None,
                Some(Cursor::At(5)),
            )
            .unwrap(),
            "https://a.example/s1?room=2&at=5"
        );
        let cursor = OpaqueCursor::Text("z".to_owned());
        assert_eq!(
            build_segment_url("https://a.example/s1?cursor=old", Some(&cursor), None).unwrap(),
            "https://a.example/s1?cursor=z"
        );
    }

    #[test]
    fn same_endpoint_ignores_query() {
        assert!(same_endpoint(
            "https://a.example/s1?at=now",
            "https://a.example/s1?cursor=abc"
        ));
        assert!(!same_endpoint(
            "https://a.example/s1",
            "https://a.example/s2"
        ));
        assert!(!same_endpoint(
            "https://a.example/s1",
            "https://b.example/s1"
        ));
    }

    #[tokio::test]
    async fn chat_attribution_falls_back() {
        let (events, mut rx) = crate::events::EventSender::channel();

        let named = ChatMessage {
            content: Some("hello".to_owned()),
            name: Some("alice".to_owned()),
            user_id: Some("u1".to_owned()),
            ..ChatMessage::default()
        };
        emit_chat(&events, "niconico:lv1", named);

        let id_only = ChatMessage {
            content: Some("hi".to_owned()),
            user_id: Some("u2".to_owned()),
            ..ChatMessage::default()
        };
        emit_chat(&events, "niconico:lv1", id_only);

        let bare = ChatMessage {
            content: Some("yo".to_owned()),
            ..ChatMessage::default()
        };
        emit_chat(&events, "niconico:lv1", bare);

        let empty = ChatMessage::default();
        emit_chat(&events, "niconico:lv1", empty);

        let users: Vec<String> = [rx.recv().await, rx.recv().await, rx.recv().await]
            .into_iter()
            .map(|ev| match ev {
                Some(agg_protocol::HostEvent::Message(m)) => m.user,
                other => panic!("expected message, got {other:?}"),
            })
            .collect();
        assert_eq!(users, vec!["alice", "u2", "niconico"]);
        assert!(rx.try_recv().is_err());
    }
}
