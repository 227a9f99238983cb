/// Contract tests: the JSON wire shapes this crate promises to the host
/// and exchanges with the signaling endpoint. Each case pins a literal
/// JSON example and asserts the Rust types carry it faithfully, so a
/// refactor that silently changes a tag or field name fails here first.
use std::collections::BTreeMap;

use agg_protocol::signaling::{ClientMessage, ServerMessage, StartWatchingData};
use agg_protocol::{ConnectionHandle, ConnectionKind, HostEvent, NormalizedMessage};

// ---------------------------------------------------------------------------
// Signaling socket: client -> server
// ---------------------------------------------------------------------------

#[test]
fn start_watching_wire_shape() {
    let msg = ClientMessage::StartWatching {
        data: StartWatchingData::default(),
    };
    let json = serde_json::to_value(&msg).unwrap();
    assert_eq!(json["type"], "startWatching");
    assert_eq!(json["data"]["stream"]["quality"], "abr");
    assert_eq!(json["data"]["stream"]["chasePlay"], false);
    assert_eq!(json["data"]["room"]["protocol"], "webSocket");
    assert_eq!(json["data"]["room"]["commentable"], true);
    assert_eq!(json["data"]["reconnect"], false);
}

#[test]
fn keep_seat_and_pong_are_bare_types() {
    assert_eq!(
        serde_json::to_string(&ClientMessage::KeepSeat).unwrap(),
        r#"{"type":"keepSeat"}"#
    );
    assert_eq!(
        serde_json::to_string(&ClientMessage::Pong).unwrap(),
        r#"{"type":"pong"}"#
    );
}

// ---------------------------------------------------------------------------
// Signaling socket: server -> client
// ---------------------------------------------------------------------------

#[test]
fn ping_classifies() {
    let msg: ServerMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
    assert_eq!(msg, ServerMessage::Ping);
}

#[test]
fn message_server_carries_view_endpoint() {
    let msg: ServerMessage = serde_json::from_str(
        r#"{"type":"messageServer","data":{"viewUri":"https://mpn.live.nicovideo.jp/api/view/v4/abc?at=now","vposBaseTime":"2026-01-01T00:00:00+09:00"}}"#,
    )
    .unwrap();
    assert_eq!(
        msg.view_endpoint(),
        Some("https://mpn.live.nicovideo.jp/api/view/v4/abc?at=now")
    );
}

#[test]
fn room_message_server_also_counts() {
    let msg: ServerMessage = serde_json::from_str(
        r#"{"type":"room","data":{"name":"arena","messageServer":{"viewUri":"https://mpn.live.nicovideo.jp/api/view/v4/xyz"}}}"#,
    )
    .unwrap();
    assert_eq!(
        msg.view_endpoint(),
        Some("https://mpn.live.nicovideo.jp/api/view/v4/xyz")
    );
}

#[test]
fn non_view_urls_are_ignored() {
    let msg: ServerMessage = serde_json::from_str(
        r#"{"type":"messageServer","data":{"viewUri":"https://other.example/api/view"}}"#,
    )
    .unwrap();
    assert_eq!(msg.view_endpoint(), None);
}

#[test]
fn akashic_endpoint_is_not_followed() {
    let msg: ServerMessage = serde_json::from_str(
        r#"{"type":"akashicMessageServer","data":{"uri":"https://mpn.live.nicovideo.jp/api/view/v4/akashic"}}"#,
    )
    .unwrap();
    assert_eq!(msg.view_endpoint(), None);
}

#[test]
fn disconnect_reason() {
    let msg: ServerMessage =
        serde_json::from_str(r#"{"type":"disconnect","data":{"reason":"TAKEOVER"}}"#).unwrap();
    match msg {
        ServerMessage::Disconnect { data } => {
            assert_eq!(data.reason.as_deref(), Some("TAKEOVER"));
        }
        other => panic!("expected disconnect, got {other:?}"),
    }
}

#[test]
fn unknown_types_do_not_fail() {
    let msg: ServerMessage =
        serde_json::from_str(r#"{"type":"statistics","data":{"viewers":10}}"#).unwrap();
    assert_eq!(msg, ServerMessage::Unknown);
}

// ---------------------------------------------------------------------------
// Host event stream
// ---------------------------------------------------------------------------

#[test]
fn host_event_tagging() {
    let event = HostEvent::Status {
        global: "connected".to_owned(),
    };
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["kind"], "status");
    assert_eq!(json["global"], "connected");
}

#[test]
fn message_event_round_trip() {
    let mut badges = BTreeMap::new();
    badges.insert("subscriber".to_owned(), "12".to_owned());
    let mut emotes = BTreeMap::new();
    emotes.insert("25".to_owned(), vec![(0, 4)]);
    let event = HostEvent::Message(NormalizedMessage {
        connection_id: "twitch:chan".to_owned(),
        source: ConnectionKind::Twitch,
        user: "someone".to_owned(),
        text: "Kappa hi".to_owned(),
        badges,
        emotes: Some(emotes),
    });
    let json = serde_json::to_string(&event).unwrap();
    let back: HostEvent = serde_json::from_str(&json).unwrap();
    assert_eq!(back, event);
}

#[test]
fn connections_snapshot_serializes_status_as_string() {
    let event = HostEvent::Connections {
        connections: vec![ConnectionHandle::new(ConnectionKind::Niconico, "lv1")],
    };
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["connections"][0]["status"], "connecting");
    assert_eq!(json["connections"][0]["kind"], "niconico");
}
