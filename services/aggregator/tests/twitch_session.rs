// Twitch adapter tests against a local mock IRC-over-WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use agg_protocol::{ConnectionKind, HostEvent};
use aggregator::events::EventSender;
use aggregator::supervisor::{Command, ConnectionOutcome};
use aggregator::twitch::{TwitchParams, run as run_twitch};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::Message;

/// Minimal scripted chat server: waits for JOIN, accepts the login, then
/// replays the given lines. Every client line is recorded.
async fn mock_chat_server(
    lines_after_join: Vec<String>,
) -> (SocketAddr, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let received: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let server_received = received.clone();
    tokio::spawn(async move {
        while let Ok((stream, _peer)) = listener.accept().await {
            let lines = lines_after_join.clone();
            let received = server_received.clone();
            tokio::spawn(async move {
                let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                while let Some(Ok(msg)) = ws.next().await {
                    let text = match msg {
                        Message::Text(t) => t,
                        Message::Close(_) => break,
                        _ => continue,
                    };
                    let mut joined = false;
                    for line in text.lines() {
                        received.lock().await.push(line.to_owned());
                        if line.starts_with("JOIN ") {
                            joined = true;
                        }
                    }
                    if joined {
                        let welcome = ":tmi.twitch.tv 001 justinfan1 :Welcome, GLHF!\r\n";
                        ws.send(Message::Text(welcome.into())).await.unwrap();
                        for line in &lines {
                            ws.send(Message::Text(format!("{line}\r\n").into()))
                                .await
                                .unwrap();
                        }
                    }
                }
            });
        }
    });

    (addr, received)
}

struct Session {
    host_rx: mpsc::UnboundedReceiver<HostEvent>,
    shutdown_tx: watch::Sender<bool>,
    task: tokio::task::JoinHandle<ConnectionOutcome>,
}

fn start_session(addr: SocketAddr, channel: &str) -> Session {
    let (events, host_rx) = EventSender::channel();
    let (control_tx, _control_rx) = mpsc::unbounded_channel::<Command>();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(run_twitch(TwitchParams {
        ws_url: format!("ws://{addr}"),
        channel: channel.to_owned(),
        connection_id: format!("twitch:{channel}"),
        events,
        control: control_tx,
        shutdown: shutdown_rx,
    }));
    Session {
        host_rx,
        shutdown_tx,
        task,
    }
}

#[tokio::test]
async fn login_join_and_privmsg() {
    let privmsg = "@badges=subscriber/12;display-name=Alice;emotes=25:0-4 :alice!alice@alice.tmi.twitch.tv PRIVMSG #somechan :Kappa hi";
    let (addr, received) = mock_chat_server(vec![privmsg.to_owned()]).await;
    let mut session = start_session(addr, "somechan");

    let message = timeout(Duration::from_secs(5), async {
        loop {
            match session.host_rx.recv().await.expect("event stream open") {
                HostEvent::Message(m) => return m,
                _ => {}
            }
        }
    })
    .await
    .expect("chat message within 5s");

    assert_eq!(message.connection_id, "twitch:somechan");
    assert_eq!(message.source, ConnectionKind::Twitch);
    assert_eq!(message.user, "Alice");
    assert_eq!(message.text, "Kappa hi");
    assert_eq!(message.badges["subscriber"], "12");
    assert_eq!(message.emotes.as_ref().unwrap()["25"], vec![(0, 4)]);

    // Anonymous login sequence: capabilities, justinfan nick, channel join.
    let lines = received.lock().await.clone();
    assert!(lines.iter().any(|l| l.starts_with("CAP REQ :twitch.tv/tags")));
    assert!(lines.iter().any(|l| l.starts_with("NICK justinfan")));
    assert!(lines.contains(&"JOIN #somechan".to_owned()));

    session.shutdown_tx.send(true).unwrap();
    let outcome = timeout(Duration::from_secs(5), session.task)
        .await
        .expect("session ends on shutdown")
        .unwrap();
    assert!(matches!(outcome, ConnectionOutcome::Cancelled));
}

#[tokio::test]
async fn server_ping_is_answered() {
    let (addr, received) = mock_chat_server(vec!["PING :tmi.twitch.tv".to_owned()]).await;
    let session = start_session(addr, "somechan");

    timeout(Duration::from_secs(5), async {
        loop {
            if received
                .lock()
                .await
                .iter()
                .any(|l| l.starts_with("PONG :tmi.twitch.tv"))
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("PONG within 5s");

    session.shutdown_tx.send(true).unwrap();
    let _ = timeout(Duration::from_secs(5), session.task).await;
}

#[tokio::test]
async fn reconnect_command_reconnects_the_session() {
    let (addr, received) = mock_chat_server(vec![":tmi.twitch.tv RECONNECT".to_owned()]).await;
    let session = start_session(addr, "somechan");

    // After RECONNECT the client comes back: two JOINs observed in total
    // (initial join + post-reconnect join, 1 s backoff in between).
    timeout(Duration::from_secs(10), async {
        loop {
            let joins = received
                .lock()
                .await
                .iter()
                .filter(|l| l.as_str() == "JOIN #somechan")
                .count();
            if joins >= 2 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("rejoin within 10s");

    session.shutdown_tx.send(true).unwrap();
    let _ = timeout(Duration::from_secs(10), session.task).await;
}
