// mock_signaling_server: A scripted signaling endpoint for session tests.
//
// Accepts one WebSocket connection at a time, waits for the client's
// startWatching, then plays a configured script: optionally a ping (the
// client must pong), then the messageServer announcement, then optionally a
// disconnect. Every client message is recorded for assertions.

use std::net::SocketAddr;
use std::sync::Arc;

use agg_protocol::signaling::{
    ClientMessage, DisconnectData, MessageServerData, ServerMessage,
};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::protocol::Message;

/// What the mock does after the client's `startWatching` arrives.
#[derive(Debug, Clone, Default)]
pub struct SignalingScript {
    /// Send `{type:"ping"}` before announcing the view endpoint.
    pub ping_first: bool,
    /// `messageServer` view URI to announce (announced once per connection).
    pub view_uri: Option<String>,
    /// Announce the same view URI a second time (clients must suppress the
    /// repeat).
    pub announce_twice: bool,
    /// Send `{type:"disconnect"}` with this reason after the announcement.
    pub disconnect_reason: Option<String>,
}

/// A mock signaling WebSocket server.
///
/// Binds to port 0 (random) and exposes the bound address; each test spins
/// up its own isolated instance.
pub struct MockSignalingServer {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<ClientMessage>>>,
    /// Handle to the background accept loop; dropped with the server.
    _task: tokio::task::JoinHandle<()>,
}

impl MockSignalingServer {
    pub async fn start(script: SignalingScript) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let received: Arc<Mutex<Vec<ClientMessage>>> = Arc::new(Mutex::new(Vec::new()));

        let task = {
            let received = received.clone();
            tokio::spawn(async move {
                loop {
                    match listener.accept().await {
                        Ok((stream, _peer)) => {
                            let script = script.clone();
                            let received = received.clone();
                            tokio::spawn(async move {
                                let _ = handle_connection(stream, script, received).await;
                            });
                        }
                        Err(_) => break,
                    }
                }
            })
        };

        Ok(Self {
            addr,
            received,
            _task: task,
        })
    }

    /// `ws://` URL of the mock endpoint.
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Every client JSON message received so far, in arrival order.
    pub async fn received(&self) -> Vec<ClientMessage> {
        self.received.lock().await.clone()
    }

    /// Wait until at least `n` client messages have arrived.
    pub async fn wait_for_messages(&self, n: usize) -> Vec<ClientMessage> {
        loop {
            let msgs = self.received().await;
            if msgs.len() >= n {
                return msgs;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }
}

async fn handle_connection(
    stream: tokio::net::TcpStream,
    script: SignalingScript,
    received: Arc<Mutex<Vec<ClientMessage>>>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut ws = tokio_tungstenite::accept_async(stream).await?;
    let mut announced = false;

    while let Some(msg) = ws.next().await {
        let msg = msg?;
        let text = match msg {
            Message::Text(t) => t,
            Message::Close(_) => break,
            Message::Ping(data) => {
                ws.send(Message::Pong(data)).await?;
                continue;
            }
            _ => continue,
        };

        let client_msg: ClientMessage = serde_json::from_str(&text)?;
        let is_start = matches!(client_msg, ClientMessage::StartWatching { .. });
        received.lock().await.push(client_msg);

        if is_start && !announced {
            announced = true;
            if script.ping_first {
                send(&mut ws, &ServerMessage::Ping).await?;
            }
            if let Some(view_uri) = &script.view_uri {
                let announce = ServerMessage::MessageServer {
                    data: MessageServerData {
                        view_uri: Some(view_uri.clone()),
                        vpos_base_time: None,
                    },
                };
                send(&mut ws, &announce).await?;
                if script.announce_twice {
                    send(&mut ws, &announce).await?;
                }
            }
            if let Some(reason) = &script.disconnect_reason {
                send(
                    &mut ws,
                    &ServerMessage::Disconnect {
                        data: DisconnectData {
                            reason: Some(reason.clone()),
                        },
                    },
                )
                .await?;
            }
        }
    }

    Ok(())
}

async fn send<S>(ws: &mut S, msg: &ServerMessage) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    S: SinkExt<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let json = serde_json::to_string(msg)?;
    ws.send(Message::Text(json.into())).await?;
    Ok(())
}
