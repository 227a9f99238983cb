// mock_ndgr_server: Scripted view/segment HTTP endpoints.
//
// Each path carries a queue of canned responses; a request pops the next
// one (an empty queue yields an empty 200 body, which long-poll consumers
// treat as a quiet poll). Requests are recorded with their query strings so
// tests can assert on cursors.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::IntoResponse;
use tokio::net::TcpListener;
use tokio::sync::Mutex;

/// One canned HTTP response.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl MockResponse {
    /// 200 with the given body (typically concatenated length-prefixed
    /// frames from [`crate::wire`]).
    pub fn ok(body: Vec<u8>) -> Self {
        MockResponse { status: 200, body }
    }

    /// A bare status with no body (422, 404, ...).
    pub fn status(status: u16) -> Self {
        MockResponse {
            status,
            body: Vec::new(),
        }
    }
}

#[derive(Default)]
struct ServerState {
    responses: HashMap<String, VecDeque<MockResponse>>,
    requests: Vec<String>,
}

/// A mock NDGR HTTP server bound to a random localhost port.
pub struct MockNdgrServer {
    addr: SocketAddr,
    state: Arc<Mutex<ServerState>>,
    _task: tokio::task::JoinHandle<()>,
}

impl MockNdgrServer {
    pub async fn start() -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(Mutex::new(ServerState::default()));

        let router = Router::new()
            .fallback(handle_request)
            .with_state(state.clone());
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Ok(Self {
            addr,
            state,
            _task: task,
        })
    }

    /// Absolute URL for a path on this server.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Queue the next response for `path` (path only, no query).
    pub async fn enqueue(&self, path: &str, response: MockResponse) {
        self.state
            .lock()
            .await
            .responses
            .entry(path.to_owned())
            .or_default()
            .push_back(response);
    }

    /// All requests received so far, as `path?query` strings in order.
    pub async fn requests(&self) -> Vec<String> {
        self.state.lock().await.requests.clone()
    }

    /// Wait until at least `n` requests have arrived.
    pub async fn wait_for_requests(&self, n: usize) -> Vec<String> {
        loop {
            let reqs = self.requests().await;
            if reqs.len() >= n {
                return reqs;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }
}

async fn handle_request(
    State(state): State<Arc<Mutex<ServerState>>>,
    uri: Uri,
) -> impl IntoResponse {
    let path = uri.path().to_owned();
    let recorded = uri
        .path_and_query()
        .map_or_else(|| path.clone(), |pq| pq.as_str().to_owned());

    let mut state = state.lock().await;
    state.requests.push(recorded);
    let response = state
        .responses
        .get_mut(&path)
        .and_then(VecDeque::pop_front)
        .unwrap_or_else(|| MockResponse::ok(Vec::new()));

    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::OK);
    (status, response.body)
}
