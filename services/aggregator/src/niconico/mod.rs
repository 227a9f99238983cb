//! Niconico (NDGR) ingestion pipeline.
//!
//! Data flow: watch page HTML -> signaling URL -> signaling session -> view
//! endpoint -> view walker -> segment endpoints -> segment runners ->
//! normalized chat events. The per-broadcast [`connection`] task owns every
//! child task and the segment dedup map; the supervisor owns the connection.

use ndgr_core::{Cursor, OpaqueCursor};

pub mod connection;
pub mod page;
pub mod segment;
pub mod signaling;
pub mod view;

pub const USER_AGENT: &str = "komebyu/1.0 (+https://github.com/)";
pub const ORIGIN: &str = "https://live.nicovideo.jp";
pub const REFERER: &str = "https://live.nicovideo.jp/";

/// Events flowing from child tasks up to their connection task.
#[derive(Debug)]
pub enum ConnEvent {
    /// The signaling session discovered the NDGR view endpoint.
    ViewEndpoint(String),
    /// A segment stream should be opened (from the walker or from a
    /// server-issued reconnect directive inside a running segment).
    StartSegment {
        uri: String,
        cursor: Option<OpaqueCursor>,
        at: Option<Cursor>,
    },
    /// The signaling endpoint told us to go away; terminal for the
    /// connection.
    SignalingDisconnected { reason: Option<String> },
    /// The walker finished: `Ok` only on cancellation, otherwise the fatal
    /// error that ends the connection.
    WalkerEnded(Result<(), view::WalkerError>),
    /// A segment runner fully stopped; its URL key can be reused.
    SegmentEnded { key: String },
}

/// Shared HTTP client with the service User-Agent.
pub fn http_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder().user_agent(USER_AGENT).build()
}

/// GET builder with the headers the NDGR endpoints expect.
pub fn ndgr_get(client: &reqwest::Client, url: &str) -> reqwest::RequestBuilder {
    client
        .get(url)
        .header(reqwest::header::ACCEPT, "application/octet-stream")
        .header(reqwest::header::ORIGIN, ORIGIN)
        .header(reqwest::header::REFERER, REFERER)
}
