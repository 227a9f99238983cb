//! View walker.
//!
//! Walks the open-ended sequence of view entries by long-polling the view
//! endpoint with an `at` cursor. Each completed poll either advances the
//! cursor (`next`/`reconnect` entries, aborting the in-flight body) or
//! sleeps a reconnect backoff. Segment entries fan out to segment runners
//! via the connection task, which owns the dedup map.
//!
//! HTTP 422 means "rebuild your cursor": reset to `now` and retry on a
//! short local backoff. 410/404 are fatal for the connection; any other
//! non-2xx is transient server trouble and retries silently on the same
//! 1 s -> 16 s ladder as connect failures, keeping the cursor.

use ndgr_core::{Cursor, FrameAssembler, ViewEntry, decode_view_payload};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::backoff::{Backoff, sleep_unless_shutdown};
use crate::niconico::{ConnEvent, ndgr_get};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Fatal walker failures; anything transient is retried internally.
#[derive(Debug, thiserror::Error)]
pub enum WalkerError {
    #[error("view endpoint gone (HTTP {0})")]
    Gone(u16),
    #[error("invalid view URL: {0}")]
    Url(#[from] url::ParseError),
}

// ---------------------------------------------------------------------------
// Walker
// ---------------------------------------------------------------------------

pub struct WalkerParams {
    pub client: reqwest::Client,
    pub view_uri: String,
    pub connection_id: String,
    pub conn_tx: mpsc::UnboundedSender<ConnEvent>,
    pub shutdown: watch::Receiver<bool>,
}

/// A cursor advance extracted from a poll; aborts the in-flight body.
struct Advance {
    at: Cursor,
    view_uri: Option<String>,
}

/// Run the walk until cancelled (`Ok`) or fatally failed (`Err`).
pub async fn run_walker(params: WalkerParams) -> Result<(), WalkerError> {
    let WalkerParams {
        client,
        mut view_uri,
        connection_id,
        conn_tx,
        mut shutdown,
    } = params;

    let mut cursor = Cursor::Now;
    let mut idle_backoff = Backoff::view();
    let mut rebuild_backoff = Backoff::unprocessable();
    let mut transient_backoff = Backoff::view();

    loop {
        if *shutdown.borrow() {
            return Ok(());
        }

        let url = with_query_param(&view_uri, "at", &cursor.to_string())?;
        debug!(connection = %connection_id, %url, "view poll");

        let sent = tokio::select! {
            biased;
            _ = shutdown.changed() => return Ok(()),
            sent = ndgr_get(&client, &url).send() => sent,
        };
        let mut response = match sent {
            Ok(response) => response,
            Err(e) => {
                warn!(connection = %connection_id, error = %e, "view poll failed");
                if sleep_unless_shutdown(transient_backoff.next_delay(), &mut shutdown).await {
                    return Ok(());
                }
                continue;
            }
        };

        let status = response.status().as_u16();
        match status {
            422 => {
                // The server wants the cursor rebuilt from scratch.
                debug!(connection = %connection_id, "view endpoint answered 422, resetting cursor");
                cursor = Cursor::Now;
                if sleep_unless_shutdown(rebuild_backoff.next_delay(), &mut shutdown).await {
                    return Ok(());
                }
                continue;
            }
            404 | 410 => return Err(WalkerError::Gone(status)),
            s if !response.status().is_success() => {
                // Transient server trouble; keep the cursor and retry.
                warn!(connection = %connection_id, status = s, "view endpoint status");
                if sleep_unless_shutdown(transient_backoff.next_delay(), &mut shutdown).await {
                    return Ok(());
                }
                continue;
            }
            _ => {}
        }
        transient_backoff.reset();
        rebuild_backoff.reset();

        let mut assembler = FrameAssembler::default();
        let mut advance: Option<Advance> = None;
        'body: loop {
            let chunk = tokio::select! {
                biased;
                _ = shutdown.changed() => return Ok(()),
                chunk = response.chunk() => chunk,
            };
            let chunk = match chunk {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break 'body,
                Err(e) => {
                    debug!(connection = %connection_id, error = %e, "view body ended");
                    break 'body;
                }
            };
            let frames = match assembler.feed(&chunk) {
                Ok(frames) => frames,
                Err(e) => {
                    warn!(connection = %connection_id, error = %e, "view frame assembly");
                    continue;
                }
            };
            for frame in frames {
                let entries = match decode_view_payload(&frame) {
                    Ok(entries) => entries,
                    Err(e) => {
                        warn!(connection = %connection_id, error = %e, "dropping view frame");
                        continue;
                    }
                };
                for entry in entries {
                    if let Some(found) = handle_entry(entry, &conn_tx) {
                        advance = Some(found);
                        break 'body;
                    }
                }
            }
        }

        match advance {
            Some(Advance { at, view_uri: next }) => {
                cursor = at;
                if let Some(next) = next {
                    view_uri = next;
                }
                idle_backoff.reset();
            }
            None => {
                // Quiet poll with an unchanged cursor.
                if sleep_unless_shutdown(idle_backoff.next_delay(), &mut shutdown).await {
                    return Ok(());
                }
            }
        }
    }
}

/// Apply the first applicable action for one entry. Returns a cursor
/// advance when the current poll must be aborted.
fn handle_entry(entry: ViewEntry, conn_tx: &mpsc::UnboundedSender<ConnEvent>) -> Option<Advance> {
    match entry {
        ViewEntry::Segment { uri, .. } => {
            let _ = conn_tx.send(ConnEvent::StartSegment {
                uri,
                cursor: None,
                at: Some(Cursor::Now),
            });
            None
        }
        ViewEntry::Reconnect { at: Some(at), .. } => Some(Advance {
            at: Cursor::from_at(at),
            view_uri: None,
        }),
        ViewEntry::Next { at: Some(at), uri, .. } => Some(Advance {
            at: Cursor::from_at(at),
            view_uri: uri,
        }),
        ViewEntry::Reconnect {
            at: None,
            stream_uri: Some(uri),
            cursor,
        } => {
            let _ = conn_tx.send(ConnEvent::StartSegment {
                uri,
                cursor,
                at: None,
            });
            None
        }
        // Previous entries are historical backfill; the forward-only walk
        // never acts on them. Ping/History are informational.
        _ => None,
    }
}

/// Set (or overwrite) one query parameter on an absolute URL.
pub fn with_query_param(url: &str, key: &str, value: &str) -> Result<String, url::ParseError> {
    let mut parsed = url::Url::parse(url)?;
    let retained: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| k != key)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    {
        let mut pairs = parsed.query_pairs_mut();
        pairs.clear();
        for (k, v) in &retained {
            pairs.append_pair(k, v);
        }
        pairs.append_pair(key, value);
    }
    Ok(parsed.into())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
