//! Per-broadcast connection task.
//!
//! Owns the whole subtree for one broadcast: the signaling task, the view
//! walker, and every segment runner, all fanned off one child shutdown
//! watch. State machine:
//!
//! `FetchingHtml -> SignalingOpening -> SignalingOpen -> ViewPolling ->
//! SegmentRunning (>= 0 concurrent) -> cancelled | disconnected | failed`
//!
//! Any state can fail directly; failures never escape this task. The
//! outcome is reported to the supervisor, which owns the handle.

use std::collections::HashMap;

use agg_protocol::ConnectionStatus;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::events::EventSender;
use crate::input::BroadcastId;
use crate::niconico::signaling::{SignalingParams, run_signaling};
use crate::niconico::view::{WalkerParams, run_walker};
use crate::niconico::{ConnEvent, http_client, page, segment};
use crate::supervisor::{Command, ConnectionOutcome};

pub struct ConnectionParams {
    pub connection_id: String,
    pub broadcast_id: BroadcastId,
    /// Watch-page base URL without trailing slash
    /// (`https://live.nicovideo.jp/watch` in production).
    pub watch_page_base: String,
    pub events: EventSender,
    pub control: mpsc::UnboundedSender<Command>,
    pub shutdown: watch::Receiver<bool>,
}

/// Run one broadcast connection to completion.
pub async fn run(params: ConnectionParams) -> ConnectionOutcome {
    let ConnectionParams {
        connection_id,
        broadcast_id,
        watch_page_base,
        events,
        control,
        mut shutdown,
    } = params;

    let client = match http_client() {
        Ok(client) => client,
        Err(e) => {
            return ConnectionOutcome::Failed {
                reason: format!("http client: {e}"),
            };
        }
    };

    // FetchingHtml
    events.status(format!("{connection_id}: fetching watch page"));
    let discovered = tokio::select! {
        biased;
        _ = shutdown.changed() => return ConnectionOutcome::Cancelled,
        discovered = page::discover_signaling_url(&client, &watch_page_base, &broadcast_id) => discovered,
    };
    let signaling_url = match discovered {
        Ok(url) => url,
        Err(e) => {
            return ConnectionOutcome::Failed {
                reason: e.to_string(),
            };
        }
    };
    debug!(connection = %connection_id, url = %signaling_url, "signaling endpoint discovered");

    // SignalingOpening
    let (conn_tx, mut conn_rx) = mpsc::unbounded_channel();
    let (child_shutdown_tx, child_shutdown) = watch::channel(false);

    let signaling_task = tokio::spawn(run_signaling(SignalingParams {
        url: signaling_url,
        connection_id: connection_id.clone(),
        events: events.clone(),
        conn_tx: conn_tx.clone(),
        shutdown: child_shutdown.clone(),
    }));

    let mut walker_task: Option<JoinHandle<()>> = None;
    let mut runners = RunnerSet::default();

    let outcome = loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break ConnectionOutcome::Cancelled;
                }
            }
            event = conn_rx.recv() => match event {
                None => break ConnectionOutcome::Closed,
                Some(ConnEvent::ViewEndpoint(view_uri)) => {
                    if walker_task.is_none() {
                        // ViewPolling
                        info!(connection = %connection_id, uri = %view_uri, "view endpoint");
                        events.status(format!("{connection_id}: view polling"));
                        let _ = control.send(Command::StatusChanged {
                            id: connection_id.clone(),
                            status: ConnectionStatus::Open,
                        });
                        let walker_tx = conn_tx.clone();
                        let walker_params = WalkerParams {
                            client: client.clone(),
                            view_uri,
                            connection_id: connection_id.clone(),
                            conn_tx: conn_tx.clone(),
                            shutdown: child_shutdown.clone(),
                        };
                        walker_task = Some(tokio::spawn(async move {
                            let result = run_walker(walker_params).await;
                            let _ = walker_tx.send(ConnEvent::WalkerEnded(result));
                        }));
                    }
                }
                Some(ConnEvent::StartSegment { uri, cursor, at }) => {
                    match segment::build_segment_url(&uri, cursor.as_ref(), at) {
                        Err(e) => warn!(connection = %connection_id, error = %e, "segment URL"),
                        Ok(full_url) => {
                            if runners.is_active(&full_url) {
                                debug!(connection = %connection_id, url = %full_url,
                                    "duplicate segment runner suppressed");
                            } else {
                                // SegmentRunning
                                debug!(connection = %connection_id, url = %full_url, "segment runner");
                                let handle = tokio::spawn(segment::run_runner(
                                    segment::RunnerParams {
                                        client: client.clone(),
                                        url: full_url.clone(),
                                        connection_id: connection_id.clone(),
                                        events: events.clone(),
                                        conn_tx: conn_tx.clone(),
                                        shutdown: child_shutdown.clone(),
                                    },
                                ));
                                runners.claim(full_url, handle);
                            }
                        }
                    }
                }
                Some(ConnEvent::SegmentEnded { key }) => {
                    runners.release(&key);
                }
                Some(ConnEvent::SignalingDisconnected { reason }) => {
                    break ConnectionOutcome::Disconnected { reason };
                }
                Some(ConnEvent::WalkerEnded(Ok(()))) => {
                    // Walker only returns Ok on cancellation.
                    debug!(connection = %connection_id, "walker stopped");
                }
                Some(ConnEvent::WalkerEnded(Err(e))) => {
                    break ConnectionOutcome::Failed { reason: e.to_string() };
                }
            }
        }
    };

    // Cancel children: signaling socket, then walker, then segment runners.
    let _ = child_shutdown_tx.send(true);
    let _ = signaling_task.await;
    if let Some(walker) = walker_task {
        let _ = walker.await;
    }
    for handle in runners.drain() {
        let _ = handle.await;
    }

    outcome
}

// ---------------------------------------------------------------------------
// RunnerSet
// ---------------------------------------------------------------------------

/// Active segment runners keyed by the exact fully-qualified URL they are
/// addressing. A claim for a key already present is refused, which is what
/// makes runner starts idempotent.
#[derive(Default)]
struct RunnerSet {
    active: HashMap<String, JoinHandle<()>>,
}

impl RunnerSet {
    fn is_active(&self, key: &str) -> bool {
        self.active.contains_key(key)
    }

    fn claim(&mut self, key: String, handle: JoinHandle<()>) -> bool {
        if self.active.contains_key(&key) {
            return false;
        }
        self.active.insert(key, handle);
        true
    }

    fn release(&mut self, key: &str) -> Option<JoinHandle<()>> {
        self.active.remove(key)
    }

    fn drain(&mut self) -> Vec<JoinHandle<()>> {
        self.active.drain().map(|(_, handle)| handle).collect()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
