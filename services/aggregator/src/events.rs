//! Host event bus.
//!
//! One unbounded channel carries every [`HostEvent`] to the host in emit
//! order. Senders are cloned into every task; a closed channel (host gone)
//! is not an error, since the owning loops end via their shutdown watch.

use agg_protocol::{ConnectionHandle, HostEvent, NormalizedMessage};
use tokio::sync::mpsc;

/// Cloneable sending half of the host event stream.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<HostEvent>,
}

impl EventSender {
    /// Create the bus; the receiver is handed to the host loop.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<HostEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventSender { tx }, rx)
    }

    /// Emit a transient human-readable status line.
    pub fn status(&self, global: impl Into<String>) {
        let _ = self.tx.send(HostEvent::Status {
            global: global.into(),
        });
    }

    /// Emit one normalized chat message.
    pub fn message(&self, message: NormalizedMessage) {
        let _ = self.tx.send(HostEvent::Message(message));
    }

    /// Emit a snapshot of the live handles.
    pub fn connections(&self, connections: Vec<ConnectionHandle>) {
        let _ = self.tx.send(HostEvent::Connections { connections });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agg_protocol::ConnectionKind;

    #[tokio::test]
    async fn events_arrive_in_emit_order() {
        let (events, mut rx) = EventSender::channel();
        events.status("one");
        events.connections(vec![ConnectionHandle::new(ConnectionKind::Niconico, "lv1")]);
        events.status("two");

        assert!(matches!(
            rx.recv().await,
            Some(HostEvent::Status { global }) if global == "one"
        ));
        assert!(matches!(
            rx.recv().await,
            Some(HostEvent::Connections { connections }) if connections.len() == 1
        ));
        assert!(matches!(
            rx.recv().await,
            Some(HostEvent::Status { global }) if global == "two"
        ));
    }

    #[test]
    fn send_after_host_drop_is_ignored() {
        let (events, rx) = EventSender::channel();
        drop(rx);
        events.status("nobody listening");
    }
}
