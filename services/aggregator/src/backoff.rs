//! Reconnect delay policies.
//!
//! Every long-lived loop in the service recovers from transient failure by
//! sleeping a doubling delay: signaling and view reconnects cap at 16 s,
//! segment restarts at 30 s, and the view endpoint's 422 "rebuild your
//! cursor" answer gets its own short 500 ms -> 2 s ladder.

use std::time::Duration;

use tokio::sync::watch;

/// A doubling delay with a cap.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    next: Duration,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Backoff {
            base,
            cap,
            next: base,
        }
    }

    /// Signaling socket reconnects: 1 s -> 16 s.
    pub fn signaling() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(16))
    }

    /// View walker idle re-polls: 1 s -> 16 s.
    pub fn view() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(16))
    }

    /// View endpoint 422 recovery: 500 ms -> 2 s.
    pub fn unprocessable() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(2))
    }

    /// Segment stream restarts: 1 s -> 30 s.
    pub fn segment() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }

    /// The delay to sleep now; the next call returns double, up to the cap.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (delay * 2).min(self.cap);
        delay
    }

    /// Back to the base delay (after a healthy cycle).
    pub fn reset(&mut self) {
        self.next = self.base;
    }
}

/// Sleep `delay`, waking early on shutdown. Returns `true` when shut down.
pub async fn sleep_unless_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        biased;
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
        () = tokio::time::sleep(delay) => false,
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_to_cap() {
        let mut b = Backoff::new(Duration::from_secs(1), Duration::from_secs(16));
        let delays: Vec<u64> = (0..6).map(|_| b.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 16]);
    }

    #[test]
    fn reset_returns_to_base() {
        let mut b = Backoff::segment();
        let _ = b.next_delay();
        let _ = b.next_delay();
        b.reset();
        assert_eq!(b.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn unprocessable_ladder() {
        let mut b = Backoff::unprocessable();
        assert_eq!(b.next_delay(), Duration::from_millis(500));
        assert_eq!(b.next_delay(), Duration::from_millis(1000));
        assert_eq!(b.next_delay(), Duration::from_millis(2000));
        assert_eq!(b.next_delay(), Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_completes_without_shutdown() {
        let (_tx, mut rx) = watch::channel(false);
        assert!(!sleep_unless_shutdown(Duration::from_secs(5), &mut rx).await);
    }

    #[tokio::test]
    async fn sleep_wakes_on_shutdown() {
        let (tx, mut rx) = watch::channel(false);
        let waker = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = tx.send(true);
        });
        assert!(sleep_unless_shutdown(Duration::from_secs(60), &mut rx).await);
        waker.await.unwrap();
    }

    #[tokio::test]
    async fn sleep_returns_immediately_when_already_shut_down() {
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();
        assert!(sleep_unless_shutdown(Duration::from_secs(60), &mut rx).await);
    }
}
