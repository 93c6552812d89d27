use std::sync::Arc;
use std::time::Duration;

use protocol::NormalizedEvent;
use tokio::sync::{mpsc, RwLock};

const SUBSCRIBER_BUFFER: usize = 50;
const PUT_TIMEOUT: Duration = Duration::from_secs(1);

/// Fans every event out to however many subscribers are currently attached
/// (§4.E). Two independent lists exist only because SSE and WS clients are
/// added/removed through different transport handlers; delivery is
/// identical for both. A subscriber whose buffer is full for longer than
/// `PUT_TIMEOUT` is skipped for that one event rather than blocking the
/// whole broadcast loop.
pub struct Broadcaster {
    sse_subscribers: Arc<RwLock<Vec<mpsc::Sender<NormalizedEvent>>>>,
    ws_subscribers: Arc<RwLock<Vec<mpsc::Sender<NormalizedEvent>>>>,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self { sse_subscribers: Arc::new(RwLock::new(Vec::new())), ws_subscribers: Arc::new(RwLock::new(Vec::new())) }
    }
}

impl Broadcaster {
    pub async fn add_sse_subscriber(&self) -> mpsc::Receiver<NormalizedEvent> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.sse_subscribers.write().await.push(tx);
        rx
    }

    pub async fn add_ws_subscriber(&self) -> mpsc::Receiver<NormalizedEvent> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.ws_subscribers.write().await.push(tx);
        rx
    }

    pub async fn sse_count(&self) -> usize {
        self.sse_subscribers.read().await.len()
    }

    pub async fn ws_count(&self) -> usize {
        self.ws_subscribers.read().await.len()
    }

    /// Consumes `event_rx` until cancelled or the channel closes, offering
    /// each event to every subscriber with a timed, non-blocking put. Dead
    /// senders (receiver dropped) are pruned opportunistically.
    pub async fn run(self: Arc<Self>, mut event_rx: mpsc::Receiver<NormalizedEvent>, cancel: tokio_util::sync::CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                maybe_event = event_rx.recv() => {
                    match maybe_event {
                        Some(event) => self.dispatch(event).await,
                        None => break,
                    }
                }
            }
        }
    }

    async fn dispatch(&self, event: NormalizedEvent) {
        Self::dispatch_to(&self.sse_subscribers, &event).await;
        Self::dispatch_to(&self.ws_subscribers, &event).await;
    }

    async fn dispatch_to(list: &Arc<RwLock<Vec<mpsc::Sender<NormalizedEvent>>>>, event: &NormalizedEvent) {
        let subscribers = list.read().await.clone();
        let mut dead = Vec::new();
        for (index, sender) in subscribers.iter().enumerate() {
            match tokio::time::timeout(PUT_TIMEOUT, sender.send(event.clone())).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => dead.push(index),
                Err(_) => {} // timed out; subscriber skipped for this event, stays attached
            }
        }
        if !dead.is_empty() {
            let mut guard = list.write().await;
            for &index in dead.iter().rev() {
                if index < guard.len() {
                    guard.remove(index);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::NormalizedEvent;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn delivers_to_all_subscribers() {
        let broadcaster = Arc::new(Broadcaster::default());
        let mut sse_rx = broadcaster.add_sse_subscriber().await;
        let mut ws_rx = broadcaster.add_ws_subscriber().await;

        let (tx, rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(broadcaster.clone().run(rx, cancel.clone()));

        tx.send(NormalizedEvent::Disconnect).await.unwrap();
        assert!(matches!(sse_rx.recv().await, Some(NormalizedEvent::Disconnect)));
        assert!(matches!(ws_rx.recv().await, Some(NormalizedEvent::Disconnect)));

        cancel.cancel();
        drop(tx);
        let _ = handle.await;
    }

    #[tokio::test]
    async fn slow_subscriber_is_skipped_but_not_removed_by_the_broadcaster() {
        // §4.E / §7 ConsumerSlow: a full buffer times out and is skipped for
        // that event, but removal on repeated failure is the transport
        // layer's job, not the broadcaster's — it stays attached here.
        let broadcaster = Broadcaster::default();
        let rx = broadcaster.add_sse_subscriber().await;

        for _ in 0..SUBSCRIBER_BUFFER {
            broadcaster.dispatch(NormalizedEvent::Disconnect).await;
        }
        assert_eq!(broadcaster.sse_count().await, 1);

        // One more dispatch times out against the full buffer; the
        // subscriber is skipped for this event but not pruned.
        broadcaster.dispatch(NormalizedEvent::Disconnect).await;
        assert_eq!(broadcaster.sse_count().await, 1);

        drop(rx);
    }

    #[tokio::test]
    async fn subscriber_is_pruned_once_its_receiver_drops() {
        let broadcaster = Broadcaster::default();
        let rx = broadcaster.add_sse_subscriber().await;
        assert_eq!(broadcaster.sse_count().await, 1);

        drop(rx);
        broadcaster.dispatch(NormalizedEvent::Disconnect).await;
        assert_eq!(broadcaster.sse_count().await, 0);
    }
}
