//! Session Broadcast Group
//!
//! Fan-out of server messages to every connection bound to one session.
//! Delivery is best-effort: a full or closed outbound queue drops the message
//! for that connection only, and sending never waits.

use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

use crate::network::protocol::ServerMessage;

/// Per-process connection identifier.
pub type ConnectionId = u64;

/// Connections subscribed to one session.
#[derive(Debug, Default)]
pub struct Broadcaster {
    subscribers: BTreeMap<ConnectionId, mpsc::Sender<ServerMessage>>,
}

impl Broadcaster {
    /// Create an empty group.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection's outbound queue.
    pub fn subscribe(&mut self, id: ConnectionId, sender: mpsc::Sender<ServerMessage>) {
        self.subscribers.insert(id, sender);
    }

    /// Remove a connection. Returns whether it was subscribed.
    pub fn unsubscribe(&mut self, id: ConnectionId) -> bool {
        self.subscribers.remove(&id).is_some()
    }

    /// Number of subscribed connections.
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    /// No subscribers?
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Send to every subscriber. Returns how many queues accepted it.
    pub fn send(&self, message: &ServerMessage) -> usize {
        let mut delivered = 0;
        for (id, sender) in &self.subscribers {
            match sender.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    debug!("Outbound queue full for connection {}, dropping {:?}", id, message.kind());
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Connection {} already closed", id);
                }
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notice(text: &str) -> ServerMessage {
        ServerMessage::GameStart { message: text.to_string() }
    }

    #[tokio::test]
    async fn test_send_reaches_all_subscribers() {
        let mut group = Broadcaster::new();
        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, mut rx2) = mpsc::channel(4);
        group.subscribe(1, tx1);
        group.subscribe(2, tx2);

        assert_eq!(group.send(&notice("go")), 2);
        assert_eq!(rx1.recv().await.unwrap(), notice("go"));
        assert_eq!(rx2.recv().await.unwrap(), notice("go"));
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let mut group = Broadcaster::new();
        let (slow_tx, mut slow_rx) = mpsc::channel(1);
        let (fast_tx, mut fast_rx) = mpsc::channel(4);
        group.subscribe(1, slow_tx);
        group.subscribe(2, fast_tx);

        assert_eq!(group.send(&notice("a")), 2);
        // Slow queue is full now
        assert_eq!(group.send(&notice("b")), 1);

        assert_eq!(slow_rx.recv().await.unwrap(), notice("a"));
        assert!(slow_rx.try_recv().is_err());
        assert_eq!(fast_rx.recv().await.unwrap(), notice("a"));
        assert_eq!(fast_rx.recv().await.unwrap(), notice("b"));
    }

    #[test]
    fn test_unsubscribe() {
        let mut group = Broadcaster::new();
        let (tx, rx) = mpsc::channel(1);
        group.subscribe(7, tx);
        assert_eq!(group.len(), 1);

        assert!(group.unsubscribe(7));
        assert!(!group.unsubscribe(7));
        assert!(group.is_empty());

        drop(rx);
        assert_eq!(group.send(&notice("x")), 0);
    }
}
