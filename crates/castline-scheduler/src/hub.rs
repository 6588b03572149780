//! Per-user realtime fan-out.
//!
//! Each live connection registers an outbound queue. Broadcasting snapshots the
//! user's queues under the lock and writes outside it; a connection whose queue
//! is closed or full is dropped, which ends its socket task. There is no backlog
//! and no replay: clients that are not connected miss the event.

use castline_core::RealtimeEvent;
use castline_core::event::format_at;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub type ConnectionId = u64;

/// Outbound queue depth per connection.
const DEFAULT_BUFFER: usize = 64;

type Connections = HashMap<String, HashMap<ConnectionId, mpsc::Sender<String>>>;

/// A registered connection. Messages for the user arrive on `receiver`.
#[derive(Debug)]
pub struct Subscription {
    pub id: ConnectionId,
    pub receiver: mpsc::Receiver<String>,
}

#[derive(Debug)]
pub struct RealtimeHub {
    next_id: AtomicU64,
    buffer: usize,
    connections: Mutex<Connections>,
}

impl RealtimeHub {
    pub fn new() -> Self {
        Self::with_buffer(DEFAULT_BUFFER)
    }

    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
            connections: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Connections> {
        self.connections.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a connection for `user_id`. Blank user IDs are refused.
    pub fn add(&self, user_id: &str) -> Option<Subscription> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return None;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.buffer);
        self.lock()
            .entry(user_id.to_string())
            .or_default()
            .insert(id, tx);
        debug!(user_id, connection_id = id, "Realtime connection added");
        Some(Subscription { id, receiver: rx })
    }

    pub fn remove(&self, user_id: &str, id: ConnectionId) {
        let user_id = user_id.trim();
        let mut connections = self.lock();
        if let Some(set) = connections.get_mut(user_id) {
            set.remove(&id);
            if set.is_empty() {
                connections.remove(user_id);
            }
        }
    }

    /// Deliver `message` to every connection of `user_id`. Returns how many took it.
    pub fn broadcast(&self, user_id: &str, message: &str) -> usize {
        let user_id = user_id.trim();
        if user_id.is_empty() || message.is_empty() {
            return 0;
        }

        let recipients: Vec<(ConnectionId, mpsc::Sender<String>)> = match self.lock().get(user_id) {
            Some(set) => set.iter().map(|(id, tx)| (*id, tx.clone())).collect(),
            None => return 0,
        };

        let mut delivered = 0;
        for (id, tx) in recipients {
            match tx.try_send(message.to_string()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(user_id, connection_id = id, error = %e, "Dropping realtime connection");
                    self.remove(user_id, id);
                }
            }
        }
        delivered
    }

    /// Serialize and broadcast an event to its user, stamping `at` if missing.
    pub fn emit(&self, mut event: RealtimeEvent) -> usize {
        if event.at.is_empty() {
            event.at = format_at(Utc::now());
        }
        match serde_json::to_string(&event) {
            Ok(json) => self.broadcast(&event.user_id, &json),
            Err(e) => {
                warn!(error = %e, kind = %event.kind, "Failed to serialize realtime event");
                0
            }
        }
    }

    pub fn count(&self, user_id: &str) -> usize {
        self.lock().get(user_id.trim()).map_or(0, HashMap::len)
    }

    /// Drop every connection. Socket tasks observe their queue closing and exit.
    pub fn shutdown(&self) {
        let dropped: usize = self.lock().drain().map(|(_, set)| set.len()).sum();
        debug!(connections = dropped, "Realtime hub shut down");
    }
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_reaches_only_that_user() {
        let hub = RealtimeHub::new();
        let mut a1 = hub.add("alice").unwrap();
        let mut a2 = hub.add("alice").unwrap();
        let mut b = hub.add("bob").unwrap();

        assert_eq!(hub.broadcast("alice", "hi"), 2);
        assert_eq!(a1.receiver.recv().await.unwrap(), "hi");
        assert_eq!(a2.receiver.recv().await.unwrap(), "hi");
        assert!(b.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_connection_is_removed() {
        let hub = RealtimeHub::new();
        let keep = hub.add("alice").unwrap();
        let gone = hub.add("alice").unwrap();
        drop(gone);

        assert_eq!(hub.broadcast("alice", "hi"), 1);
        assert_eq!(hub.count("alice"), 1);
        drop(keep);
    }

    #[tokio::test]
    async fn test_full_queue_is_removed() {
        let hub = RealtimeHub::with_buffer(1);
        let _slow = hub.add("alice").unwrap();
        assert_eq!(hub.broadcast("alice", "one"), 1);
        assert_eq!(hub.broadcast("alice", "two"), 0);
        assert_eq!(hub.count("alice"), 0);
    }

    #[test]
    fn test_blank_inputs_ignored() {
        let hub = RealtimeHub::new();
        assert!(hub.add("  ").is_none());
        let _sub = hub.add("alice").unwrap();
        assert_eq!(hub.broadcast("alice", ""), 0);
        assert_eq!(hub.broadcast("", "hi"), 0);
        assert_eq!(hub.broadcast("nobody", "hi"), 0);
    }

    #[tokio::test]
    async fn test_emit_serializes_event() {
        let hub = RealtimeHub::new();
        let mut sub = hub.add("alice").unwrap();
        let mut event = RealtimeEvent::new(RealtimeEvent::HELLO, "alice");
        event.at = String::new();

        assert_eq!(hub.emit(event), 1);
        let raw = sub.receiver.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["type"], "hello");
        assert_eq!(value["user_id"], "alice");
        assert!(!value["at"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_closes_receivers() {
        let hub = RealtimeHub::new();
        let mut sub = hub.add("alice").unwrap();
        hub.shutdown();
        assert_eq!(hub.count("alice"), 0);
        assert!(sub.receiver.recv().await.is_none());
    }
}
