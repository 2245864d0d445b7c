//! Per-session event fan-out.
//!
//! Subscribed connections receive runtime events as `event` frames
//! with a per-connection monotonic `seq`. Publish order is preserved:
//! the hub stamps and enqueues under one lock, and each connection's
//! writer task drains its queue in order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::protocol::Frame;

/// One connection's sink plus its event sequence counter.
#[derive(Clone)]
struct Subscriber {
    conn_id: u64,
    tx: mpsc::UnboundedSender<Frame>,
    seq: Arc<AtomicU64>,
}

#[derive(Default)]
pub struct EventHub {
    /// session id → subscribers.
    by_session: Mutex<HashMap<String, Vec<Subscriber>>>,
    /// All authenticated connections (for broadcast events).
    all: Mutex<Vec<Subscriber>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an authenticated connection for broadcast events.
    pub fn register_connection(&self, conn_id: u64, tx: mpsc::UnboundedSender<Frame>) {
        self.all.lock().push(Subscriber {
            conn_id,
            tx,
            seq: Arc::new(AtomicU64::new(0)),
        });
    }

    /// Subscribe a connection to one session's events.
    pub fn subscribe(&self, session_id: &str, conn_id: u64, tx: mpsc::UnboundedSender<Frame>) {
        let mut by_session = self.by_session.lock();
        let subs = by_session.entry(session_id.to_owned()).or_default();
        if subs.iter().any(|s| s.conn_id == conn_id) {
            return;
        }
        subs.push(Subscriber {
            conn_id,
            tx,
            seq: Arc::new(AtomicU64::new(0)),
        });
    }

    pub fn unsubscribe(&self, session_id: &str, conn_id: u64) {
        let mut by_session = self.by_session.lock();
        if let Some(subs) = by_session.get_mut(session_id) {
            subs.retain(|s| s.conn_id != conn_id);
            if subs.is_empty() {
                by_session.remove(session_id);
            }
        }
    }

    /// Drop every registration for a closed connection.
    pub fn remove_connection(&self, conn_id: u64) {
        let mut by_session = self.by_session.lock();
        by_session.retain(|_, subs| {
            subs.retain(|s| s.conn_id != conn_id);
            !subs.is_empty()
        });
        self.all.lock().retain(|s| s.conn_id != conn_id);
    }

    /// Fan one session event out to its subscribers, stamping each
    /// connection's next seq.
    pub fn publish_session(&self, session_id: &str, event: &str, payload: Value) {
        let subs: Vec<Subscriber> = self
            .by_session
            .lock()
            .get(session_id)
            .cloned()
            .unwrap_or_default();
        for sub in subs {
            let seq = sub.seq.fetch_add(1, Ordering::SeqCst) + 1;
            let _ = sub.tx.send(Frame::Event {
                event: event.to_owned(),
                payload: payload.clone(),
                seq: Some(seq),
            });
        }
    }

    /// Broadcast to every authenticated connection (e.g. `shutdown`).
    pub fn broadcast(&self, event: &str, payload: Value) {
        let subs: Vec<Subscriber> = self.all.lock().clone();
        for sub in subs {
            let _ = sub.tx.send(Frame::Event {
                event: event.to_owned(),
                payload: payload.clone(),
                seq: None,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn seq_is_monotonic_per_connection() {
        let hub = EventHub::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.subscribe("s1", 1, tx);

        hub.publish_session("s1", "session.turn.start", json!({"turn": 1}));
        hub.publish_session("s1", "session.turn.end", json!({"turn": 1}));

        let mut seqs = Vec::new();
        while let Ok(Frame::Event { seq, .. }) = rx.try_recv() {
            seqs.push(seq.unwrap());
        }
        assert_eq!(seqs, vec![1, 2]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let hub = EventHub::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.subscribe("s1", 1, tx);
        hub.unsubscribe("s1", 1);

        hub.publish_session("s1", "session.turn.start", json!({}));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn remove_connection_clears_all_sessions() {
        let hub = EventHub::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.subscribe("s1", 7, tx.clone());
        hub.subscribe("s2", 7, tx);
        hub.remove_connection(7);

        hub.publish_session("s1", "session.turn.start", json!({}));
        hub.publish_session("s2", "session.turn.start", json!({}));
        assert!(rx.try_recv().is_err());
    }
}
