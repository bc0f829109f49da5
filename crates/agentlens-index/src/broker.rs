use agentlens_types::{EnvelopeKind, UpdateEnvelope};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Outbound queue depth per subscriber before coalescing kicks in
const SUBSCRIBER_QUEUE_DEPTH: usize = 256;
/// Coalesced-pending entries tolerated before the subscriber is dropped
const PENDING_DROP_THRESHOLD: usize = 1024;

/// One update produced by a refresh pass, before per-subscriber framing.
#[derive(Debug, Clone)]
pub struct OutboundUpdate {
    pub kind: EnvelopeKind,
    /// Trace the update concerns; empty for overview/snapshot frames
    pub trace_id: String,
    pub payload: Value,
}

impl OutboundUpdate {
    pub fn new(kind: EnvelopeKind, trace_id: impl Into<String>, payload: Value) -> Self {
        Self {
            kind,
            trace_id: trace_id.into(),
            payload,
        }
    }
}

struct Subscriber {
    tx: mpsc::Sender<UpdateEnvelope>,
    /// Monotonic per-subscriber sequence
    version: u64,
    /// Overflow store: one pending payload per (trace, kind); newer
    /// updates overwrite older ones for the same key
    pending: BTreeMap<(String, EnvelopeKind), Value>,
}

/// Fan-out hub for stream subscribers.
///
/// The refresh loop is the only producer. Slow consumers degrade in two
/// steps: full channel -> coalesce into the pending map; pending map over
/// threshold -> subscriber dropped.
pub struct Broker {
    subscribers: HashMap<Uuid, Subscriber>,
}

impl Broker {
    pub fn new() -> Self {
        Self {
            subscribers: HashMap::new(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Register a subscriber and push its snapshot as frame one.
    pub fn subscribe(&mut self, snapshot: Value) -> (Uuid, mpsc::Receiver<UpdateEnvelope>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_DEPTH);
        let id = Uuid::new_v4();
        let mut subscriber = Subscriber {
            tx,
            version: 0,
            pending: BTreeMap::new(),
        };
        subscriber.version += 1;
        let envelope = UpdateEnvelope {
            id: Uuid::new_v4().to_string(),
            kind: EnvelopeKind::Snapshot,
            version: subscriber.version,
            payload: snapshot,
        };
        // Queue is empty at this point; capacity 256 cannot be exceeded
        let _ = subscriber.tx.try_send(envelope);
        self.subscribers.insert(id, subscriber);
        tracing::debug!(subscriber = %id, "stream subscriber attached");
        (id, rx)
    }

    /// Drop a subscriber and everything pending for it.
    pub fn unsubscribe(&mut self, id: Uuid) {
        if self.subscribers.remove(&id).is_some() {
            tracing::debug!(subscriber = %id, "stream subscriber detached");
        }
    }

    /// Fan a refresh batch out to every subscriber, in batch order.
    pub fn publish(&mut self, batch: &[OutboundUpdate]) {
        let mut dropped: Vec<Uuid> = Vec::new();

        for (id, subscriber) in self.subscribers.iter_mut() {
            // Retry anything previously coalesced before the new batch;
            // whatever still does not fit parks itself again
            let pending = std::mem::take(&mut subscriber.pending);
            for ((trace_id, kind), payload) in pending {
                send_or_park(subscriber, kind, &trace_id, payload);
            }

            for update in batch {
                send_or_park(
                    subscriber,
                    update.kind,
                    &update.trace_id,
                    update.payload.clone(),
                );
            }

            if subscriber.pending.len() > PENDING_DROP_THRESHOLD || subscriber.tx.is_closed() {
                dropped.push(*id);
            }
        }

        for id in dropped {
            tracing::warn!(subscriber = %id, "dropping slow or closed stream subscriber");
            self.subscribers.remove(&id);
        }
    }

    /// Heartbeat frames keep idle connections alive; they are never parked.
    pub fn heartbeat(&mut self) {
        let mut dropped: Vec<Uuid> = Vec::new();
        for (id, subscriber) in self.subscribers.iter_mut() {
            subscriber.version += 1;
            let envelope = UpdateEnvelope {
                id: Uuid::new_v4().to_string(),
                kind: EnvelopeKind::Heartbeat,
                version: subscriber.version,
                payload: Value::Null,
            };
            if subscriber.tx.try_send(envelope).is_err() && subscriber.tx.is_closed() {
                dropped.push(*id);
            }
        }
        for id in dropped {
            self.subscribers.remove(&id);
        }
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

/// Try to enqueue; on a full channel, coalesce into the pending map.
/// Returns false when the frame had to be parked.
fn send_or_park(
    subscriber: &mut Subscriber,
    kind: EnvelopeKind,
    trace_id: &str,
    payload: Value,
) -> bool {
    subscriber.version += 1;
    let envelope = UpdateEnvelope {
        id: Uuid::new_v4().to_string(),
        kind,
        version: subscriber.version,
        payload,
    };
    match subscriber.tx.try_send(envelope) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(envelope)) => {
            subscriber
                .pending
                .insert((trace_id.to_string(), kind), envelope.payload);
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}
