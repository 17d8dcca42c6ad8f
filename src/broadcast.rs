// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Change Broadcaster
//!
//! A registry of buffered subscriber channels fanning out configuration
//! deltas to long-lived streaming connections. Sends are non-blocking: a
//! subscriber whose buffer is full has the event dropped (and logged) rather
//! than exerting backpressure on the reload path. Per-subscriber ordering
//! follows broadcast call order; no ordering is guaranteed across
//! subscribers, and none is needed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::classify::Tier;

/// Buffered capacity per subscriber channel.
pub const SUBSCRIBER_BUFFER: usize = 32;

/// Kind of configuration delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Update,
    Delete,
}

impl ChangeKind {
    /// Event name used on the wire (SSE `event:` field).
    pub fn event_name(&self) -> &'static str {
        match self {
            ChangeKind::Update => "update",
            ChangeKind::Delete => "delete",
        }
    }
}

/// One configuration delta. `value` is present for updates, omitted for
/// deletes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub key: String,
    pub tier: Tier,
    pub value: Option<String>,
}

#[derive(Serialize)]
struct WireEvent<'a> {
    key: &'a str,
    tier: Tier,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<&'a str>,
}

impl ChangeEvent {
    pub fn update(key: impl Into<String>, tier: Tier, value: impl Into<String>) -> Self {
        Self {
            kind: ChangeKind::Update,
            key: key.into(),
            tier,
            value: Some(value.into()),
        }
    }

    pub fn delete(key: impl Into<String>, tier: Tier) -> Self {
        Self {
            kind: ChangeKind::Delete,
            key: key.into(),
            tier,
            value: None,
        }
    }

    /// JSON body carried in the event frame.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&WireEvent {
            key: &self.key,
            tier: self.tier,
            value: self.value.as_deref(),
        })
        .unwrap_or_default()
    }
}

/// An open subscription: the receiving end plus a guard that unregisters the
/// subscriber when the stream is dropped (client disconnect).
pub struct Subscription {
    pub receiver: mpsc::Receiver<ChangeEvent>,
    pub guard: SubscriberGuard,
}

/// Unregisters its subscriber slot on drop.
pub struct SubscriberGuard {
    id: Uuid,
    broadcaster: Arc<ChangeBroadcaster>,
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        self.broadcaster.unregister(self.id);
    }
}

/// The fan-out hub. One per process, shared across reloads.
#[derive(Default)]
pub struct ChangeBroadcaster {
    subscribers: Mutex<HashMap<Uuid, mpsc::Sender<ChangeEvent>>>,
}

impl ChangeBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber with a bounded buffer.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let id = Uuid::new_v4();
        self.subscribers
            .lock()
            .expect("broadcaster lock poisoned")
            .insert(id, tx);
        tracing::debug!(subscriber = %id, "stream subscriber registered");
        Subscription {
            receiver: rx,
            guard: SubscriberGuard {
                id,
                broadcaster: Arc::clone(self),
            },
        }
    }

    fn unregister(&self, id: Uuid) {
        self.subscribers
            .lock()
            .expect("broadcaster lock poisoned")
            .remove(&id);
        tracing::debug!(subscriber = %id, "stream subscriber unregistered");
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .expect("broadcaster lock poisoned")
            .len()
    }

    /// Deliver one event to every current subscriber without blocking.
    /// Returns the number of successful deliveries.
    pub fn broadcast(&self, event: &ChangeEvent) -> usize {
        let subscribers = self.subscribers.lock().expect("broadcaster lock poisoned");
        let mut delivered = 0;
        for (id, tx) in subscribers.iter() {
            match tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        subscriber = %id,
                        key = %event.key,
                        "subscriber buffer full; dropping event"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    // Guard drop will remove the slot; nothing to do here.
                }
            }
        }
        delivered
    }
}
