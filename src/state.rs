// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Shared application state.
//!
//! Two pieces of gateway-wide mutable state exist, both swapped as whole
//! references on reload:
//!
//! - the embeddable script tag, read by every concurrent HTML response under
//!   a read lock and replaced by a pointer swap under a write lock;
//! - the runtime snapshot (classified set + payload + guardrail report) used
//!   for health reporting and reload diffing.
//!
//! Readers never observe a torn mix of old and new data, and a writer never
//! blocks traffic for longer than the swap itself.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;

use crate::broadcast::ChangeBroadcaster;
use crate::classify::ClassifiedSet;
use crate::config::GatewayConfig;
use crate::crypto::KeyBundle;
use crate::guardrail::GuardrailReport;
use crate::manifest::Manifest;
use crate::payload::BuiltPayload;
use crate::proxy::ProxyClient;
use crate::session::SessionStore;

/// Everything rebuilt by one classification pass, swapped atomically.
#[derive(Debug)]
pub struct RuntimeSnapshot {
    pub classified: ClassifiedSet,
    pub payload: BuiltPayload,
    pub guardrail: GuardrailReport,
    pub manifest: Option<Manifest>,
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub keys: Arc<KeyBundle>,
    pub snapshot: Arc<RwLock<Arc<RuntimeSnapshot>>>,
    script_tag: Arc<RwLock<Arc<str>>>,
    pub broadcaster: Arc<ChangeBroadcaster>,
    pub sessions: Arc<SessionStore>,
    pub proxy: Option<Arc<ProxyClient>>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        config: GatewayConfig,
        keys: KeyBundle,
        snapshot: RuntimeSnapshot,
        proxy: Option<ProxyClient>,
    ) -> Self {
        let tag: Arc<str> = Arc::from(snapshot.payload.script_tag.as_str());
        let sessions = SessionStore::new(config.session_ttl, config.session_rate);
        Self {
            config: Arc::new(config),
            keys: Arc::new(keys),
            snapshot: Arc::new(RwLock::new(Arc::new(snapshot))),
            script_tag: Arc::new(RwLock::new(tag)),
            broadcaster: Arc::new(ChangeBroadcaster::new()),
            sessions: Arc::new(sessions),
            proxy: proxy.map(Arc::new),
            started_at: Instant::now(),
        }
    }

    /// Snapshot of the current script tag. Cheap: clones the Arc, not the
    /// bytes.
    pub async fn current_tag(&self) -> Arc<str> {
        self.script_tag.read().await.clone()
    }

    /// Swap in a new script tag. Writers hold the lock only for the pointer
    /// swap.
    pub async fn update_script_tag(&self, tag: Arc<str>) {
        *self.script_tag.write().await = tag;
    }

    pub async fn current_snapshot(&self) -> Arc<RuntimeSnapshot> {
        self.snapshot.read().await.clone()
    }

    /// Replace the runtime snapshot and the script tag together.
    pub async fn swap_snapshot(&self, snapshot: RuntimeSnapshot) {
        let tag: Arc<str> = Arc::from(snapshot.payload.script_tag.as_str());
        *self.snapshot.write().await = Arc::new(snapshot);
        self.update_script_tag(tag).await;
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn concurrent_tag_readers_never_observe_torn_values() {
        let state = crate::server::test_state(&[("REP_PUBLIC_A", "1")]);

        let long_a: Arc<str> = Arc::from("A".repeat(4096).as_str());
        let long_b: Arc<str> = Arc::from("B".repeat(4096).as_str());
        state.update_script_tag(long_a.clone()).await;

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let state = state.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..500 {
                    let tag = state.current_tag().await;
                    let first = tag.chars().next().unwrap();
                    // A torn read would mix As and Bs.
                    assert!(tag.chars().all(|c| c == first));
                }
            }));
        }
        for _ in 0..4 {
            let state = state.clone();
            let (a, b) = (long_a.clone(), long_b.clone());
            tasks.push(tokio::spawn(async move {
                for i in 0..500 {
                    let tag = if i % 2 == 0 { b.clone() } else { a.clone() };
                    state.update_script_tag(tag).await;
                }
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }
    }

    #[tokio::test]
    async fn swap_snapshot_replaces_tag_and_snapshot_together() {
        let state = crate::server::test_state(&[("REP_PUBLIC_A", "1")]);
        let before = state.current_snapshot().await;

        let rebuilt = crate::server::build_runtime_snapshot(
            &[("REP_PUBLIC_A".to_string(), "2".to_string())],
            None,
            &state.config,
            &state.keys,
        )
        .unwrap();
        state.swap_snapshot(rebuilt).await;

        let after = state.current_snapshot().await;
        assert_ne!(
            before.payload.payload.public.get("A"),
            after.payload.payload.public.get("A")
        );
        let tag = state.current_tag().await;
        assert_eq!(&*tag, after.payload.script_tag.as_str());
    }
}
