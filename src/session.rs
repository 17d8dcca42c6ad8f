// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Session Key Issuance
//!
//! Bookkeeping for the session-key endpoint: per-IP sliding-window rate
//! limiting, issuance records for single-use/expiry enforcement, and the
//! background sweep that bounds both tables.
//!
//! The issuance record is not itself secret; the derived key never touches
//! this module's state. Both tables sit behind one mutex - accesses are
//! short and contention-tolerant.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// Width of the rate-limit sliding window.
const RATE_WINDOW: Duration = Duration::from_secs(60);
/// Interval between background sweeps.
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Server-side record of one issued session key.
#[derive(Debug, Clone)]
pub struct IssuedSessionKey {
    pub id: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct Tables {
    issued: HashMap<String, IssuedSessionKey>,
    windows: HashMap<String, Vec<Instant>>,
}

/// Issuance and rate-limit state for the session-key endpoint.
pub struct SessionStore {
    tables: Mutex<Tables>,
    ttl: Duration,
    rate_limit: u32,
}

impl SessionStore {
    pub fn new(ttl: Duration, rate_limit: u32) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            ttl,
            rate_limit,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Record one request attempt for `client` and report whether it is
    /// within the sliding-window limit. Rejected attempts are not recorded.
    pub fn check_rate(&self, client: &str) -> bool {
        let now = Instant::now();
        let mut tables = self.tables.lock().expect("session lock poisoned");
        let window = tables.windows.entry(client.to_string()).or_default();
        window.retain(|t| now.duration_since(*t) < RATE_WINDOW);
        if window.len() >= self.rate_limit as usize {
            return false;
        }
        window.push(now);
        true
    }

    /// Record a successful issuance and return its bookkeeping entry.
    pub fn record_issuance(&self) -> IssuedSessionKey {
        let record = IssuedSessionKey {
            id: Uuid::new_v4().to_string(),
            expires_at: Utc::now() + self.ttl,
        };
        self.tables
            .lock()
            .expect("session lock poisoned")
            .issued
            .insert(record.id.clone(), record.clone());
        record
    }

    pub fn issued_count(&self) -> usize {
        self.tables
            .lock()
            .expect("session lock poisoned")
            .issued
            .len()
    }

    /// Evict expired issuance records and empty rate windows. Returns the
    /// number evicted from each table.
    pub fn sweep(&self) -> (usize, usize) {
        let now = Utc::now();
        let instant_now = Instant::now();
        let mut tables = self.tables.lock().expect("session lock poisoned");

        let issued_before = tables.issued.len();
        tables.issued.retain(|_, record| record.expires_at > now);
        let issued_evicted = issued_before - tables.issued.len();

        let windows_before = tables.windows.len();
        tables.windows.retain(|_, window| {
            window.retain(|t| instant_now.duration_since(*t) < RATE_WINDOW);
            !window.is_empty()
        });
        let windows_evicted = windows_before - tables.windows.len();

        (issued_evicted, windows_evicted)
    }

    /// Run the periodic sweep until the cancellation token is triggered.
    ///
    /// Should be spawned as a background task:
    /// ```rust,ignore
    /// tokio::spawn(Arc::clone(&sessions).run_sweeper(shutdown.clone()));
    /// ```
    pub async fn run_sweeper(self: std::sync::Arc<Self>, shutdown: CancellationToken) {
        info!(
            interval_secs = SWEEP_INTERVAL.as_secs(),
            "session sweep starting"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(SWEEP_INTERVAL) => {}
                _ = shutdown.cancelled() => {
                    info!("session sweep shutting down");
                    return;
                }
            }

            let (issued, windows) = self.sweep();
            if issued > 0 || windows > 0 {
                debug!(issued, windows, "session sweep evicted stale entries");
            }
        }
    }
}

/// Resolve the client address for rate limiting: the first hop of a
/// forwarded-for header when present, else the transport peer address.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(forwarded) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Check a request's declared origin against the allow-list. An empty list
/// permits only same-origin requests (no Origin header at all).
pub fn origin_allowed(origin: Option<&str>, allowed: &[String]) -> bool {
    match origin {
        None => true,
        Some(origin) => {
            let origin = origin.trim_end_matches('/');
            allowed
                .iter()
                .any(|candidate| candidate.trim_end_matches('/').eq_ignore_ascii_case(origin))
        }
    }
}
