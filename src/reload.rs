// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Hot Reload
//!
//! Re-runs the classification pipeline against the current environment,
//! rebuilds the payload with the *existing* keys, atomically swaps the
//! snapshot and script tag, and broadcasts one event per changed public key.
//!
//! Reload is all-or-nothing: any stage failure is logged and the previous
//! payload remains in effect.
//!
//! Three triggers converge on the same routine: an out-of-band SIGHUP, a
//! file-modification watch on the env file/manifest, and a fixed-interval
//! poll.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use notify::{RecursiveMode, Watcher};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::broadcast::ChangeEvent;
use crate::classify::Tier;
use crate::config::{self, ReloadMode};
use crate::error::StartupError;
use crate::manifest::Manifest;
use crate::state::AppState;

/// Quiet period after a filesystem event before reloading, so one save does
/// not trigger a burst of reloads.
const WATCH_DEBOUNCE: Duration = Duration::from_millis(250);

/// Outcome of one successful reload.
#[derive(Debug)]
pub struct ReloadOutcome {
    pub events_broadcast: usize,
    pub subscribers: usize,
}

/// One update/delete event per changed, added, or removed public key.
pub fn diff_public(
    old: &BTreeMap<String, String>,
    new: &BTreeMap<String, String>,
) -> Vec<ChangeEvent> {
    let mut events = Vec::new();
    for (key, value) in new {
        if old.get(key) != Some(value) {
            events.push(ChangeEvent::update(key.clone(), Tier::Public, value.clone()));
        }
    }
    for key in old.keys() {
        if !new.contains_key(key) {
            events.push(ChangeEvent::delete(key.clone(), Tier::Public));
        }
    }
    events
}

/// Run one reload pass. Broadcast happens only after the swap succeeds.
pub async fn reload(state: &AppState) -> Result<ReloadOutcome, StartupError> {
    let raw = config::merged_environment(state.config.env_file.as_deref())?;
    let manifest = match &state.config.manifest_path {
        Some(path) => Some(Manifest::load(path)?),
        None => None,
    };

    let snapshot = crate::server::build_runtime_snapshot(
        &raw,
        manifest.as_ref(),
        &state.config,
        &state.keys,
    )?;

    let old = state.current_snapshot().await;
    let events = diff_public(
        &old.classified.public_map(),
        &snapshot.classified.public_map(),
    );
    state.swap_snapshot(snapshot).await;

    for event in &events {
        state.broadcaster.broadcast(event);
    }

    let outcome = ReloadOutcome {
        events_broadcast: events.len(),
        subscribers: state.broadcaster.subscriber_count(),
    };
    info!(
        events = outcome.events_broadcast,
        subscribers = outcome.subscribers,
        "configuration reloaded"
    );
    Ok(outcome)
}

async fn reload_logged(state: &AppState) {
    if let Err(e) = reload(state).await {
        error!(error = %e, "reload failed; previous payload remains in effect");
    }
}

/// Spawn-point for the configured reload trigger. Runs until cancelled.
pub async fn run_reload_trigger(state: AppState, shutdown: CancellationToken) {
    match state.config.reload {
        ReloadMode::Off => {}
        ReloadMode::Signal => run_signal_trigger(state, shutdown).await,
        ReloadMode::Poll => run_poll_trigger(state, shutdown).await,
        ReloadMode::Watch => run_watch_trigger(state, shutdown).await,
    }
}

#[cfg(unix)]
async fn run_signal_trigger(state: AppState, shutdown: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(e) => {
            error!(error = %e, "cannot install SIGHUP handler; reload disabled");
            return;
        }
    };
    info!("reload on SIGHUP enabled");

    loop {
        tokio::select! {
            _ = hangup.recv() => {
                info!("SIGHUP received");
                reload_logged(&state).await;
            }
            _ = shutdown.cancelled() => return,
        }
    }
}

#[cfg(not(unix))]
async fn run_signal_trigger(_state: AppState, _shutdown: CancellationToken) {
    warn!("signal-triggered reload is unsupported on this platform");
}

async fn run_poll_trigger(state: AppState, shutdown: CancellationToken) {
    let interval = state.config.reload_interval;
    info!(interval_secs = interval.as_secs(), "reload polling enabled");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                reload_logged(&state).await;
            }
            _ = shutdown.cancelled() => return,
        }
    }
}

async fn run_watch_trigger(state: AppState, shutdown: CancellationToken) {
    let paths: Vec<PathBuf> = [
        state.config.env_file.clone(),
        state.config.manifest_path.clone(),
    ]
    .into_iter()
    .flatten()
    .collect();

    if paths.is_empty() {
        warn!("watch reload configured but no env file or manifest to watch");
        return;
    }

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let mut watcher =
        match notify::recommended_watcher(move |result: Result<notify::Event, notify::Error>| {
            if let Ok(event) = result {
                if event.kind.is_modify() || event.kind.is_create() {
                    let _ = tx.send(());
                }
            }
        }) {
            Ok(watcher) => watcher,
            Err(e) => {
                error!(error = %e, "cannot create file watcher; reload disabled");
                return;
            }
        };

    for path in &paths {
        if let Err(e) = watcher.watch(path, RecursiveMode::NonRecursive) {
            error!(path = %path.display(), error = %e, "cannot watch path");
        }
    }
    info!(paths = paths.len(), "reload on file modification enabled");

    loop {
        tokio::select! {
            Some(()) = rx.recv() => {
                // Debounce: absorb the burst a single save produces.
                tokio::time::sleep(WATCH_DEBOUNCE).await;
                while rx.try_recv().is_ok() {}
                reload_logged(&state).await;
            }
            _ = shutdown.cancelled() => return,
        }
    }
}
