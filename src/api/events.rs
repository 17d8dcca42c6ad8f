// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Streaming change-event endpoint.
//!
//! Each connection registers one buffered subscriber with the broadcaster
//! and holds it for the connection's lifetime. The stream opens with a
//! connection-confirmation comment, then emits named `update`/`delete`
//! events; periodic comment keep-alives defeat idle-timeout intermediaries.
//! Dropping the stream (client disconnect) unregisters the subscriber.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{self, Stream, StreamExt};
use tokio_stream::wrappers::ReceiverStream;

use crate::broadcast::ChangeEvent;
use crate::state::AppState;

/// Keep-alive interval for idle streams.
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

fn frame(event: &ChangeEvent) -> Event {
    Event::default()
        .event(event.kind.event_name())
        .data(event.to_json())
}

/// GET /_rep/events - stream configuration deltas.
#[utoipa::path(
    get,
    path = "/_rep/events",
    tag = "Events",
    responses(
        (status = 200, description = "Change event stream", content_type = "text/event-stream")
    )
)]
pub async fn stream_changes(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.broadcaster.subscribe();
    let guard = subscription.guard;

    let initial =
        stream::once(async { Ok::<_, Infallible>(Event::default().comment("connected")) });
    let events = ReceiverStream::new(subscription.receiver).map(move |event| {
        // The guard lives inside the stream; dropping the connection drops
        // it and unregisters the subscriber.
        let _ = &guard;
        Ok::<_, Infallible>(frame(&event))
    });

    Sse::new(initial.chain(events)).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keep-alive"),
    )
}
