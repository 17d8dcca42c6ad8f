// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{routing::get, Router};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::{EVENTS_PATH, HEALTH_PATH, SESSION_KEY_PATH};
use crate::state::AppState;

pub mod events;
pub mod health;
pub mod session_key;

/// The gateway's own endpoints. Everything else falls through to the
/// injection-wrapped upstream.
pub fn router(state: AppState) -> Router {
    let docs = state.config.docs;
    let routes = Router::new()
        .route(HEALTH_PATH, get(health::health))
        .route(
            SESSION_KEY_PATH,
            get(session_key::issue_session_key).options(session_key::preflight),
        )
        .route(EVENTS_PATH, get(events::stream_changes))
        .with_state(state);

    if docs {
        routes.merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
    } else {
        routes
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        session_key::issue_session_key,
        events::stream_changes
    ),
    components(
        schemas(
            health::HealthResponse,
            health::TierCounts,
            health::GuardrailCounts,
            session_key::SessionKeyResponse
        )
    ),
    tags(
        (name = "Health", description = "Gateway health reporting"),
        (name = "Session", description = "Short-lived decryption key issuance"),
        (name = "Events", description = "Configuration change streaming")
    )
)]
struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn router_builds_with_all_routes() {
        let app = router(crate::server::test_state(&[("REP_PUBLIC_A", "1")]));
        // Ensure the router can be converted into a service without panicking.
        let _ = app.into_make_service();
    }
}
