// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session-key issuance endpoint.
//!
//! GET only; the method router answers 405 for anything else. Each
//! successful request derives a fresh key from the master encryption key and
//! a per-request salt - the master key itself is never transmitted. The
//! response is never cacheable.

use axum::{
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use base64ct::{Base64, Encoding};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::SocketAddr;
use tracing::debug;
use utoipa::ToSchema;

use crate::crypto::{self, SESSION_INFO, SESSION_SALT_SIZE};
use crate::error::ApiError;
use crate::session::{client_ip, origin_allowed};
use crate::state::AppState;

/// Successful issuance response.
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionKeyResponse {
    /// Base64 session-scoped decryption key.
    pub key: String,
    /// When the key stops being honored.
    #[serde(rename = "expiresAt")]
    pub expires_at: DateTime<Utc>,
    /// Base64 salt the key was derived with.
    pub nonce: String,
}

fn no_store_headers() -> [(header::HeaderName, HeaderValue); 2] {
    [
        (
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store, no-cache, must-revalidate"),
        ),
        (header::PRAGMA, HeaderValue::from_static("no-cache")),
    ]
}

fn request_origin(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && *v != "null")
}

/// Issue a short-lived, single-use session key.
#[utoipa::path(
    get,
    path = "/_rep/session-key",
    tag = "Session",
    responses(
        (status = 200, description = "Fresh session key", body = SessionKeyResponse),
        (status = 403, description = "Origin not allowed"),
        (status = 429, description = "Rate limit exceeded")
    )
)]
pub async fn issue_session_key(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let origin = request_origin(&headers);
    if !origin_allowed(origin, &state.config.allowed_origins) {
        return Err(ApiError::forbidden("origin not allowed"));
    }

    let client = client_ip(&headers, Some(peer));
    if !state.sessions.check_rate(&client) {
        debug!(client = %client, "session-key request rate limited");
        return Err(ApiError::too_many_requests("rate limit exceeded"));
    }

    let salt = crypto::random_bytes::<SESSION_SALT_SIZE>();
    let key = crypto::derive_key(
        state.keys.encryption_key(),
        &salt,
        SESSION_INFO,
        crypto::KEY_SIZE,
    );
    let record = state.sessions.record_issuance();
    debug!(issuance = %record.id, client = %client, "session key issued");

    let body = SessionKeyResponse {
        key: Base64::encode_string(&key),
        expires_at: record.expires_at,
        nonce: Base64::encode_string(&salt),
    };

    let mut response = (no_store_headers(), Json(body)).into_response();
    if let Some(origin) = origin {
        if let Ok(value) = HeaderValue::from_str(origin) {
            response
                .headers_mut()
                .insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
        }
    }
    Ok(response)
}

/// CORS preflight for the session-key endpoint: a stateless path that only
/// echoes allowed origins. No rate limiting, no issuance.
pub async fn preflight(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let origin = request_origin(&headers);
    if !origin_allowed(origin, &state.config.allowed_origins) {
        return StatusCode::FORBIDDEN.into_response();
    }

    let mut response = StatusCode::NO_CONTENT.into_response();
    let response_headers = response.headers_mut();
    if let Some(origin) = origin {
        if let Ok(value) = HeaderValue::from_str(origin) {
            response_headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
        }
    }
    response_headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, OPTIONS"),
    );
    response_headers.insert(
        header::ACCESS_CONTROL_MAX_AGE,
        HeaderValue::from_static("300"),
    );
    response
}
