// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Reverse-proxy upstream: forwards anything the gateway does not handle
//! itself to the configured origin and hands the buffered response back to
//! the injection middleware.
//!
//! Hop-by-hop headers are dropped in both directions. An unreachable origin
//! is a request-local 502, never a process failure.

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{header::HeaderName, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::warn;
use url::Url;

use crate::error::ApiError;
use crate::state::AppState;

/// Headers that describe the connection rather than the payload.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// A reusable client bound to one origin.
#[derive(Debug, Clone)]
pub struct ProxyClient {
    client: reqwest::Client,
    base: Url,
}

impl ProxyClient {
    pub fn new(base: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            base,
        }
    }

    /// Join the origin with the request's path and query.
    fn target(&self, path_and_query: &str) -> String {
        let base = self.base.as_str().trim_end_matches('/');
        format!("{base}{path_and_query}")
    }

    async fn forward(&self, request: Request) -> Result<Response, ApiError> {
        let (parts, body) = request.into_parts();
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let target = self.target(path_and_query);

        let body_bytes = to_bytes(body, usize::MAX)
            .await
            .map_err(|e| ApiError::bad_gateway(format!("request body read failed: {e}")))?;

        let mut headers = HeaderMap::new();
        for (name, value) in parts.headers.iter() {
            if is_hop_by_hop(name) || name == axum::http::header::HOST {
                continue;
            }
            headers.insert(name.clone(), value.clone());
        }

        let upstream = self
            .client
            .request(parts.method, target.as_str())
            .headers(headers)
            .body(body_bytes.to_vec())
            .send()
            .await
            .map_err(|e| {
                warn!(target = %target, error = %e, "upstream request failed");
                ApiError::bad_gateway("upstream unreachable")
            })?;

        let status = StatusCode::from_u16(upstream.status().as_u16())
            .unwrap_or(StatusCode::BAD_GATEWAY);
        let mut response_headers = HeaderMap::new();
        for (name, value) in upstream.headers().iter() {
            if is_hop_by_hop(name) {
                continue;
            }
            response_headers.insert(name.clone(), value.clone());
        }

        let bytes = upstream.bytes().await.map_err(|e| {
            warn!(target = %target, error = %e, "upstream body read failed");
            ApiError::bad_gateway("upstream body read failed")
        })?;

        let mut response = Response::new(Body::from(bytes));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        Ok(response)
    }
}

/// Fallback handler for proxy mode.
pub async fn forward(State(state): State<AppState>, request: Request) -> Response {
    let Some(proxy) = state.proxy.as_ref() else {
        // Router wiring error; static mode never installs this handler.
        return ApiError::internal("no upstream configured").into_response();
    };
    match proxy.forward(request).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_joins_path_and_query() {
        let proxy = ProxyClient::new(Url::parse("http://origin:3000").unwrap());
        assert_eq!(
            proxy.target("/app/index.html?v=2"),
            "http://origin:3000/app/index.html?v=2"
        );

        let with_path = ProxyClient::new(Url::parse("http://origin:3000/base/").unwrap());
        assert_eq!(with_path.target("/x"), "http://origin:3000/base/x");
    }

    #[test]
    fn hop_by_hop_headers_are_recognized() {
        assert!(is_hop_by_hop(&HeaderName::from_static("transfer-encoding")));
        assert!(is_hop_by_hop(&HeaderName::from_static("connection")));
        assert!(!is_hop_by_hop(&HeaderName::from_static("content-type")));
    }
}
