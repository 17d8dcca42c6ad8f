// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Injection Middleware
//!
//! Wraps the upstream content source (static files or reverse proxy) and
//! rewrites HTML bodies to embed the configuration script tag.
//!
//! The upstream request is steered toward an uncompressed body by stripping
//! `Accept-Encoding`; if the upstream compresses anyway, a gzip body is
//! inflated before the rewrite. Any other declared encoding passes through
//! unmodified with a logged skip - a corrupted response is never produced.
//!
//! Insertion priority: before the first `</head>`, else after the first
//! `<head ...>` open tag, else prepended to the body. Matching is
//! byte-level and ASCII case-insensitive; `<header>` never matches.

use std::io::Read;

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use flate2::read::GzDecoder;
use tracing::{debug, warn};

use crate::state::AppState;

/// Case-insensitive search for an ASCII needle. The needle must be given in
/// lowercase.
fn find_ascii_ci(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle))
}

/// Find the byte offset just past the `>` of the first `<head ...>` open
/// tag. A tag-boundary check keeps `<header>` from matching.
fn find_head_open_end(html: &[u8]) -> Option<usize> {
    let mut from = 0;
    while let Some(rel) = find_ascii_ci(&html[from..], b"<head") {
        let start = from + rel;
        let after = html.get(start + 5)?;
        if matches!(after, b'>' | b' ' | b'\t' | b'\r' | b'\n' | b'/') {
            let close = html[start + 5..].iter().position(|&b| b == b'>')?;
            return Some(start + 5 + close + 1);
        }
        from = start + 5;
    }
    None
}

/// Insert the script tag into an HTML document.
pub fn insert_tag(html: &[u8], tag: &str) -> Vec<u8> {
    let tag = tag.as_bytes();
    let mut out = Vec::with_capacity(html.len() + tag.len());

    if let Some(pos) = find_ascii_ci(html, b"</head>") {
        out.extend_from_slice(&html[..pos]);
        out.extend_from_slice(tag);
        out.extend_from_slice(&html[pos..]);
    } else if let Some(pos) = find_head_open_end(html) {
        out.extend_from_slice(&html[..pos]);
        out.extend_from_slice(tag);
        out.extend_from_slice(&html[pos..]);
    } else {
        out.extend_from_slice(tag);
        out.extend_from_slice(html);
    }

    out
}

fn is_html(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    mime == "text/html" || mime == "application/xhtml+xml"
}

fn gunzip(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// The middleware: strip `Accept-Encoding` on the way up, rewrite HTML on
/// the way down. Non-HTML responses are forwarded byte-exact.
pub async fn inject_config(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    request.headers_mut().remove(header::ACCEPT_ENCODING);
    let response = next.run(request).await;
    rewrite_response(&state, response).await
}

async fn rewrite_response(state: &AppState, response: Response) -> Response {
    let (mut parts, body) = response.into_parts();
    let bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "failed to buffer upstream response body");
            use axum::response::IntoResponse;
            return crate::error::ApiError::bad_gateway("upstream body read failed")
                .into_response();
        }
    };

    let html = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(is_html);
    if !html {
        return Response::from_parts(parts, Body::from(bytes));
    }

    let encoding = parts
        .headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_ascii_lowercase());

    let decoded = match encoding.as_deref() {
        None | Some("") | Some("identity") => bytes.to_vec(),
        Some("gzip") | Some("x-gzip") => match gunzip(&bytes) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(error = %e, "gzip body failed to inflate; passing through");
                return Response::from_parts(parts, Body::from(bytes));
            }
        },
        Some(other) => {
            debug!(encoding = %other, "unsupported content-encoding; skipping injection");
            return Response::from_parts(parts, Body::from(bytes));
        }
    };

    let tag = state.current_tag().await;
    let rewritten = insert_tag(&decoded, &tag);

    parts.headers.remove(header::CONTENT_ENCODING);
    parts.headers.insert(
        header::CONTENT_LENGTH,
        header::HeaderValue::from(rewritten.len()),
    );

    Response::from_parts(parts, Body::from(rewritten))
}
