// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Error types for the gateway.
//!
//! Two families exist and do not mix:
//!
//! - [`StartupError`] - fatal during startup (and during reload, where it is
//!   logged and the previous payload stays in effect). The process must not
//!   begin serving traffic on a startup error.
//! - [`ApiError`] - request-local HTTP errors returned by the gateway's own
//!   endpoints. These never terminate the process.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::crypto::CryptoError;
use crate::manifest::ManifestError;

/// Fatal startup/reload errors. Each variant maps to one hard gate in the
/// orchestrator's startup sequence.
#[derive(Debug, Error)]
pub enum StartupError {
    /// Two raw keys stripped to the same variable name. Classification is
    /// all-or-nothing; silent shadowing across tiers must never happen.
    #[error("variable name collision after prefix stripping: \"{name}\" ({first} vs {second})")]
    NameCollision {
        name: String,
        first: String,
        second: String,
    },

    /// Manifest file could not be read or parsed.
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    /// One or more declared constraints failed against the classified set.
    #[error("manifest validation failed:\n  {}", .0.join("\n  "))]
    ManifestViolations(Vec<String>),

    /// Strict mode upgraded guardrail warnings into a refusal to start.
    #[error("guardrail blocked startup in strict mode: {0} finding(s)")]
    GuardrailBlocked(usize),

    /// A gateway configuration value could not be interpreted.
    #[error("invalid gateway configuration: {0}")]
    InvalidConfig(String),

    /// Payload construction failed inside the crypto engine.
    #[error("payload build failed: {0}")]
    Crypto(#[from] CryptoError),

    /// Filesystem or listener error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Request-local HTTP error with a JSON `{"error": ...}` body.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn too_many_requests(message: impl Into<String>) -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, message)
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}
