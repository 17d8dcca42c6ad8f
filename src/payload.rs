// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Payload Builder
//!
//! Composes the classification and crypto outputs into the canonical wire
//! document and its embeddable markup form:
//!
//! ```json
//! { "public":    { "API_URL": "https://api.example.com" },
//!   "sensitive": "<base64 nonce||ciphertext||tag>",
//!   "_meta":     { "version", "injected_at", "integrity",
//!                  "key_endpoint"?, "hot_reload"?, "ttl" } }
//! ```
//!
//! One payload exists at a time per process; it is replaced atomically on
//! reload and read concurrently by every in-flight HTML response.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classify::ClassifiedSet;
use crate::crypto::{self, CryptoError, KeyBundle};

/// Wire protocol version carried in `_meta.version` and the tag attribute.
pub const PROTOCOL_VERSION: &str = "1.0";
/// Stable element id the client library queries for.
pub const ELEMENT_ID: &str = "rep-config";

/// `_meta` section of the wire document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PayloadMeta {
    pub version: String,
    pub injected_at: DateTime<Utc>,
    pub integrity: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_endpoint: Option<String>,
    #[serde(rename = "hot_reload", skip_serializing_if = "Option::is_none")]
    pub hot_reload_endpoint: Option<String>,
    pub ttl: u64,
}

/// The versioned wire document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Payload {
    pub public: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sensitive: Option<String>,
    #[serde(rename = "_meta")]
    pub meta: PayloadMeta,
}

/// Endpoint advertisement and TTL inputs for one build.
#[derive(Debug, Clone)]
pub struct PayloadOptions {
    pub key_endpoint: Option<String>,
    pub hot_reload_endpoint: Option<String>,
    pub ttl: u64,
}

/// A built payload together with the exact serialized form the SRI hash and
/// the markup were computed from.
#[derive(Debug, Clone)]
pub struct BuiltPayload {
    pub payload: Payload,
    /// The exact JSON text embedded in the markup (HTML-safe escaped).
    pub json: String,
    pub sri: String,
    pub script_tag: String,
}

/// `</` must not appear verbatim inside an HTML script element; `<\/` parses
/// to the same JSON string value.
fn html_safe(json: &str) -> String {
    json.replace("</", "<\\/")
}

/// Build the payload from a classified set.
///
/// The integrity token is computed over the public section first, then used
/// as the AAD when sealing the sensitive section: the token embedded in
/// `_meta` is byte-identical to the AAD, and a sensitive blob cannot be
/// replayed under a different public section.
pub fn build(
    set: &ClassifiedSet,
    keys: &KeyBundle,
    options: &PayloadOptions,
) -> Result<BuiltPayload, CryptoError> {
    let public = set.public_map();
    let sensitive_map = set.sensitive_map();

    let integrity = crypto::compute_integrity(&public, "", keys.hmac_secret());
    let blob = crypto::encrypt_sensitive(&sensitive_map, keys.encryption_key(), &integrity)?;

    let payload = Payload {
        public,
        sensitive: (!blob.is_empty()).then_some(blob),
        meta: PayloadMeta {
            version: PROTOCOL_VERSION.to_string(),
            injected_at: Utc::now(),
            integrity,
            key_endpoint: options.key_endpoint.clone(),
            hot_reload_endpoint: options.hot_reload_endpoint.clone(),
            ttl: options.ttl,
        },
    };

    let json = html_safe(&serde_json::to_string(&payload)?);
    let sri = crypto::compute_sri(json.as_bytes());
    let script_tag = format!(
        r#"<script type="application/json" id="{ELEMENT_ID}" data-rep-version="{PROTOCOL_VERSION}" data-integrity="{sri}">{json}</script>"#
    );

    Ok(BuiltPayload {
        payload,
        json,
        sri,
        script_tag,
    })
}
