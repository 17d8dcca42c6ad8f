// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Manifest Schema
//!
//! The manifest is an optional declarative file describing the variables an
//! application expects (tier, type, constraints) plus a `settings` block of
//! lowest-priority gateway defaults. It is parsed by the hand-rolled subset
//! parser in [`parser`] and validated against the classified set at startup
//! and on every hot reload.
//!
//! ```yaml
//! version: 1
//!
//! settings:
//!   strict: true
//!   hot_reload:
//!     mode: poll
//!     interval: 30
//!
//! variables:
//!   API_URL:
//!     tier: public
//!     type: url
//!     required: true
//!   MODE:
//!     tier: public
//!     enum: [dev, staging, prod]
//!     default: dev
//! ```

pub mod parser;
pub mod validate;

use std::collections::BTreeMap;
use std::path::Path;

use regex::Regex;
use thiserror::Error;

use crate::classify::Tier;
use parser::{Node, Scalar};

/// Errors while reading, parsing, or lowering a manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("{0}")]
    Schema(String),
    #[error("cannot read manifest: {0}")]
    Io(#[from] std::io::Error),
}

fn schema_err(message: impl Into<String>) -> ManifestError {
    ManifestError::Schema(message.into())
}

/// Declared expectations for one variable.
#[derive(Debug, Clone)]
pub struct ManifestDecl {
    pub tier: Option<Tier>,
    pub var_type: VarType,
    pub required: bool,
    pub default: Option<String>,
    /// Anchored at load time; matching is full-match.
    pub pattern: Option<Regex>,
    pub enum_values: Vec<String>,
    pub deprecated: bool,
    pub description: Option<String>,
}

impl Default for ManifestDecl {
    fn default() -> Self {
        Self {
            tier: None,
            var_type: VarType::String,
            required: false,
            default: None,
            pattern: None,
            enum_values: Vec::new(),
            deprecated: false,
            description: None,
        }
    }
}

/// Declared value type for a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarType {
    String,
    Number,
    Boolean,
    Url,
    Enum,
}

impl VarType {
    fn from_text(text: &str) -> Option<Self> {
        match text {
            "string" => Some(VarType::String),
            "number" => Some(VarType::Number),
            "boolean" | "bool" => Some(VarType::Boolean),
            "url" => Some(VarType::Url),
            "enum" => Some(VarType::Enum),
            _ => None,
        }
    }
}

/// Gateway settings supplied by the manifest. These are the *lowest* priority
/// configuration layer, below environment variables.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub strict: Option<bool>,
    pub hot_reload_mode: Option<String>,
    pub hot_reload_interval: Option<u64>,
    pub session_ttl: Option<u64>,
    pub session_rate: Option<u32>,
    pub allowed_origins: Option<Vec<String>>,
    pub payload_ttl: Option<u64>,
}

/// A loaded manifest: settings plus per-variable declarations.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    pub version: u32,
    pub settings: Settings,
    pub variables: BTreeMap<String, ManifestDecl>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let input = std::fs::read_to_string(path)?;
        Self::from_str(&input)
    }

    pub fn from_str(input: &str) -> Result<Self, ManifestError> {
        lower(parser::parse_document(input)?)
    }
}

fn expect_scalar<'a>(node: &'a Node, context: &str) -> Result<&'a Scalar, ManifestError> {
    match node {
        Node::Scalar(s) => Ok(s),
        other => Err(schema_err(format!(
            "{context}: expected a scalar, found a {}",
            other.describe()
        ))),
    }
}

fn expect_mapping<'a>(
    node: &'a Node,
    context: &str,
) -> Result<&'a [(String, Node)], ManifestError> {
    match node {
        Node::Mapping(entries) => Ok(entries),
        other => Err(schema_err(format!(
            "{context}: expected a mapping, found a {}",
            other.describe()
        ))),
    }
}

fn expect_sequence<'a>(node: &'a Node, context: &str) -> Result<&'a [Scalar], ManifestError> {
    match node {
        Node::Sequence(items) => Ok(items),
        other => Err(schema_err(format!(
            "{context}: expected a sequence, found a {}",
            other.describe()
        ))),
    }
}

fn expect_bool(node: &Node, context: &str) -> Result<bool, ManifestError> {
    expect_scalar(node, context)?
        .as_bool()
        .ok_or_else(|| schema_err(format!("{context}: expected true or false")))
}

fn expect_u64(node: &Node, context: &str) -> Result<u64, ManifestError> {
    expect_scalar(node, context)?
        .as_u64()
        .ok_or_else(|| schema_err(format!("{context}: expected a non-negative integer")))
}

fn expect_text(node: &Node, context: &str) -> Result<String, ManifestError> {
    Ok(expect_scalar(node, context)?.to_text())
}

fn lower_settings(entries: &[(String, Node)]) -> Result<Settings, ManifestError> {
    let mut settings = Settings::default();
    for (key, node) in entries {
        match key.as_str() {
            "strict" => settings.strict = Some(expect_bool(node, "settings.strict")?),
            "hot_reload" => {
                for (sub, value) in expect_mapping(node, "settings.hot_reload")? {
                    match sub.as_str() {
                        "mode" => {
                            settings.hot_reload_mode =
                                Some(expect_text(value, "settings.hot_reload.mode")?)
                        }
                        "interval" => {
                            settings.hot_reload_interval =
                                Some(expect_u64(value, "settings.hot_reload.interval")?)
                        }
                        other => {
                            return Err(schema_err(format!(
                                "settings.hot_reload: unknown key \"{other}\""
                            )))
                        }
                    }
                }
            }
            "session_key" => {
                for (sub, value) in expect_mapping(node, "settings.session_key")? {
                    match sub.as_str() {
                        "ttl" => {
                            settings.session_ttl =
                                Some(expect_u64(value, "settings.session_key.ttl")?)
                        }
                        "rate_limit" => {
                            settings.session_rate =
                                Some(expect_u64(value, "settings.session_key.rate_limit")? as u32)
                        }
                        other => {
                            return Err(schema_err(format!(
                                "settings.session_key: unknown key \"{other}\""
                            )))
                        }
                    }
                }
            }
            "allowed_origins" => {
                let origins = expect_sequence(node, "settings.allowed_origins")?
                    .iter()
                    .map(|s| s.to_text())
                    .collect();
                settings.allowed_origins = Some(origins);
            }
            "payload" => {
                for (sub, value) in expect_mapping(node, "settings.payload")? {
                    match sub.as_str() {
                        "ttl" => {
                            settings.payload_ttl = Some(expect_u64(value, "settings.payload.ttl")?)
                        }
                        other => {
                            return Err(schema_err(format!(
                                "settings.payload: unknown key \"{other}\""
                            )))
                        }
                    }
                }
            }
            other => return Err(schema_err(format!("settings: unknown key \"{other}\""))),
        }
    }
    Ok(settings)
}

fn lower_decl(name: &str, entries: &[(String, Node)]) -> Result<ManifestDecl, ManifestError> {
    let mut decl = ManifestDecl::default();
    let mut explicit_type = false;

    for (key, node) in entries {
        let context = format!("variables.{name}.{key}");
        match key.as_str() {
            "tier" => {
                let text = expect_text(node, &context)?;
                decl.tier = Some(match text.as_str() {
                    "public" => Tier::Public,
                    "sensitive" => Tier::Sensitive,
                    "server" => Tier::Server,
                    other => {
                        return Err(schema_err(format!(
                            "{context}: unknown tier \"{other}\""
                        )))
                    }
                });
            }
            "type" => {
                let text = expect_text(node, &context)?;
                decl.var_type = VarType::from_text(&text)
                    .ok_or_else(|| schema_err(format!("{context}: unknown type \"{text}\"")))?;
                explicit_type = true;
            }
            "required" => decl.required = expect_bool(node, &context)?,
            "default" => decl.default = Some(expect_text(node, &context)?),
            "pattern" => {
                let raw = expect_text(node, &context)?;
                let anchored = format!("^(?:{raw})$");
                decl.pattern = Some(Regex::new(&anchored).map_err(|e| {
                    schema_err(format!("{context}: invalid pattern: {e}"))
                })?);
            }
            "enum" => {
                decl.enum_values = expect_sequence(node, &context)?
                    .iter()
                    .map(|s| s.to_text())
                    .collect();
            }
            "deprecated" => decl.deprecated = expect_bool(node, &context)?,
            "description" => decl.description = Some(expect_text(node, &context)?),
            other => {
                return Err(schema_err(format!(
                    "variables.{name}: unknown key \"{other}\""
                )))
            }
        }
    }

    if !decl.enum_values.is_empty() && !explicit_type {
        decl.var_type = VarType::Enum;
    }
    if decl.var_type == VarType::Enum && decl.enum_values.is_empty() {
        return Err(schema_err(format!(
            "variables.{name}: enum type requires declared enum values"
        )));
    }

    Ok(decl)
}

fn lower(root: Vec<(String, Node)>) -> Result<Manifest, ManifestError> {
    let mut manifest = Manifest {
        version: 1,
        ..Manifest::default()
    };

    for (key, node) in &root {
        match key.as_str() {
            "version" => {
                manifest.version = expect_u64(node, "version")? as u32;
                if manifest.version != 1 {
                    return Err(schema_err(format!(
                        "unsupported manifest version {}",
                        manifest.version
                    )));
                }
            }
            "settings" => {
                manifest.settings = lower_settings(expect_mapping(node, "settings")?)?;
            }
            "variables" => {
                for (name, decl_node) in expect_mapping(node, "variables")? {
                    let entries = expect_mapping(decl_node, &format!("variables.{name}"))?;
                    let decl = lower_decl(name, entries)?;
                    manifest.variables.insert(name.clone(), decl);
                }
            }
            other => return Err(schema_err(format!("unknown root key \"{other}\""))),
        }
    }

    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
version: 1

settings:
  strict: true
  hot_reload:
    mode: poll
    interval: 15
  session_key:
    ttl: 60
    rate_limit: 5
  allowed_origins:
    - https://app.example.com
    - https://admin.example.com
  payload:
    ttl: 600

variables:
  API_URL:
    tier: public
    type: url
    required: true
    description: "Backend API base URL"
  KEY:
    tier: sensitive
    pattern: "[a-z0-9]+"
  MODE:
    tier: public
    enum: [dev, staging, prod]
    default: dev
  OLD_FLAG:
    tier: public
    deprecated: true
"#;

    #[test]
    fn lowers_full_manifest() {
        let manifest = Manifest::from_str(SAMPLE).unwrap();
        assert_eq!(manifest.version, 1);

        let settings = &manifest.settings;
        assert_eq!(settings.strict, Some(true));
        assert_eq!(settings.hot_reload_mode.as_deref(), Some("poll"));
        assert_eq!(settings.hot_reload_interval, Some(15));
        assert_eq!(settings.session_ttl, Some(60));
        assert_eq!(settings.session_rate, Some(5));
        assert_eq!(settings.payload_ttl, Some(600));
        assert_eq!(
            settings.allowed_origins.as_deref(),
            Some(
                &[
                    "https://app.example.com".to_string(),
                    "https://admin.example.com".to_string()
                ][..]
            )
        );

        let api_url = &manifest.variables["API_URL"];
        assert_eq!(api_url.tier, Some(Tier::Public));
        assert_eq!(api_url.var_type, VarType::Url);
        assert!(api_url.required);

        let key = &manifest.variables["KEY"];
        assert_eq!(key.tier, Some(Tier::Sensitive));
        assert!(key.pattern.as_ref().unwrap().is_match("abc123"));
        assert!(!key.pattern.as_ref().unwrap().is_match("abc 123"));
        // Full-match semantics: a substring match is not enough.
        assert!(!key.pattern.as_ref().unwrap().is_match("abc123!"));

        let mode = &manifest.variables["MODE"];
        assert_eq!(mode.var_type, VarType::Enum);
        assert_eq!(mode.enum_values, ["dev", "staging", "prod"]);
        assert_eq!(mode.default.as_deref(), Some("dev"));

        assert!(manifest.variables["OLD_FLAG"].deprecated);
    }

    #[test]
    fn enum_without_values_is_rejected() {
        let err = Manifest::from_str("variables:\n  X:\n    type: enum\n").unwrap_err();
        assert!(err.to_string().contains("enum"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(Manifest::from_str("bogus: 1\n").is_err());
        assert!(Manifest::from_str("settings:\n  bogus: 1\n").is_err());
        assert!(Manifest::from_str("variables:\n  X:\n    bogus: 1\n").is_err());
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let err = Manifest::from_str("version: 2\n").unwrap_err();
        assert!(err.to_string().contains("unsupported"));
    }

    #[test]
    fn invalid_pattern_is_rejected_at_load() {
        let err = Manifest::from_str("variables:\n  X:\n    pattern: \"[\"\n").unwrap_err();
        assert!(err.to_string().contains("invalid pattern"));
    }

    #[test]
    fn empty_manifest_is_valid() {
        let manifest = Manifest::from_str("").unwrap();
        assert!(manifest.variables.is_empty());
        assert!(manifest.settings.strict.is_none());
    }
}
