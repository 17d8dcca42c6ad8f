// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Gateway self-configuration is read from `REP_GATEWAY_*` environment
//! variables. Those keys are reserved: the classifier never considers them
//! application variables.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `REP_GATEWAY_HOST` | Server bind address | `0.0.0.0` |
//! | `REP_GATEWAY_PORT` | Server bind port | `8080` |
//! | `REP_GATEWAY_UPSTREAM` | Reverse-proxy origin URL | unset |
//! | `REP_GATEWAY_STATIC_DIR` | Static file root | `./dist` |
//! | `REP_GATEWAY_ENV_FILE` | File-sourced variable base layer | unset |
//! | `REP_GATEWAY_MANIFEST` | Manifest path | `rep.manifest.yml` if present |
//! | `REP_GATEWAY_STRICT` | Guardrail strict mode | `false` |
//! | `REP_GATEWAY_RELOAD` | Reload mode (`off`/`watch`/`poll`/`signal`) | `signal` |
//! | `REP_GATEWAY_RELOAD_INTERVAL` | Poll interval in seconds | `30` |
//! | `REP_GATEWAY_SESSION_TTL` | Session key TTL in seconds | `30` |
//! | `REP_GATEWAY_SESSION_RATE` | Session requests per minute per IP | `10` |
//! | `REP_GATEWAY_ALLOWED_ORIGINS` | Comma-separated origin allow-list | empty |
//! | `REP_GATEWAY_PAYLOAD_TTL` | Payload `_meta.ttl` in seconds | `300` |
//! | `REP_GATEWAY_DOCS` | Mount Swagger UI at `/docs` | `false` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info` |
//!
//! Precedence: environment variable > manifest `settings` block > built-in
//! default. The manifest supplies *lowest*-priority values only.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use url::Url;

use crate::error::StartupError;
use crate::manifest::Settings;

pub const HOST_ENV: &str = "REP_GATEWAY_HOST";
pub const PORT_ENV: &str = "REP_GATEWAY_PORT";
pub const UPSTREAM_ENV: &str = "REP_GATEWAY_UPSTREAM";
pub const STATIC_DIR_ENV: &str = "REP_GATEWAY_STATIC_DIR";
pub const ENV_FILE_ENV: &str = "REP_GATEWAY_ENV_FILE";
pub const MANIFEST_ENV: &str = "REP_GATEWAY_MANIFEST";
pub const STRICT_ENV: &str = "REP_GATEWAY_STRICT";
pub const RELOAD_ENV: &str = "REP_GATEWAY_RELOAD";
pub const RELOAD_INTERVAL_ENV: &str = "REP_GATEWAY_RELOAD_INTERVAL";
pub const SESSION_TTL_ENV: &str = "REP_GATEWAY_SESSION_TTL";
pub const SESSION_RATE_ENV: &str = "REP_GATEWAY_SESSION_RATE";
pub const ALLOWED_ORIGINS_ENV: &str = "REP_GATEWAY_ALLOWED_ORIGINS";
pub const PAYLOAD_TTL_ENV: &str = "REP_GATEWAY_PAYLOAD_TTL";
pub const DOCS_ENV: &str = "REP_GATEWAY_DOCS";

/// Default manifest path probed when `REP_GATEWAY_MANIFEST` is unset.
pub const DEFAULT_MANIFEST: &str = "rep.manifest.yml";

/// Path of the session-key issuance endpoint.
pub const SESSION_KEY_PATH: &str = "/_rep/session-key";
/// Path of the streaming change-event endpoint.
pub const EVENTS_PATH: &str = "/_rep/events";
/// Path of the health endpoint.
pub const HEALTH_PATH: &str = "/_rep/health";

/// How reloads are triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadMode {
    Off,
    Watch,
    Poll,
    Signal,
}

impl ReloadMode {
    fn from_text(text: &str) -> Result<Self, StartupError> {
        match text.to_ascii_lowercase().as_str() {
            "off" | "none" => Ok(ReloadMode::Off),
            "watch" => Ok(ReloadMode::Watch),
            "poll" => Ok(ReloadMode::Poll),
            "signal" => Ok(ReloadMode::Signal),
            other => Err(StartupError::InvalidConfig(format!(
                "unknown reload mode \"{other}\" (expected off, watch, poll, or signal)"
            ))),
        }
    }
}

/// Where application traffic is served from.
#[derive(Debug, Clone)]
pub enum UpstreamMode {
    /// Serve files from a local static root.
    Static(PathBuf),
    /// Reverse-proxy to an origin server.
    Proxy(Url),
}

/// Fully resolved gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub upstream: UpstreamMode,
    pub env_file: Option<PathBuf>,
    pub manifest_path: Option<PathBuf>,
    pub strict: bool,
    pub reload: ReloadMode,
    pub reload_interval: Duration,
    pub session_ttl: Duration,
    pub session_rate: u32,
    pub allowed_origins: Vec<String>,
    pub payload_ttl: u64,
    pub docs: bool,
}

/// The environment layer alone, before manifest settings are merged beneath
/// it. `None` means "not set in the environment".
#[derive(Debug, Clone, Default)]
pub struct PartialConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub upstream: Option<Url>,
    pub static_dir: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    pub manifest_path: Option<PathBuf>,
    pub strict: Option<bool>,
    pub reload: Option<ReloadMode>,
    pub reload_interval: Option<u64>,
    pub session_ttl: Option<u64>,
    pub session_rate: Option<u32>,
    pub allowed_origins: Option<Vec<String>>,
    pub payload_ttl: Option<u64>,
    pub docs: Option<bool>,
}

fn parse_bool(name: &str, value: &str) -> Result<bool, StartupError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(StartupError::InvalidConfig(format!(
            "{name}: expected a boolean, got \"{value}\""
        ))),
    }
}

fn parse_num<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, StartupError> {
    value.parse().map_err(|_| {
        StartupError::InvalidConfig(format!("{name}: expected a number, got \"{value}\""))
    })
}

impl PartialConfig {
    /// Read the environment layer.
    pub fn from_env() -> Result<Self, StartupError> {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        let mut partial = PartialConfig {
            host: var(HOST_ENV),
            env_file: var(ENV_FILE_ENV).map(PathBuf::from),
            static_dir: var(STATIC_DIR_ENV).map(PathBuf::from),
            ..PartialConfig::default()
        };

        if let Some(port) = var(PORT_ENV) {
            partial.port = Some(parse_num(PORT_ENV, &port)?);
        }
        if let Some(upstream) = var(UPSTREAM_ENV) {
            let url = Url::parse(&upstream).map_err(|e| {
                StartupError::InvalidConfig(format!("{UPSTREAM_ENV}: {e}"))
            })?;
            partial.upstream = Some(url);
        }
        partial.manifest_path = match var(MANIFEST_ENV) {
            Some(path) => Some(PathBuf::from(path)),
            None => {
                let default = Path::new(DEFAULT_MANIFEST);
                default.exists().then(|| default.to_path_buf())
            }
        };
        if let Some(strict) = var(STRICT_ENV) {
            partial.strict = Some(parse_bool(STRICT_ENV, &strict)?);
        }
        if let Some(mode) = var(RELOAD_ENV) {
            partial.reload = Some(ReloadMode::from_text(&mode)?);
        }
        if let Some(interval) = var(RELOAD_INTERVAL_ENV) {
            partial.reload_interval = Some(parse_num(RELOAD_INTERVAL_ENV, &interval)?);
        }
        if let Some(ttl) = var(SESSION_TTL_ENV) {
            partial.session_ttl = Some(parse_num(SESSION_TTL_ENV, &ttl)?);
        }
        if let Some(rate) = var(SESSION_RATE_ENV) {
            partial.session_rate = Some(parse_num(SESSION_RATE_ENV, &rate)?);
        }
        if let Some(origins) = var(ALLOWED_ORIGINS_ENV) {
            partial.allowed_origins = Some(split_origins(&origins));
        }
        if let Some(ttl) = var(PAYLOAD_TTL_ENV) {
            partial.payload_ttl = Some(parse_num(PAYLOAD_TTL_ENV, &ttl)?);
        }
        if let Some(docs) = var(DOCS_ENV) {
            partial.docs = Some(parse_bool(DOCS_ENV, &docs)?);
        }

        Ok(partial)
    }

    /// Merge manifest settings beneath the environment layer and fill in
    /// built-in defaults.
    pub fn resolve(self, settings: Option<&Settings>) -> Result<GatewayConfig, StartupError> {
        let settings = settings.cloned().unwrap_or_default();

        let reload = match self.reload {
            Some(mode) => mode,
            None => match settings.hot_reload_mode.as_deref() {
                Some(text) => ReloadMode::from_text(text)?,
                None => ReloadMode::Signal,
            },
        };

        let upstream = match (self.upstream, self.static_dir) {
            (Some(url), None) => UpstreamMode::Proxy(url),
            (None, Some(dir)) => UpstreamMode::Static(dir),
            (None, None) => UpstreamMode::Static(PathBuf::from("./dist")),
            (Some(_), Some(_)) => {
                return Err(StartupError::InvalidConfig(format!(
                    "{UPSTREAM_ENV} and {STATIC_DIR_ENV} are mutually exclusive"
                )))
            }
        };

        Ok(GatewayConfig {
            host: self.host.unwrap_or_else(|| "0.0.0.0".to_string()),
            port: self.port.unwrap_or(8080),
            upstream,
            env_file: self.env_file,
            manifest_path: self.manifest_path,
            strict: self.strict.or(settings.strict).unwrap_or(false),
            reload,
            reload_interval: Duration::from_secs(
                self.reload_interval
                    .or(settings.hot_reload_interval)
                    .unwrap_or(30),
            ),
            session_ttl: Duration::from_secs(
                self.session_ttl.or(settings.session_ttl).unwrap_or(30),
            ),
            session_rate: self.session_rate.or(settings.session_rate).unwrap_or(10),
            allowed_origins: self
                .allowed_origins
                .or(settings.allowed_origins)
                .unwrap_or_default(),
            payload_ttl: self.payload_ttl.or(settings.payload_ttl).unwrap_or(300),
            docs: self.docs.unwrap_or(false),
        })
    }
}

fn split_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse a dotenv-subset file: `KEY=VALUE` lines, `#` comments, optional
/// single or double quotes around the value.
pub fn parse_env_file(input: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for line in input.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim().trim_start_matches("export ").trim();
        if key.is_empty() {
            continue;
        }
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
            .unwrap_or(value);
        pairs.push((key.to_string(), value.to_string()));
    }
    pairs
}

/// Build the merged variable source: the optional file layer first, overlaid
/// by the process environment. The environment always wins on conflict, and
/// environment keys are visited in sorted order for deterministic discovery.
pub fn merged_environment(env_file: Option<&Path>) -> Result<Vec<(String, String)>, StartupError> {
    let mut merged: Vec<(String, String)> = match env_file {
        Some(path) => parse_env_file(&std::fs::read_to_string(path)?),
        None => Vec::new(),
    };

    let process_env: BTreeMap<String, String> = std::env::vars().collect();
    for (key, value) in process_env {
        if let Some(existing) = merged.iter_mut().find(|(k, _)| *k == key) {
            existing.1 = value;
        } else {
            merged.push((key, value));
        }
    }

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_uses_built_in_defaults() {
        let config = PartialConfig::default().resolve(None).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert!(!config.strict);
        assert_eq!(config.reload, ReloadMode::Signal);
        assert_eq!(config.session_ttl, Duration::from_secs(30));
        assert_eq!(config.session_rate, 10);
        assert_eq!(config.payload_ttl, 300);
        assert!(matches!(config.upstream, UpstreamMode::Static(_)));
    }

    #[test]
    fn manifest_settings_sit_below_environment() {
        let settings = Settings {
            strict: Some(true),
            hot_reload_mode: Some("poll".to_string()),
            hot_reload_interval: Some(5),
            session_ttl: Some(120),
            session_rate: Some(3),
            allowed_origins: Some(vec!["https://app.example.com".to_string()]),
            payload_ttl: Some(900),
        };

        // No environment overrides: manifest settings apply.
        let config = PartialConfig::default().resolve(Some(&settings)).unwrap();
        assert!(config.strict);
        assert_eq!(config.reload, ReloadMode::Poll);
        assert_eq!(config.reload_interval, Duration::from_secs(5));
        assert_eq!(config.session_ttl, Duration::from_secs(120));
        assert_eq!(config.session_rate, 3);
        assert_eq!(config.payload_ttl, 900);

        // Environment overrides beat manifest settings.
        let partial = PartialConfig {
            strict: Some(false),
            session_ttl: Some(45),
            ..PartialConfig::default()
        };
        let config = partial.resolve(Some(&settings)).unwrap();
        assert!(!config.strict);
        assert_eq!(config.session_ttl, Duration::from_secs(45));
        // Untouched values still come from the manifest.
        assert_eq!(config.session_rate, 3);
    }

    #[test]
    fn upstream_and_static_dir_are_mutually_exclusive() {
        let partial = PartialConfig {
            upstream: Some(Url::parse("http://origin:3000").unwrap()),
            static_dir: Some(PathBuf::from("./dist")),
            ..PartialConfig::default()
        };
        assert!(matches!(
            partial.resolve(None),
            Err(StartupError::InvalidConfig(_))
        ));
    }

    #[test]
    fn unknown_reload_mode_is_rejected() {
        assert!(ReloadMode::from_text("sometimes").is_err());
        assert_eq!(ReloadMode::from_text("WATCH").unwrap(), ReloadMode::Watch);
    }

    #[test]
    fn env_file_parsing_handles_quotes_and_comments() {
        let parsed = parse_env_file(
            "# comment\nREP_PUBLIC_A=plain\nREP_PUBLIC_B=\"quoted value\"\nREP_PUBLIC_C='single'\n\nnot-a-pair\nexport REP_PUBLIC_D=exported\n",
        );
        assert_eq!(
            parsed,
            vec![
                ("REP_PUBLIC_A".to_string(), "plain".to_string()),
                ("REP_PUBLIC_B".to_string(), "quoted value".to_string()),
                ("REP_PUBLIC_C".to_string(), "single".to_string()),
                ("REP_PUBLIC_D".to_string(), "exported".to_string()),
            ]
        );
    }

    #[test]
    fn split_origins_trims_and_drops_empties() {
        assert_eq!(
            split_origins("https://a.example, https://b.example ,,"),
            vec![
                "https://a.example".to_string(),
                "https://b.example".to_string()
            ]
        );
    }
}
