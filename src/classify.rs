// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Trust-Tier Classification
//!
//! Partitions raw environment variables into three trust tiers by name
//! prefix, strips the prefixes, and enforces name uniqueness across tiers.
//!
//! | Prefix | Tier | Treatment |
//! |--------|------|-----------|
//! | `REP_PUBLIC_` | Public | transmitted in plaintext |
//! | `REP_SENSITIVE_` | Sensitive | AES-256-GCM encrypted, session-gated |
//! | `REP_SERVER_` | Server | never transmitted |
//! | `REP_GATEWAY_` | (reserved) | configures the gateway, never classified |
//!
//! Classification is all-or-nothing: if two raw keys strip to the same name,
//! even across different tiers, the whole pass fails. A public variable
//! silently shadowing a secret is worse than refusing to start.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use utoipa::ToSchema;

use crate::error::StartupError;

/// Prefix marking a variable as publicly transmissible.
pub const PUBLIC_PREFIX: &str = "REP_PUBLIC_";
/// Prefix marking a variable as sensitive (encrypted in transit).
pub const SENSITIVE_PREFIX: &str = "REP_SENSITIVE_";
/// Prefix marking a variable as server-only (never transmitted).
pub const SERVER_PREFIX: &str = "REP_SERVER_";
/// Reserved prefix for the gateway's own configuration.
pub const GATEWAY_PREFIX: &str = "REP_GATEWAY_";

/// Trust classification of a configuration variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Public,
    Sensitive,
    Server,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Public => "public",
            Tier::Sensitive => "sensitive",
            Tier::Server => "server",
        }
    }

    /// The raw-key prefix that maps to this tier.
    pub fn prefix(&self) -> &'static str {
        match self {
            Tier::Public => PUBLIC_PREFIX,
            Tier::Sensitive => SENSITIVE_PREFIX,
            Tier::Server => SERVER_PREFIX,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One classified configuration variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    /// Name with the tier prefix stripped. Unique across all tiers.
    pub name: String,
    pub value: String,
    pub tier: Tier,
    /// The raw key as it appeared in the environment.
    pub original_key: String,
}

/// The classified variables of one point in time, in discovery order.
///
/// Built once at startup and rebuilt wholesale on reload; never mutated in
/// place while a request may be reading it.
#[derive(Debug, Clone, Default)]
pub struct ClassifiedSet {
    variables: Vec<Variable>,
}

impl ClassifiedSet {
    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.variables.iter()
    }

    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.name == name)
    }

    pub fn count(&self, tier: Tier) -> usize {
        self.variables.iter().filter(|v| v.tier == tier).count()
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Name -> value map for one tier, sorted by name.
    pub fn tier_map(&self, tier: Tier) -> BTreeMap<String, String> {
        self.variables
            .iter()
            .filter(|v| v.tier == tier)
            .map(|v| (v.name.clone(), v.value.clone()))
            .collect()
    }

    pub fn public_map(&self) -> BTreeMap<String, String> {
        self.tier_map(Tier::Public)
    }

    pub fn sensitive_map(&self) -> BTreeMap<String, String> {
        self.tier_map(Tier::Sensitive)
    }

    /// Append a variable that is known not to collide (manifest defaults).
    pub(crate) fn push(&mut self, variable: Variable) {
        self.variables.push(variable);
    }
}

fn tier_of(key: &str) -> Option<(Tier, &str)> {
    for tier in [Tier::Public, Tier::Sensitive, Tier::Server] {
        if let Some(name) = key.strip_prefix(tier.prefix()) {
            return Some((tier, name));
        }
    }
    None
}

/// Classify a merged key -> value sequence (discovery order preserved).
///
/// Keys carrying the reserved [`GATEWAY_PREFIX`] and keys without any tier
/// prefix are ignored. Fails the instant two keys strip to the same name;
/// no partial set is produced.
pub fn classify(raw: &[(String, String)]) -> Result<ClassifiedSet, StartupError> {
    let mut set = ClassifiedSet::default();
    let mut seen: HashMap<String, String> = HashMap::new();

    for (key, value) in raw {
        if key.starts_with(GATEWAY_PREFIX) {
            continue;
        }
        let Some((tier, name)) = tier_of(key) else {
            continue;
        };
        if name.is_empty() {
            tracing::warn!(key = %key, "ignoring variable with empty name after prefix strip");
            continue;
        }
        if let Some(first) = seen.get(name) {
            return Err(StartupError::NameCollision {
                name: name.to_string(),
                first: first.clone(),
                second: key.clone(),
            });
        }
        seen.insert(name.to_string(), key.clone());
        set.push(Variable {
            name: name.to_string(),
            value: value.clone(),
            tier,
            original_key: key.clone(),
        });
    }

    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn classifies_by_prefix_and_strips() {
        let set = classify(&vars(&[
            ("REP_PUBLIC_API_URL", "https://api.example.com"),
            ("REP_SENSITIVE_KEY", "secret123"),
            ("REP_SERVER_DB_DSN", "postgres://db"),
        ]))
        .unwrap();

        assert_eq!(set.len(), 3);
        let api_url = set.get("API_URL").unwrap();
        assert_eq!(api_url.tier, Tier::Public);
        assert_eq!(api_url.value, "https://api.example.com");
        assert_eq!(api_url.original_key, "REP_PUBLIC_API_URL");
        assert_eq!(set.get("KEY").unwrap().tier, Tier::Sensitive);
        assert_eq!(set.get("DB_DSN").unwrap().tier, Tier::Server);
    }

    #[test]
    fn ignores_unprefixed_and_gateway_keys() {
        let set = classify(&vars(&[
            ("PATH", "/usr/bin"),
            ("REP_GATEWAY_PORT", "9000"),
            ("REP_PUBLIC_MODE", "dev"),
        ]))
        .unwrap();

        assert_eq!(set.len(), 1);
        assert!(set.get("MODE").is_some());
        assert!(set.get("PORT").is_none());
    }

    #[test]
    fn cross_tier_collision_fails_with_no_partial_set() {
        let result = classify(&vars(&[
            ("REP_PUBLIC_TOKEN", "visible"),
            ("REP_SENSITIVE_TOKEN", "hidden"),
        ]));

        match result {
            Err(StartupError::NameCollision { name, first, second }) => {
                assert_eq!(name, "TOKEN");
                assert_eq!(first, "REP_PUBLIC_TOKEN");
                assert_eq!(second, "REP_SENSITIVE_TOKEN");
            }
            other => panic!("expected NameCollision, got {other:?}"),
        }
    }

    #[test]
    fn same_tier_collision_also_fails() {
        // Cannot happen from a real environment (identical raw keys), but the
        // merged file+env layer could produce it through a bug upstream.
        let result = classify(&vars(&[
            ("REP_PUBLIC_A", "1"),
            ("REP_PUBLIC_A", "2"),
        ]));
        assert!(matches!(result, Err(StartupError::NameCollision { .. })));
    }

    #[test]
    fn discovery_order_is_preserved() {
        let set = classify(&vars(&[
            ("REP_PUBLIC_Z", "1"),
            ("REP_PUBLIC_A", "2"),
            ("REP_SENSITIVE_M", "3"),
        ]))
        .unwrap();

        let names: Vec<&str> = set.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, ["Z", "A", "M"]);
    }

    #[test]
    fn tier_maps_are_sorted() {
        let set = classify(&vars(&[
            ("REP_PUBLIC_Z", "26"),
            ("REP_PUBLIC_A", "1"),
        ]))
        .unwrap();

        let public_map = set.public_map();
        let keys: Vec<&String> = public_map.keys().collect();
        assert_eq!(keys, ["A", "Z"]);
    }

    #[test]
    fn empty_stripped_name_is_ignored() {
        let set = classify(&vars(&[("REP_PUBLIC_", "oops")])).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn tier_counts() {
        let set = classify(&vars(&[
            ("REP_PUBLIC_A", "1"),
            ("REP_PUBLIC_B", "2"),
            ("REP_SENSITIVE_C", "3"),
        ]))
        .unwrap();
        assert_eq!(set.count(Tier::Public), 2);
        assert_eq!(set.count(Tier::Sensitive), 1);
        assert_eq!(set.count(Tier::Server), 0);
    }
}
