// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Validation of a classified set against the manifest's declarations.
//!
//! All violations are accumulated into one combined error rather than
//! stopping at the first; an operator fixing a broken deployment should see
//! the complete list in a single pass. Deprecated-variable usage is a
//! warning, never an error.

use url::Url;

use crate::classify::{ClassifiedSet, Variable};
use crate::error::StartupError;

use super::{Manifest, ManifestDecl, VarType};

/// Literal forms accepted for boolean-typed variables, case-insensitively.
const BOOLEAN_LITERALS: &[&str] = &["true", "false", "yes", "no", "on", "off", "1", "0"];

fn type_violation(name: &str, decl: &ManifestDecl, value: &str) -> Option<String> {
    match decl.var_type {
        VarType::String => None,
        VarType::Number => {
            if value.parse::<f64>().is_ok() {
                None
            } else {
                Some(format!("{name}: expected a number, got a non-numeric value"))
            }
        }
        VarType::Boolean => {
            if BOOLEAN_LITERALS
                .iter()
                .any(|lit| lit.eq_ignore_ascii_case(value))
            {
                None
            } else {
                Some(format!(
                    "{name}: expected a boolean literal (true/false/yes/no/on/off/1/0)"
                ))
            }
        }
        VarType::Url => match Url::parse(value) {
            Ok(url) if url.has_host() => None,
            _ => Some(format!("{name}: expected a URL with scheme and host")),
        },
        VarType::Enum => {
            if decl.enum_values.iter().any(|v| v == value) {
                None
            } else {
                Some(format!(
                    "{name}: value is not one of [{}]",
                    decl.enum_values.join(", ")
                ))
            }
        }
    }
}

/// Check every declared variable against the classified set.
///
/// Returns the list of deprecation warnings on success; fails with
/// [`StartupError::ManifestViolations`] carrying every violation found.
pub fn validate(manifest: &Manifest, set: &ClassifiedSet) -> Result<Vec<String>, StartupError> {
    let mut violations = Vec::new();
    let mut warnings = Vec::new();

    for (name, decl) in &manifest.variables {
        let Some(variable) = set.get(name) else {
            if decl.required && decl.default.is_none() {
                violations.push(format!("{name}: required but absent"));
            }
            continue;
        };

        if decl.deprecated {
            let warning = format!("{name}: deprecated variable is still set");
            tracing::warn!(variable = %name, "deprecated variable is still set");
            warnings.push(warning);
        }

        if let Some(declared_tier) = decl.tier {
            if variable.tier != declared_tier {
                violations.push(format!(
                    "{name}: declared tier {declared_tier} but classified as {}",
                    variable.tier
                ));
            }
        }

        if let Some(violation) = type_violation(name, decl, &variable.value) {
            violations.push(violation);
        }

        if let Some(pattern) = &decl.pattern {
            if !pattern.is_match(&variable.value) {
                violations.push(format!(
                    "{name}: value does not match pattern {}",
                    pattern.as_str()
                ));
            }
        }
    }

    if violations.is_empty() {
        Ok(warnings)
    } else {
        Err(StartupError::ManifestViolations(violations))
    }
}

/// Materialize declared defaults for absent variables, returning the widened
/// set. Names here cannot collide: only absent names are added.
pub fn apply_defaults(manifest: &Manifest, set: &ClassifiedSet) -> ClassifiedSet {
    let mut widened = set.clone();
    for (name, decl) in &manifest.variables {
        let (Some(default), None) = (&decl.default, set.get(name)) else {
            continue;
        };
        let tier = decl.tier.unwrap_or(crate::classify::Tier::Public);
        widened.push(Variable {
            name: name.clone(),
            value: default.clone(),
            tier,
            original_key: format!("{}{}", tier.prefix(), name),
        });
    }
    widened
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{classify, Tier};
    use crate::manifest::Manifest;

    fn classified(pairs: &[(&str, &str)]) -> ClassifiedSet {
        let raw: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        classify(&raw).unwrap()
    }

    fn violations(err: StartupError) -> Vec<String> {
        match err {
            StartupError::ManifestViolations(v) => v,
            other => panic!("expected ManifestViolations, got {other:?}"),
        }
    }

    #[test]
    fn valid_set_passes_with_no_warnings() {
        let manifest = Manifest::from_str(
            "variables:\n  API_URL:\n    tier: public\n    type: url\n    required: true\n",
        )
        .unwrap();
        let set = classified(&[("REP_PUBLIC_API_URL", "https://api.example.com")]);
        assert!(validate(&manifest, &set).unwrap().is_empty());
    }

    #[test]
    fn required_and_absent_is_a_violation() {
        let manifest =
            Manifest::from_str("variables:\n  API_URL:\n    required: true\n").unwrap();
        let errs = violations(validate(&manifest, &classified(&[])).unwrap_err());
        assert_eq!(errs, ["API_URL: required but absent"]);
    }

    #[test]
    fn required_with_default_is_satisfied_when_absent() {
        let manifest = Manifest::from_str(
            "variables:\n  MODE:\n    required: true\n    default: dev\n",
        )
        .unwrap();
        assert!(validate(&manifest, &classified(&[])).is_ok());
    }

    #[test]
    fn all_violations_accumulate() {
        let manifest = Manifest::from_str(
            "variables:\n  A:\n    type: number\n  B:\n    type: url\n  C:\n    required: true\n",
        )
        .unwrap();
        let set = classified(&[("REP_PUBLIC_A", "not-a-number"), ("REP_PUBLIC_B", "nohost")]);
        let errs = violations(validate(&manifest, &set).unwrap_err());
        assert_eq!(errs.len(), 3);
    }

    #[test]
    fn boolean_literals_are_case_insensitive() {
        let manifest = Manifest::from_str("variables:\n  FLAG:\n    type: boolean\n").unwrap();
        for value in ["TRUE", "False", "YES", "off", "1", "0"] {
            let set = classified(&[("REP_PUBLIC_FLAG", value)]);
            assert!(validate(&manifest, &set).is_ok(), "literal {value} rejected");
        }
        let set = classified(&[("REP_PUBLIC_FLAG", "maybe")]);
        assert!(validate(&manifest, &set).is_err());
    }

    #[test]
    fn url_requires_scheme_and_host() {
        let manifest = Manifest::from_str("variables:\n  U:\n    type: url\n").unwrap();
        for bad in ["example.com", "mailto:me@example.com", "not a url"] {
            let set = classified(&[("REP_PUBLIC_U", bad)]);
            assert!(validate(&manifest, &set).is_err(), "accepted {bad}");
        }
        let set = classified(&[("REP_PUBLIC_U", "https://example.com/path")]);
        assert!(validate(&manifest, &set).is_ok());
    }

    #[test]
    fn enum_membership_is_enforced() {
        let manifest = Manifest::from_str(
            "variables:\n  MODE:\n    enum: [dev, prod]\n",
        )
        .unwrap();
        assert!(validate(&manifest, &classified(&[("REP_PUBLIC_MODE", "dev")])).is_ok());
        assert!(validate(&manifest, &classified(&[("REP_PUBLIC_MODE", "test")])).is_err());
    }

    #[test]
    fn pattern_is_full_match() {
        let manifest = Manifest::from_str(
            "variables:\n  ID:\n    pattern: \"[0-9]{4}\"\n",
        )
        .unwrap();
        assert!(validate(&manifest, &classified(&[("REP_PUBLIC_ID", "1234")])).is_ok());
        assert!(validate(&manifest, &classified(&[("REP_PUBLIC_ID", "12345")])).is_err());
        assert!(validate(&manifest, &classified(&[("REP_PUBLIC_ID", "x1234")])).is_err());
    }

    #[test]
    fn deprecated_and_present_warns_but_passes() {
        let manifest =
            Manifest::from_str("variables:\n  OLD:\n    deprecated: true\n").unwrap();
        let warnings = validate(&manifest, &classified(&[("REP_PUBLIC_OLD", "x")])).unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("OLD"));
    }

    #[test]
    fn tier_mismatch_is_a_violation() {
        let manifest =
            Manifest::from_str("variables:\n  KEY:\n    tier: sensitive\n").unwrap();
        let errs = violations(
            validate(&manifest, &classified(&[("REP_PUBLIC_KEY", "v")])).unwrap_err(),
        );
        assert!(errs[0].contains("declared tier sensitive"));
    }

    #[test]
    fn defaults_materialize_for_absent_variables() {
        let manifest = Manifest::from_str(
            "variables:\n  MODE:\n    tier: public\n    default: dev\n  SET:\n    default: ignored\n",
        )
        .unwrap();
        let set = classified(&[("REP_PUBLIC_SET", "explicit")]);
        let widened = apply_defaults(&manifest, &set);

        assert_eq!(widened.get("MODE").unwrap().value, "dev");
        assert_eq!(widened.get("MODE").unwrap().tier, Tier::Public);
        // An explicitly set variable keeps its value.
        assert_eq!(widened.get("SET").unwrap().value, "explicit");
    }
}
