//! Copyright (C) 2026 Pedro Henrique / phkaiser13
//!
//! Merges the `defaults` block into each named profile and validates the
//! result. The `dependsOn` relation between profiles forms a DAG,
//! represented here as a plain adjacency map (`BTreeMap<String,
//! Vec<String>>`) rather than a materialized node-object graph, walked with
//! a gray/black-coloring DFS.
//!
//! SPDX-License-Identifier: Apache-2.0

use gatewaysync_api::{DesignerSessionPolicy, Mapping, ProfileSpec, SyncDefaults};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_SYNC_PERIOD: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResolvedProfile {
    pub name: String,
    pub mappings: Vec<Mapping>,
    pub vars: BTreeMap<String, String>,
    pub exclude_patterns: Vec<String>,
    pub sync_period: Duration,
    pub dry_run: bool,
    pub designer_session_policy: DesignerSessionPolicy,
    pub paused: bool,
    pub depends_on: Vec<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("profile '{profile}' mapping path '{path}' must not be absolute")]
    AbsolutePath { profile: String, path: String },
    #[error("profile '{profile}' mapping path '{path}' must not contain '..' segments")]
    ParentTraversal { profile: String, path: String },
    #[error("profile '{profile}' var key '{key}' is not a valid identifier")]
    InvalidVarKey { profile: String, key: String },
    #[error("profile '{profile}' depends on unknown profile '{target}'")]
    UnknownDependency { profile: String, target: String },
    #[error("cyclic dependsOn: {}", .0.join("/"))]
    CycleDetected(Vec<String>),
}

/// Resolves every profile against `defaults`. Returns resolved profiles
/// keyed by name, or the first validation error encountered (profiles are
/// validated in name order for deterministic error reporting).
pub fn resolve(
    defaults: &SyncDefaults,
    profiles: &BTreeMap<String, ProfileSpec>,
) -> Result<BTreeMap<String, ResolvedProfile>, Error> {
    validate_var_keys("defaults", &defaults.vars)?;

    if let Some(cycle) = detect_cycle(profiles) {
        return Err(Error::CycleDetected(cycle));
    }

    let mut resolved = BTreeMap::new();
    for (name, spec) in profiles {
        resolved.insert(name.clone(), resolve_one(defaults, name, spec, profiles)?);
    }
    Ok(resolved)
}

fn resolve_one(
    defaults: &SyncDefaults,
    name: &str,
    spec: &ProfileSpec,
    all_profiles: &BTreeMap<String, ProfileSpec>,
) -> Result<ResolvedProfile, Error> {
    for mapping in &spec.mappings {
        validate_mapping_path(name, &mapping.source)?;
        validate_mapping_path(name, &mapping.destination)?;
    }

    let mut vars = defaults.vars.clone();
    if let Some(profile_vars) = &spec.vars {
        validate_var_keys(name, profile_vars)?;
        for (k, v) in profile_vars {
            vars.insert(k.clone(), v.clone());
        }
    }

    let mut exclude_patterns = defaults.exclude_patterns.clone();
    if let Some(extra) = &spec.exclude_patterns {
        exclude_patterns.extend(extra.iter().cloned());
    }

    let sync_period = spec
        .sync_period_seconds
        .or(defaults.sync_period_seconds)
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_SYNC_PERIOD);

    let dry_run = spec.dry_run.or(defaults.dry_run).unwrap_or(false);

    let designer_session_policy = spec
        .designer_session_policy
        .or(defaults.designer_session_policy)
        .unwrap_or_default();

    let paused = spec.paused.or(defaults.paused).unwrap_or(false);

    let depends_on = spec.depends_on.clone().unwrap_or_default();
    for dep in &depends_on {
        if !all_profiles.contains_key(dep) {
            return Err(Error::UnknownDependency {
                profile: name.to_string(),
                target: dep.clone(),
            });
        }
    }

    Ok(ResolvedProfile {
        name: name.to_string(),
        mappings: spec.mappings.clone(),
        vars,
        exclude_patterns,
        sync_period,
        dry_run,
        designer_session_policy,
        paused,
        depends_on,
    })
}

fn validate_mapping_path(profile: &str, path: &str) -> Result<(), Error> {
    if path.starts_with('/') {
        return Err(Error::AbsolutePath {
            profile: profile.to_string(),
            path: path.to_string(),
        });
    }
    if path.split('/').any(|segment| segment == "..") {
        return Err(Error::ParentTraversal {
            profile: profile.to_string(),
            path: path.to_string(),
        });
    }
    Ok(())
}

fn validate_var_keys(profile: &str, vars: &BTreeMap<String, String>) -> Result<(), Error> {
    for key in vars.keys() {
        if !template_resolver::is_valid_var_key(key) {
            return Err(Error::InvalidVarKey {
                profile: profile.to_string(),
                key: key.clone(),
            });
        }
    }
    Ok(())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Gray/black-coloring DFS over the `dependsOn` adjacency map. Returns the
/// cycle path (including the repeated node at both ends) on the first cycle
/// found; `None` if the graph is acyclic. Unknown dependency targets are
/// reported separately by `resolve_one`, not treated as cycle edges here.
fn detect_cycle(profiles: &BTreeMap<String, ProfileSpec>) -> Option<Vec<String>> {
    let mut color: BTreeMap<String, Color> = profiles.keys().map(|k| (k.clone(), Color::White)).collect();

    for start in profiles.keys() {
        if color[start] == Color::White {
            let mut path = Vec::new();
            if let Some(cycle) = visit(start, profiles, &mut color, &mut path) {
                return Some(cycle);
            }
        }
    }
    None
}

fn visit(
    node: &str,
    profiles: &BTreeMap<String, ProfileSpec>,
    color: &mut BTreeMap<String, Color>,
    path: &mut Vec<String>,
) -> Option<Vec<String>> {
    color.insert(node.to_string(), Color::Gray);
    path.push(node.to_string());

    if let Some(spec) = profiles.get(node) {
        if let Some(deps) = &spec.depends_on {
            for dep in deps {
                match color.get(dep.as_str()) {
                    Some(Color::Gray) => {
                        let idx = path.iter().position(|n| n == dep).unwrap_or(0);
                        let mut cycle = path[idx..].to_vec();
                        cycle.push(dep.clone());
                        return Some(cycle);
                    }
                    Some(Color::Black) | None => continue,
                    Some(Color::White) => {
                        if let Some(cycle) = visit(dep, profiles, color, path) {
                            return Some(cycle);
                        }
                    }
                }
            }
        }
    }

    path.pop();
    color.insert(node.to_string(), Color::Black);
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatewaysync_api::{Mapping, MappingType};

    fn mapping(source: &str, destination: &str) -> Mapping {
        Mapping {
            source: source.to_string(),
            destination: destination.to_string(),
            r#type: MappingType::Dir,
            required: true,
            transform: None,
        }
    }

    fn profile(mappings: Vec<Mapping>, depends_on: Option<Vec<&str>>) -> ProfileSpec {
        ProfileSpec {
            mappings,
            depends_on: depends_on.map(|v| v.into_iter().map(String::from).collect()),
            ..Default::default()
        }
    }

    #[test]
    fn vars_merge_per_key() {
        let mut defaults = SyncDefaults::default();
        defaults.vars.insert("Region".to_string(), "us".to_string());
        defaults.vars.insert("Tier".to_string(), "base".to_string());

        let mut profiles = BTreeMap::new();
        let mut p = profile(vec![mapping("src", "dst")], None);
        p.vars = Some(BTreeMap::from([("Tier".to_string(), "gold".to_string())]));
        profiles.insert("line1".to_string(), p);

        let resolved = resolve(&defaults, &profiles).unwrap();
        let r = &resolved["line1"];
        assert_eq!(r.vars["Region"], "us");
        assert_eq!(r.vars["Tier"], "gold");
    }

    #[test]
    fn exclude_patterns_are_additive() {
        let mut defaults = SyncDefaults::default();
        defaults.exclude_patterns.push("**/*.tmp".to_string());

        let mut profiles = BTreeMap::new();
        let mut p = profile(vec![mapping("src", "dst")], None);
        p.exclude_patterns = Some(vec!["**/*.bak".to_string()]);
        profiles.insert("line1".to_string(), p);

        let resolved = resolve(&defaults, &profiles).unwrap();
        assert_eq!(
            resolved["line1"].exclude_patterns,
            vec!["**/*.tmp".to_string(), "**/*.bak".to_string()]
        );
    }

    #[test]
    fn scalar_baseline_when_unset() {
        let defaults = SyncDefaults::default();
        let mut profiles = BTreeMap::new();
        profiles.insert("line1".to_string(), profile(vec![mapping("src", "dst")], None));

        let resolved = resolve(&defaults, &profiles).unwrap();
        let r = &resolved["line1"];
        assert_eq!(r.sync_period, Duration::from_secs(30));
        assert!(!r.dry_run);
        assert_eq!(r.designer_session_policy, DesignerSessionPolicy::Proceed);
        assert!(!r.paused);
    }

    #[test]
    fn absolute_path_rejected() {
        let defaults = SyncDefaults::default();
        let mut profiles = BTreeMap::new();
        profiles.insert("line1".to_string(), profile(vec![mapping("/etc", "dst")], None));
        let err = resolve(&defaults, &profiles).unwrap_err();
        assert!(matches!(err, Error::AbsolutePath { .. }));
    }

    #[test]
    fn cycle_detected_reports_path() {
        let defaults = SyncDefaults::default();
        let mut profiles = BTreeMap::new();
        profiles.insert("a".to_string(), profile(vec![mapping("s", "d")], Some(vec!["b"])));
        profiles.insert("b".to_string(), profile(vec![mapping("s", "d")], Some(vec!["c"])));
        profiles.insert("c".to_string(), profile(vec![mapping("s", "d")], Some(vec!["a"])));

        let err = resolve(&defaults, &profiles).unwrap_err();
        match err {
            Error::CycleDetected(path) => {
                assert!(path.starts_with(&["a".to_string()]) || path.contains(&"a".to_string()));
                assert_eq!(path.first(), path.last());
            }
            other => panic!("expected CycleDetected, got {other:?}"),
        }
    }

    #[test]
    fn unknown_dependency_rejected() {
        let defaults = SyncDefaults::default();
        let mut profiles = BTreeMap::new();
        profiles.insert(
            "a".to_string(),
            profile(vec![mapping("s", "d")], Some(vec!["ghost"])),
        );
        let err = resolve(&defaults, &profiles).unwrap_err();
        assert!(matches!(err, Error::UnknownDependency { .. }));
    }
}
