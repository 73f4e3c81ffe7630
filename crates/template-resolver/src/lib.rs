//! Copyright (C) 2026 Pedro Henrique / phkaiser13
//!
//! Resolves `{{.Var}}`-style placeholders in mapping source/destination
//! paths. Deliberately hand-rolled rather than built on a general templating
//! engine: the contract forbids method calls, collaborator access, and I/O
//! from template context, which a general-purpose engine would have to be
//! fenced off rather than simply not providing.
//!
//! SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use thiserror::Error;

pub const MAX_RESOLVED_PATH_LEN: usize = 4096;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("unknown template variable '{0}'")]
    MissingVariable(String),
    #[error("unterminated template placeholder")]
    UnterminatedPlaceholder,
    #[error("invalid template placeholder '{0}': must be of the form {{{{.Var}}}}")]
    InvalidPlaceholder(String),
    #[error("invalid variable key '{0}': must be a valid identifier")]
    InvalidVariableKey(String),
    #[error("resolved path '{0}' is not relative")]
    AbsolutePath(String),
    #[error("resolved path '{0}' contains a '..' segment")]
    ParentTraversal(String),
    #[error("resolved path exceeds {MAX_RESOLVED_PATH_LEN} bytes")]
    PathTooLong,
}

/// The flat, restricted variable context templates resolve against. No
/// methods, no references to live system objects, no I/O functions.
#[derive(Debug, Clone, Default)]
pub struct Context {
    pub vars: BTreeMap<String, String>,
    pub gateway_name: String,
    pub namespace: String,
    pub git_ref: String,
    pub commit: String,
}

impl Context {
    fn lookup(&self, key: &str) -> Option<String> {
        match key {
            "GatewayName" => Some(self.gateway_name.clone()),
            "Namespace" => Some(self.namespace.clone()),
            "Ref" => Some(self.git_ref.clone()),
            "Commit" => Some(self.commit.clone()),
            other => self.vars.get(other).cloned(),
        }
    }
}

/// A var key must be a valid identifier: letters, digits, underscores, not
/// starting with a digit. Keys with dashes or dots cannot be addressed by
/// the `{{.Var}}` syntax and are rejected wherever profiles are validated.
pub fn is_valid_var_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Resolves every `{{.Var}}` placeholder in `template`, then re-validates
/// the resolved string as a safe relative path. Missing variables are a
/// hard error; silent empty substitution is never performed.
pub fn resolve(template: &str, ctx: &Context) -> Result<String, Error> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let end = after_open
            .find("}}")
            .ok_or(Error::UnterminatedPlaceholder)?;
        let inner = &after_open[..end];

        if !inner.starts_with('.') {
            return Err(Error::InvalidPlaceholder(inner.to_string()));
        }
        let var_name = &inner[1..];
        if !is_valid_var_key(var_name) {
            return Err(Error::InvalidVariableKey(var_name.to_string()));
        }
        let value = ctx
            .lookup(var_name)
            .ok_or_else(|| Error::MissingVariable(var_name.to_string()))?;
        out.push_str(&value);

        rest = &after_open[end + 2..];
    }
    out.push_str(rest);

    validate_resolved_path(&out)?;
    Ok(out)
}

fn validate_resolved_path(path: &str) -> Result<(), Error> {
    if path.len() > MAX_RESOLVED_PATH_LEN {
        return Err(Error::PathTooLong);
    }
    if path.starts_with('/') {
        return Err(Error::AbsolutePath(path.to_string()));
    }
    if path.split('/').any(|segment| segment == "..") {
        return Err(Error::ParentTraversal(path.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Context {
        Context {
            vars: BTreeMap::from([("Site".to_string(), "plant-a".to_string())]),
            gateway_name: "gw-1".to_string(),
            namespace: "scada".to_string(),
            git_ref: "main".to_string(),
            commit: "abc123".to_string(),
        }
    }

    #[test]
    fn resolves_user_and_reserved_vars() {
        let resolved = resolve("sites/{{.Site}}/{{.GatewayName}}.json", &ctx()).unwrap();
        assert_eq!(resolved, "sites/plant-a/gw-1.json");
    }

    #[test]
    fn missing_variable_is_hard_error() {
        let err = resolve("{{.Unknown}}", &ctx()).unwrap_err();
        assert_eq!(err, Error::MissingVariable("Unknown".to_string()));
    }

    #[test]
    fn absolute_path_after_resolution_rejected() {
        let mut c = ctx();
        c.vars.insert("Root".to_string(), "/etc".to_string());
        let err = resolve("{{.Root}}/passwd", &c).unwrap_err();
        assert!(matches!(err, Error::AbsolutePath(_)));
    }

    #[test]
    fn parent_traversal_after_resolution_rejected() {
        let mut c = ctx();
        c.vars.insert("Up".to_string(), "..".to_string());
        let err = resolve("{{.Up}}/secret", &c).unwrap_err();
        assert!(matches!(err, Error::ParentTraversal(_)));
    }

    #[test]
    fn invalid_placeholder_without_leading_dot() {
        let err = resolve("{{Site}}", &ctx()).unwrap_err();
        assert!(matches!(err, Error::InvalidPlaceholder(_)));
    }

    #[test]
    fn var_key_validation() {
        assert!(is_valid_var_key("Site_1"));
        assert!(!is_valid_var_key("1Site"));
        assert!(!is_valid_var_key("site-name"));
        assert!(!is_valid_var_key("site.name"));
        assert!(!is_valid_var_key(""));
    }
}
