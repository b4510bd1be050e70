//! The registry's version-constraint language.
//!
//! Constraints appear as `semver(">= 1.2.3")`, `semver("< 2.0.0")`,
//! comma-separated ranges, exact versions, or the literals `true`/`false`.
//! Versions are compared semver-style with a tolerant parse: a leading `v`
//! is dropped and missing components are zero-filled.

use semver::{Version, VersionReq};
use thiserror::Error;

#[derive(Error, Debug)]
#[error("invalid version constraint {text:?}: {reason}")]
pub struct ConstraintError {
    pub text: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
enum Expr {
    Always,
    Never,
    Req(VersionReq),
}

/// A parsed version constraint.
#[derive(Debug, Clone)]
pub struct Constraint {
    expr: Expr,
}

impl Constraint {
    pub fn parse(text: &str) -> Result<Self, ConstraintError> {
        let trimmed = text.trim();
        let expr = match trimmed {
            "true" | "" => Expr::Always,
            "false" => Expr::Never,
            _ => {
                let inner = strip_semver_call(trimmed).unwrap_or(trimmed);
                Expr::Req(parse_req(inner).map_err(|reason| ConstraintError {
                    text: text.to_string(),
                    reason,
                })?)
            }
        };
        Ok(Self { expr })
    }

    /// Whether `version` satisfies the constraint. Unparseable versions
    /// never match a semver expression.
    pub fn matches(&self, version: &str) -> bool {
        match &self.expr {
            Expr::Always => true,
            Expr::Never => false,
            Expr::Req(req) => parse_version(version).map(|v| req.matches(&v)).unwrap_or(false),
        }
    }
}

/// Unwraps `semver("...")` to its inner expression.
fn strip_semver_call(text: &str) -> Option<&str> {
    let inner = text.strip_prefix("semver(")?.strip_suffix(')')?.trim();
    inner
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or(Some(inner))
}

fn parse_req(expr: &str) -> Result<VersionReq, String> {
    let terms: Vec<String> = expr
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|term| {
            let split = term
                .find(|c: char| c.is_ascii_digit() || c == 'v')
                .unwrap_or(term.len());
            let (operator, version) = term.split_at(split);
            let operator = operator.trim();
            let version = version.trim_start_matches('v');
            if operator.is_empty() {
                // A bare version means exact equality, not semver's
                // default caret semantics.
                format!("={version}")
            } else {
                format!("{operator}{version}")
            }
        })
        .collect();
    if terms.is_empty() {
        return Err("empty expression".to_string());
    }
    VersionReq::parse(&terms.join(", ")).map_err(|e| e.to_string())
}

/// Tolerant semver parse: strips a leading `v`, zero-fills to three
/// components.
pub fn parse_version(version: &str) -> Option<Version> {
    let trimmed = version.trim().trim_start_matches('v');
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(v) = Version::parse(trimmed) {
        return Some(v);
    }
    // Zero-fill "1" or "1.2", preserving any -prerelease/+build suffix.
    let (core, suffix) = match trimmed.find(['-', '+']) {
        Some(idx) => trimmed.split_at(idx),
        None => (trimmed, ""),
    };
    let dots = core.matches('.').count();
    let filled = match dots {
        0 => format!("{core}.0.0{suffix}"),
        1 => format!("{core}.0{suffix}"),
        _ => return None,
    };
    Version::parse(&filled).ok()
}
