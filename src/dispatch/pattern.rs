//! URL pattern parsing and best-match resolution.
//!
//! # Responsibilities
//! - Parse `/exact`, `/prefix/*` and `*.ext` patterns
//! - Resolve a context-relative path to the winning registration
//!
//! # Design Decisions
//! - Precedence is exact, then longest prefix, then longest suffix
//! - Prefixes match on the raw string: `/api/*` covers `/api`, `/api/x`
//!   and `/apiary`
//! - The table is rebuilt on registration and read without locks

use std::collections::HashMap;
use std::fmt;

use crate::dispatch::registry::RegistryError;

/// A parsed URL pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UrlPattern {
    /// `/foo` matches only `/foo`.
    Exact(String),
    /// `/foo/*` matches every path starting with `/foo`. `/*` matches every path.
    Prefix(String),
    /// `*.jsp` matches any path ending in `.jsp`. Stores the suffix including the dot.
    Suffix(String),
}

impl UrlPattern {
    pub fn parse(pattern: &str) -> Result<Self, RegistryError> {
        let invalid = || RegistryError::InvalidPattern(pattern.to_string());

        if let Some(ext) = pattern.strip_prefix("*.") {
            if ext.is_empty() || ext.contains('/') || ext.contains('*') {
                return Err(invalid());
            }
            return Ok(UrlPattern::Suffix(format!(".{}", ext)));
        }

        if !pattern.starts_with('/') {
            return Err(invalid());
        }

        if let Some(prefix) = pattern.strip_suffix("/*") {
            if prefix.contains('*') {
                return Err(invalid());
            }
            return Ok(UrlPattern::Prefix(prefix.to_string()));
        }

        if pattern.contains('*') {
            return Err(invalid());
        }
        Ok(UrlPattern::Exact(pattern.to_string()))
    }
}

impl fmt::Display for UrlPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UrlPattern::Exact(path) => write!(f, "{}", path),
            UrlPattern::Prefix(prefix) => write!(f, "{}/*", prefix),
            UrlPattern::Suffix(suffix) => write!(f, "*{}", suffix),
        }
    }
}

/// Outcome of resolving a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternMatch {
    /// Registration name that won.
    pub name: String,
    /// Portion of the path the pattern consumed.
    pub handler_path: String,
    /// Remainder after a prefix match (`/status` for `/api/*` on `/api/status`).
    pub residual_path: Option<String>,
}

/// Immutable lookup table from patterns to registration names.
#[derive(Debug, Clone, Default)]
pub struct PatternTable {
    exact: HashMap<String, String>,
    /// Sorted longest prefix first.
    prefixes: Vec<(String, String)>,
    /// Sorted longest suffix first.
    suffixes: Vec<(String, String)>,
}

impl PatternTable {
    pub fn contains(&self, pattern: &UrlPattern) -> bool {
        match pattern {
            UrlPattern::Exact(p) => self.exact.contains_key(p),
            UrlPattern::Prefix(p) => self.prefixes.iter().any(|(k, _)| k == p),
            UrlPattern::Suffix(s) => self.suffixes.iter().any(|(k, _)| k == s),
        }
    }

    /// Copy of this table with one more entry.
    pub fn with(&self, pattern: &UrlPattern, name: &str) -> Self {
        let mut next = self.clone();
        match pattern {
            UrlPattern::Exact(p) => {
                next.exact.insert(p.clone(), name.to_string());
            }
            UrlPattern::Prefix(p) => {
                next.prefixes.push((p.clone(), name.to_string()));
                next.prefixes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
            }
            UrlPattern::Suffix(s) => {
                next.suffixes.push((s.clone(), name.to_string()));
                next.suffixes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
            }
        }
        next
    }

    pub fn resolve(&self, path: &str) -> Option<PatternMatch> {
        if let Some(name) = self.exact.get(path) {
            return Some(PatternMatch {
                name: name.clone(),
                handler_path: path.to_string(),
                residual_path: None,
            });
        }

        for (prefix, name) in &self.prefixes {
            if let Some(rest) = path.strip_prefix(prefix.as_str()) {
                return Some(PatternMatch {
                    name: name.clone(),
                    handler_path: prefix.clone(),
                    residual_path: (!rest.is_empty()).then(|| rest.to_string()),
                });
            }
        }

        self.suffixes
            .iter()
            .find(|(suffix, _)| path.ends_with(suffix.as_str()))
            .map(|(_, name)| PatternMatch {
                name: name.clone(),
                handler_path: path.to_string(),
                residual_path: None,
            })
    }
}
