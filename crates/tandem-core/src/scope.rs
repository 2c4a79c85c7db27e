//! Scopes: named permission strings carried by delegated credentials

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Read access to calendar events
pub const CALENDAR_READ: &str = "calendar.read";

/// Create, update and delete access to calendar events
pub const CALENDAR_WRITE: &str = "calendar.write";

/// Audience identifier of the calendar agent
pub const CALENDAR_AUDIENCE: &str = "agent-b-calendar";

/// Scopes a delegation request may ask for
pub const KNOWN_SCOPES: &[&str] = &[CALENDAR_READ, CALENDAR_WRITE];

/// Set of granted scope names. Order is irrelevant; duplicates collapse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeSet(BTreeSet<String>);

impl ScopeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an OAuth-style scope claim. Accepts space or comma separators.
    pub fn parse(claim: &str) -> Self {
        claim
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Exact membership test. No hierarchy, no wildcards.
    pub fn contains(&self, scope: &str) -> bool {
        self.0.contains(scope)
    }

    pub fn insert(&mut self, scope: impl Into<String>) -> bool {
        self.0.insert(scope.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Scopes in this set that are not in [`KNOWN_SCOPES`]
    pub fn unknown(&self) -> Vec<&str> {
        self.iter().filter(|s| !KNOWN_SCOPES.contains(s)).collect()
    }

    /// Space-separated form, as used in token `scope` claims
    pub fn to_claim(&self) -> String {
        self.iter().collect::<Vec<_>>().join(" ")
    }
}

impl fmt::Display for ScopeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.iter().collect::<Vec<_>>().join(", "))
    }
}

impl<S: Into<String>> FromIterator<S> for ScopeSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Outcome of a scope check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeDecision {
    Allow,
    Deny,
}

/// Allow iff `required` is a member of `granted`.
pub fn check_scope(required: &str, granted: &ScopeSet) -> ScopeDecision {
    if granted.contains(required) {
        ScopeDecision::Allow
    } else {
        ScopeDecision::Deny
    }
}
