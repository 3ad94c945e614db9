//! Core identifier types for the control graph

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a cybersecurity standard (e.g., "NIST-800-53", "CSF-2.0")
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct StandardId(String);

impl StandardId {
    pub fn new(id: impl Into<String>) -> Self {
        StandardId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StandardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for StandardId {
    fn from(s: String) -> Self {
        StandardId(s)
    }
}

impl From<&str> for StandardId {
    fn from(s: &str) -> Self {
        StandardId(s.to_string())
    }
}

/// Stable identifier of a control (e.g., "AC-2", "PR.AC-1")
///
/// Ordering is plain lexicographic string ordering; candidate ranking relies on it
/// to break similarity ties.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct ControlId(String);

impl ControlId {
    pub fn new(id: impl Into<String>) -> Self {
        ControlId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ControlId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ControlId {
    fn from(s: String) -> Self {
        ControlId(s)
    }
}

impl From<&str> for ControlId {
    fn from(s: &str) -> Self {
        ControlId(s.to_string())
    }
}

/// Unique identifier for a mapping edge, assigned by the store on commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct EdgeId(pub u64);

impl EdgeId {
    pub fn new(id: u64) -> Self {
        EdgeId(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EdgeId({})", self.0)
    }
}

impl From<u64> for EdgeId {
    fn from(id: u64) -> Self {
        EdgeId(id)
    }
}
