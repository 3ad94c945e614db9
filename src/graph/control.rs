//! Standards and controls
//!
//! Both are immutable once imported; the mapping core only reads them.

use super::property::{PropertyMap, PropertyValue};
use super::types::{ControlId, StandardId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A named, versioned collection of controls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Standard {
    pub id: StandardId,
    /// Human-readable name (e.g., "NIST Cybersecurity Framework")
    pub name: String,
    pub version: String,
}

impl Standard {
    pub fn new(id: impl Into<StandardId>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Standard {
            id: id.into(),
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Optional structured metadata of a control
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlMetadata {
    /// Family or chapter (e.g., "Access Control")
    pub category: Option<String>,
    /// Criticality or baseline level (e.g., "high")
    pub criticality: Option<String>,
    /// Any further catalog properties
    pub properties: PropertyMap,
}

impl ControlMetadata {
    pub fn is_empty(&self) -> bool {
        self.category.is_none() && self.criticality.is_none() && self.properties.is_empty()
    }

    /// Metadata as ordered `(name, value)` pairs
    pub fn entries(&self) -> Vec<(String, String)> {
        let mut entries = Vec::new();
        if let Some(category) = &self.category {
            entries.push(("category".to_string(), category.clone()));
        }
        if let Some(criticality) = &self.criticality {
            entries.push(("criticality".to_string(), criticality.clone()));
        }
        for (key, value) in &self.properties {
            if !value.is_null() {
                entries.push((key.clone(), value.to_string()));
            }
        }
        entries
    }
}

/// A single requirement within a standard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Control {
    pub id: ControlId,
    /// The standard this control belongs to
    pub standard: StandardId,
    pub title: Option<String>,
    /// Description prose; this is the text that gets embedded and judged
    pub description: String,
    pub metadata: ControlMetadata,
}

impl Control {
    /// Create a control with a description and no metadata
    pub fn new(
        id: impl Into<ControlId>,
        standard: impl Into<StandardId>,
        description: impl Into<String>,
    ) -> Self {
        Control {
            id: id.into(),
            standard: standard.into(),
            title: None,
            description: description.into(),
            metadata: ControlMetadata::default(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.metadata.category = Some(category.into());
        self
    }

    pub fn with_criticality(mut self, criticality: impl Into<String>) -> Self {
        self.metadata.criticality = Some(criticality.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.metadata.properties.insert(key.into(), value.into());
        self
    }

    /// SHA-256 of the description, hex encoded
    ///
    /// Part of the embedding cache key: an edited description invalidates the
    /// cached vector.
    pub fn text_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.description.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}
