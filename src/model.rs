//! Wire records exchanged with the document/relationship service.
//!
//! Field names match the CPRT reference schema exactly; renaming any of them
//! breaks compatibility with the backend. Loosely-typed rows coming off the
//! wire are normalised here, at the boundary, so nothing downstream has to
//! deal with missing fields.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Sentinel for a missing identifier, title or type.
pub const NOT_AVAILABLE: &str = "N/A";

/// A reference document (catalog, framework, standard).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub doc_identifier: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub version: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub website: String,
}

impl Document {
    /// Display label: name when present, identifier otherwise.
    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            &self.doc_identifier
        } else {
            &self.name
        }
    }
}

/// An addressable unit of content inside a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Element {
    pub doc_identifier: String,
    pub element_type: String,
    pub element_identifier: String,
    pub title: String,
    pub text: String,
}

/// An element row as the service sends it. Every field may be null or absent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ElementRow {
    #[serde(default)]
    pub doc_identifier: Option<String>,
    #[serde(default)]
    pub element_type: Option<String>,
    #[serde(default)]
    pub element_identifier: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

impl Element {
    /// Normalise a wire row into an element of `doc`.
    ///
    /// The row's own `doc_identifier` wins when present; the element listing
    /// endpoint omits it, so the requested document fills the gap.
    pub fn from_row(doc: &str, row: ElementRow) -> Self {
        Self {
            doc_identifier: non_empty(row.doc_identifier).unwrap_or_else(|| doc.to_string()),
            element_type: non_empty(row.element_type).unwrap_or_else(|| NOT_AVAILABLE.into()),
            element_identifier: non_empty(row.element_identifier)
                .unwrap_or_else(|| NOT_AVAILABLE.into()),
            title: non_empty(row.title).unwrap_or_else(|| NOT_AVAILABLE.into()),
            text: row.text.unwrap_or_default(),
        }
    }

    /// Whether `other` refers to the same business key.
    pub fn same_identifier(&self, other: &Element) -> bool {
        self.element_identifier == other.element_identifier
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.element_identifier, self.title)
    }
}

/// A global relationship type (e.g. `subset_of`, `mitigates`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipType {
    pub relationship_identifier: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub description: String,
}

/// A persisted, directed, typed link between two elements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub source_element_identifier: String,
    pub source_doc_identifier: String,
    pub dest_element_identifier: String,
    pub dest_doc_identifier: String,
    pub provenance_doc_identifier: String,
    pub relationship_identifier: String,
}

/// A relationship proposed for validation: a [`Relationship`] minus provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRelationship {
    pub source_element_identifier: String,
    pub source_doc_identifier: String,
    pub dest_element_identifier: String,
    pub dest_doc_identifier: String,
    pub relationship_identifier: String,
}

impl CandidateRelationship {
    /// Link `source` (the target element being annotated) to `dest`.
    pub fn between(source: &Element, dest: &Element, relationship_identifier: &str) -> Self {
        Self {
            source_element_identifier: source.element_identifier.clone(),
            source_doc_identifier: source.doc_identifier.clone(),
            dest_element_identifier: dest.element_identifier.clone(),
            dest_doc_identifier: dest.doc_identifier.clone(),
            relationship_identifier: relationship_identifier.to_string(),
        }
    }
}

/// Canonical relationship returned by validation, ready for bulk persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedRelationship {
    pub source_element_id: i64,
    pub dest_element_id: i64,
    pub relationship_type_id: i64,
}

/// Auto-generated document owning one batch of relationships.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceDocument {
    #[serde(rename = "provenance_doc_identifier")]
    pub identifier: String,
    #[serde(rename = "provenance_doc_name", default)]
    pub name: String,
}

/// Result of a bulk save.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkSaveOutcome {
    pub success_count: usize,
    #[serde(default)]
    pub total_attempted: Option<usize>,
}

/// The full CPRT bundle for one document, as served by `/getDocument`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CprtDocument {
    #[serde(default)]
    pub documents: Vec<Document>,
    #[serde(default)]
    pub elements: Vec<ElementRow>,
    #[serde(default)]
    pub relationship_types: Vec<RelationshipType>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

/// File format for relationship exports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Excel,
    Csv,
}

impl ExportFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            ExportFormat::Excel => "excel",
            ExportFormat::Csv => "csv",
        }
    }

    /// File extension used when the server does not name the file.
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Excel => "xlsx",
            ExportFormat::Csv => "csv",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "excel" | "xlsx" => Ok(ExportFormat::Excel),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(format!("unknown export format \"{other}\" (expected excel or csv)")),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}
