//! Provenance ledger: the export scope of a mapping session.
//!
//! Every successful save creates one provenance document on the service. The
//! ledger remembers them, in creation order, so an export can be restricted
//! to exactly what this session produced.

use crate::model::ProvenanceDocument;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvenanceLedger {
    documents: Vec<ProvenanceDocument>,
}

impl ProvenanceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a provenance document. Returns `false` if it was already known.
    pub fn record(&mut self, document: ProvenanceDocument) -> bool {
        if self
            .documents
            .iter()
            .any(|d| d.identifier == document.identifier)
        {
            return false;
        }
        self.documents.push(document);
        true
    }

    pub fn clear(&mut self) {
        self.documents.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.documents.iter().map(|d| d.identifier.as_str())
    }

    /// Comma-joined identifiers for `?provenance_docs=`; `None` when empty.
    pub fn scope(&self) -> Option<String> {
        if self.documents.is_empty() {
            return None;
        }
        Some(self.identifiers().collect::<Vec<_>>().join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prov(id: &str) -> ProvenanceDocument {
        ProvenanceDocument {
            identifier: id.into(),
            name: format!("Mapping {id}"),
        }
    }

    #[test]
    fn scope_joins_in_creation_order() {
        let mut ledger = ProvenanceLedger::new();
        assert_eq!(ledger.scope(), None);
        assert!(ledger.record(prov("B")));
        assert!(ledger.record(prov("A")));
        assert!(!ledger.record(prov("B")));
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.scope().as_deref(), Some("B,A"));
    }

    #[test]
    fn clear_empties_scope() {
        let mut ledger = ProvenanceLedger::new();
        ledger.record(prov("A"));
        ledger.clear();
        assert!(ledger.is_empty());
        assert_eq!(ledger.scope(), None);
    }
}
