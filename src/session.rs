//! Session state store for one mapping session.
//!
//! `Session` is plain data: the document pair, the ordered target elements and
//! the cursor into them, the candidate list for the source document, the tray
//! of mapped elements for the current target, and the provenance ledger. It
//! does no I/O. Every mutation goes through a method here, and every method
//! that changes something bumps [`Session::version`], which is what the
//! renderer keys off.
//!
//! Loads are two-phase. `begin_*_load` hands out a [`Ticket`]; the matching
//! `finish_*_load` applies a result only if it carries the latest ticket for
//! that slot, so a slow response can never overwrite a newer selection. A
//! failed load leaves the previous selection's data in place.

use crate::client::ClientError;
use crate::commit::CommitReport;
use crate::error::{SessionError, SessionResult};
use crate::model::{Document, Element, Relationship, RelationshipType};
use crate::provenance::ProvenanceLedger;

/// Cursor movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Prev,
    Next,
}

/// Identifies one load request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ticket(u64);

/// Result of [`Session::add_candidate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum AddOutcome {
    /// Inserted at `index`.
    Added { index: usize },
    /// An entry with the same element identifier is already at `index`.
    Duplicate { index: usize },
}

/// What came back for a target document.
#[derive(Debug, Clone, Default)]
pub struct TargetLoad {
    pub elements: Vec<Element>,
    /// Relationships already stored for the document.
    pub relationships: Vec<Relationship>,
}

/// How a finished load was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStatus {
    Applied,
    /// A newer request superseded this one; nothing changed.
    Stale,
    /// The request failed; the previous data is still in place.
    Failed(ClientError),
}

#[derive(Debug, Clone)]
struct Pending {
    ticket: Ticket,
    doc: String,
    search: Option<String>,
}

/// What post-commit did to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitEffect {
    pub recorded: bool,
    pub cleared: bool,
    pub advanced: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Session {
    version: u64,
    next_ticket: u64,

    documents: Vec<Document>,
    relationship_types: Vec<RelationshipType>,
    relationship_type: Option<String>,

    target_doc: Option<String>,
    targets: Vec<Element>,
    cursor: usize,
    existing: Vec<Relationship>,
    pending_target: Option<Pending>,

    source_doc: Option<String>,
    search: Option<String>,
    candidates: Vec<Element>,
    pending_source: Option<Pending>,

    mapped: Vec<Element>,
    ledger: ProvenanceLedger,
    committing: bool,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bumped on every mutation.
    pub fn version(&self) -> u64 {
        self.version
    }

    fn touch(&mut self) {
        self.version += 1;
    }

    fn issue_ticket(&mut self) -> Ticket {
        self.next_ticket += 1;
        Ticket(self.next_ticket)
    }

    // -----------------------------------------------------------------------
    // Catalog
    // -----------------------------------------------------------------------

    /// Install the document list and the relationship-type catalog.
    ///
    /// A previously chosen relationship type survives if it is still offered.
    pub fn set_catalog(&mut self, documents: Vec<Document>, types: Vec<RelationshipType>) {
        if let Some(chosen) = &self.relationship_type {
            if !types.iter().any(|t| &t.relationship_identifier == chosen) {
                self.relationship_type = None;
            }
        }
        self.documents = documents;
        self.relationship_types = types;
        self.touch();
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn document(&self, doc_identifier: &str) -> Option<&Document> {
        self.documents
            .iter()
            .find(|d| d.doc_identifier == doc_identifier)
    }

    pub fn relationship_types(&self) -> &[RelationshipType] {
        &self.relationship_types
    }

    pub fn relationship_type(&self) -> Option<&str> {
        self.relationship_type.as_deref()
    }

    pub fn select_relationship_type(&mut self, identifier: &str) -> SessionResult<()> {
        if !self
            .relationship_types
            .iter()
            .any(|t| t.relationship_identifier == identifier)
        {
            return Err(SessionError::UnknownRelationshipType {
                identifier: identifier.to_string(),
            });
        }
        if self.relationship_type.as_deref() != Some(identifier) {
            self.relationship_type = Some(identifier.to_string());
            self.touch();
        }
        Ok(())
    }

    /// Select the next relationship type, wrapping around.
    pub fn cycle_relationship_type(&mut self) -> Option<&str> {
        if self.relationship_types.is_empty() {
            return None;
        }
        let next = match &self.relationship_type {
            Some(current) => self
                .relationship_types
                .iter()
                .position(|t| &t.relationship_identifier == current)
                .map_or(0, |i| (i + 1) % self.relationship_types.len()),
            None => 0,
        };
        self.relationship_type = Some(self.relationship_types[next].relationship_identifier.clone());
        self.touch();
        self.relationship_type.as_deref()
    }

    // -----------------------------------------------------------------------
    // Target document
    // -----------------------------------------------------------------------

    /// Start loading `doc` as the target document.
    pub fn begin_target_load(&mut self, doc: &str) -> Ticket {
        let ticket = self.issue_ticket();
        self.pending_target = Some(Pending {
            ticket,
            doc: doc.to_string(),
            search: None,
        });
        self.touch();
        ticket
    }

    /// Apply a finished target load.
    ///
    /// On success the cursor goes back to 0 and both the tray and the
    /// provenance ledger are emptied.
    pub fn finish_target_load(
        &mut self,
        ticket: Ticket,
        result: Result<TargetLoad, ClientError>,
    ) -> LoadStatus {
        let Some(pending) = self.pending_target.take_if(|p| p.ticket == ticket) else {
            return LoadStatus::Stale;
        };
        let status = match result {
            Ok(load) => {
                self.target_doc = Some(pending.doc);
                self.targets = load.elements;
                self.existing = load.relationships;
                self.cursor = 0;
                self.mapped.clear();
                self.ledger.clear();
                LoadStatus::Applied
            }
            Err(e) => LoadStatus::Failed(e),
        };
        self.touch();
        status
    }

    pub fn target_doc(&self) -> Option<&str> {
        self.target_doc.as_deref()
    }

    /// Document currently being loaded as target, if any.
    pub fn loading_target(&self) -> Option<&str> {
        self.pending_target.as_ref().map(|p| p.doc.as_str())
    }

    pub fn targets(&self) -> &[Element] {
        &self.targets
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn current_target(&self) -> Option<&Element> {
        self.targets.get(self.cursor)
    }

    pub fn can_advance(&self, direction: Direction) -> bool {
        match direction {
            Direction::Prev => self.cursor > 0,
            Direction::Next => self.cursor + 1 < self.targets.len(),
        }
    }

    /// Move the cursor one step. At a boundary this is a no-op.
    ///
    /// Mappings belong to one target element, so moving clears the tray.
    pub fn advance(&mut self, direction: Direction) -> bool {
        if !self.can_advance(direction) {
            return false;
        }
        match direction {
            Direction::Prev => self.cursor -= 1,
            Direction::Next => self.cursor += 1,
        }
        self.mapped.clear();
        self.touch();
        true
    }

    /// Stored relationships that touch the current target element.
    pub fn existing_links(&self) -> Vec<&Relationship> {
        let (Some(doc), Some(target)) = (self.target_doc.as_deref(), self.current_target()) else {
            return Vec::new();
        };
        let id = target.element_identifier.as_str();
        self.existing
            .iter()
            .filter(|r| {
                (r.source_doc_identifier == doc && r.source_element_identifier == id)
                    || (r.dest_doc_identifier == doc && r.dest_element_identifier == id)
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Source document
    // -----------------------------------------------------------------------

    /// Start loading candidates from `doc`, optionally filtered by `search`.
    pub fn begin_source_load(&mut self, doc: &str, search: Option<&str>) -> Ticket {
        let ticket = self.issue_ticket();
        self.pending_source = Some(Pending {
            ticket,
            doc: doc.to_string(),
            search: search
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        });
        self.touch();
        ticket
    }

    /// Apply a finished candidate load. The target cursor and the tray are
    /// left alone.
    pub fn finish_source_load(
        &mut self,
        ticket: Ticket,
        result: Result<Vec<Element>, ClientError>,
    ) -> LoadStatus {
        let Some(pending) = self.pending_source.take_if(|p| p.ticket == ticket) else {
            return LoadStatus::Stale;
        };
        let status = match result {
            Ok(elements) => {
                self.source_doc = Some(pending.doc);
                self.search = pending.search;
                self.candidates = elements;
                LoadStatus::Applied
            }
            Err(e) => LoadStatus::Failed(e),
        };
        self.touch();
        status
    }

    pub fn source_doc(&self) -> Option<&str> {
        self.source_doc.as_deref()
    }

    pub fn loading_source(&self) -> Option<&str> {
        self.pending_source.as_ref().map(|p| p.doc.as_str())
    }

    /// Search term the current candidate list was fetched with.
    pub fn search(&self) -> Option<&str> {
        self.search.as_deref()
    }

    pub fn candidates(&self) -> &[Element] {
        &self.candidates
    }

    // -----------------------------------------------------------------------
    // Tray
    // -----------------------------------------------------------------------

    pub fn mapped(&self) -> &[Element] {
        &self.mapped
    }

    /// The tray is frozen between `begin_commit` and the commit's outcome.
    fn ensure_tray_unlocked(&self) -> SessionResult<()> {
        if self.committing {
            return Err(SessionError::CommitInProgress);
        }
        Ok(())
    }

    /// Insert `element` unless an entry with the same identifier exists.
    pub fn add_candidate(&mut self, element: Element) -> SessionResult<AddOutcome> {
        self.ensure_tray_unlocked()?;
        if let Some(index) = self.mapped.iter().position(|m| m.same_identifier(&element)) {
            return Ok(AddOutcome::Duplicate { index });
        }
        self.mapped.push(element);
        self.touch();
        Ok(AddOutcome::Added {
            index: self.mapped.len() - 1,
        })
    }

    pub fn remove_candidate(&mut self, index: usize) -> SessionResult<Element> {
        self.ensure_tray_unlocked()?;
        if index >= self.mapped.len() {
            return Err(SessionError::InvalidIndex {
                index,
                len: self.mapped.len(),
            });
        }
        let removed = self.mapped.remove(index);
        self.touch();
        Ok(removed)
    }

    /// Empty the tray. Returns how many entries were dropped.
    pub fn clear_candidates(&mut self) -> SessionResult<usize> {
        self.ensure_tray_unlocked()?;
        let n = self.mapped.len();
        self.mapped.clear();
        if n > 0 {
            self.touch();
        }
        Ok(n)
    }

    // -----------------------------------------------------------------------
    // Commit
    // -----------------------------------------------------------------------

    pub fn ledger(&self) -> &ProvenanceLedger {
        &self.ledger
    }

    /// Export is offered once this session has saved something.
    pub fn export_available(&self) -> bool {
        !self.ledger.is_empty()
    }

    pub fn committing(&self) -> bool {
        self.committing
    }

    /// Save is possible with a target element and a non-empty tray.
    pub fn can_save(&self) -> bool {
        !self.committing && self.current_target().is_some() && !self.mapped.is_empty()
    }

    pub fn begin_commit(&mut self) {
        self.committing = true;
        self.touch();
    }

    /// A commit ended without saving anything.
    pub fn abort_commit(&mut self) {
        self.committing = false;
        self.touch();
    }

    /// Post-commit bookkeeping.
    ///
    /// The provenance document joins the export scope if the target document
    /// is still the one the commit was made for. If the cursor still sits on
    /// the committed element, the tray is cleared and the cursor moves on
    /// (unless it is on the last element).
    pub fn record_commit(&mut self, report: &CommitReport) -> CommitEffect {
        self.committing = false;
        let same_doc = self.target_doc.as_deref() == Some(report.target_doc.as_str());
        let mut effect = CommitEffect {
            recorded: false,
            cleared: false,
            advanced: false,
        };
        if same_doc {
            effect.recorded = self.ledger.record(report.provenance.clone());
            let on_element = self.cursor == report.cursor
                && self
                    .current_target()
                    .is_some_and(|t| t.element_identifier == report.target_element);
            if on_element {
                self.mapped.clear();
                effect.cleared = true;
                if self.can_advance(Direction::Next) {
                    self.cursor += 1;
                    effect.advanced = true;
                }
            }
        }
        self.touch();
        effect
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn el(doc: &str, id: &str) -> Element {
        Element {
            doc_identifier: doc.into(),
            element_type: "control".into(),
            element_identifier: id.into(),
            title: format!("{id} title"),
            text: String::new(),
        }
    }

    fn with_targets(ids: &[&str]) -> Session {
        let mut s = Session::new();
        let t = s.begin_target_load("CSF");
        let status = s.finish_target_load(
            t,
            Ok(TargetLoad {
                elements: ids.iter().map(|id| el("CSF", id)).collect(),
                relationships: Vec::new(),
            }),
        );
        assert_eq!(status, LoadStatus::Applied);
        s
    }

    #[test]
    fn add_candidate_is_idempotent_per_identifier() {
        let mut s = with_targets(&["A"]);
        assert_eq!(s.add_candidate(el("ATTACK", "T1")), Ok(AddOutcome::Added { index: 0 }));
        assert_eq!(s.add_candidate(el("ATTACK", "T2")), Ok(AddOutcome::Added { index: 1 }));
        let v = s.version();
        assert_eq!(s.add_candidate(el("ATTACK", "T1")), Ok(AddOutcome::Duplicate { index: 0 }));
        assert_eq!(s.version(), v);
        assert_eq!(s.mapped().len(), 2);
    }

    #[test]
    fn remove_candidate_shrinks_by_one_and_rejects_bad_index() {
        let mut s = with_targets(&["A"]);
        for id in ["T1", "T2", "T3"] {
            let _ = s.add_candidate(el("ATTACK", id));
        }
        assert_eq!(s.remove_candidate(1).unwrap().element_identifier, "T2");
        assert_eq!(s.mapped().len(), 2);
        assert_eq!(s.remove_candidate(1).unwrap().element_identifier, "T3");
        assert_eq!(s.mapped().len(), 1);
        assert_eq!(
            s.remove_candidate(1).unwrap_err(),
            SessionError::InvalidIndex { index: 1, len: 1 }
        );
    }

    #[test]
    fn advance_is_clamped_and_clears_tray() {
        let mut s = with_targets(&["A", "B"]);
        let v = s.version();
        assert!(!s.advance(Direction::Prev));
        assert_eq!(s.version(), v);

        let _ = s.add_candidate(el("ATTACK", "T1"));
        assert!(s.advance(Direction::Next));
        assert_eq!(s.cursor(), 1);
        assert!(s.mapped().is_empty());

        let v = s.version();
        assert!(!s.advance(Direction::Next));
        assert_eq!(s.cursor(), 1);
        assert_eq!(s.version(), v);
    }

    #[test]
    fn empty_target_list_disables_navigation() {
        let mut s = with_targets(&[]);
        assert_eq!(s.cursor(), 0);
        assert!(s.current_target().is_none());
        assert!(!s.advance(Direction::Next));
        assert!(!s.advance(Direction::Prev));
        assert!(!s.can_save());
    }

    #[test]
    fn stale_target_response_is_discarded() {
        let mut s = Session::new();
        let slow = s.begin_target_load("OLD");
        let fast = s.begin_target_load("NEW");
        let applied = s.finish_target_load(
            fast,
            Ok(TargetLoad {
                elements: vec![el("NEW", "N1")],
                relationships: Vec::new(),
            }),
        );
        assert_eq!(applied, LoadStatus::Applied);
        let stale = s.finish_target_load(
            slow,
            Ok(TargetLoad {
                elements: vec![el("OLD", "O1"), el("OLD", "O2")],
                relationships: Vec::new(),
            }),
        );
        assert_eq!(stale, LoadStatus::Stale);
        assert_eq!(s.target_doc(), Some("NEW"));
        assert_eq!(s.targets().len(), 1);
    }

    #[test]
    fn failed_target_load_keeps_previous_selection() {
        let mut s = with_targets(&["A", "B"]);
        assert!(s.advance(Direction::Next));
        let t = s.begin_target_load("BROKEN");
        let status = s.finish_target_load(
            t,
            Err(ClientError::Request {
                status: Some(500),
                message: "boom".into(),
            }),
        );
        assert!(matches!(status, LoadStatus::Failed(_)));
        assert_eq!(s.target_doc(), Some("CSF"));
        assert_eq!(s.targets().len(), 2);
        assert_eq!(s.cursor(), 1);
        assert!(s.loading_target().is_none());
    }

    #[test]
    fn source_load_leaves_cursor_and_tray_alone() {
        let mut s = with_targets(&["A", "B"]);
        assert!(s.advance(Direction::Next));
        let _ = s.add_candidate(el("ATTACK", "T1"));
        let t = s.begin_source_load("ATTACK", Some("  phish "));
        s.finish_source_load(t, Ok(vec![el("ATTACK", "T1566")]));
        assert_eq!(s.cursor(), 1);
        assert_eq!(s.mapped().len(), 1);
        assert_eq!(s.search(), Some("phish"));
        assert_eq!(s.source_doc(), Some("ATTACK"));
    }

    #[test]
    fn relationship_type_cycles_and_validates() {
        let mut s = Session::new();
        s.set_catalog(
            Vec::new(),
            vec![
                RelationshipType {
                    relationship_identifier: "mitigates".into(),
                    description: String::new(),
                },
                RelationshipType {
                    relationship_identifier: "equal".into(),
                    description: String::new(),
                },
            ],
        );
        assert_eq!(s.cycle_relationship_type(), Some("mitigates"));
        assert_eq!(s.cycle_relationship_type(), Some("equal"));
        assert_eq!(s.cycle_relationship_type(), Some("mitigates"));
        assert!(s.select_relationship_type("bogus").is_err());
        s.select_relationship_type("equal").unwrap();
        assert_eq!(s.relationship_type(), Some("equal"));

        s.set_catalog(Vec::new(), Vec::new());
        assert_eq!(s.relationship_type(), None);
    }

    fn report(doc: &str, element: &str, cursor: usize) -> CommitReport {
        CommitReport {
            provenance: crate::model::ProvenanceDocument {
                identifier: "MAPPING_CSF_TO_ATTACK_1".into(),
                name: "Mapping: CSF to ATTACK".into(),
            },
            submitted: 1,
            accepted: 1,
            outcomes: Vec::new(),
            target_doc: doc.into(),
            target_element: element.into(),
            cursor,
        }
    }

    #[test]
    fn tray_is_locked_while_committing() {
        let mut s = with_targets(&["A", "B"]);
        let _ = s.add_candidate(el("ATTACK", "T1566"));
        s.begin_commit();
        assert_eq!(
            s.add_candidate(el("ATTACK", "T1078")),
            Err(SessionError::CommitInProgress)
        );
        assert_eq!(s.remove_candidate(0), Err(SessionError::CommitInProgress));
        assert_eq!(s.clear_candidates(), Err(SessionError::CommitInProgress));
        assert_eq!(s.mapped().len(), 1);

        s.abort_commit();
        assert!(matches!(
            s.add_candidate(el("ATTACK", "T1078")),
            Ok(AddOutcome::Added { index: 1 })
        ));
    }

    #[test]
    fn commit_on_current_element_clears_and_advances() {
        let mut s = with_targets(&["A", "B"]);
        let _ = s.add_candidate(el("ATTACK", "T1566"));
        s.begin_commit();
        let effect = s.record_commit(&report("CSF", "A", 0));
        assert_eq!(
            effect,
            CommitEffect {
                recorded: true,
                cleared: true,
                advanced: true
            }
        );
        assert!(s.mapped().is_empty());
        assert_eq!(s.cursor(), 1);
        assert!(!s.committing());
    }

    #[test]
    fn commit_after_navigating_away_keeps_cursor_and_tray() {
        let mut s = with_targets(&["A", "B", "C"]);
        let _ = s.add_candidate(el("ATTACK", "T1566"));
        s.begin_commit();
        assert!(s.advance(Direction::Next));
        let effect = s.record_commit(&report("CSF", "A", 0));
        assert_eq!(
            effect,
            CommitEffect {
                recorded: true,
                cleared: false,
                advanced: false
            }
        );
        assert_eq!(s.cursor(), 1);
        assert_eq!(s.ledger().len(), 1);
        assert!(!s.committing());
    }

    #[test]
    fn commit_for_a_replaced_target_document_is_not_recorded() {
        let mut s = with_targets(&["A", "B"]);
        let _ = s.add_candidate(el("ATTACK", "T1566"));
        s.begin_commit();
        let effect = s.record_commit(&report("OTHER", "A", 0));
        assert!(!effect.recorded && !effect.cleared && !effect.advanced);
        assert!(s.ledger().is_empty());
        assert_eq!(s.mapped().len(), 1);
        assert_eq!(s.cursor(), 0);
    }

    #[test]
    fn existing_links_follow_the_cursor() {
        let mut s = Session::new();
        let t = s.begin_target_load("CSF");
        let rel = Relationship {
            source_element_identifier: "B".into(),
            source_doc_identifier: "CSF".into(),
            dest_element_identifier: "T1".into(),
            dest_doc_identifier: "ATTACK".into(),
            provenance_doc_identifier: "P".into(),
            relationship_identifier: "equal".into(),
        };
        s.finish_target_load(
            t,
            Ok(TargetLoad {
                elements: vec![el("CSF", "A"), el("CSF", "B")],
                relationships: vec![rel],
            }),
        );
        assert!(s.existing_links().is_empty());
        assert!(s.advance(Direction::Next));
        assert_eq!(s.existing_links().len(), 1);
    }
}
