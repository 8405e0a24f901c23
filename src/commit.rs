//! Relationship commit workflow.
//!
//! One "Save" turns the tray into persisted relationships:
//!
//! 1. precondition check ([`CommitPlan::from_session`], no network)
//! 2. per-candidate validation, strictly in tray order
//! 3. one provenance document for the (target, source) pair
//! 4. bulk persist under the provenance document's numeric id
//!
//! Step 5 (ledger, tray, cursor) is [`crate::session::Session::record_commit`],
//! applied on the UI thread once the [`CommitReport`] comes back.

use crate::client::{ClientError, Gateway};
use crate::error::{CommitError, CommitResult};
use crate::model::{CandidateRelationship, Element, ProvenanceDocument, ValidatedRelationship};
use crate::session::Session;

/// Everything needed to run a commit off the UI thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitPlan {
    target_doc: String,
    source_doc: String,
    cursor: usize,
    target: Element,
    relationship_type: String,
    mapped: Vec<Element>,
}

/// Validation outcome of one tray entry, in tray order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateOutcome {
    pub candidate: CandidateRelationship,
    pub result: Result<ValidatedRelationship, ClientError>,
}

impl CandidateOutcome {
    pub fn accepted(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReport {
    pub provenance: ProvenanceDocument,
    /// Relationships sent to bulk save (the validated ones).
    pub submitted: usize,
    /// Relationships the service persisted.
    pub accepted: usize,
    pub outcomes: Vec<CandidateOutcome>,
    pub target_doc: String,
    pub target_element: String,
    pub cursor: usize,
}

impl CommitReport {
    /// Some validated relationships were not persisted.
    pub fn is_partial(&self) -> bool {
        self.accepted < self.submitted
    }

    /// Tray entries the service refused during validation.
    pub fn rejected(&self) -> impl Iterator<Item = &CandidateOutcome> {
        self.outcomes.iter().filter(|o| !o.accepted())
    }
}

impl CommitPlan {
    /// Check preconditions against the session. Issues no requests.
    pub fn from_session(session: &Session) -> CommitResult<Self> {
        if session.committing() {
            return Err(CommitError::InProgress);
        }
        let (Some(target_doc), Some(target)) = (session.target_doc(), session.current_target())
        else {
            return Err(CommitError::NoTargetElement);
        };
        let relationship_type = session
            .relationship_type()
            .ok_or(CommitError::NoRelationshipType)?;
        if session.mapped().is_empty() {
            return Err(CommitError::NoCandidates);
        }
        let source_doc = session.source_doc().ok_or(CommitError::NoSourceDocument)?;

        Ok(Self {
            target_doc: target_doc.to_string(),
            source_doc: source_doc.to_string(),
            cursor: session.cursor(),
            target: target.clone(),
            relationship_type: relationship_type.to_string(),
            mapped: session.mapped().to_vec(),
        })
    }

    /// Candidate relationships in tray order: target element as source,
    /// mapped element as destination.
    pub fn candidates(&self) -> Vec<CandidateRelationship> {
        self.mapped
            .iter()
            .map(|dest| CandidateRelationship::between(&self.target, dest, &self.relationship_type))
            .collect()
    }

    /// Run steps 2 to 4 against the service.
    pub fn execute(&self, gateway: &Gateway) -> CommitResult<CommitReport> {
        let span = tracing::info_span!(
            "commit",
            target = %self.target.element_identifier,
            relationship = %self.relationship_type,
            candidates = self.mapped.len(),
        );
        let _guard = span.enter();

        let outcomes: Vec<CandidateOutcome> = self
            .candidates()
            .into_iter()
            .map(|candidate| {
                let result = gateway.validate_relationship(&candidate);
                if let Err(e) = &result {
                    tracing::warn!(
                        dest = %candidate.dest_element_identifier,
                        error = %e,
                        "candidate rejected"
                    );
                }
                CandidateOutcome { candidate, result }
            })
            .collect();

        let validated: Vec<ValidatedRelationship> = outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok().cloned())
            .collect();
        if validated.is_empty() {
            return Err(CommitError::NothingValidated {
                submitted: outcomes.len(),
            });
        }

        let provenance = gateway
            .create_provenance_document(&self.target_doc, &self.source_doc)
            .map_err(|source| CommitError::Provenance { source })?;
        tracing::info!(provenance = %provenance.identifier, "provenance document created");

        let persist_err = |source| CommitError::Persist {
            provenance: provenance.identifier.clone(),
            source,
        };
        let provenance_id = gateway
            .resolve_document_id(&provenance.identifier)
            .map_err(persist_err)?;
        let outcome = gateway
            .bulk_save(provenance_id, &validated)
            .map_err(persist_err)?;

        if outcome.success_count == 0 {
            return Err(CommitError::NothingPersisted {
                submitted: validated.len(),
            });
        }
        tracing::info!(
            provenance = %provenance.identifier,
            accepted = outcome.success_count,
            submitted = validated.len(),
            "relationships saved"
        );

        Ok(CommitReport {
            provenance,
            submitted: validated.len(),
            accepted: outcome.success_count.min(validated.len()),
            outcomes,
            target_doc: self.target_doc.clone(),
            target_element: self.target.element_identifier.clone(),
            cursor: self.cursor,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use serde_json::{Value, json};

    use super::*;
    use crate::client::{ClientResult, Download, Endpoint, Method, Transport};
    use crate::model::RelationshipType;
    use crate::session::{TargetLoad, Session};

    /// Answers every route with a canned value and records the call order.
    struct Canned {
        calls: Mutex<Vec<String>>,
        reject: Vec<&'static str>,
        provenance_fails: bool,
        success_count: usize,
    }

    fn canned() -> Canned {
        Canned {
            calls: Mutex::new(Vec::new()),
            reject: Vec::new(),
            provenance_fails: false,
            success_count: usize::MAX,
        }
    }

    impl Transport for Canned {
        fn call(&self, method: Method, endpoint: &Endpoint, body: Option<&Value>) -> ClientResult<Value> {
            let path = endpoint.path();
            self.calls
                .lock()
                .unwrap()
                .push(format!("{} {path}", method.as_str()));
            match path.as_str() {
                "/relationships" => {
                    let dest = body
                        .and_then(|b| b["dest_element_identifier"].as_str())
                        .unwrap_or_default();
                    if self.reject.contains(&dest) {
                        return Err(ClientError::from_status(400, "Bad Request", Some("Invalid identifiers provided")));
                    }
                    Ok(json!({"source_element_id": 1, "dest_element_id": 2, "relationship_type_id": 3, "message": "ok"}))
                }
                "/provenance-documents" if self.provenance_fails => {
                    Err(ClientError::from_status(500, "Internal Server Error", None))
                }
                "/provenance-documents" => Ok(json!({
                    "provenance_doc_identifier": "MAPPING_CSF_TO_ATTACK_1",
                    "provenance_doc_name": "Mapping: CSF to ATTACK"
                })),
                "/documents/MAPPING_CSF_TO_ATTACK_1/id" => Ok(json!({"document_id": 42})),
                "/relationships/bulk" => {
                    let n = body
                        .and_then(|b| b["relationships"].as_array())
                        .map_or(0, Vec::len);
                    Ok(json!({"success_count": n.min(self.success_count), "total_attempted": n}))
                }
                other => Err(ClientError::from_status(404, "Not Found", Some(other))),
            }
        }

        fn download(&self, _endpoint: &Endpoint) -> ClientResult<Download> {
            unreachable!("commit never downloads")
        }
    }

    fn el(doc: &str, id: &str) -> Element {
        Element {
            doc_identifier: doc.into(),
            element_type: "technique".into(),
            element_identifier: id.into(),
            title: id.into(),
            text: String::new(),
        }
    }

    fn ready_session(tray: &[&str]) -> Session {
        let mut s = Session::new();
        s.set_catalog(
            Vec::new(),
            vec![RelationshipType {
                relationship_identifier: "mitigates".into(),
                description: String::new(),
            }],
        );
        let t = s.begin_target_load("CSF");
        s.finish_target_load(
            t,
            Ok(TargetLoad {
                elements: vec![el("CSF", "PR.AT-01"), el("CSF", "DE.CM-01")],
                relationships: Vec::new(),
            }),
        );
        let t = s.begin_source_load("ATTACK", None);
        s.finish_source_load(t, Ok(Vec::new()));
        for id in tray {
            let _ = s.add_candidate(el("ATTACK", id));
        }
        s.select_relationship_type("mitigates").unwrap();
        s
    }

    #[test]
    fn preconditions_are_checked_before_any_request() {
        let mut s = ready_session(&[]);
        assert!(matches!(CommitPlan::from_session(&s), Err(CommitError::NoCandidates)));

        let _ = s.add_candidate(el("ATTACK", "T1566"));
        s.set_catalog(Vec::new(), Vec::new());
        assert!(matches!(
            CommitPlan::from_session(&s),
            Err(CommitError::NoRelationshipType)
        ));

        assert!(matches!(
            CommitPlan::from_session(&Session::new()),
            Err(CommitError::NoTargetElement)
        ));
    }

    #[test]
    fn candidates_link_target_to_each_mapped_element_in_order() {
        let plan = CommitPlan::from_session(&ready_session(&["T1566", "T1566.001"])).unwrap();
        let c = plan.candidates();
        assert_eq!(c.len(), 2);
        assert_eq!(c[0].source_element_identifier, "PR.AT-01");
        assert_eq!(c[0].source_doc_identifier, "CSF");
        assert_eq!(c[0].dest_element_identifier, "T1566");
        assert_eq!(c[1].dest_element_identifier, "T1566.001");
        assert!(c.iter().all(|c| c.relationship_identifier == "mitigates"));
    }

    #[test]
    fn execute_runs_steps_in_order() {
        let t = Arc::new(canned());
        let gw = Gateway::new(t.clone());
        let plan = CommitPlan::from_session(&ready_session(&["T1566", "T1566.001"])).unwrap();
        let report = plan.execute(&gw).unwrap();
        assert_eq!(report.submitted, 2);
        assert_eq!(report.accepted, 2);
        assert!(!report.is_partial());
        assert_eq!(report.provenance.identifier, "MAPPING_CSF_TO_ATTACK_1");
        assert_eq!(
            *t.calls.lock().unwrap(),
            vec![
                "POST /relationships",
                "POST /relationships",
                "POST /provenance-documents",
                "GET /documents/MAPPING_CSF_TO_ATTACK_1/id",
                "POST /relationships/bulk",
            ]
        );
    }

    #[test]
    fn rejected_candidates_keep_their_position() {
        let t = Arc::new(Canned {
            reject: vec!["T1"],
            ..canned()
        });
        let gw = Gateway::new(t.clone());
        let plan = CommitPlan::from_session(&ready_session(&["T1", "T2"])).unwrap();
        let report = plan.execute(&gw).unwrap();
        assert_eq!(report.submitted, 1);
        assert!(!report.outcomes[0].accepted());
        assert!(report.outcomes[1].accepted());
        assert_eq!(report.rejected().count(), 1);
    }

    #[test]
    fn nothing_validated_stops_before_provenance() {
        let t = Arc::new(Canned {
            reject: vec!["T1"],
            ..canned()
        });
        let gw = Gateway::new(t.clone());
        let plan = CommitPlan::from_session(&ready_session(&["T1"])).unwrap();
        let err = plan.execute(&gw).unwrap_err();
        assert!(matches!(err, CommitError::NothingValidated { submitted: 1 }));
        assert_eq!(t.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn provenance_failure_persists_nothing() {
        let t = Arc::new(Canned {
            provenance_fails: true,
            ..canned()
        });
        let gw = Gateway::new(t.clone());
        let plan = CommitPlan::from_session(&ready_session(&["T1"])).unwrap();
        assert!(matches!(plan.execute(&gw), Err(CommitError::Provenance { .. })));
        assert!(
            !t.calls
                .lock()
                .unwrap()
                .iter()
                .any(|c| c.ends_with("/relationships/bulk"))
        );
    }

    #[test]
    fn partial_bulk_is_success_and_zero_is_failure() {
        let t = Arc::new(Canned {
            success_count: 1,
            ..canned()
        });
        let plan = CommitPlan::from_session(&ready_session(&["T1", "T2"])).unwrap();
        let report = plan.execute(&Gateway::new(t)).unwrap();
        assert_eq!((report.accepted, report.submitted), (1, 2));
        assert!(report.is_partial());

        let t = Arc::new(Canned {
            success_count: 0,
            ..canned()
        });
        assert!(matches!(
            plan.execute(&Gateway::new(t)),
            Err(CommitError::NothingPersisted { submitted: 2 })
        ));
    }
}
