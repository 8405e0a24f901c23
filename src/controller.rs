//! The mapping session controller.
//!
//! [`MappingController`] owns the [`Session`], the shared [`Gateway`], the
//! [`Loader`] and the notice queue. User intents come in as method calls; each
//! one either mutates the session directly or submits a job whose
//! [`Completion`] is applied later by [`MappingController::poll`]. Every
//! intent ends with a `poll`, so in `Inline` mode the effect is visible as
//! soon as the call returns.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::client::Gateway;
use crate::commit::CommitPlan;
use crate::error::{CommitError, CommitResult, CrosswalkError, SessionError, SessionResult};
use crate::export::save_download;
use crate::loader::{Catalog, Completion, Debouncer, LoadMode, Loader};
use crate::model::{Element, ExportFormat};
use crate::notice::{DEFAULT_TTL, Notices};
use crate::session::{AddOutcome, Direction, LoadStatus, Session, TargetLoad};
use crate::transfer::{self, DecodedVia, TransferPayload};

/// Tunables for a controller.
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub mode: LoadMode,
    pub export_dir: PathBuf,
    pub search_debounce: Duration,
    pub notice_ttl: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            mode: LoadMode::Threaded,
            export_dir: PathBuf::from("."),
            search_debounce: crate::loader::DEFAULT_DEBOUNCE,
            notice_ttl: DEFAULT_TTL,
        }
    }
}

/// A candidate picked up and not yet dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grab {
    pub origin: usize,
    pub payload: TransferPayload,
}

pub struct MappingController {
    gateway: Arc<Gateway>,
    session: Session,
    loader: Loader,
    notices: Notices,
    debounce: Debouncer,
    search_input: String,
    grabbed: Option<Grab>,
    export_dir: PathBuf,
    exporting: bool,
    last_export: Option<PathBuf>,
}

impl MappingController {
    pub fn new(gateway: Gateway, options: ControllerOptions) -> Self {
        Self {
            gateway: Arc::new(gateway),
            session: Session::new(),
            loader: Loader::new(options.mode),
            notices: Notices::new(options.notice_ttl),
            debounce: Debouncer::new(options.search_debounce),
            search_input: String::new(),
            grabbed: None,
            export_dir: options.export_dir,
            exporting: false,
            last_export: None,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn notices(&self) -> &Notices {
        &self.notices
    }

    pub fn grabbed(&self) -> Option<&Grab> {
        self.grabbed.as_ref()
    }

    /// Text in the search box (may differ from the applied search).
    pub fn search_input(&self) -> &str {
        &self.search_input
    }

    /// Requests still running.
    pub fn busy(&self) -> bool {
        self.loader.in_flight() > 0
    }

    pub fn exporting(&self) -> bool {
        self.exporting
    }

    pub fn last_export(&self) -> Option<&std::path::Path> {
        self.last_export.as_deref()
    }

    pub fn export_dir(&self) -> &std::path::Path {
        &self.export_dir
    }

    // -----------------------------------------------------------------------
    // Loading
    // -----------------------------------------------------------------------

    /// Load the document list and relationship-type catalog.
    pub fn open(&mut self) {
        let gateway = Arc::clone(&self.gateway);
        self.loader.submit(
            "catalog",
            Box::new(move || {
                let result = gateway.list_documents().map(|documents| {
                    let relationship_types = match gateway.relationship_types(&documents) {
                        Ok(types) => types,
                        Err(e) => {
                            tracing::warn!(error = %e, "relationship types unavailable");
                            Vec::new()
                        }
                    };
                    Catalog {
                        documents,
                        relationship_types,
                    }
                });
                Completion::Catalog(result)
            }),
        );
        self.poll();
    }

    fn check_document(&mut self, doc: &str) -> SessionResult<()> {
        if !self.session.documents().is_empty() && self.session.document(doc).is_none() {
            self.notices.warn(format!("Unknown document \"{doc}\""));
            return Err(SessionError::UnknownDocument {
                identifier: doc.to_string(),
            });
        }
        Ok(())
    }

    /// Load `doc` as the target document.
    pub fn select_target_document(&mut self, doc: &str) -> SessionResult<()> {
        self.check_document(doc)?;
        let ticket = self.session.begin_target_load(doc);
        let gateway = Arc::clone(&self.gateway);
        let doc = doc.to_string();
        self.loader.submit(
            "target",
            Box::new(move || {
                let result = gateway.list_elements(&doc, None).map(|elements| {
                    let relationships = match gateway.get_document(&doc) {
                        Ok(bundle) => bundle.relationships,
                        Err(e) => {
                            tracing::warn!(doc = %doc, error = %e, "existing relationships unavailable");
                            Vec::new()
                        }
                    };
                    TargetLoad {
                        elements,
                        relationships,
                    }
                });
                Completion::Target {
                    ticket,
                    doc,
                    result,
                }
            }),
        );
        self.poll();
        Ok(())
    }

    /// Load candidates from `doc`, filtered by the current search text.
    pub fn select_source_document(&mut self, doc: &str) -> SessionResult<()> {
        self.check_document(doc)?;
        self.debounce.cancel();
        self.load_source(doc.to_string());
        Ok(())
    }

    fn load_source(&mut self, doc: String) {
        let search = self.search_input.trim().to_string();
        let ticket = self.session.begin_source_load(&doc, Some(&search));
        let gateway = Arc::clone(&self.gateway);
        self.loader.submit(
            "source",
            Box::new(move || {
                let result = gateway.list_elements(&doc, Some(&search));
                Completion::Source {
                    ticket,
                    doc,
                    result,
                }
            }),
        );
        self.poll();
    }

    /// Update the search text. The request goes out once typing pauses.
    pub fn search(&mut self, text: &str, now: Instant) {
        if self.search_input == text {
            return;
        }
        self.search_input = text.to_string();
        self.debounce.touch(now);
    }

    /// Send the pending search immediately.
    pub fn flush_search(&mut self) {
        self.debounce.cancel();
        let Some(doc) = self
            .session
            .loading_source()
            .or(self.session.source_doc())
            .map(str::to_string)
        else {
            return;
        };
        self.load_source(doc);
    }

    /// Idle-time housekeeping: debounced search and notice expiry.
    /// Returns `true` if anything visible changed.
    pub fn tick(&mut self, now: Instant) -> bool {
        if self.debounce.ready(now) {
            self.flush_search();
        }
        let expired = self.notices.expire(now);
        self.poll() || expired
    }

    // -----------------------------------------------------------------------
    // Navigation and tray
    // -----------------------------------------------------------------------

    pub fn advance(&mut self, direction: Direction) -> bool {
        let dropped = self.session.mapped().len();
        let moved = self.session.advance(direction);
        if moved && dropped > 0 {
            tracing::debug!(dropped, "tray cleared on navigation");
        }
        moved
    }

    /// Pick up the candidate at `index`.
    pub fn grab(&mut self, index: usize) -> bool {
        let Some(element) = self.session.candidates().get(index) else {
            self.grabbed = None;
            self.notices.warn("Nothing to grab there");
            return false;
        };
        let payload = TransferPayload::grab(element, index);
        if payload.data.is_none() {
            tracing::warn!(index, "grab produced no payload, drop will fall back to position");
        }
        self.grabbed = Some(Grab {
            origin: index,
            payload,
        });
        true
    }

    pub fn cancel_grab(&mut self) {
        self.grabbed = None;
    }

    /// Encoded payload of the grabbed candidate, for the clipboard.
    pub fn grabbed_payload(&self) -> Option<&str> {
        self.grabbed.as_ref()?.payload.data.as_deref()
    }

    /// Drop whatever is grabbed onto the tray.
    pub fn drop_grabbed(&mut self) -> Option<AddOutcome> {
        let Some(grab) = self.grabbed.take() else {
            self.notices.warn("Grab a candidate before dropping");
            return None;
        };
        self.drop_payload(&grab.payload)
    }

    /// Decode `payload` and add the element to the tray.
    pub fn drop_payload(&mut self, payload: &TransferPayload) -> Option<AddOutcome> {
        if self.session.current_target().is_none() {
            self.notices.warn("Select a target document with elements first");
            return None;
        }
        let default_doc = self.session.source_doc().unwrap_or_default().to_string();
        let (element, via) = match transfer::decode(payload, self.session.candidates(), &default_doc) {
            Ok(found) => found,
            Err(e) => {
                self.notices.warn(format!("Drop ignored: {e}"));
                return None;
            }
        };
        if via != DecodedVia::Current {
            tracing::info!(?via, element = %element.element_identifier, "payload recovered by fallback decoder");
        }
        let label = element.element_identifier.clone();
        let outcome = match self.session.add_candidate(element) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.notices.warn(format!("Drop of {label} ignored: {e}"));
                return None;
            }
        };
        if let AddOutcome::Duplicate { .. } = outcome {
            self.notices.warn(format!("{label} is already mapped"));
        }
        Some(outcome)
    }

    /// Drop text pasted from outside the terminal.
    pub fn paste(&mut self, text: &str) -> Option<AddOutcome> {
        self.grabbed = None;
        self.drop_payload(&TransferPayload::pasted(text))
    }

    pub fn remove_candidate(&mut self, index: usize) -> SessionResult<Element> {
        self.session.remove_candidate(index).inspect_err(|e| {
            self.notices.warn(e.to_string());
        })
    }

    pub fn clear_candidates(&mut self) -> usize {
        self.session.clear_candidates().unwrap_or_else(|e| {
            self.notices.warn(e.to_string());
            0
        })
    }

    pub fn select_relationship_type(&mut self, identifier: &str) -> SessionResult<()> {
        self.session.select_relationship_type(identifier).inspect_err(|e| {
            self.notices.warn(e.to_string());
        })
    }

    pub fn cycle_relationship_type(&mut self) -> Option<String> {
        self.session.cycle_relationship_type().map(str::to_string)
    }

    // -----------------------------------------------------------------------
    // Save and export
    // -----------------------------------------------------------------------

    /// Commit the tray. Precondition failures return immediately without
    /// touching the network.
    pub fn save(&mut self) -> CommitResult<()> {
        let plan = CommitPlan::from_session(&self.session).inspect_err(|e| {
            self.commit_failed(e);
        })?;
        self.session.begin_commit();
        let gateway = Arc::clone(&self.gateway);
        self.loader
            .submit("commit", Box::new(move || Completion::Commit(plan.execute(&gateway))));
        self.poll();
        Ok(())
    }

    /// Download this session's relationships into the export directory.
    pub fn export(&mut self, format: ExportFormat) -> bool {
        let Some(scope) = self.session.ledger().scope() else {
            self.notices.warn("Nothing to export yet: save a mapping first");
            return false;
        };
        if self.exporting {
            self.notices.warn("An export is already running");
            return false;
        }
        self.exporting = true;
        let gateway = Arc::clone(&self.gateway);
        let dir = self.export_dir.clone();
        self.loader.submit(
            "export",
            Box::new(move || {
                let result: Result<PathBuf, CrosswalkError> = gateway
                    .export(format, Some(&scope))
                    .map_err(Into::into)
                    .and_then(|download| save_download(&dir, &download).map_err(Into::into));
                Completion::Export(result)
            }),
        );
        self.poll();
        true
    }

    // -----------------------------------------------------------------------
    // Completions
    // -----------------------------------------------------------------------

    /// Apply every finished job. Returns `true` if anything was applied.
    pub fn poll(&mut self) -> bool {
        let done = self.loader.drain();
        let any = !done.is_empty();
        for completion in done {
            self.apply(completion);
        }
        any
    }

    /// Block up to `timeout` for outstanding jobs, applying them as they land.
    pub fn wait_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.busy() {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return false;
            }
            if let Some(completion) = self.loader.wait(left) {
                self.apply(completion);
            }
        }
        true
    }

    fn apply(&mut self, completion: Completion) {
        match completion {
            Completion::Catalog(Ok(catalog)) => {
                let n = catalog.documents.len();
                let typed = !catalog.relationship_types.is_empty();
                self.session
                    .set_catalog(catalog.documents, catalog.relationship_types);
                if typed || n == 0 {
                    self.notices.info(format!("Loaded {n} documents"));
                } else {
                    self.notices.warn(format!(
                        "Loaded {n} documents, but no relationship types: saving is unavailable"
                    ));
                }
            }
            Completion::Catalog(Err(e)) => {
                self.notices.error(format!("Could not load documents: {e}"));
            }
            Completion::Target {
                ticket,
                doc,
                result,
            } => match self.session.finish_target_load(ticket, result) {
                LoadStatus::Applied => {
                    self.grabbed = None;
                    self.notices.info(format!(
                        "Target {doc}: {} elements",
                        self.session.targets().len()
                    ));
                }
                LoadStatus::Stale => tracing::debug!(doc = %doc, "stale target response ignored"),
                LoadStatus::Failed(e) => {
                    self.notices.error(format!("Could not load {doc}: {e}"));
                }
            },
            Completion::Source {
                ticket,
                doc,
                result,
            } => match self.session.finish_source_load(ticket, result) {
                LoadStatus::Applied => {
                    self.grabbed = None;
                    tracing::debug!(doc = %doc, candidates = self.session.candidates().len(), "candidates loaded");
                }
                LoadStatus::Stale => tracing::debug!(doc = %doc, "stale source response ignored"),
                LoadStatus::Failed(e) => {
                    self.notices.error(format!("Could not search {doc}: {e}"));
                }
            },
            Completion::Commit(Ok(report)) => {
                let effect = self.session.record_commit(&report);
                let rejected = report.rejected().count();
                let mut text = format!(
                    "Saved {} of {} relationship(s) to {}",
                    report.accepted, report.submitted, report.provenance.identifier
                );
                if rejected > 0 {
                    text.push_str(&format!(", {rejected} rejected"));
                }
                if effect.cleared && !effect.advanced {
                    text.push_str(" (last element)");
                }
                self.notices.success(text);
                if !effect.recorded {
                    self.notices.warn(format!(
                        "{} was saved for {}, which is no longer the target: not in this export",
                        report.provenance.identifier, report.target_doc
                    ));
                } else if !effect.cleared {
                    self.notices.info(format!(
                        "Saved for {} while you moved on; the current tray is untouched",
                        report.target_element
                    ));
                }
            }
            Completion::Commit(Err(e)) => {
                self.session.abort_commit();
                self.commit_failed(&e);
            }
            Completion::Export(Ok(path)) => {
                self.exporting = false;
                self.notices.success(format!("Exported to {}", path.display()));
                self.last_export = Some(path);
            }
            Completion::Export(Err(e)) => {
                self.exporting = false;
                self.notices.error(format!("Export failed: {e}"));
            }
        }
    }
}

impl MappingController {
    /// Precondition failures warn; failures after the network was touched are errors.
    fn commit_failed(&mut self, e: &CommitError) {
        if e.is_validation() {
            self.notices.warn(e.to_string());
        } else {
            self.notices.error(commit_failure_text(e));
        }
    }
}

fn commit_failure_text(e: &CommitError) -> String {
    match e {
        CommitError::Provenance { source } | CommitError::Persist { source, .. } => {
            format!("Save failed: {e} ({source})")
        }
        other => format!("Save failed: {other}"),
    }
}
