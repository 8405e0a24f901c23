//! Rich diagnostic error types for crosswalk.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! so every failure carries an error code and a one-line hint the user can act on.

use miette::Diagnostic;
use thiserror::Error;

use crate::client::ClientError;
use crate::config::ConfigError;
use crate::export::ExportError;
use crate::paths::PathError;

/// Top-level error type.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum CrosswalkError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Commit(#[from] CommitError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Export(#[from] ExportError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Paths(#[from] PathError),
}

// ---------------------------------------------------------------------------
// Session errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic, PartialEq, Eq)]
pub enum SessionError {
    #[error("no mapped element at position {index} (tray holds {len})")]
    #[diagnostic(
        code(crosswalk::session::invalid_index),
        help("The tray changed underneath the selection. Pick the entry again.")
    )]
    InvalidIndex { index: usize, len: usize },

    #[error("unknown relationship type \"{identifier}\"")]
    #[diagnostic(
        code(crosswalk::session::unknown_relationship_type),
        help("Relationship types come from the first loaded document. Reload the catalog.")
    )]
    UnknownRelationshipType { identifier: String },

    #[error("unknown document \"{identifier}\"")]
    #[diagnostic(
        code(crosswalk::session::unknown_document),
        help("List available documents with `crosswalk documents`.")
    )]
    UnknownDocument { identifier: String },

    #[error("the tray is locked while a save is running")]
    #[diagnostic(
        code(crosswalk::session::commit_in_progress),
        help("Wait for the save to finish, then change the tray.")
    )]
    CommitInProgress,
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;

// ---------------------------------------------------------------------------
// Transfer payload errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic, PartialEq, Eq)]
pub enum TransferError {
    #[error("nothing was dropped")]
    #[diagnostic(
        code(crosswalk::transfer::empty),
        help("Grab a candidate (space) before dropping it on the tray.")
    )]
    EmptyPayload,

    #[error("dropped payload could not be decoded: {reason}")]
    #[diagnostic(
        code(crosswalk::transfer::undecodable),
        help("The payload was produced by an incompatible version or was truncated in transit.")
    )]
    Undecodable { reason: String },

    #[error("dropped payload has no element identifier")]
    #[diagnostic(
        code(crosswalk::transfer::missing_identifier),
        help("Only elements with a business key can be mapped.")
    )]
    MissingIdentifier,
}

pub type TransferResult<T> = std::result::Result<T, TransferError>;

// ---------------------------------------------------------------------------
// Commit errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum CommitError {
    #[error("no relationship type selected")]
    #[diagnostic(
        code(crosswalk::commit::no_relationship_type),
        help("Choose a relationship type (`r`) before saving.")
    )]
    NoRelationshipType,

    #[error("no mapped elements to save")]
    #[diagnostic(
        code(crosswalk::commit::no_candidates),
        help("Drop at least one candidate on the tray before saving.")
    )]
    NoCandidates,

    #[error("no target element to map from")]
    #[diagnostic(
        code(crosswalk::commit::no_target_element),
        help("Select a target document that has elements.")
    )]
    NoTargetElement,

    #[error("no source document selected")]
    #[diagnostic(
        code(crosswalk::commit::no_source_document),
        help("Select the source document the candidates come from.")
    )]
    NoSourceDocument,

    #[error("nothing to create: all {submitted} candidate relationship(s) were rejected")]
    #[diagnostic(
        code(crosswalk::commit::nothing_validated),
        help("The service rejected every pair. Check the log for per-candidate reasons.")
    )]
    NothingValidated { submitted: usize },

    #[error("failed to create provenance document; nothing was saved")]
    #[diagnostic(
        code(crosswalk::commit::provenance),
        help("Relationships are only persisted under a provenance document. Try saving again.")
    )]
    Provenance {
        #[source]
        source: ClientError,
    },

    #[error("failed to persist relationships under {provenance}")]
    #[diagnostic(
        code(crosswalk::commit::persist),
        help("The provenance document exists but holds no relationships. Try saving again.")
    )]
    Persist {
        provenance: String,
        #[source]
        source: ClientError,
    },

    #[error("service accepted none of the {submitted} relationship(s)")]
    #[diagnostic(
        code(crosswalk::commit::nothing_persisted),
        help("They may already exist under this provenance document.")
    )]
    NothingPersisted { submitted: usize },

    #[error("a save is already in progress")]
    #[diagnostic(code(crosswalk::commit::in_progress))]
    InProgress,
}

impl CommitError {
    /// Precondition failures are detected before any network call.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            CommitError::NoRelationshipType
                | CommitError::NoCandidates
                | CommitError::NoTargetElement
                | CommitError::NoSourceDocument
                | CommitError::InProgress
        )
    }
}

pub type CommitResult<T> = std::result::Result<T, CommitError>;
