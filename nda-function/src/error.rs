//! Error taxonomy for the synchronization engine
//!
//! Validation errors raised while assembling a group or a variant row
//! abort the operation before anything is written. Errors raised while
//! committing one candidate are caught by the populator and reported for
//! that candidate only.

use crate::hash_identity::GroupKey;
use nda_common::db::ScanKey;
use thiserror::Error;

/// Engine result type
pub type Result<T> = std::result::Result<T, Error>;

/// Synchronization engine errors
#[derive(Debug, Error)]
pub enum Error {
    /// Upstream schema could not be reached or queried; nothing was committed
    #[error("Upstream source '{source_name}' unavailable: {reason}")]
    SourceUnavailable { source_name: String, reason: String },

    /// Constraint violation while committing a single candidate
    #[error("Integrity error for {candidate}: {reason}")]
    Integrity { candidate: String, reason: String },

    /// Same membership already registered under another name
    #[error("Group {key} of kind '{kind}' already registered as '{existing}' (requested '{requested}')")]
    DuplicateGroup {
        kind: String,
        key: GroupKey,
        existing: String,
        requested: String,
    },

    /// One recording reached through two different input keys
    #[error("Recording {scan} appears through more than one member: {members:?}")]
    AmbiguousMembership { scan: ScanKey, members: Vec<String> },

    /// Members disagree on an attribute that must be shared
    #[error("Group members disagree on '{attribute}': {values:?}")]
    HeterogeneousGroup {
        attribute: String,
        values: Vec<String>,
    },

    /// A consumer already summarizes this recording through another key
    #[error("Recording {scan} already summarized by {existing} in '{consumer}'")]
    DuplicateRecording {
        scan: ScanKey,
        consumer: String,
        existing: String,
    },

    /// Aggregate row whose discriminator is missing or unknown
    #[error("Aggregate row {agg_hash} in '{aggregate}' is corrupt: {reason}")]
    CorruptAggregate {
        aggregate: String,
        agg_hash: String,
        reason: String,
    },

    /// Summary requested before its grouping was registered
    #[error("No '{kind}' group registered for {members:?} (expected {key})")]
    UnregisteredGrouping {
        kind: String,
        key: GroupKey,
        members: Vec<String>,
    },

    /// Recording has reference units with no score row
    #[error("Recording {scan} has {missing} unit(s) without a score")]
    IncompleteScores { scan: ScanKey, missing: usize },

    /// Variant does not provide a capability
    #[error("Variant '{variant}' does not support {capability}")]
    Unsupported {
        variant: String,
        capability: String,
    },

    /// Variant name not present in the registry
    #[error("Unknown variant '{0}'")]
    UnknownVariant(String),

    /// Operator declined a confirmation gate; nothing was written
    #[error("Operator declined {pending} pending candidate(s) for '{target}'")]
    ConfirmationDeclined { target: String, pending: usize },

    /// Requested row does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Row could not be decoded
    #[error("Malformed row: {0}")]
    MalformedRow(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// nda-common error
    #[error(transparent)]
    Common(#[from] nda_common::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when the underlying SQLite error is a lock timeout
    pub fn is_lock_error(&self) -> bool {
        match self {
            Error::Database(db_err) => db_err.to_string().contains("database is locked"),
            Error::Common(common) => common.is_lock_error(),
            _ => false,
        }
    }

    /// True for constraint violations reported by the store
    pub fn is_constraint_violation(&self) -> bool {
        match self {
            Error::Database(sqlx::Error::Database(db_err)) => {
                matches!(
                    db_err.kind(),
                    sqlx::error::ErrorKind::UniqueViolation
                        | sqlx::error::ErrorKind::ForeignKeyViolation
                        | sqlx::error::ErrorKind::NotNullViolation
                        | sqlx::error::ErrorKind::CheckViolation
                ) || db_err.message().contains("constraint failed")
            }
            Error::Integrity { .. } => true,
            _ => false,
        }
    }

    /// Convert a store failure for one candidate into the error reported for it
    pub fn for_candidate(self, candidate: &str) -> Self {
        if self.is_constraint_violation() {
            match self {
                Error::Integrity { .. } => self,
                other => Error::Integrity {
                    candidate: candidate.to_string(),
                    reason: other.to_string(),
                },
            }
        } else {
            self
        }
    }
}
