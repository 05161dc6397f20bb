//! Error types for the role resolution engine

use crate::types::{IdentifierError, PrincipalId, ResourceId};
use std::time::Duration;
use thiserror::Error;

/// Role resolution engine errors
#[derive(Debug, Error)]
pub enum AuthzError {
    /// Malformed or missing identifiers, empty change batches, missing resource type.
    /// Always raised before any storage I/O.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Underlying store I/O failure
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A role change batch failed after some cells had already been written
    #[error(
        "Partial batch failure on {resource}: {} applied, {} unknown, {} not attempted: {source}",
        .applied.len(),
        .unknown.len(),
        .not_attempted.len()
    )]
    PartialBatchFailure {
        /// Resource the batch targeted
        resource: ResourceId,
        /// Cells that were written before the failure
        applied: Vec<PrincipalId>,
        /// Cells whose write failed and whose state is therefore unknown
        unknown: Vec<PrincipalId>,
        /// Cells that were never attempted
        not_attempted: Vec<PrincipalId>,
        /// The store error that interrupted the batch
        #[source]
        source: Box<AuthzError>,
    },

    /// Membership traversal exceeded the configured bound
    #[error("Traversal timed out after {0:?}")]
    Timeout(Duration),
}

impl From<IdentifierError> for AuthzError {
    fn from(err: IdentifierError) -> Self {
        AuthzError::InvalidArgument(err.to_string())
    }
}

/// Result type for role resolution operations
pub type Result<T> = std::result::Result<T, AuthzError>;
