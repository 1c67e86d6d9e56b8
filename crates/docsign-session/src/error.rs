//! Error types for the signing session
//!
//! Errors are classified where they occur (API client, resource loader,
//! submission coordinator). The controller only ever sees the classified
//! variants below.

use shared_types::{GeometryError, PackageDocId, PlacementId};
use thiserror::Error;

use crate::session::SessionState;

/// Failure reported by the REST layer
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApiError {
    #[error("Network unavailable: {0}")]
    Offline(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rejected by server: {0}")]
    Validation(String),

    /// The package (or document) was already signed or completed
    #[error("Already completed: {0}")]
    Conflict(String),

    #[error("Server error {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Malformed response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Offline or timed out
    pub fn is_connectivity(&self) -> bool {
        matches!(self, ApiError::Offline(_) | ApiError::Timeout)
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ApiError::Conflict(_))
    }
}

/// Document binary could not be obtained
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResourceLoadError {
    #[error("Document {document_id} version {version_id} not found")]
    NotFound {
        document_id: String,
        version_id: String,
    },

    #[error("Failed to fetch document: {0}")]
    Network(String),

    #[error("Connection lost while fetching document: {0}")]
    Transient(String),
}

impl ResourceLoadError {
    /// Build from the API error for `(document_id, version_id)`
    pub fn from_api(err: ApiError, document_id: &str, version_id: &str) -> Self {
        match err {
            ApiError::NotFound(_) => ResourceLoadError::NotFound {
                document_id: document_id.to_string(),
                version_id: version_id.to_string(),
            },
            e if e.is_connectivity() => ResourceLoadError::Transient(e.to_string()),
            e => ResourceLoadError::Network(e.to_string()),
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, ResourceLoadError::NotFound { .. })
    }
}

/// Local pre-flight rejection. Never reaches the network.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Package has no documents")]
    EmptyPackage,

    #[error("Package lists document {0} more than once")]
    DuplicateDocument(PackageDocId),

    #[error("Place at least one signature on document {index} before continuing")]
    NoPlacements { index: usize },

    #[error("Document index {index} out of range (package has {count} documents)")]
    IndexOutOfRange { index: usize, count: usize },

    #[error("No signature placements have a signature attached")]
    EmptyBatch,

    #[error("Draw or upload a signature first")]
    NoSignatureImage,

    #[error("Invalid signature image: {0}")]
    InvalidSignatureImage(&'static str),

    #[error("Unknown placement: {0}")]
    UnknownPlacement(PlacementId),

    #[error("Unknown package document: {0}")]
    UnknownDocument(PackageDocId),

    #[error("Invalid placement: {0}")]
    Geometry(#[from] GeometryError),

    #[error("Network is offline")]
    Offline,
}

/// Error returned by controller operations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    ResourceLoad(#[from] ResourceLoadError),

    /// Retryable connectivity failure outside of submission
    #[error("Connection problem: {0}")]
    Connectivity(String),

    #[error("Cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: SessionState,
    },

    #[error("{0}")]
    Unknown(String),
}

impl SessionError {
    pub(crate) fn invalid_state(action: &'static str, state: &SessionState) -> Self {
        SessionError::InvalidState {
            action,
            state: state.clone(),
        }
    }

    /// Classify an API failure from a non-submission operation
    pub(crate) fn from_api(err: ApiError) -> Self {
        match err {
            e if e.is_connectivity() => SessionError::Connectivity(e.to_string()),
            ApiError::Validation(msg) => SessionError::Unknown(msg),
            e => SessionError::Unknown(e.to_string()),
        }
    }
}
