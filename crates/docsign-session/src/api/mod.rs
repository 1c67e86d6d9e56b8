//! REST collaborators consumed by the signing session
//!
//! [`SigningApi`] is the seam between the session core and the network. The
//! production implementation is [`HttpSigningApi`]; tests substitute a
//! scripted double.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared_types::{PackageDocId, PackageId, SignatureImageRef, SigningPackage, SuggestedPlacement};
use std::time::Duration;

use crate::error::ApiError;

pub mod http;

pub use http::HttpSigningApi;

/// One entry of the `POST /packages/{id}/sign` body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureSubmission {
    pub package_doc_id: PackageDocId,
    pub signature_image_url: String,
    pub page_number: u32,
    pub position_x: f64,
    pub position_y: f64,
    pub width: f64,
    pub height: f64,
    pub display_qr_code: bool,
}

/// Body of `POST /packages/{id}/sign`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignBatch {
    pub signatures: Vec<SignatureSubmission>,
}

impl SignBatch {
    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }
}

/// Body of the AI suggestion response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuggestionResponse {
    #[serde(default)]
    pub suggestions: Vec<SuggestedPlacement>,
}

/// Backend operations the session depends on
#[async_trait]
pub trait SigningApi: Send + Sync {
    /// `GET /packages/{id}`
    async fn fetch_package(&self, package_id: &PackageId) -> Result<SigningPackage, ApiError>;

    /// Raw PDF bytes for a document version
    async fn fetch_document(&self, document_id: &str, version_id: &str)
        -> Result<Vec<u8>, ApiError>;

    /// AI placement suggestions for a document
    async fn suggest_placements(
        &self,
        document_id: &str,
    ) -> Result<Vec<SuggestedPlacement>, ApiError>;

    /// Upload a drawn signature, returning its URL
    async fn upload_signature_image(&self, png: Vec<u8>) -> Result<SignatureImageRef, ApiError>;

    /// `POST /packages/{id}/sign`, issued with `timeout` instead of the
    /// default request timeout
    async fn submit_signatures(
        &self,
        package_id: &PackageId,
        batch: &SignBatch,
        timeout: Duration,
    ) -> Result<(), ApiError>;
}
