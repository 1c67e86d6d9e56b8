//! Shared fixtures for session integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use docsign_session::{
    ApiError, ClientConfig, ManualConnectivity, SessionController, SignBatch, SigningApi,
};
use shared_types::{
    PackageDocId, PackageDocument, PackageId, PackageStatus, PlacementRect, SignatureImageRef,
    SigningPackage, SuggestedPlacement,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const SIGNATURE_URL: &str = "https://cdn.example.com/signatures/alice.png";

/// Scripted backend with configurable latency and results
pub struct ScriptedApi {
    pub package: Mutex<Result<SigningPackage, ApiError>>,
    pub document_delay: Mutex<Duration>,
    pub suggestions: Mutex<Vec<SuggestedPlacement>>,
    pub suggestion_delay: Mutex<Duration>,
    pub submit_results: Mutex<Vec<Result<(), ApiError>>>,
    pub submit_delay: Mutex<Duration>,
    pub submitted: Mutex<Vec<SignBatch>>,
    pub submit_timeouts: Mutex<Vec<Duration>>,
    pub submit_resolved: AtomicUsize,
    pub document_fetches: AtomicUsize,
}

impl ScriptedApi {
    pub fn new(package: SigningPackage) -> Self {
        Self {
            package: Mutex::new(Ok(package)),
            document_delay: Mutex::new(Duration::ZERO),
            suggestions: Mutex::new(Vec::new()),
            suggestion_delay: Mutex::new(Duration::ZERO),
            submit_results: Mutex::new(Vec::new()),
            submit_delay: Mutex::new(Duration::ZERO),
            submitted: Mutex::new(Vec::new()),
            submit_timeouts: Mutex::new(Vec::new()),
            submit_resolved: AtomicUsize::new(0),
            document_fetches: AtomicUsize::new(0),
        }
    }

    pub fn with_documents(count: usize) -> Self {
        Self::new(package(count))
    }

    /// Queue the result of the next submission (defaults to success)
    pub fn push_submit_result(&self, result: Result<(), ApiError>) {
        self.submit_results.lock().unwrap().push(result);
    }

    pub fn set_submit_delay(&self, delay: Duration) {
        *self.submit_delay.lock().unwrap() = delay;
    }

    pub fn set_suggestion_delay(&self, delay: Duration) {
        *self.suggestion_delay.lock().unwrap() = delay;
    }

    pub fn set_document_delay(&self, delay: Duration) {
        *self.document_delay.lock().unwrap() = delay;
    }

    pub fn set_suggestions(&self, suggestions: Vec<SuggestedPlacement>) {
        *self.suggestions.lock().unwrap() = suggestions;
    }

    pub fn submit_calls(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }

    pub fn last_batch(&self) -> Option<SignBatch> {
        self.submitted.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl SigningApi for ScriptedApi {
    async fn fetch_package(&self, _package_id: &PackageId) -> Result<SigningPackage, ApiError> {
        self.package.lock().unwrap().clone()
    }

    async fn fetch_document(
        &self,
        document_id: &str,
        version_id: &str,
    ) -> Result<Vec<u8>, ApiError> {
        self.document_fetches.fetch_add(1, Ordering::SeqCst);
        let delay = *self.document_delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        Ok(format!("%PDF-1.7 {}@{}", document_id, version_id).into_bytes())
    }

    async fn suggest_placements(
        &self,
        _document_id: &str,
    ) -> Result<Vec<SuggestedPlacement>, ApiError> {
        let delay = *self.suggestion_delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        Ok(self.suggestions.lock().unwrap().clone())
    }

    async fn upload_signature_image(&self, png: Vec<u8>) -> Result<SignatureImageRef, ApiError> {
        Ok(SignatureImageRef(format!(
            "https://cdn.example.com/signatures/{}.png",
            png.len()
        )))
    }

    async fn submit_signatures(
        &self,
        _package_id: &PackageId,
        batch: &SignBatch,
        timeout: Duration,
    ) -> Result<(), ApiError> {
        self.submitted.lock().unwrap().push(batch.clone());
        self.submit_timeouts.lock().unwrap().push(timeout);
        let delay = *self.submit_delay.lock().unwrap();
        tokio::time::sleep(delay).await;

        let result = {
            let mut results = self.submit_results.lock().unwrap();
            if results.is_empty() {
                Ok(())
            } else {
                results.remove(0)
            }
        };
        self.submit_resolved.fetch_add(1, Ordering::SeqCst);
        result
    }
}

pub fn package(count: usize) -> SigningPackage {
    SigningPackage {
        id: PackageId::from("pkg-1"),
        title: "Lease bundle".to_string(),
        status: PackageStatus::Pending,
        documents: (0..count)
            .map(|i| PackageDocument {
                id: PackageDocId(format!("pd-{}", i + 1)),
                document_id: format!("doc-{}", i + 1),
                version_id: "v1".to_string(),
                title: format!("Document {}", i + 1),
                order: i as u32,
            })
            .collect(),
    }
}

pub fn config() -> ClientConfig {
    ClientConfig {
        progress_tick_ms: 100,
        release_grace_ms: 50,
        completion_delay_ms: 200,
        ..ClientConfig::default()
    }
}

pub fn rect(slot: usize) -> PlacementRect {
    PlacementRect::new(0.1, 0.1 + slot as f64 * 0.1, 0.3, 0.05)
}

pub fn suggestion() -> SuggestedPlacement {
    SuggestedPlacement {
        page_number: 1,
        position_x: 0.55,
        position_y: 0.85,
        width: 0.3,
        height: 0.08,
    }
}

/// A started session with a captured signature, editing document 0
pub async fn editing_session(
    api: Arc<ScriptedApi>,
    connectivity: Arc<ManualConnectivity>,
) -> SessionController {
    let session =
        SessionController::start(PackageId::from("pkg-1"), api, connectivity, config())
            .await
            .expect("session starts");
    session
        .capture_signature(SignatureImageRef(SIGNATURE_URL.to_string()))
        .expect("signature captured");
    session
}

/// Place `count` signatures on the current document
pub fn place(session: &SessionController, count: usize) {
    for slot in 0..count {
        session.add_placement(1, rect(slot)).expect("placement added");
    }
}
