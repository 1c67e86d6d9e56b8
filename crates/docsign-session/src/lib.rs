//! Package signing session for the DocSign client
//!
//! Walks a signer through an ordered package of PDF documents, accumulates
//! signature placements per document, merges AI-suggested placements and
//! submits everything as one batch, staying correct under cancellation,
//! connection loss and slow responses.
//!
//! # Components
//!
//! - [`DocumentResourceLoader`]: fetches and caches document binaries and
//!   owns the single live handle the renderer reads from
//! - [`SignaturePlacementStore`]: per-document placement accumulator
//! - [`SessionController`]: the state machine driving navigation
//! - `SubmissionCoordinator`: the batch submission, progress ticker and
//!   cancellation semantics (driven through the controller)
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use docsign_session::{
//!     Advance, ClientConfig, HttpSigningApi, ManualConnectivity, SessionController,
//! };
//! use shared_types::{PackageId, PlacementRect, SignatureImageRef};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = ClientConfig::default();
//! let api = Arc::new(HttpSigningApi::new(&config)?);
//! let connectivity = Arc::new(ManualConnectivity::default());
//!
//! let session =
//!     SessionController::start(PackageId::from("pkg-1"), api, connectivity, config).await?;
//! session.capture_signature(SignatureImageRef("https://cdn/sig.png".into()))?;
//!
//! loop {
//!     session.load_current_document().await?;
//!     session.add_placement(1, PlacementRect::new(0.6, 0.85, 0.3, 0.08))?;
//!     if let Advance::Submitted(outcome) = session.advance().await? {
//!         println!("{:?}", outcome);
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::{Mutex, MutexGuard};

pub mod api;
pub mod cancel;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod loader;
pub mod progress;
pub mod session;
pub mod store;
pub mod submission;

pub use api::{HttpSigningApi, SignBatch, SignatureSubmission, SigningApi};
pub use cancel::CancelToken;
pub use config::ClientConfig;
pub use connectivity::{Connectivity, ConnectivityMonitor, ManualConnectivity, PollingConnectivity};
pub use error::{ApiError, ResourceLoadError, SessionError, ValidationError};
pub use loader::{DocumentKey, DocumentResourceLoader, LoadOutcome, ResourceHandle};
pub use progress::{ProgressTicker, SubmissionProgress};
pub use session::{Advance, SessionController, SessionEvent, SessionState, SuggestionOutcome};
pub use store::{FlatPlacement, SignaturePlacementStore};
pub use submission::SubmissionOutcome;

/// Lock a mutex, recovering the data if a previous holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
