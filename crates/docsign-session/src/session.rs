//! Package signing session controller
//!
//! Walks the user through the documents of a package:
//!
//! ```text
//! Initializing ─► AwaitingSignatureCapture ─► Editing(0) ⇄ … ⇄ Editing(last)
//!                                                                  │ advance
//!                                                                  ▼
//!                                   Completed ◄── Submitting ──► Failed ─┐
//!                                                    │      ◄── retry ───┘
//!                                                    ▼
//!                                                Cancelled   (from any state)
//! ```
//!
//! The current document's placements live in a working set (the editor).
//! They are committed to the [`SignaturePlacementStore`] whenever the user
//! navigates away and before submission, never read back mid-edit. AI
//! suggestions are merged into the store entry and appended to the working
//! set; the commit on navigation then overwrites the entry with the full
//! working set.
//!
//! A batch the backend refuses as invalid reopens the last document with
//! the store intact. Any other submission error fails the session.
//!
//! All state sits behind one mutex that is never held across an `.await`.
//! Asynchronous results (document loads, AI suggestions, submission) carry
//! the index and navigation epoch that issued them and are dropped if the
//! session has moved on or been cancelled.

use shared_types::{
    PackageDocId, PackageDocument, PackageId, PlacementId, PlacementOrigin, PlacementRect,
    SignatureImageRef, SignaturePlacement, SigningPackage,
};
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, instrument, warn};

use crate::api::SigningApi;
use crate::cancel::CancelToken;
use crate::config::ClientConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{SessionError, ValidationError};
use crate::loader::{DocumentKey, DocumentResourceLoader, LoadOutcome, ResourceHandle};
use crate::lock;
use crate::progress::SubmissionProgress;
use crate::store::{FlatPlacement, SignaturePlacementStore};
use crate::submission::{SubmissionCoordinator, SubmissionOutcome};

const EVENT_CAPACITY: usize = 64;

const PNG_MAGIC: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Initializing,
    AwaitingSignatureCapture,
    Editing { index: usize },
    Submitting,
    Completed,
    Cancelled,
    Failed { message: String },
}

impl SessionState {
    /// Completed, Cancelled or Failed
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Cancelled | SessionState::Failed { .. }
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Initializing => write!(f, "initializing"),
            SessionState::AwaitingSignatureCapture => write!(f, "awaiting signature capture"),
            SessionState::Editing { index } => write!(f, "editing document {}", index + 1),
            SessionState::Submitting => write!(f, "submitting"),
            SessionState::Completed => write!(f, "completed"),
            SessionState::Cancelled => write!(f, "cancelled"),
            SessionState::Failed { message } => write!(f, "failed: {}", message),
        }
    }
}

/// Notifications for the hosting page
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(SessionState),
    /// A navigation or submission was blocked locally
    ValidationRejected(ValidationError),
    SuggestionsMerged { index: usize, count: usize },
    SuggestionsDiscarded { index: usize },
    /// The backend refused the batch; the last document is open for edits
    SubmissionRejected { message: String },
    /// Completion side effect, sent after the configured display delay
    Finished { package_id: PackageId },
}

/// Result of [`SessionController::advance`]
#[derive(Debug, Clone, PartialEq)]
pub enum Advance {
    Moved { index: usize },
    Submitted(SubmissionOutcome),
}

/// Result of [`SessionController::request_suggestions`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuggestionOutcome {
    Merged { count: usize },
    /// The user navigated away before the response arrived
    Discarded,
}

/// Mutable session data. Guarded by `Shared::session`.
pub(crate) struct Session {
    pub(crate) state: SessionState,
    pub(crate) package: Option<SigningPackage>,
    pub(crate) index: usize,
    /// Bumped on every navigation; stale-result guard
    pub(crate) epoch: u64,
    pub(crate) working: Vec<SignaturePlacement>,
    pub(crate) store: SignaturePlacementStore,
    pub(crate) signature: Option<SignatureImageRef>,
    pub(crate) display_qr_code: bool,
    pub(crate) submission_attempts: u32,
}

impl Session {
    pub(crate) fn document_count(&self) -> usize {
        self.package.as_ref().map_or(0, |p| p.document_count())
    }

    fn document(&self, index: usize) -> Option<&PackageDocument> {
        self.package.as_ref().and_then(|p| p.documents.get(index))
    }

    pub(crate) fn current_doc_id(&self) -> Option<PackageDocId> {
        self.document(self.index).map(|d| d.id.clone())
    }

    /// Write the working set into the store for the current document
    pub(crate) fn commit_working(&mut self) -> Result<(), ValidationError> {
        match self.current_doc_id() {
            Some(id) => self.store.commit(&id, self.working.clone()),
            None => Ok(()),
        }
    }

    fn editing_index(&self, action: &'static str) -> Result<usize, SessionError> {
        match self.state {
            SessionState::Editing { index } => Ok(index),
            ref other => Err(SessionError::invalid_state(action, other)),
        }
    }

    fn is_last(&self, index: usize) -> bool {
        index + 1 == self.document_count()
    }

    /// Whether a submission may start from the current state
    pub(crate) fn can_submit(&self) -> bool {
        match self.state {
            SessionState::Editing { index } => self.is_last(index),
            SessionState::Failed { .. } => self.submission_attempts > 0,
            _ => false,
        }
    }

    fn placement_mut(&mut self, id: &PlacementId) -> Result<&mut SignaturePlacement, SessionError> {
        self.working
            .iter_mut()
            .find(|p| &p.id == id)
            .ok_or_else(|| ValidationError::UnknownPlacement(id.clone()).into())
    }
}

/// State and collaborators shared by the controller and its tasks
pub(crate) struct Shared {
    pub(crate) package_id: PackageId,
    pub(crate) api: Arc<dyn SigningApi>,
    pub(crate) connectivity: Arc<dyn ConnectivityMonitor>,
    pub(crate) config: ClientConfig,
    pub(crate) loader: DocumentResourceLoader,
    pub(crate) session: Mutex<Session>,
    pub(crate) cancel: CancelToken,
    pub(crate) events: broadcast::Sender<SessionEvent>,
    pub(crate) progress: Arc<watch::Sender<SubmissionProgress>>,
}

impl Shared {
    pub(crate) fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub(crate) fn set_state(&self, session: &mut Session, state: SessionState) {
        if session.state == state {
            return;
        }
        info!("Session {}: {} -> {}", self.package_id, session.state, state);
        session.state = state.clone();
        self.emit(SessionEvent::StateChanged(state));
    }

    pub(crate) fn reject(&self, err: ValidationError) -> SessionError {
        debug!("Rejected: {}", err);
        self.emit(SessionEvent::ValidationRejected(err.clone()));
        SessionError::Validation(err)
    }

    /// Set the cancel flag and move to Cancelled. Caller holds the lock.
    ///
    /// A failed session can still be cancelled (abandoning the retry).
    pub(crate) fn cancel_locked(&self, session: &mut Session, reason: &str) -> bool {
        if matches!(
            session.state,
            SessionState::Completed | SessionState::Cancelled
        ) {
            return false;
        }
        self.cancel.cancel();
        warn!("Session {} cancelled: {}", self.package_id, reason);
        self.set_state(session, SessionState::Cancelled);
        true
    }

    /// True while nothing has invalidated a result issued at `(index, epoch)`
    fn is_current(&self, index: usize, epoch: u64) -> bool {
        let session = lock(&self.session);
        !self.cancel.is_cancelled()
            && !session.state.is_terminal()
            && session.index == index
            && session.epoch == epoch
    }
}

/// Drives one signing pass through a package.
///
/// Cheap to clone; clones share the same session, so one task can cancel
/// while another awaits a submission.
#[derive(Clone)]
pub struct SessionController {
    shared: Arc<Shared>,
}

impl SessionController {
    /// Create a controller in `Initializing`. Call [`initialize`](Self::initialize) next.
    pub fn new(
        package_id: PackageId,
        api: Arc<dyn SigningApi>,
        connectivity: Arc<dyn ConnectivityMonitor>,
        config: ClientConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (progress, _) = watch::channel(SubmissionProgress::idle(0));
        let loader = DocumentResourceLoader::new(api.clone(), config.release_grace());
        let display_qr_code = config.display_qr_code;

        Self {
            shared: Arc::new(Shared {
                package_id,
                api,
                connectivity,
                config,
                loader,
                session: Mutex::new(Session {
                    state: SessionState::Initializing,
                    package: None,
                    index: 0,
                    epoch: 0,
                    working: Vec::new(),
                    store: SignaturePlacementStore::new(Vec::new()),
                    signature: None,
                    display_qr_code,
                    submission_attempts: 0,
                }),
                cancel: CancelToken::new(),
                events,
                progress: Arc::new(progress),
            }),
        }
    }

    /// Create and initialize in one step
    pub async fn start(
        package_id: PackageId,
        api: Arc<dyn SigningApi>,
        connectivity: Arc<dyn ConnectivityMonitor>,
        config: ClientConfig,
    ) -> Result<Self, SessionError> {
        let controller = Self::new(package_id, api, connectivity, config);
        controller.initialize().await?;
        Ok(controller)
    }

    /// Fetch the package and move to `AwaitingSignatureCapture`.
    ///
    /// A package without documents (or with duplicate entries) fails the
    /// session. Network errors leave it in `Initializing` for a retry.
    #[instrument(skip(self), fields(package = %self.shared.package_id))]
    pub async fn initialize(&self) -> Result<(), SessionError> {
        {
            let session = lock(&self.shared.session);
            if session.state != SessionState::Initializing {
                return Err(SessionError::invalid_state("initialize", &session.state));
            }
        }

        let package = self
            .shared
            .api
            .fetch_package(&self.shared.package_id)
            .await
            .map_err(SessionError::from_api)?
            .into_ordered();

        let mut session = lock(&self.shared.session);
        if session.state != SessionState::Initializing {
            debug!("Package arrived after the session ended");
            return Err(SessionError::invalid_state("initialize", &session.state));
        }

        let problem = if package.documents.is_empty() {
            Some(ValidationError::EmptyPackage)
        } else {
            package
                .duplicate_document()
                .map(|id| ValidationError::DuplicateDocument(id.clone()))
        };
        if let Some(err) = problem {
            let message = err.to_string();
            self.shared
                .set_state(&mut session, SessionState::Failed { message });
            return Err(SessionError::Validation(err));
        }

        info!(
            "Loaded package '{}' ({}) with {} documents",
            package.title,
            package.status,
            package.document_count()
        );
        let order = package.documents.iter().map(|d| d.id.clone()).collect();
        session.store = SignaturePlacementStore::new(order);
        session.package = Some(package);
        self.shared
            .set_state(&mut session, SessionState::AwaitingSignatureCapture);
        Ok(())
    }

    // ============================================================
    // Observation
    // ============================================================

    pub fn package_id(&self) -> &PackageId {
        &self.shared.package_id
    }

    pub fn state(&self) -> SessionState {
        lock(&self.shared.session).state.clone()
    }

    pub fn current_index(&self) -> usize {
        lock(&self.shared.session).index
    }

    pub fn document_count(&self) -> usize {
        lock(&self.shared.session).document_count()
    }

    pub fn current_document(&self) -> Option<PackageDocument> {
        let session = lock(&self.shared.session);
        session.document(session.index).cloned()
    }

    pub fn package(&self) -> Option<SigningPackage> {
        lock(&self.shared.session).package.clone()
    }

    pub fn signature(&self) -> Option<SignatureImageRef> {
        lock(&self.shared.session).signature.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    pub fn progress(&self) -> watch::Receiver<SubmissionProgress> {
        self.shared.progress.subscribe()
    }

    /// Placements in the editor for the current document
    pub fn working_placements(&self) -> Vec<SignaturePlacement> {
        lock(&self.shared.session).working.clone()
    }

    /// Placements committed for the document at `index`
    pub fn committed_placements(&self, index: usize) -> Vec<SignaturePlacement> {
        let session = lock(&self.shared.session);
        session
            .document(index)
            .map(|d| session.store.get(&d.id).to_vec())
            .unwrap_or_default()
    }

    /// The batch that would be submitted, from committed placements only
    pub fn flattened(&self) -> Vec<FlatPlacement> {
        lock(&self.shared.session).store.flatten()
    }

    // ============================================================
    // Signature capture
    // ============================================================

    /// Use an uploaded signature image for subsequent placements.
    ///
    /// Leaves `AwaitingSignatureCapture` for `Editing(0)`; while editing it
    /// replaces the image for new placements only.
    pub fn capture_signature(&self, image: SignatureImageRef) -> Result<(), SessionError> {
        let mut session = lock(&self.shared.session);
        match session.state {
            SessionState::AwaitingSignatureCapture => {
                session.signature = Some(image);
                self.enter_first_document(&mut session);
                Ok(())
            }
            SessionState::Editing { .. } => {
                debug!("Signature image replaced");
                session.signature = Some(image);
                Ok(())
            }
            ref other => Err(SessionError::invalid_state("capture a signature", other)),
        }
    }

    /// Validate and upload a drawn signature, then capture it
    pub async fn capture_signature_png(&self, png: Vec<u8>) -> Result<(), SessionError> {
        if png.is_empty() {
            return Err(self
                .shared
                .reject(ValidationError::InvalidSignatureImage("image data is empty")));
        }
        if !png.starts_with(&PNG_MAGIC) {
            return Err(self
                .shared
                .reject(ValidationError::InvalidSignatureImage("not a PNG image")));
        }
        {
            let session = lock(&self.shared.session);
            if !matches!(
                session.state,
                SessionState::AwaitingSignatureCapture | SessionState::Editing { .. }
            ) {
                return Err(SessionError::invalid_state("capture a signature", &session.state));
            }
        }

        let image = self
            .shared
            .api
            .upload_signature_image(png)
            .await
            .map_err(SessionError::from_api)?;
        self.capture_signature(image)
    }

    /// Start editing without a signature image
    pub fn skip_signature_capture(&self) -> Result<(), SessionError> {
        let mut session = lock(&self.shared.session);
        if session.state != SessionState::AwaitingSignatureCapture {
            return Err(SessionError::invalid_state("skip signature capture", &session.state));
        }
        self.enter_first_document(&mut session);
        Ok(())
    }

    fn enter_first_document(&self, session: &mut Session) {
        session.index = 0;
        session.epoch += 1;
        session.working = session
            .current_doc_id()
            .map(|id| session.store.get(&id).to_vec())
            .unwrap_or_default();
        self.shared
            .set_state(session, SessionState::Editing { index: 0 });
    }

    pub fn set_display_qr_code(&self, display: bool) {
        lock(&self.shared.session).display_qr_code = display;
    }

    // ============================================================
    // Editing the current document
    // ============================================================

    /// Place the captured signature on `page_number` of the current document
    pub fn add_placement(
        &self,
        page_number: u32,
        rect: PlacementRect,
    ) -> Result<PlacementId, SessionError> {
        let mut session = lock(&self.shared.session);
        session.editing_index("add a placement")?;
        let image = session
            .signature
            .clone()
            .ok_or_else(|| self.shared.reject(ValidationError::NoSignatureImage))?;
        let doc_id = session
            .current_doc_id()
            .ok_or_else(|| SessionError::Unknown("no current document".to_string()))?;

        let placement = SignaturePlacement::manual(doc_id, page_number, rect, image)
            .map_err(|e| self.shared.reject(e.into()))?;
        let id = placement.id.clone();
        session.working.push(placement);
        Ok(id)
    }

    /// Move or resize a placement in the working set
    pub fn move_placement(
        &self,
        id: &PlacementId,
        page_number: u32,
        rect: PlacementRect,
    ) -> Result<(), SessionError> {
        let mut session = lock(&self.shared.session);
        session.editing_index("move a placement")?;
        if page_number < 1 {
            return Err(self
                .shared
                .reject(shared_types::GeometryError::InvalidPage.into()));
        }
        rect.validate().map_err(|e| self.shared.reject(e.into()))?;

        let placement = session.placement_mut(id)?;
        placement.page_number = page_number;
        placement.rect = rect;
        Ok(())
    }

    pub fn remove_placement(&self, id: &PlacementId) -> Result<(), SessionError> {
        let mut session = lock(&self.shared.session);
        session.editing_index("remove a placement")?;
        let before = session.working.len();
        session.working.retain(|p| &p.id != id);
        if session.working.len() == before {
            return Err(ValidationError::UnknownPlacement(id.clone()).into());
        }
        Ok(())
    }

    /// Attach the captured signature to a placeholder
    pub fn attach_signature(&self, id: &PlacementId) -> Result<(), SessionError> {
        let mut session = lock(&self.shared.session);
        session.editing_index("attach a signature")?;
        let image = session
            .signature
            .clone()
            .ok_or_else(|| self.shared.reject(ValidationError::NoSignatureImage))?;
        session.placement_mut(id)?.signature_image = Some(image);
        Ok(())
    }

    /// Attach the captured signature to every unsigned AI suggestion in the
    /// working set. Returns how many were signed.
    pub fn attach_signature_to_suggestions(&self) -> Result<usize, SessionError> {
        let mut session = lock(&self.shared.session);
        session.editing_index("attach a signature")?;
        let image = session
            .signature
            .clone()
            .ok_or_else(|| self.shared.reject(ValidationError::NoSignatureImage))?;

        let mut count = 0;
        for placement in session
            .working
            .iter_mut()
            .filter(|p| p.origin == PlacementOrigin::AiSuggested && !p.is_signed())
        {
            placement.signature_image = Some(image.clone());
            count += 1;
        }
        Ok(count)
    }

    // ============================================================
    // Asynchronous per-document work
    // ============================================================

    /// Load the current document's binary and make it the live handle.
    ///
    /// Returns `Ok(None)` when the user navigated away before it arrived.
    pub async fn load_current_document(&self) -> Result<Option<ResourceHandle>, SessionError> {
        let (index, epoch, key) = {
            let session = lock(&self.shared.session);
            if !matches!(
                session.state,
                SessionState::AwaitingSignatureCapture | SessionState::Editing { .. }
            ) {
                return Err(SessionError::invalid_state("load a document", &session.state));
            }
            let doc = session
                .document(session.index)
                .ok_or_else(|| SessionError::Unknown("no current document".to_string()))?;
            (
                session.index,
                session.epoch,
                DocumentKey::new(doc.document_id.clone(), doc.version_id.clone()),
            )
        };

        let shared = self.shared.clone();
        let outcome = self
            .shared
            .loader
            .activate(&key, move || shared.is_current(index, epoch))
            .await?;

        match outcome {
            LoadOutcome::Live(handle) => Ok(Some(handle)),
            LoadOutcome::Stale => Ok(None),
        }
    }

    /// Request AI placement suggestions for the current document and merge
    /// them into its placements. Does not change state.
    #[instrument(skip(self))]
    pub async fn request_suggestions(&self) -> Result<SuggestionOutcome, SessionError> {
        let (index, epoch, doc) = {
            let session = lock(&self.shared.session);
            let index = session.editing_index("request suggestions")?;
            let doc = session
                .document(index)
                .cloned()
                .ok_or_else(|| SessionError::Unknown("no current document".to_string()))?;
            (index, session.epoch, doc)
        };

        let result = self.shared.api.suggest_placements(&doc.document_id).await;

        let mut session = lock(&self.shared.session);
        let still_here = !self.shared.cancel.is_cancelled()
            && session.state == (SessionState::Editing { index })
            && session.epoch == epoch;
        if !still_here {
            info!("Discarding suggestions for document {} (user moved on)", index + 1);
            self.shared
                .emit(SessionEvent::SuggestionsDiscarded { index });
            return Ok(SuggestionOutcome::Discarded);
        }

        let suggestions = result.map_err(SessionError::from_api)?;
        let placeholders: Vec<SignaturePlacement> = suggestions
            .into_iter()
            .filter_map(|s| match s.into_placeholder(doc.id.clone()) {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!("Dropping invalid suggestion: {}", e);
                    None
                }
            })
            .collect();

        // The store gets the suggestions now; the editor keeps its own copy
        // and overwrites the store entry when the user navigates away.
        let count = session.store.merge_suggested(&doc.id, placeholders.clone())?;
        session.working.extend(placeholders);
        self.shared
            .emit(SessionEvent::SuggestionsMerged { index, count });
        Ok(SuggestionOutcome::Merged { count })
    }

    // ============================================================
    // Navigation
    // ============================================================

    /// Commit the current document and move to the next one, or submit the
    /// package from the last document.
    ///
    /// Rejected without a state change if the current document has no
    /// placements.
    pub async fn advance(&self) -> Result<Advance, SessionError> {
        {
            let mut session = lock(&self.shared.session);
            let index = session.editing_index("advance")?;
            session.commit_working()?;

            let has_placements = session
                .current_doc_id()
                .is_some_and(|id| !session.store.get(&id).is_empty());
            if !has_placements {
                return Err(self.shared.reject(ValidationError::NoPlacements { index }));
            }

            if !session.is_last(index) {
                let next = index + 1;
                self.navigate_locked(&mut session, next);
                return Ok(Advance::Moved { index: next });
            }
        }

        let outcome = SubmissionCoordinator::new(self.shared.clone())
            .submit()
            .await?;
        Ok(Advance::Submitted(outcome))
    }

    /// Commit the current document and go back one
    pub fn back(&self) -> Result<usize, SessionError> {
        let mut session = lock(&self.shared.session);
        let index = session.editing_index("go back")?;
        if index == 0 {
            return Err(self.shared.reject(ValidationError::IndexOutOfRange {
                index: 0,
                count: session.document_count(),
            }));
        }
        session.commit_working()?;
        self.navigate_locked(&mut session, index - 1);
        Ok(index - 1)
    }

    fn navigate_locked(&self, session: &mut Session, target: usize) {
        debug_assert!(target < session.document_count());
        session.index = target;
        session.epoch += 1;
        session.working = session
            .current_doc_id()
            .map(|id| session.store.get(&id).to_vec())
            .unwrap_or_default();
        self.shared
            .set_state(session, SessionState::Editing { index: target });
    }

    // ============================================================
    // Submission and cancellation
    // ============================================================

    /// Resubmit the accumulated placements after a failure
    pub async fn retry_submission(&self) -> Result<SubmissionOutcome, SessionError> {
        {
            let session = lock(&self.shared.session);
            if !matches!(session.state, SessionState::Failed { .. })
                || session.submission_attempts == 0
            {
                return Err(SessionError::invalid_state("retry submission", &session.state));
            }
        }
        SubmissionCoordinator::new(self.shared.clone())
            .submit()
            .await
    }

    /// Cancel the session. Any in-flight result is ignored from now on.
    ///
    /// Returns `false` if the session had already completed or been cancelled.
    pub fn cancel(&self) -> bool {
        let mut session = lock(&self.shared.session);
        self.shared.cancel_locked(&mut session, "cancelled by user")
    }
}
