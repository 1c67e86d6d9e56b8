//! Batch submission of a package's signatures
//!
//! The submission is the only irreversible network call of a session. The
//! coordinator guarantees its effect is applied at most once:
//!
//! - The request runs in its own task together with its completion
//!   handler. The handler checks the cancel flag under the session lock
//!   before touching state, so a late response after cancellation is a
//!   no-op.
//! - Cancellation (user action or going offline) does not abort the
//!   request. It only suppresses its effect, and the coordinator returns
//!   immediately instead of waiting for the response.
//! - A cosmetic [`ProgressTicker`] runs while the request is outstanding.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::api::{SignBatch, SignatureSubmission};
use crate::connectivity::{wait_offline, Connectivity};
use crate::error::{ApiError, SessionError, ValidationError};
use crate::lock;
use crate::progress::{ProgressTicker, SubmissionProgress};
use crate::session::{Session, SessionEvent, SessionState, Shared};

/// How a submission attempt ended
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionOutcome {
    Completed,
    /// The backend reported the package as already signed; treated as success
    AlreadyCompleted,
    /// The backend refused the batch; the session is editing again
    Rejected(String),
    Failed(String),
    Cancelled,
}

impl SubmissionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            SubmissionOutcome::Completed | SubmissionOutcome::AlreadyCompleted
        )
    }
}

pub(crate) struct SubmissionCoordinator {
    shared: Arc<Shared>,
}

impl SubmissionCoordinator {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Submit the accumulated placements and wait for the outcome or for
    /// cancellation, whichever comes first.
    pub(crate) async fn submit(self) -> Result<SubmissionOutcome, SessionError> {
        let shared = self.shared;
        // Subscribe before the pre-flight check so no transition is missed
        let offline = wait_offline(shared.connectivity.transitions());
        let (batch, document_count) = prepare(&shared)?;

        let ticker = ProgressTicker::start(
            shared.progress.clone(),
            document_count,
            shared.config.progress_ceiling,
            shared.config.progress_tick(),
        );

        let timeout = shared.config.submit_timeout(document_count);
        info!(
            "Submitting {} signatures across {} documents (timeout {:?})",
            batch.len(),
            document_count,
            timeout
        );

        let mut request = tokio::spawn({
            let shared = shared.clone();
            async move {
                let result = shared
                    .api
                    .submit_signatures(&shared.package_id, &batch, timeout)
                    .await;
                complete(&shared, result)
            }
        });

        let outcome = tokio::select! {
            biased;

            joined = &mut request => match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    let mut session = lock(&shared.session);
                    fail_locked(&shared, &mut session, format!("Submission task failed: {}", e))
                }
            },
            _ = shared.cancel.cancelled() => SubmissionOutcome::Cancelled,
            _ = offline => {
                let mut session = lock(&shared.session);
                if shared.cancel_locked(&mut session, "connection lost during submission") {
                    SubmissionOutcome::Cancelled
                } else {
                    outcome_of(&session.state)
                }
            }
        };

        ticker.stop();
        Ok(outcome)
    }
}

/// Validate and enter `Submitting`, returning the batch to send
fn prepare(shared: &Shared) -> Result<(SignBatch, usize), SessionError> {
    let mut session = lock(&shared.session);
    if !session.can_submit() {
        return Err(SessionError::invalid_state("submit", &session.state));
    }
    if matches!(session.state, SessionState::Editing { .. }) {
        session.commit_working()?;
    }

    let display_qr_code = session.display_qr_code;
    let batch = SignBatch {
        signatures: session
            .store
            .flatten()
            .into_iter()
            .filter_map(|flat| {
                let image = flat.placement.signature_image?;
                Some(SignatureSubmission {
                    package_doc_id: flat.package_doc_id,
                    signature_image_url: image.0,
                    page_number: flat.placement.page_number,
                    position_x: flat.placement.rect.x,
                    position_y: flat.placement.rect.y,
                    width: flat.placement.rect.width,
                    height: flat.placement.rect.height,
                    display_qr_code,
                })
            })
            .collect(),
    };

    if batch.is_empty() {
        return Err(shared.reject(ValidationError::EmptyBatch));
    }
    if shared.connectivity.current() == Connectivity::Offline {
        return Err(shared.reject(ValidationError::Offline));
    }

    session.submission_attempts += 1;
    shared.set_state(&mut session, SessionState::Submitting);
    Ok((batch, session.document_count()))
}

/// Completion handler of the request task
fn complete(shared: &Arc<Shared>, result: Result<(), ApiError>) -> SubmissionOutcome {
    let mut session = lock(&shared.session);
    if shared.cancel.is_cancelled() || session.state != SessionState::Submitting {
        debug!(
            "Ignoring submission result ({}) for a session that is {}",
            if result.is_ok() { "success" } else { "failure" },
            session.state
        );
        return outcome_of(&session.state);
    }

    match result {
        Ok(()) => finish_locked(shared, &mut session, SubmissionOutcome::Completed),
        Err(e) if e.is_conflict() => {
            info!("Package already signed, treating as completed: {}", e);
            finish_locked(shared, &mut session, SubmissionOutcome::AlreadyCompleted)
        }
        Err(e) if e.is_connectivity() => {
            shared.cancel_locked(&mut session, &e.to_string());
            SubmissionOutcome::Cancelled
        }
        Err(ApiError::Validation(message)) => reject_locked(shared, &mut session, message),
        Err(e) => fail_locked(shared, &mut session, e.to_string()),
    }
}

/// The backend refused the batch. Reopen the last document for correction
/// with every committed placement intact.
fn reject_locked(shared: &Shared, session: &mut Session, message: String) -> SubmissionOutcome {
    warn!("Submission rejected by the backend: {}", message);
    shared
        .progress
        .send_replace(SubmissionProgress::idle(session.document_count()));
    session.working = session
        .current_doc_id()
        .map(|id| session.store.get(&id).to_vec())
        .unwrap_or_default();
    let index = session.index;
    shared.set_state(session, SessionState::Editing { index });
    shared.emit(SessionEvent::SubmissionRejected {
        message: message.clone(),
    });
    SubmissionOutcome::Rejected(message)
}

fn finish_locked(
    shared: &Arc<Shared>,
    session: &mut Session,
    outcome: SubmissionOutcome,
) -> SubmissionOutcome {
    shared
        .progress
        .send_replace(SubmissionProgress::done(session.document_count()));
    shared.set_state(session, SessionState::Completed);

    let delay = shared.config.completion_delay();
    let shared = shared.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        shared.emit(SessionEvent::Finished {
            package_id: shared.package_id.clone(),
        });
    });
    outcome
}

fn fail_locked(shared: &Shared, session: &mut Session, message: String) -> SubmissionOutcome {
    error!("Submission failed: {}", message);
    shared.set_state(
        session,
        SessionState::Failed {
            message: message.clone(),
        },
    );
    SubmissionOutcome::Failed(message)
}

fn outcome_of(state: &SessionState) -> SubmissionOutcome {
    match state {
        SessionState::Completed => SubmissionOutcome::Completed,
        SessionState::Failed { message } => SubmissionOutcome::Failed(message.clone()),
        _ => SubmissionOutcome::Cancelled,
    }
}
