//! One signing session from package fetch to submission

use anyhow::{Context, Result};
use docsign_session::{
    Advance, ClientConfig, HttpSigningApi, PollingConnectivity, SessionController, SessionEvent,
    SubmissionOutcome, SuggestionOutcome,
};
use shared_types::{PackageId, SignatureImageRef};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{error, info, warn};

use crate::SignArgs;

/// Run the session. Returns whether the package ended up signed.
pub(crate) async fn sign(args: SignArgs, config: ClientConfig) -> Result<bool> {
    let api = Arc::new(HttpSigningApi::new(&config)?);
    let connectivity = Arc::new(PollingConnectivity::start(
        api.as_ref().clone(),
        config.connectivity_poll(),
    ));
    let finish_wait = config.completion_delay() + Duration::from_secs(1);

    let session = SessionController::start(
        PackageId(args.package.clone()),
        api,
        connectivity,
        config,
    )
    .await
    .with_context(|| format!("Failed to open package {}", args.package))?;
    session.set_display_qr_code(args.display_qr_code);

    if let Some(path) = &args.signature {
        let png = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read signature image {}", path.display()))?;
        session
            .capture_signature_png(png)
            .await
            .context("Failed to capture signature")?;
    } else if let Some(url) = &args.signature_url {
        session.capture_signature(SignatureImageRef(url.clone()))?;
    }

    let interrupt = tokio::spawn({
        let session = session.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling session");
                session.cancel();
            }
        }
    });

    let mut events = session.subscribe();
    let result = drive(&session, &args).await;
    interrupt.abort();
    let outcome = result?;

    match &outcome {
        SubmissionOutcome::Completed | SubmissionOutcome::AlreadyCompleted => {
            wait_finished(&mut events, finish_wait).await;
            info!("Package {} signed", session.package_id());
        }
        SubmissionOutcome::Failed(message) => {
            error!("Submission failed: {}", message);
        }
        SubmissionOutcome::Rejected(message) => {
            error!("Submission rejected: {}", message);
        }
        SubmissionOutcome::Cancelled => {
            warn!("Session cancelled; nothing was recorded");
        }
    }
    Ok(outcome.is_success())
}

/// Walk every document and submit from the last one
async fn drive(session: &SessionController, args: &SignArgs) -> Result<SubmissionOutcome> {
    loop {
        if session.is_cancelled() {
            return Ok(SubmissionOutcome::Cancelled);
        }

        let step = sign_current(session, args).await;
        match step {
            Ok(Some(outcome)) => return Ok(outcome),
            Ok(None) => continue,
            // Cancellation surfaces as an invalid-state error from whatever ran next
            Err(_) if session.is_cancelled() => return Ok(SubmissionOutcome::Cancelled),
            Err(e) => return Err(e),
        }
    }
}

async fn sign_current(
    session: &SessionController,
    args: &SignArgs,
) -> Result<Option<SubmissionOutcome>> {
    let document = session
        .current_document()
        .context("Session has no current document")?;
    info!(
        "Document {}/{}: {}",
        session.current_index() + 1,
        session.document_count(),
        document.title
    );

    match session.load_current_document().await? {
        Some(handle) => info!("Loaded {} ({} bytes)", handle.key(), handle.len()),
        // Superseded; the loop re-checks cancellation
        None => return Ok(None),
    }

    if args.auto_tag {
        match session.request_suggestions().await {
            Ok(SuggestionOutcome::Merged { count }) if count > 0 => {
                let signed = session.attach_signature_to_suggestions()?;
                info!("Signed {} suggested positions", signed);
            }
            Ok(_) => {}
            Err(e) => warn!("Auto-tagging unavailable for {}: {}", document.title, e),
        }
    }

    if session.working_placements().is_empty() {
        session.add_placement(args.placement.page, args.placement.rect())?;
    }

    match session.advance().await? {
        Advance::Moved { .. } => Ok(None),
        Advance::Submitted(outcome) => Ok(Some(outcome)),
    }
}

/// Wait for the completion side effect, giving up after `limit`
async fn wait_finished(
    events: &mut broadcast::Receiver<SessionEvent>,
    limit: Duration,
) {
    let finished = async {
        loop {
            match events.recv().await {
                Ok(SessionEvent::Finished { .. }) => break,
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    };
    if tokio::time::timeout(limit, finished).await.is_err() {
        warn!("No completion notice within {:?}", limit);
    }
}
