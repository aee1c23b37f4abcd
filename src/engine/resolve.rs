use crate::engine::RunsApi;
use crate::errors::SupervisorError;
use crate::model::{DispatchRequest, RunHandle, RunSummary, SupervisorEvent};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::mpsc::UnboundedSender;

/// A listed run belongs to our dispatch only if it is still running and was created no
/// earlier than the trigger. A leftover run from an earlier invocation fails the second test.
fn accepts(run: &RunSummary, dispatched_at: OffsetDateTime) -> bool {
    !run.status.is_terminal() && run.created_at >= dispatched_at
}

/// Poll the run listing until the run created by `request` shows up.
///
/// Makes at most `max_attempts` sequential listing calls, `interval` apart. A failed listing
/// call counts as an attempt.
pub(crate) async fn resolve(
    api: &dyn RunsApi,
    request: &DispatchRequest,
    max_attempts: u32,
    interval: Duration,
    event_tx: &UnboundedSender<SupervisorEvent>,
) -> Result<RunHandle, SupervisorError> {
    let spec = &request.spec;

    for attempt in 1..=max_attempts {
        let _ = event_tx.send(SupervisorEvent::ResolveAttempt {
            attempt,
            max_attempts,
        });

        match api.latest_run(&spec.job_definition, &spec.git_ref).await {
            Ok(Some(run)) if accepts(&run, request.dispatched_at) => {
                tracing::info!(run_id = run.run_id, attempt, "resolved dispatched run");
                return Ok(RunHandle {
                    run_id: run.run_id,
                    created_at: run.created_at,
                    job_definition: spec.job_definition.clone(),
                    git_ref: spec.git_ref.clone(),
                    html_url: run.html_url,
                });
            }
            Ok(Some(run)) => {
                tracing::debug!(
                    run_id = run.run_id,
                    status = %run.status,
                    created_at = %run.created_at,
                    attempt,
                    "latest run does not belong to this dispatch"
                );
            }
            Ok(None) => tracing::debug!(attempt, "no runs listed yet"),
            Err(e) => tracing::warn!(attempt, error = %e, "run listing failed"),
        }

        if attempt < max_attempts {
            tokio::time::sleep(interval).await;
        }
    }

    Err(SupervisorError::RunIdUnresolved {
        attempts: max_attempts,
        dispatched_at: request.dispatched_at.to_string(),
    })
}
