use crate::engine::RunsApi;
use crate::errors::SupervisorError;
use crate::model::{DispatchRequest, JobSpec};
use std::time::Duration;
use time::OffsetDateTime;

/// Earliest creation time a run started by a trigger sent at `now` can report.
///
/// The remote reports creation times in whole seconds, so sub-second precision is dropped
/// before `clock_skew` is subtracted.
/// Saturates at the Unix epoch for skews that reach past it.
pub(crate) fn dispatch_floor(now: OffsetDateTime, clock_skew: Duration) -> OffsetDateTime {
    let floor = now.replace_nanosecond(0).unwrap_or(now);
    time::Duration::try_from(clock_skew)
        .ok()
        .and_then(|skew| floor.checked_sub(skew))
        .map_or(OffsetDateTime::UNIX_EPOCH, |t| t.max(OffsetDateTime::UNIX_EPOCH))
}

/// Send exactly one trigger for `spec`. Never retried: a second trigger would start a
/// second run.
pub(crate) async fn dispatch(
    api: &dyn RunsApi,
    spec: &JobSpec,
    clock_skew: Duration,
) -> Result<DispatchRequest, SupervisorError> {
    let dispatched_at = dispatch_floor(OffsetDateTime::now_utc(), clock_skew);

    api.trigger(spec)
        .await
        .map_err(|source| SupervisorError::TriggerFailed {
            job: spec.job_definition.clone(),
            git_ref: spec.git_ref.clone(),
            source,
        })?;

    tracing::info!(
        repository = %spec.repository,
        job = %spec.job_definition,
        git_ref = %spec.git_ref,
        %dispatched_at,
        "trigger accepted"
    );

    Ok(DispatchRequest {
        spec: spec.clone(),
        dispatched_at,
    })
}
