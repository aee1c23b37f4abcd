use crate::engine::RunsApi;
use crate::model::{OutcomeReason, RunHandle, RunStatus, SupervisorEvent, TerminationOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;

/// Polls one run to a terminal status or until the deadline passes.
pub(crate) struct MonitorSession {
    pub handle: Arc<RunHandle>,
    /// Measured from the start of [`MonitorSession::supervise`], not from dispatch.
    pub deadline: Duration,
    pub interval: Duration,
    /// Treat a completed run whose conclusion is not `success` as a failure.
    pub strict_conclusion: bool,
}

impl MonitorSession {
    /// Never raises: every way the loop can end is a [`TerminationOutcome`].
    ///
    /// Wall-clock time before returning is bounded by `deadline + interval` plus the duration
    /// of the in-flight poll.
    pub async fn supervise(
        &self,
        api: &dyn RunsApi,
        event_tx: &UnboundedSender<SupervisorEvent>,
    ) -> TerminationOutcome {
        let run_id = self.handle.run_id;
        let start = Instant::now();
        let mut polls = 0u32;
        let mut last: Option<RunStatus> = None;

        loop {
            polls += 1;
            match api.run_status(run_id).await {
                Ok(snapshot) => {
                    if last.as_ref() != Some(&snapshot.status) {
                        tracing::info!(run_id, status = %snapshot.status, polls, "run status");
                        let _ = event_tx.send(SupervisorEvent::StatusChanged {
                            status: snapshot.status.clone(),
                            polls,
                        });
                        last = Some(snapshot.status.clone());
                    }
                    match snapshot.status {
                        RunStatus::Completed => {
                            let reason = self.completed_reason(snapshot.conclusion);
                            return self.outcome(reason, polls, start);
                        }
                        RunStatus::Anomalous(raw) => {
                            tracing::warn!(run_id, status = %raw, "run reported an unknown status");
                            return self.outcome(OutcomeReason::Anomalous(raw), polls, start);
                        }
                        RunStatus::Queued | RunStatus::InProgress => {}
                    }
                }
                // Still bounded by the deadline below.
                Err(e) => tracing::warn!(run_id, polls, error = %e, "status poll failed"),
            }

            tokio::time::sleep(self.interval).await;
            if start.elapsed() > self.deadline {
                tracing::warn!(
                    run_id,
                    polls,
                    deadline = %humantime::format_duration(self.deadline),
                    "supervision deadline exceeded"
                );
                return self.outcome(OutcomeReason::Timeout, polls, start);
            }
        }
    }

    fn completed_reason(&self, conclusion: Option<String>) -> OutcomeReason {
        if self.strict_conclusion && conclusion.as_deref() != Some("success") {
            OutcomeReason::ConclusionFailed(conclusion)
        } else {
            OutcomeReason::Completed { conclusion }
        }
    }

    fn outcome(&self, reason: OutcomeReason, polls: u32, start: Instant) -> TerminationOutcome {
        TerminationOutcome {
            success: matches!(reason, OutcomeReason::Completed { .. }),
            reason,
            run_id: Some(self.handle.run_id),
            polls,
            elapsed: start.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{ScriptedApi, Step};
    use std::sync::atomic::Ordering;
    use time::macros::datetime;

    const DEADLINE: Duration = Duration::from_secs(1800);
    const INTERVAL: Duration = Duration::from_secs(20);

    fn session(strict_conclusion: bool) -> MonitorSession {
        MonitorSession {
            handle: Arc::new(RunHandle {
                run_id: 77,
                created_at: datetime!(2024-05-01 10:00:00 UTC),
                job_definition: "sync.yml".into(),
                git_ref: "main".into(),
                html_url: None,
            }),
            deadline: DEADLINE,
            interval: INTERVAL,
            strict_conclusion,
        }
    }

    fn events() -> UnboundedSender<SupervisorEvent> {
        tokio::sync::mpsc::unbounded_channel().0
    }

    #[tokio::test(start_paused = true)]
    async fn queued_then_in_progress_then_completed() {
        let api = ScriptedApi::new().with_steps(vec![
            Step::Status("queued"),
            Step::Status("in_progress"),
            Step::Done("completed", "success"),
        ]);
        let start = Instant::now();

        let outcome = session(false).supervise(&api, &events()).await;

        assert!(outcome.success);
        assert_eq!(
            outcome.reason,
            OutcomeReason::Completed {
                conclusion: Some("success".into())
            }
        );
        assert_eq!(outcome.polls, 3);
        assert_eq!(outcome.run_id, Some(77));
        let times = api.status_times.lock().unwrap().clone();
        let offsets: Vec<_> = times.iter().map(|t| *t - start).collect();
        assert_eq!(
            offsets,
            vec![Duration::ZERO, Duration::from_secs(20), Duration::from_secs(40)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_when_never_finishing() {
        let api = ScriptedApi::new().with_steps(vec![Step::Status("in_progress")]);
        let start = Instant::now();

        let outcome = session(false).supervise(&api, &events()).await;

        assert!(!outcome.success);
        assert_eq!(outcome.reason, OutcomeReason::Timeout);
        assert!(start.elapsed() > DEADLINE);
        assert!(start.elapsed() <= DEADLINE + INTERVAL);
        // Polls at 0, 20, ..., 1800; no poll after the deadline is noticed.
        assert_eq!(api.status_calls.load(Ordering::SeqCst), 91);
        let last = *api.status_times.lock().unwrap().last().unwrap();
        assert!(last - start <= DEADLINE);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_status_fails_immediately() {
        let api = ScriptedApi::new().with_steps(vec![
            Step::Status("queued"),
            Step::Status("cancelled"),
        ]);
        let start = Instant::now();

        let outcome = session(false).supervise(&api, &events()).await;

        assert!(!outcome.success);
        assert_eq!(outcome.reason, OutcomeReason::Anomalous("cancelled".into()));
        assert_eq!(outcome.polls, 2);
        assert_eq!(start.elapsed(), INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn success_only_for_exactly_completed() {
        for raw in ["Completed", "success", "failure", "waiting", ""] {
            let api = ScriptedApi::new().with_steps(vec![Step::Status(raw)]);
            let outcome = session(false).supervise(&api, &events()).await;
            assert!(!outcome.success, "{raw:?} must not count as success");
            assert_eq!(outcome.reason, OutcomeReason::Anomalous(raw.to_string()));
        }

        let api = ScriptedApi::new().with_steps(vec![Step::Done("completed", "failure")]);
        let outcome = session(false).supervise(&api, &events()).await;
        assert!(outcome.success);
    }

    #[tokio::test(start_paused = true)]
    async fn strict_conclusion_rejects_failed_completion() {
        let api = ScriptedApi::new().with_steps(vec![Step::Done("completed", "failure")]);
        let outcome = session(true).supervise(&api, &events()).await;

        assert!(!outcome.success);
        assert_eq!(
            outcome.reason,
            OutcomeReason::ConclusionFailed(Some("failure".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn poll_errors_are_bounded_by_the_deadline() {
        let api = ScriptedApi::new().with_steps(vec![Step::Error]);
        let start = Instant::now();

        let outcome = session(false).supervise(&api, &events()).await;

        assert_eq!(outcome.reason, OutcomeReason::Timeout);
        assert!(start.elapsed() <= DEADLINE + INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn emits_one_event_per_status_change() {
        let api = ScriptedApi::new().with_steps(vec![
            Step::Status("queued"),
            Step::Status("queued"),
            Step::Status("in_progress"),
            Step::Done("completed", "success"),
        ]);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        session(false).supervise(&api, &tx).await;
        drop(tx);

        let mut seen = Vec::new();
        while let Some(SupervisorEvent::StatusChanged { status, .. }) = rx.recv().await {
            seen.push(status);
        }
        assert_eq!(
            seen,
            vec![RunStatus::Queued, RunStatus::InProgress, RunStatus::Completed]
        );
    }
}
