//! Run lifecycle controller.
//!
//! Owns the dispatch → resolve → supervise sequence, the observer sessions bound to the
//! resolved run, and the final notification. Emits events for presentation layers.

use crate::engine::{dispatch, resolve, MonitorSession, ObserverSet, ObserverSettings, RunsApi};
use crate::model::{
    ObserverKind, ObserverReport, OutcomeReason, OutcomeRecord, RunHandle, SupervisorConfig,
    SupervisorEvent, TerminationOutcome,
};
use crate::notify::{self, NotificationSink};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

pub(crate) struct Controller {
    cfg: SupervisorConfig,
    api: Arc<dyn RunsApi>,
    notifier: Box<dyn NotificationSink>,
    /// Cancelled by the CLI on Ctrl-C.
    interrupt: CancellationToken,
}

impl Controller {
    pub fn new(
        cfg: SupervisorConfig,
        api: Arc<dyn RunsApi>,
        notifier: Box<dyn NotificationSink>,
        interrupt: CancellationToken,
    ) -> Self {
        Self {
            cfg,
            api,
            notifier,
            interrupt,
        }
    }

    /// Run one full controller pass. Always yields exactly one outcome.
    pub async fn run(&self, event_tx: UnboundedSender<SupervisorEvent>) -> OutcomeRecord {
        let job = &self.cfg.job;

        let request = match dispatch(self.api.as_ref(), job, self.cfg.clock_skew).await {
            Ok(request) => request,
            Err(e) => {
                tracing::error!(error = %e, "dispatch failed");
                let outcome = TerminationOutcome::failed(e.outcome_reason());
                return self.finish(outcome, None, Vec::new(), &event_tx).await;
            }
        };
        let _ = event_tx.send(SupervisorEvent::Dispatched {
            at: request.dispatched_at,
        });

        // Resolution is read-only; an interrupt may stop it at any await point.
        let resolved = tokio::select! {
            resolved = resolve(
                self.api.as_ref(),
                &request,
                self.cfg.resolve_attempts,
                self.cfg.resolve_interval,
                &event_tx,
            ) => resolved,
            _ = self.interrupt.cancelled() => {
                tracing::warn!("interrupted while resolving; the triggered run keeps going");
                let outcome = TerminationOutcome::failed(OutcomeReason::Interrupted);
                return self.finish(outcome, None, Vec::new(), &event_tx).await;
            }
        };
        let handle = match resolved {
            Ok(handle) => Arc::new(handle),
            Err(e) => {
                tracing::error!(error = %e, "run resolution failed");
                let outcome = TerminationOutcome::failed(e.outcome_reason());
                return self.finish(outcome, None, Vec::new(), &event_tx).await;
            }
        };
        let _ = event_tx.send(SupervisorEvent::Resolved {
            handle: handle.as_ref().clone(),
        });

        let settings = ObserverSettings {
            watch_interval: self.cfg.watch_interval,
            log_tail_interval: self.cfg.log_tail_interval,
            log_dir: self.cfg.log_dir.clone(),
        };
        let mut observers = ObserverSet::new();
        for kind in [ObserverKind::InteractiveWatch, ObserverKind::ContinuousLogTail] {
            observers.spawn(
                self.api.clone(),
                handle.clone(),
                kind,
                &settings,
                event_tx.clone(),
            );
            let _ = event_tx.send(SupervisorEvent::ObserverStarted { kind });
        }
        tracing::debug!(run_id = handle.run_id, observers = observers.len(), "observers running");

        let monitor = MonitorSession {
            handle: handle.clone(),
            deadline: self.cfg.deadline,
            interval: self.cfg.poll_interval,
            strict_conclusion: self.cfg.strict_conclusion,
        };
        let outcome = tokio::select! {
            outcome = monitor.supervise(self.api.as_ref(), &event_tx) => outcome,
            _ = self.interrupt.cancelled() => {
                tracing::warn!(run_id = handle.run_id, "interrupted; the remote run keeps going");
                TerminationOutcome {
                    run_id: Some(handle.run_id),
                    ..TerminationOutcome::failed(OutcomeReason::Interrupted)
                }
            }
        };

        // Observers never outlive supervision.
        let reports = observers.shutdown(self.cfg.observer_grace).await;
        for report in &reports {
            let _ = event_tx.send(SupervisorEvent::ObserverFinished(report.clone()));
        }

        self.finish(outcome, Some(handle.as_ref().clone()), reports, &event_tx)
            .await
    }

    async fn finish(
        &self,
        outcome: TerminationOutcome,
        handle: Option<RunHandle>,
        observers: Vec<ObserverReport>,
        event_tx: &UnboundedSender<SupervisorEvent>,
    ) -> OutcomeRecord {
        notify::notify(self.notifier.as_ref(), &outcome, &self.cfg.job).await;
        tracing::info!(
            success = outcome.success,
            exit_code = outcome.exit_code(),
            reason = %outcome.describe(),
            "supervision finished"
        );
        let _ = event_tx.send(SupervisorEvent::Finished {
            outcome: outcome.clone(),
        });
        OutcomeRecord {
            finished_at: time::OffsetDateTime::now_utc(),
            job: self.cfg.job.clone(),
            handle,
            outcome,
            observers,
        }
    }
}
