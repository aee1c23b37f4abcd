//! Observation sessions that run alongside the monitor.
//!
//! Every session gets a child of the set's cancellation token. The controller cancels the
//! set once the monitor returns and joins each session with a grace period; a session that
//! overruns the grace period is aborted. Nothing is left running when the controller exits.

use crate::engine::RunsApi;
use crate::model::{
    ObserverExit, ObserverKind, ObserverReport, RunHandle, RunStatus, SupervisorEvent,
};
use crate::storage;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub(crate) struct ObserverSettings {
    pub watch_interval: Duration,
    pub log_tail_interval: Duration,
    pub log_dir: PathBuf,
}

/// One running observer bound to a run.
pub(crate) struct ObserverSession {
    pub kind: ObserverKind,
    pub handle: Arc<RunHandle>,
    task: JoinHandle<ObserverExit>,
}

pub(crate) struct ObserverSet {
    token: CancellationToken,
    sessions: Vec<ObserverSession>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            sessions: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Start `kind` on the current runtime and return immediately.
    pub fn spawn(
        &mut self,
        api: Arc<dyn RunsApi>,
        handle: Arc<RunHandle>,
        kind: ObserverKind,
        settings: &ObserverSettings,
        event_tx: UnboundedSender<SupervisorEvent>,
    ) {
        let token = self.token.child_token();
        let run = handle.clone();
        let task = match kind {
            ObserverKind::InteractiveWatch => {
                let interval = settings.watch_interval;
                tokio::spawn(async move { watch(api, run, interval, token, event_tx).await })
            }
            ObserverKind::ContinuousLogTail => {
                let interval = settings.log_tail_interval;
                let path = storage::log_path(&settings.log_dir, run.run_id);
                tokio::spawn(async move { tail_logs(api, run, interval, path, token).await })
            }
        };
        tracing::debug!(run_id = handle.run_id, %kind, "observer started");
        self.sessions.push(ObserverSession { kind, handle, task });
    }

    /// Cancel every session and wait up to `grace` (shared by all sessions) for them to end.
    pub async fn shutdown(self, grace: Duration) -> Vec<ObserverReport> {
        self.token.cancel();
        let deadline = tokio::time::Instant::now() + grace;

        let mut reports = Vec::with_capacity(self.sessions.len());
        for mut session in self.sessions {
            let exit = match tokio::time::timeout_at(deadline, &mut session.task).await {
                Ok(Ok(exit)) => exit,
                Ok(Err(e)) => ObserverExit::Failed(e.to_string()),
                Err(_) => {
                    session.task.abort();
                    tracing::warn!(
                        run_id = session.handle.run_id,
                        kind = %session.kind,
                        "observer overran its grace period and was aborted"
                    );
                    ObserverExit::Aborted
                }
            };
            reports.push(ObserverReport {
                kind: session.kind,
                exit,
            });
        }
        reports
    }
}

/// Follow the run until it is terminal, reporting every status transition.
async fn watch(
    api: Arc<dyn RunsApi>,
    handle: Arc<RunHandle>,
    interval: Duration,
    token: CancellationToken,
    event_tx: UnboundedSender<SupervisorEvent>,
) -> ObserverExit {
    let run_id = handle.run_id;
    let mut last: Option<RunStatus> = None;

    loop {
        let polled = tokio::select! {
            _ = token.cancelled() => return ObserverExit::Cancelled,
            r = api.run_status(run_id) => r,
        };
        match polled {
            Ok(snapshot) => {
                if last.as_ref() != Some(&snapshot.status) {
                    let _ = event_tx.send(SupervisorEvent::Info(format!(
                        "[watch] run {run_id}: {}{}",
                        snapshot.status,
                        snapshot
                            .conclusion
                            .as_deref()
                            .map(|c| format!(" ({c})"))
                            .unwrap_or_default()
                    )));
                    last = Some(snapshot.status.clone());
                }
                if snapshot.status.is_terminal() {
                    return ObserverExit::Watched {
                        success: snapshot.succeeded(),
                    };
                }
            }
            Err(e) => tracing::debug!(run_id, error = %e, "watch poll failed"),
        }

        tokio::select! {
            _ = token.cancelled() => return ObserverExit::Cancelled,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

/// Keep the log artifact current until cancelled, then refresh it one last time.
async fn tail_logs(
    api: Arc<dyn RunsApi>,
    handle: Arc<RunHandle>,
    interval: Duration,
    path: PathBuf,
    token: CancellationToken,
) -> ObserverExit {
    loop {
        refresh_log(api.as_ref(), handle.run_id, &path).await;
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    refresh_log(api.as_ref(), handle.run_id, &path).await;
    ObserverExit::Cancelled
}

async fn refresh_log(api: &dyn RunsApi, run_id: u64, path: &std::path::Path) {
    match api.run_logs(run_id).await {
        Ok(text) => {
            if let Err(e) = storage::write_log_artifact(path, &text).await {
                tracing::warn!(run_id, path = %path.display(), error = %e, "failed to write log artifact");
            }
        }
        Err(e) => tracing::debug!(run_id, error = %e, "log fetch failed"),
    }
}
