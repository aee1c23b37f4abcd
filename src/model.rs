use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use time::OffsetDateTime;

/// Resolved, immutable settings for one controller run.
#[derive(Debug, Clone, Serialize)]
pub struct SupervisorConfig {
    pub api_url: String,
    #[serde(skip_serializing)]
    pub token: Option<String>,
    pub job: JobSpec,
    pub resolve_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub resolve_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub deadline: Duration,
    #[serde(with = "humantime_serde")]
    pub watch_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub log_tail_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub observer_grace: Duration,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub clock_skew: Duration,
    pub strict_conclusion: bool,
    pub log_dir: PathBuf,
    pub user_agent: String,
}

/// The job to trigger: a workflow definition on a repository ref.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    /// `owner/name`
    pub repository: String,
    /// Workflow file name (e.g. `sync.yml`) or numeric workflow id.
    pub job_definition: String,
    pub git_ref: String,
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,
}

/// A trigger that was accepted by the remote service.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchRequest {
    pub spec: JobSpec,
    /// Earliest creation time a run belonging to this dispatch may carry.
    #[serde(with = "time::serde::rfc3339")]
    pub dispatched_at: OffsetDateTime,
}

/// Identity of the run created by a dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunHandle {
    pub run_id: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub job_definition: String,
    pub git_ref: String,
    #[serde(default)]
    pub html_url: Option<String>,
}

/// Remote run status. The known set is closed; anything else is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Queued,
    InProgress,
    Completed,
    Anomalous(String),
}

impl RunStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "queued" => RunStatus::Queued,
            "in_progress" => RunStatus::InProgress,
            "completed" => RunStatus::Completed,
            other => RunStatus::Anomalous(other.to_string()),
        }
    }

    /// Completed and every anomalous value are terminal.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Queued | RunStatus::InProgress)
    }

    pub fn as_str(&self) -> &str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::InProgress => "in_progress",
            RunStatus::Completed => "completed",
            RunStatus::Anomalous(raw) => raw,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One status poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSnapshot {
    pub status: RunStatus,
    pub conclusion: Option<String>,
}

impl RunSnapshot {
    pub fn new(status: RunStatus, conclusion: Option<&str>) -> Self {
        Self {
            status,
            conclusion: conclusion.map(str::to_string),
        }
    }

    /// True only for a completed run whose conclusion is `success`.
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Completed && self.conclusion.as_deref() == Some("success")
    }
}

/// An entry of the run listing, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub run_id: u64,
    pub created_at: OffsetDateTime,
    pub status: RunStatus,
    pub html_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObserverKind {
    InteractiveWatch,
    ContinuousLogTail,
}

impl std::fmt::Display for ObserverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObserverKind::InteractiveWatch => f.write_str("watch"),
            ObserverKind::ContinuousLogTail => f.write_str("log-tail"),
        }
    }
}

/// How an observer session ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObserverExit {
    Watched { success: bool },
    Cancelled,
    Aborted,
    Failed(String),
}

impl std::fmt::Display for ObserverExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObserverExit::Watched { success: true } => f.write_str("run succeeded"),
            ObserverExit::Watched { success: false } => f.write_str("run did not succeed"),
            ObserverExit::Cancelled => f.write_str("cancelled"),
            ObserverExit::Aborted => f.write_str("aborted after grace period"),
            ObserverExit::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum OutcomeReason {
    Completed { conclusion: Option<String> },
    ConclusionFailed(Option<String>),
    Anomalous(String),
    Timeout,
    TriggerFailed(String),
    RunIdUnresolved { attempts: u32 },
    Interrupted,
}

/// Process exit codes. Calling automation branches on these; never renumber.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL: i32 = 1;
    pub const TRIGGER_FAILED: i32 = 10;
    pub const RUN_ID_UNRESOLVED: i32 = 11;
    pub const ANOMALOUS: i32 = 12;
    pub const TIMEOUT: i32 = 13;
    pub const CONCLUSION_FAILED: i32 = 14;
}

/// Final verdict of a controller run. Produced exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminationOutcome {
    pub success: bool,
    pub reason: OutcomeReason,
    #[serde(default)]
    pub run_id: Option<u64>,
    pub polls: u32,
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
}

impl TerminationOutcome {
    pub fn failed(reason: OutcomeReason) -> Self {
        Self {
            success: false,
            reason,
            run_id: None,
            polls: 0,
            elapsed: Duration::ZERO,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match &self.reason {
            OutcomeReason::Completed { .. } => exit_code::SUCCESS,
            OutcomeReason::ConclusionFailed(_) => exit_code::CONCLUSION_FAILED,
            OutcomeReason::Anomalous(_) => exit_code::ANOMALOUS,
            OutcomeReason::Timeout => exit_code::TIMEOUT,
            OutcomeReason::TriggerFailed(_) => exit_code::TRIGGER_FAILED,
            OutcomeReason::RunIdUnresolved { .. } => exit_code::RUN_ID_UNRESOLVED,
            OutcomeReason::Interrupted => exit_code::GENERAL,
        }
    }

    /// One-line, human-readable reason.
    pub fn describe(&self) -> String {
        match &self.reason {
            OutcomeReason::Completed { conclusion } => match conclusion {
                Some(c) => format!("run completed (conclusion: {c})"),
                None => "run completed".to_string(),
            },
            OutcomeReason::ConclusionFailed(c) => format!(
                "run completed with conclusion {}",
                c.as_deref().unwrap_or("<none>")
            ),
            OutcomeReason::Anomalous(raw) => format!("run reported unexpected status {raw:?}"),
            OutcomeReason::Timeout => format!(
                "run still not finished after {}",
                humantime::format_duration(Duration::from_secs(self.elapsed.as_secs()))
            ),
            OutcomeReason::TriggerFailed(detail) => format!("trigger failed: {detail}"),
            OutcomeReason::RunIdUnresolved { attempts } => {
                format!("no new run appeared after {attempts} attempt(s)")
            }
            OutcomeReason::Interrupted => "supervision interrupted".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObserverReport {
    pub kind: ObserverKind,
    pub exit: ObserverExit,
}

/// What gets persisted and printed in JSON mode once a controller run ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeRecord {
    #[serde(with = "time::serde::rfc3339")]
    pub finished_at: OffsetDateTime,
    pub job: JobSpec,
    pub handle: Option<RunHandle>,
    pub outcome: TerminationOutcome,
    #[serde(default)]
    pub observers: Vec<ObserverReport>,
}

/// Progress events emitted by the controller and consumed by CLI layers.
#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    Dispatched {
        at: OffsetDateTime,
    },
    ResolveAttempt {
        attempt: u32,
        max_attempts: u32,
    },
    Resolved {
        handle: RunHandle,
    },
    ObserverStarted {
        kind: ObserverKind,
    },
    StatusChanged {
        status: RunStatus,
        polls: u32,
    },
    ObserverFinished(ObserverReport),
    Info(String),
    Finished {
        outcome: TerminationOutcome,
    },
}

impl SupervisorEvent {
    /// Render a human-readable message for CLI layers.
    pub fn to_message(&self) -> String {
        match self {
            SupervisorEvent::Dispatched { at } => format!(
                "Dispatched at {}",
                at.format(&time::format_description::well_known::Rfc3339)
                    .unwrap_or_else(|_| at.to_string())
            ),
            SupervisorEvent::ResolveAttempt {
                attempt,
                max_attempts,
            } => format!("Looking for the new run ({attempt}/{max_attempts})"),
            SupervisorEvent::Resolved { handle } => match handle.html_url.as_deref() {
                Some(url) => format!("Resolved run {} ({url})", handle.run_id),
                None => format!("Resolved run {}", handle.run_id),
            },
            SupervisorEvent::ObserverStarted { kind } => format!("Started {kind} observer"),
            SupervisorEvent::StatusChanged { status, polls } => {
                format!("Status: {status} (poll {polls})")
            }
            SupervisorEvent::ObserverFinished(report) => {
                format!("{} observer ended: {}", report.kind, report.exit)
            }
            SupervisorEvent::Info(msg) => msg.clone(),
            SupervisorEvent::Finished { outcome } => outcome.describe(),
        }
    }
}
