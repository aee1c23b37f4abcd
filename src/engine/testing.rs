//! Scripted in-memory `RunsApi` for unit tests.

use crate::engine::RunsApi;
use crate::errors::ApiError;
use crate::model::{JobSpec, RunSnapshot, RunStatus, RunSummary};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use time::OffsetDateTime;

/// What one listing call answers.
#[derive(Debug, Clone)]
pub(crate) enum Listing {
    Empty,
    Run(RunSummary),
    /// The run created by the most recent successful trigger.
    Triggered,
    Error,
}

/// What one status call answers.
#[derive(Debug, Clone)]
pub(crate) enum Step {
    Status(&'static str),
    Done(&'static str, &'static str),
    Error,
}

/// Each script is consumed front to back; its last entry repeats forever.
pub(crate) struct ScriptedApi {
    trigger_fails: bool,
    listings: Mutex<VecDeque<Listing>>,
    steps: Mutex<VecDeque<Step>>,
    logs: Mutex<VecDeque<String>>,
    triggered: Mutex<Vec<RunSummary>>,
    pub triggers: AtomicU32,
    pub listing_calls: AtomicU32,
    pub status_calls: AtomicU32,
    pub log_calls: AtomicU32,
    pub status_times: Mutex<Vec<tokio::time::Instant>>,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self {
            trigger_fails: false,
            listings: Mutex::new(VecDeque::from([Listing::Triggered])),
            steps: Mutex::new(VecDeque::from([Step::Done("completed", "success")])),
            logs: Mutex::new(VecDeque::from(["log line\n".to_string()])),
            triggered: Mutex::new(Vec::new()),
            triggers: AtomicU32::new(0),
            listing_calls: AtomicU32::new(0),
            status_calls: AtomicU32::new(0),
            log_calls: AtomicU32::new(0),
            status_times: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_trigger(mut self) -> Self {
        self.trigger_fails = true;
        self
    }

    pub fn with_listings(self, listings: Vec<Listing>) -> Self {
        *self.listings.lock().unwrap() = listings.into();
        self
    }

    pub fn with_steps(self, steps: Vec<Step>) -> Self {
        *self.steps.lock().unwrap() = steps.into();
        self
    }

    pub fn with_logs(self, logs: Vec<&str>) -> Self {
        *self.logs.lock().unwrap() = logs.into_iter().map(str::to_string).collect();
        self
    }

    pub fn triggered_runs(&self) -> Vec<RunSummary> {
        self.triggered.lock().unwrap().clone()
    }

    fn rejected(what: &str) -> ApiError {
        ApiError::Status {
            url: format!("fake://{what}"),
            status: 503,
            body: "scripted failure".into(),
        }
    }
}

fn next<T: Clone>(script: &Mutex<VecDeque<T>>) -> T {
    let mut script = script.lock().unwrap();
    if script.len() > 1 {
        script.pop_front().unwrap()
    } else {
        script.front().cloned().expect("empty script")
    }
}

pub(crate) fn summary(run_id: u64, created_at: OffsetDateTime, status: &str) -> RunSummary {
    RunSummary {
        run_id,
        created_at,
        status: RunStatus::parse(status),
        html_url: None,
    }
}

#[async_trait]
impl RunsApi for ScriptedApi {
    async fn trigger(&self, _spec: &JobSpec) -> Result<(), ApiError> {
        let n = self.triggers.fetch_add(1, Ordering::SeqCst) + 1;
        if self.trigger_fails {
            return Err(Self::rejected("trigger"));
        }
        let created_at = OffsetDateTime::now_utc() + time::Duration::seconds(1);
        self.triggered
            .lock()
            .unwrap()
            .push(summary(1000 + u64::from(n), created_at, "queued"));
        Ok(())
    }

    async fn latest_run(
        &self,
        _job_definition: &str,
        _git_ref: &str,
    ) -> Result<Option<RunSummary>, ApiError> {
        self.listing_calls.fetch_add(1, Ordering::SeqCst);
        match next(&self.listings) {
            Listing::Empty => Ok(None),
            Listing::Run(run) => Ok(Some(run)),
            Listing::Triggered => Ok(self.triggered.lock().unwrap().last().cloned()),
            Listing::Error => Err(Self::rejected("runs")),
        }
    }

    async fn run_status(&self, _run_id: u64) -> Result<RunSnapshot, ApiError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.status_times
            .lock()
            .unwrap()
            .push(tokio::time::Instant::now());
        match next(&self.steps) {
            Step::Status(s) => Ok(RunSnapshot::new(RunStatus::parse(s), None)),
            Step::Done(s, conclusion) => Ok(RunSnapshot::new(RunStatus::parse(s), Some(conclusion))),
            Step::Error => Err(Self::rejected("status")),
        }
    }

    async fn run_logs(&self, _run_id: u64) -> Result<Bytes, ApiError> {
        self.log_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Bytes::from(next(&self.logs)))
    }
}
