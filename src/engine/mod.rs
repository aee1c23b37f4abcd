//! Remote run supervision: trigger, resolve, monitor and observe.

mod dispatch;
mod github;
mod monitor;
mod observer;
mod resolve;
#[cfg(test)]
pub(crate) mod testing;

use crate::errors::ApiError;
use crate::model::{JobSpec, RunSnapshot, RunSummary};
use async_trait::async_trait;
use bytes::Bytes;

pub(crate) use dispatch::dispatch;
pub(crate) use github::GitHubClient;
pub(crate) use monitor::MonitorSession;
pub(crate) use observer::{ObserverSet, ObserverSettings};
pub(crate) use resolve::resolve;

/// The four calls the supervisor makes against the execution service.
#[async_trait]
pub trait RunsApi: Send + Sync {
    /// Request one new run of `spec`. Any non-2xx answer is an error.
    async fn trigger(&self, spec: &JobSpec) -> Result<(), ApiError>;

    /// Most recent run of `job_definition` on `git_ref`, if any is listed.
    async fn latest_run(
        &self,
        job_definition: &str,
        git_ref: &str,
    ) -> Result<Option<RunSummary>, ApiError>;

    async fn run_status(&self, run_id: u64) -> Result<RunSnapshot, ApiError>;

    /// Full log text of the run as of now (not incremental).
    async fn run_logs(&self, run_id: u64) -> Result<Bytes, ApiError>;
}
