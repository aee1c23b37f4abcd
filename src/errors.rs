//! Typed errors for the supervision pipeline.
//!
//! Only dispatch and resolution raise errors; anomalous statuses and timeouts
//! are ordinary [`crate::model::TerminationOutcome`]s returned by the monitor.

use crate::model::OutcomeReason;
use thiserror::Error;

/// Failures of a single remote call.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("unexpected response from {url}: {detail}")]
    Decode { url: String, detail: String },
}

/// Failures that end the controller before supervision starts.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("trigger for {job} on {git_ref} failed: {source}")]
    TriggerFailed {
        job: String,
        git_ref: String,
        #[source]
        source: ApiError,
    },

    #[error("no run created at or after {dispatched_at} appeared within {attempts} attempt(s)")]
    RunIdUnresolved {
        attempts: u32,
        dispatched_at: String,
    },
}

impl SupervisorError {
    /// The outcome recorded when the controller stops on this error.
    pub fn outcome_reason(&self) -> OutcomeReason {
        match self {
            SupervisorError::TriggerFailed { source, .. } => {
                OutcomeReason::TriggerFailed(source.to_string())
            }
            SupervisorError::RunIdUnresolved { attempts, .. } => {
                OutcomeReason::RunIdUnresolved {
                    attempts: *attempts,
                }
            }
        }
    }
}
