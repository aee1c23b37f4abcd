use crate::engine::RunsApi;
use crate::errors::ApiError;
use crate::model::{JobSpec, RunSnapshot, RunStatus, RunSummary, SupervisorConfig};
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::OffsetDateTime;

const API_VERSION: &str = "2022-11-28";
const JOBS_PAGE_SIZE: &str = "100";

#[derive(Debug, Serialize)]
struct DispatchBody<'a> {
    #[serde(rename = "ref")]
    git_ref: &'a str,
    #[serde(skip_serializing_if = "no_inputs")]
    inputs: &'a BTreeMap<String, String>,
}

fn no_inputs(inputs: &&BTreeMap<String, String>) -> bool {
    inputs.is_empty()
}

#[derive(Debug, Deserialize)]
struct WorkflowRunsPage {
    #[serde(default)]
    workflow_runs: Vec<WorkflowRun>,
}

#[derive(Debug, Deserialize)]
struct WorkflowRun {
    id: u64,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
    status: Option<String>,
    conclusion: Option<String>,
    html_url: Option<String>,
}

impl WorkflowRun {
    fn status(&self) -> RunStatus {
        RunStatus::parse(self.status.as_deref().unwrap_or("null"))
    }
}

#[derive(Debug, Deserialize)]
struct JobsPage {
    #[serde(default)]
    jobs: Vec<JobEntry>,
}

#[derive(Debug, Deserialize)]
struct JobEntry {
    id: u64,
    name: String,
}

/// GitHub Actions REST client bound to one repository.
#[derive(Clone)]
pub(crate) struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
    repository: String,
}

impl GitHubClient {
    pub fn new(cfg: &SupervisorConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert("x-github-api-version", HeaderValue::from_static(API_VERSION));
        if let Some(token) = cfg.token.as_deref() {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .context("GitHub token contains characters not allowed in a header")?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .default_headers(headers)
            .timeout(cfg.request_timeout)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            http,
            api_url: cfg.api_url.trim_end_matches('/').to_string(),
            repository: cfg.job.repository.clone(),
        })
    }

    fn repo_url(&self, path: &str) -> String {
        format!("{}/repos/{}/{}", self.api_url, self.repository, path)
    }

    async fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<reqwest::Response, ApiError> {
        let resp = self
            .http
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|source| ApiError::Transport {
                url: url.to_string(),
                source,
            })?;
        ensure_success(url, resp).await
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        self.get(url, query)
            .await?
            .json::<T>()
            .await
            .map_err(|e| ApiError::Decode {
                url: url.to_string(),
                detail: e.to_string(),
            })
    }
}

/// Pass 2xx responses through; turn anything else into an error carrying the raw body.
async fn ensure_success(url: &str, resp: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ApiError::Status {
        url: url.to_string(),
        status: status.as_u16(),
        body: body.trim().to_string(),
    })
}

#[async_trait]
impl RunsApi for GitHubClient {
    async fn trigger(&self, spec: &JobSpec) -> Result<(), ApiError> {
        let url = self.repo_url(&format!(
            "actions/workflows/{}/dispatches",
            spec.job_definition
        ));
        let body = DispatchBody {
            git_ref: &spec.git_ref,
            inputs: &spec.inputs,
        };
        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|source| ApiError::Transport {
                url: url.clone(),
                source,
            })?;
        ensure_success(&url, resp).await.map(|_| ())
    }

    async fn latest_run(
        &self,
        job_definition: &str,
        git_ref: &str,
    ) -> Result<Option<RunSummary>, ApiError> {
        let url = self.repo_url(&format!("actions/workflows/{job_definition}/runs"));
        let page: WorkflowRunsPage = self
            .get_json(
                &url,
                &[
                    ("branch", git_ref),
                    ("event", "workflow_dispatch"),
                    ("per_page", "1"),
                ],
            )
            .await?;

        Ok(page.workflow_runs.into_iter().next().map(|run| RunSummary {
            run_id: run.id,
            created_at: run.created_at,
            status: run.status(),
            html_url: run.html_url,
        }))
    }

    async fn run_status(&self, run_id: u64) -> Result<RunSnapshot, ApiError> {
        let url = self.repo_url(&format!("actions/runs/{run_id}"));
        let run: WorkflowRun = self.get_json(&url, &[]).await?;
        Ok(RunSnapshot::new(run.status(), run.conclusion.as_deref()))
    }

    async fn run_logs(&self, run_id: u64) -> Result<Bytes, ApiError> {
        let url = self.repo_url(&format!("actions/runs/{run_id}/jobs"));
        let page: JobsPage = self
            .get_json(&url, &[("per_page", JOBS_PAGE_SIZE)])
            .await?;

        // Jobs that have not produced logs yet answer 404; keep their section as a placeholder.
        let fetches = page.jobs.iter().map(|job| async move {
            let url = self.repo_url(&format!("actions/jobs/{}/logs", job.id));
            match self.get(&url, &[]).await {
                Ok(resp) => resp.bytes().await.map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            }
        });
        let bodies = futures::future::join_all(fetches).await;

        let mut out = BytesMut::new();
        for (job, body) in page.jobs.iter().zip(bodies) {
            out.extend_from_slice(format!("===== {} ({}) =====\n", job.name, job.id).as_bytes());
            match body {
                Ok(text) => out.extend_from_slice(&text),
                Err(e) => out.extend_from_slice(format!("(logs unavailable: {e})").as_bytes()),
            }
            if !out.ends_with(b"\n") {
                out.extend_from_slice(b"\n");
            }
        }
        Ok(out.freeze())
    }
}
