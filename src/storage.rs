//! Durable artifacts: the per-run log tail and the outcome record.

use crate::model::OutcomeRecord;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Default artifact directory under the platform's local data dir.
pub fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dispatch-supervisor")
        .join("logs")
}

/// Create `dir` if needed. Safe to call repeatedly.
pub fn ensure_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))
}

pub fn log_path(dir: &Path, run_id: u64) -> PathBuf {
    dir.join(format!("run-{run_id}.log"))
}

pub fn record_path(dir: &Path, record: &OutcomeRecord) -> PathBuf {
    match record.outcome.run_id {
        Some(id) => dir.join(format!("run-{id}.json")),
        None => dir.join(format!(
            "dispatch-{}.json",
            record.finished_at.unix_timestamp()
        )),
    }
}

/// Replace the log artifact with `contents`. Readers never observe a half-written file.
pub async fn write_log_artifact(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("log.tmp");
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await
}

/// Write the outcome record as pretty JSON and return its path.
pub fn save_outcome(dir: &Path, record: &OutcomeRecord) -> Result<PathBuf> {
    ensure_dir(dir)?;
    let path = record_path(dir, record);
    export_json(&path, record)?;
    Ok(path)
}

pub fn export_json(path: &Path, record: &OutcomeRecord) -> Result<()> {
    let data = serde_json::to_vec_pretty(record).context("serialize outcome record")?;
    std::fs::write(path, data).with_context(|| format!("write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{JobSpec, OutcomeReason, TerminationOutcome};
    use std::time::Duration;
    use tempfile::tempdir;
    use time::macros::datetime;

    fn record(run_id: Option<u64>) -> OutcomeRecord {
        OutcomeRecord {
            finished_at: datetime!(2024-05-01 10:30:00 UTC),
            job: JobSpec {
                repository: "octo/bot".into(),
                job_definition: "sync.yml".into(),
                git_ref: "main".into(),
                inputs: Default::default(),
            },
            handle: None,
            outcome: TerminationOutcome {
                success: true,
                reason: OutcomeReason::Completed { conclusion: None },
                run_id,
                polls: 3,
                elapsed: Duration::from_secs(40),
            },
            observers: Vec::new(),
        }
    }

    #[test]
    fn ensure_dir_is_idempotent() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        ensure_dir(&nested).unwrap();
        ensure_dir(&nested).unwrap();
        assert!(nested.is_dir());
    }

    #[test]
    fn artifact_names_are_deterministic() {
        let dir = Path::new("/var/logs");
        assert_eq!(log_path(dir, 42), PathBuf::from("/var/logs/run-42.log"));
        assert_eq!(
            record_path(dir, &record(Some(42))),
            PathBuf::from("/var/logs/run-42.json")
        );
        assert_eq!(
            record_path(dir, &record(None)),
            PathBuf::from("/var/logs/dispatch-1714559400.json")
        );
    }

    #[tokio::test]
    async fn log_artifact_is_overwritten() {
        let dir = tempdir().unwrap();
        let path = log_path(dir.path(), 1);
        write_log_artifact(&path, b"first\nsecond\n").await.unwrap();
        write_log_artifact(&path, b"full log\n").await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "full log\n");
        assert!(!path.with_extension("log.tmp").exists());
    }

    #[test]
    fn saved_record_round_trips_reason() {
        let dir = tempdir().unwrap();
        let path = save_outcome(&dir.path().join("out"), &record(Some(9))).unwrap();
        let value: serde_json::Value =
            serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(value["outcome"]["reason"]["kind"], "completed");
        assert_eq!(value["outcome"]["elapsed"], "40s");
    }
}
