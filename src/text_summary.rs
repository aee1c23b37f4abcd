//! Text summary builder for CLI output.

use crate::model::OutcomeRecord;

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

pub(crate) fn build_text_summary(record: &OutcomeRecord) -> TextSummary {
    let mut lines = Vec::new();
    let job = &record.job;
    let outcome = &record.outcome;

    lines.push(format!(
        "Job: {} {} @ {}",
        job.repository, job.job_definition, job.git_ref
    ));
    if let Some(handle) = record.handle.as_ref() {
        match handle.html_url.as_deref() {
            Some(url) => lines.push(format!("Run: {} ({url})", handle.run_id)),
            None => lines.push(format!("Run: {}", handle.run_id)),
        }
    }
    lines.push(format!(
        "Outcome: {} ({})",
        if outcome.success { "success" } else { "failure" },
        outcome.describe()
    ));
    if outcome.polls > 0 {
        lines.push(format!(
            "Polls: {} over {}",
            outcome.polls,
            humantime::format_duration(round_to_secs(outcome.elapsed))
        ));
    }
    if !record.observers.is_empty() {
        let observers: Vec<String> = record
            .observers
            .iter()
            .map(|r| format!("{}: {}", r.kind, r.exit))
            .collect();
        lines.push(format!("Observers: {}", observers.join(", ")));
    }
    lines.push(format!("Exit code: {}", outcome.exit_code()));

    TextSummary { lines }
}

fn round_to_secs(d: std::time::Duration) -> std::time::Duration {
    std::time::Duration::from_secs(d.as_secs())
}
