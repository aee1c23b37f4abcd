//! Post-run processing.
//!
//! Handles auto-save and exports after the controller has produced its outcome.

use crate::model::OutcomeRecord;
use crate::storage;
use std::path::{Path, PathBuf};

/// Result of post-run processing, ready for presentation layers.
pub(crate) struct ProcessedRun {
    pub messages: Vec<String>,
    pub auto_saved_path: Option<PathBuf>,
}

/// Persist the outcome record where requested. Failures become messages, never errors: the
/// exit code must reflect the run, not the bookkeeping.
pub(crate) fn process_run_completion(
    record: &OutcomeRecord,
    log_dir: &Path,
    auto_save: bool,
    export_json: Option<&Path>,
) -> ProcessedRun {
    let mut messages = Vec::new();

    let auto_saved_path = if auto_save {
        match storage::save_outcome(log_dir, record) {
            Ok(path) => Some(path),
            Err(e) => {
                messages.push(format!("Auto-save failed: {e:#}"));
                None
            }
        }
    } else {
        None
    };

    if let Some(export_path) = export_json {
        match storage::export_json(export_path, record) {
            Ok(()) => messages.push(format!("Exported JSON: {}", export_path.display())),
            Err(e) => messages.push(format!("Export JSON failed: {e:#}")),
        }
    }

    if let Some(id) = record.outcome.run_id {
        let log = storage::log_path(log_dir, id);
        if log.exists() {
            messages.push(format!("Run log: {}", log.display()));
        }
    }

    ProcessedRun {
        messages,
        auto_saved_path,
    }
}
