//! Diagnostic logging: a console layer on stderr plus a daily rolling file in the log dir.

use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const FILE_FILTER: &str = "dispatch_supervisor=debug";

/// Install the global subscriber. `RUST_LOG` overrides `console_level` for the console layer.
///
/// The returned guard flushes the file writer when dropped; keep it alive for the whole run.
pub fn init(console_level: &str, log_dir: &Path) -> Result<WorkerGuard> {
    let console_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(console_level)
            .with_context(|| format!("invalid log level {console_level:?}"))?,
    };

    let appender = tracing_appender::rolling::daily(log_dir, "supervisor.log");
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_filter(console_filter),
        )
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer)
                .with_filter(EnvFilter::new(FILE_FILTER)),
        )
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(guard)
}
