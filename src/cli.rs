use crate::config::{self, FileConfig};
use crate::engine::GitHubClient;
use crate::model::{JobSpec, SupervisorConfig, SupervisorEvent};
use crate::notify::{
    CompositeNotifier, DesktopNotifier, LarkNotifier, NoopNotifier, NotificationSink,
};
use crate::orchestrator::{process_run_completion, Controller};
use anyhow::{bail, Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

const EXIT_CODES_HELP: &str = "\
Exit codes:
   0  run completed
   1  configuration error or interrupted
   2  invalid command line
  10  trigger request failed
  11  triggered run could not be identified
  12  run reached an unexpected status
  13  run did not finish before the deadline
  14  run completed with a failing conclusion (--strict-conclusion)";

const DEFAULT_API_URL: &str = "https://api.github.com";
const DEFAULT_REF: &str = "main";
const DEFAULT_RESOLVE_ATTEMPTS: u32 = 10;
const DEFAULT_RESOLVE_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(20);
const DEFAULT_DEADLINE: Duration = Duration::from_secs(30 * 60);
const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_LOG_TAIL_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_OBSERVER_GRACE: Duration = Duration::from_secs(10);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_CLOCK_SKEW: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Parser, Clone)]
#[command(
    name = "dispatch-supervisor",
    version,
    about = "Trigger a GitHub Actions workflow and supervise the run until it finishes",
    after_help = EXIT_CODES_HELP
)]
pub struct Cli {
    /// Repository that owns the workflow (owner/name)
    #[arg(long = "repo", env = "GITHUB_REPOSITORY")]
    pub repository: Option<String>,

    /// Workflow file name or id (e.g. deploy.yml)
    #[arg(long)]
    pub workflow: Option<String>,

    /// Git ref to run the workflow on
    #[arg(long = "ref")]
    pub git_ref: Option<String>,

    /// Workflow input, repeatable (KEY=VALUE)
    #[arg(long = "input", value_parser = parse_input)]
    pub inputs: Vec<(String, String)>,

    /// API token
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Base URL of the GitHub REST API
    #[arg(long)]
    pub api_url: Option<String>,

    /// How many times to look for the triggered run
    #[arg(long)]
    pub resolve_attempts: Option<u32>,

    /// Pause between run lookups
    #[arg(long)]
    pub resolve_interval: Option<humantime::Duration>,

    /// Pause between status polls
    #[arg(long)]
    pub poll_interval: Option<humantime::Duration>,

    /// Give up on the run after this long
    #[arg(long)]
    pub deadline: Option<humantime::Duration>,

    /// Refresh interval of the watch observer
    #[arg(long)]
    pub watch_interval: Option<humantime::Duration>,

    /// Refresh interval of the log tail observer
    #[arg(long)]
    pub log_tail_interval: Option<humantime::Duration>,

    /// How long observers get to wind down after the run ends
    #[arg(long)]
    pub observer_grace: Option<humantime::Duration>,

    /// Timeout for each API request
    #[arg(long)]
    pub request_timeout: Option<humantime::Duration>,

    /// Tolerated clock difference between this host and the API
    #[arg(long)]
    pub clock_skew: Option<humantime::Duration>,

    /// Treat a completed run with a failing conclusion as a failure
    #[arg(
        long,
        num_args = 0..=1,
        default_missing_value = "true",
        action = clap::ArgAction::Set
    )]
    pub strict_conclusion: Option<bool>,

    /// Directory for run logs, outcome records and diagnostics
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Configuration file (JSON)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Console log level (error, warn, info, debug, trace)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Disable notifications
    #[arg(long)]
    pub no_notify: bool,

    /// Lark bot webhook key; enables Lark notifications
    #[arg(long, env = "LARK_KEY", hide_env_values = true)]
    pub lark_key: Option<String>,

    /// Print the outcome record as JSON
    #[arg(long)]
    pub json: bool,

    /// Run silently: suppress all output except errors (for cron usage)
    #[arg(long)]
    pub silent: bool,

    /// Export the outcome record as JSON
    #[arg(long)]
    pub export_json: Option<PathBuf>,

    /// Use --auto-save true or --auto-save false to override
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub auto_save: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    pub print_config: bool,
}

fn parse_input(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got {raw:?}")),
    }
}

fn pick(cli: Option<humantime::Duration>, file: Option<Duration>, default: Duration) -> Duration {
    cli.map(Duration::from).or(file).unwrap_or(default)
}

/// Merge command line, config file and defaults into a `SupervisorConfig`.
pub fn build_config(args: &Cli, file: &FileConfig) -> Result<SupervisorConfig> {
    let Some(repository) = args.repository.clone().or_else(|| file.repository.clone()) else {
        bail!("no repository given (use --repo, GITHUB_REPOSITORY or the config file)");
    };
    match repository.split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {}
        _ => bail!("repository must look like owner/name, got {repository:?}"),
    }
    let Some(job_definition) = args.workflow.clone().or_else(|| file.workflow.clone()) else {
        bail!("no workflow given (use --workflow or the config file)");
    };

    let mut inputs = file.inputs.clone();
    inputs.extend(args.inputs.iter().cloned());

    let cfg = SupervisorConfig {
        api_url: args
            .api_url
            .clone()
            .or_else(|| file.api_url.clone())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
        token: args.token.clone(),
        job: JobSpec {
            repository,
            job_definition,
            git_ref: args
                .git_ref
                .clone()
                .or_else(|| file.git_ref.clone())
                .unwrap_or_else(|| DEFAULT_REF.to_string()),
            inputs,
        },
        resolve_attempts: args
            .resolve_attempts
            .or(file.resolve_attempts)
            .unwrap_or(DEFAULT_RESOLVE_ATTEMPTS),
        resolve_interval: pick(
            args.resolve_interval,
            file.resolve_interval,
            DEFAULT_RESOLVE_INTERVAL,
        ),
        poll_interval: pick(args.poll_interval, file.poll_interval, DEFAULT_POLL_INTERVAL),
        deadline: pick(args.deadline, file.deadline, DEFAULT_DEADLINE),
        watch_interval: pick(
            args.watch_interval,
            file.watch_interval,
            DEFAULT_WATCH_INTERVAL,
        ),
        log_tail_interval: pick(
            args.log_tail_interval,
            file.log_tail_interval,
            DEFAULT_LOG_TAIL_INTERVAL,
        ),
        observer_grace: pick(
            args.observer_grace,
            file.observer_grace,
            DEFAULT_OBSERVER_GRACE,
        ),
        request_timeout: pick(
            args.request_timeout,
            file.request_timeout,
            DEFAULT_REQUEST_TIMEOUT,
        ),
        clock_skew: pick(args.clock_skew, file.clock_skew, Duration::ZERO),
        strict_conclusion: args
            .strict_conclusion
            .or(file.strict_conclusion)
            .unwrap_or(false),
        log_dir: args
            .log_dir
            .clone()
            .or_else(|| file.log_dir.clone())
            .unwrap_or_else(crate::storage::default_log_dir),
        user_agent: format!("dispatch-supervisor/{}", env!("CARGO_PKG_VERSION")),
    };

    if cfg.clock_skew > MAX_CLOCK_SKEW {
        bail!(
            "--clock-skew must not exceed {}",
            humantime::format_duration(MAX_CLOCK_SKEW)
        );
    }
    if cfg.resolve_attempts == 0 {
        bail!("--resolve-attempts must be at least 1");
    }
    for (name, value) in [
        ("resolve-interval", cfg.resolve_interval),
        ("poll-interval", cfg.poll_interval),
        ("deadline", cfg.deadline),
        ("watch-interval", cfg.watch_interval),
        ("log-tail-interval", cfg.log_tail_interval),
        ("request-timeout", cfg.request_timeout),
    ] {
        if value.is_zero() {
            bail!("--{name} must be greater than zero");
        }
    }

    Ok(cfg)
}

fn build_notifier(
    args: &Cli,
    file: &FileConfig,
    cfg: &SupervisorConfig,
) -> Result<Box<dyn NotificationSink>> {
    if args.no_notify || file.notify == Some(false) {
        return Ok(Box::new(NoopNotifier));
    }
    let mut sinks: Vec<Box<dyn NotificationSink>> = vec![Box::new(DesktopNotifier)];
    if let Some(key) = args.lark_key.as_deref().or(file.lark_key.as_deref()) {
        sinks.push(Box::new(LarkNotifier::new(key, &cfg.user_agent)?));
    }
    Ok(Box::new(CompositeNotifier::new(sinks)))
}

/// Run one supervised dispatch and return the process exit code.
pub async fn run(args: Cli) -> Result<i32> {
    // Validate that --silent can only be used with --json
    if args.silent && !args.json {
        bail!("--silent can only be used with --json. Use --silent --json together.");
    }

    let file = config::load(args.config.as_deref())?;
    let cfg = build_config(&args, &file)?;

    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&cfg)?);
        return Ok(0);
    }

    crate::storage::ensure_dir(&cfg.log_dir)?;
    let default_level = if args.silent { "error" } else { "warn" };
    let level = args
        .log_level
        .as_deref()
        .or(file.console_log_level.as_deref())
        .map(config::normalize_level)
        .unwrap_or_else(|| default_level.to_string());
    let _log_guard = crate::logging::init(&level, &cfg.log_dir)?;

    let api = Arc::new(GitHubClient::new(&cfg)?);
    let notifier = build_notifier(&args, &file, &cfg)?;

    let interrupt = CancellationToken::new();
    let ctrl_c = {
        let interrupt = interrupt.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, stopping");
                interrupt.cancel();
            }
        })
    };

    let (out_tx, out_handle) = if args.silent {
        (None, None)
    } else {
        let (tx, handle) = spawn_output_writer();
        (Some(tx), Some(handle))
    };

    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<SupervisorEvent>();
    let progress = out_tx.clone().filter(|_| !args.json);
    let printer = tokio::spawn(async move {
        while let Some(ev) = evt_rx.recv().await {
            if matches!(ev, SupervisorEvent::Finished { .. }) {
                continue;
            }
            if let Some(tx) = progress.as_ref() {
                let _ = tx.send(OutputLine::Stderr(ev.to_message()));
            }
        }
    });

    let log_dir = cfg.log_dir.clone();
    let controller = Controller::new(cfg, api, notifier, interrupt);
    let record = controller.run(evt_tx).await;
    ctrl_c.abort();
    let _ = printer.await;

    let processed = process_run_completion(
        &record,
        &log_dir,
        args.auto_save,
        args.export_json.as_deref(),
    );

    if let Some(tx) = out_tx.as_ref() {
        if args.json {
            let out = serde_json::to_string_pretty(&record).context("serialize outcome record")?;
            let _ = tx.send(OutputLine::Stdout(out));
        } else {
            for line in crate::text_summary::build_text_summary(&record).lines {
                let _ = tx.send(OutputLine::Stdout(line));
            }
        }
        for msg in processed.messages {
            let _ = tx.send(OutputLine::Stderr(msg));
        }
        if let Some(p) = processed.auto_saved_path.as_ref() {
            let _ = tx.send(OutputLine::Stderr(format!("Saved: {}", p.display())));
        }
    }

    if let Some(tx) = out_tx {
        drop(tx);
    }
    if let Some(handle) = out_handle {
        let _ = handle.await;
    }

    Ok(record.outcome.exit_code())
}
