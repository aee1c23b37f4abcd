//! Terminal success/failure signal to the operator.
//!
//! Sinks observe a finished [`TerminationOutcome`]; they never influence control flow.
//! Delivery failures are logged and swallowed by [`notify`].

use crate::model::{JobSpec, OutcomeReason, TerminationOutcome};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

const LARK_HOOK_BASE: &str = "https://open.feishu.cn/open-apis/bot/v2/hook";
const LARK_TIMEOUT: Duration = Duration::from_secs(10);
/// Chat webhooks truncate long bodies awkwardly; cut them ourselves.
const LARK_BODY_LIMIT: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundClass {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub sound: SoundClass,
}

impl Notification {
    pub fn from_outcome(outcome: &TerminationOutcome, job: &JobSpec) -> Self {
        let title = match (&outcome.reason, outcome.success) {
            (_, true) => format!("{} succeeded", job.job_definition),
            (OutcomeReason::Timeout, _) => format!("{} timed out", job.job_definition),
            _ => format!("{} failed", job.job_definition),
        };
        let mut body = format!("{}@{}: {}", job.repository, job.git_ref, outcome.describe());
        if let Some(id) = outcome.run_id {
            body.push_str(&format!(" (run {id})"));
        }
        Self {
            title,
            body,
            sound: if outcome.success {
                SoundClass::Success
            } else {
                SoundClass::Error
            },
        }
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, notification: &Notification) -> Result<()>;
}

/// Best-effort delivery of `outcome`. Never fails.
pub async fn notify(sink: &dyn NotificationSink, outcome: &TerminationOutcome, job: &JobSpec) {
    let notification = Notification::from_outcome(outcome, job);
    match sink.deliver(&notification).await {
        Ok(()) => tracing::debug!(sink = sink.name(), title = %notification.title, "notification sent"),
        Err(e) => tracing::warn!(sink = sink.name(), error = %format!("{e:#}"), "notification delivery failed"),
    }
}

pub struct NoopNotifier;

#[async_trait]
impl NotificationSink for NoopNotifier {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn deliver(&self, _notification: &Notification) -> Result<()> {
        Ok(())
    }
}

/// Host notification centre: `osascript` on macOS, `notify-send` on Linux.
pub struct DesktopNotifier;

fn applescript_quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

impl DesktopNotifier {
    fn command(notification: &Notification) -> Option<tokio::process::Command> {
        if cfg!(target_os = "macos") {
            let sound = match notification.sound {
                SoundClass::Success => "Glass",
                SoundClass::Error => "Basso",
            };
            let script = format!(
                "display notification {} with title {} sound name {}",
                applescript_quote(&notification.body),
                applescript_quote(&notification.title),
                applescript_quote(sound)
            );
            let mut cmd = tokio::process::Command::new("osascript");
            cmd.arg("-e").arg(script);
            Some(cmd)
        } else if cfg!(target_os = "linux") {
            let urgency = match notification.sound {
                SoundClass::Success => "normal",
                SoundClass::Error => "critical",
            };
            let mut cmd = tokio::process::Command::new("notify-send");
            cmd.arg("--urgency")
                .arg(urgency)
                .arg(&notification.title)
                .arg(&notification.body);
            Some(cmd)
        } else {
            None
        }
    }
}

#[async_trait]
impl NotificationSink for DesktopNotifier {
    fn name(&self) -> &'static str {
        "desktop"
    }

    async fn deliver(&self, notification: &Notification) -> Result<()> {
        let Some(mut cmd) = Self::command(notification) else {
            tracing::info!(title = %notification.title, body = %notification.body, "no desktop notifier on this host");
            return Ok(());
        };
        let output = cmd
            .stdin(std::process::Stdio::null())
            .output()
            .await
            .context("failed to run desktop notifier")?;
        if !output.status.success() {
            bail!(
                "desktop notifier exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

/// Lark (Feishu) custom-bot webhook.
pub struct LarkNotifier {
    http: reqwest::Client,
    webhook_url: String,
}

#[derive(Debug, Deserialize)]
struct LarkReply {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: Option<String>,
}

fn truncate_chars(s: &str, limit: usize) -> String {
    if s.chars().count() <= limit {
        return s.to_string();
    }
    let cut: String = s.chars().take(limit).collect();
    format!("{cut}...")
}

impl LarkNotifier {
    pub fn new(key: &str, user_agent: &str) -> Result<Self> {
        Self::with_url(format!("{LARK_HOOK_BASE}/{key}"), user_agent)
    }

    pub fn with_url(webhook_url: String, user_agent: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(user_agent.to_string())
            .timeout(LARK_TIMEOUT)
            .build()
            .context("failed to build webhook client")?;
        Ok(Self { http, webhook_url })
    }

    fn payload(notification: &Notification) -> serde_json::Value {
        serde_json::json!({
            "msg_type": "text",
            "content": {
                "text": format!(
                    "{}\n{}",
                    notification.title,
                    truncate_chars(&notification.body, LARK_BODY_LIMIT)
                )
            }
        })
    }
}

#[async_trait]
impl NotificationSink for LarkNotifier {
    fn name(&self) -> &'static str {
        "lark"
    }

    async fn deliver(&self, notification: &Notification) -> Result<()> {
        let reply: LarkReply = self
            .http
            .post(&self.webhook_url)
            .json(&Self::payload(notification))
            .send()
            .await
            .context("failed to reach Lark webhook")?
            .error_for_status()
            .context("Lark webhook returned error status")?
            .json()
            .await
            .context("failed to parse Lark webhook reply")?;
        // The webhook answers 200 even when it rejects the message.
        if reply.code != 0 {
            bail!(
                "Lark webhook rejected message: code {} {}",
                reply.code,
                reply.msg.unwrap_or_default()
            );
        }
        Ok(())
    }
}

/// Delivers to every sink; fails if any of them did, after trying all.
pub struct CompositeNotifier {
    sinks: Vec<Box<dyn NotificationSink>>,
}

impl CompositeNotifier {
    pub fn new(sinks: Vec<Box<dyn NotificationSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl NotificationSink for CompositeNotifier {
    fn name(&self) -> &'static str {
        "composite"
    }

    async fn deliver(&self, notification: &Notification) -> Result<()> {
        let mut failed = Vec::new();
        for sink in &self.sinks {
            if let Err(e) = sink.deliver(notification).await {
                failed.push(format!("{}: {e:#}", sink.name()));
            }
        }
        if !failed.is_empty() {
            bail!("{}", failed.join("; "));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn job() -> JobSpec {
        JobSpec {
            repository: "octo/bot".into(),
            job_definition: "sync.yml".into(),
            git_ref: "main".into(),
            inputs: Default::default(),
        }
    }

    struct Counting {
        calls: Arc<AtomicU32>,
        fail: bool,
    }

    #[async_trait]
    impl NotificationSink for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn deliver(&self, _notification: &Notification) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                bail!("unreachable host");
            }
            Ok(())
        }
    }

    #[test]
    fn success_and_failure_notifications() {
        let ok = TerminationOutcome {
            success: true,
            reason: OutcomeReason::Completed {
                conclusion: Some("success".into()),
            },
            run_id: Some(12),
            polls: 3,
            elapsed: Duration::from_secs(40),
        };
        let n = Notification::from_outcome(&ok, &job());
        assert_eq!(n.title, "sync.yml succeeded");
        assert_eq!(n.sound, SoundClass::Success);
        assert!(n.body.starts_with("octo/bot@main: run completed"));
        assert!(n.body.ends_with("(run 12)"));

        let timeout = TerminationOutcome {
            success: false,
            reason: OutcomeReason::Timeout,
            run_id: Some(12),
            polls: 91,
            elapsed: Duration::from_secs(1820),
        };
        let n = Notification::from_outcome(&timeout, &job());
        assert_eq!(n.title, "sync.yml timed out");
        assert_eq!(n.sound, SoundClass::Error);

        let trigger = TerminationOutcome::failed(OutcomeReason::TriggerFailed("403".into()));
        let n = Notification::from_outcome(&trigger, &job());
        assert_eq!(n.title, "sync.yml failed");
        assert!(!n.body.contains("(run"));
    }

    #[tokio::test]
    async fn composite_tries_every_sink_and_reports_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let composite = CompositeNotifier::new(vec![
            Box::new(Counting {
                calls: calls.clone(),
                fail: true,
            }),
            Box::new(Counting {
                calls: calls.clone(),
                fail: false,
            }),
        ]);
        let n = Notification::from_outcome(
            &TerminationOutcome::failed(OutcomeReason::Timeout),
            &job(),
        );

        let err = composite.deliver(&n).await.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(err.to_string().contains("unreachable host"));
    }

    #[tokio::test]
    async fn notify_swallows_delivery_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let sink = Counting {
            calls: calls.clone(),
            fail: true,
        };
        notify(&sink, &TerminationOutcome::failed(OutcomeReason::Timeout), &job()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unreachable_webhook_is_an_error_not_a_panic() {
        let sink = LarkNotifier::with_url("http://127.0.0.1:1/hook".into(), "test").unwrap();
        let n = Notification::from_outcome(
            &TerminationOutcome::failed(OutcomeReason::Timeout),
            &job(),
        );
        assert!(sink.deliver(&n).await.is_err());
    }

    #[test]
    fn lark_payload_truncates_long_bodies() {
        let n = Notification {
            title: "t".into(),
            body: "x".repeat(500),
            sound: SoundClass::Error,
        };
        let payload = LarkNotifier::payload(&n);
        let text = payload["content"]["text"].as_str().unwrap();
        assert_eq!(text, format!("t\n{}...", "x".repeat(200)));
        assert_eq!(payload["msg_type"], "text");
    }

    #[test]
    fn applescript_strings_are_escaped() {
        assert_eq!(applescript_quote(r#"say "hi" \o/"#), r#""say \"hi\" \\o/""#);
    }
}
