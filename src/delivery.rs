use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{error, info, warn};

/// How long a single transport invocation may run.
const SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Delivery mechanisms, tried in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// iMessage service (rich, presence-aware).
    IMessage,
    /// SMS service.
    Sms,
    /// Buddy addressed without naming a service.
    Generic,
}

impl Channel {
    pub const CHAIN: [Channel; 3] = [Channel::IMessage, Channel::Sms, Channel::Generic];

    /// AppleScript that sends `text` to `identity` over this channel.
    pub fn script(self, identity: &str, text: &str) -> String {
        let identity = escape_applescript(identity);
        let text = escape_applescript(text);
        match self {
            Channel::IMessage => service_script("iMessage", &identity, &text),
            Channel::Sms => service_script("SMS", &identity, &text),
            Channel::Generic => format!(
                "tell application \"Messages\"\n    send \"{}\" to buddy \"{}\"\nend tell",
                text, identity
            ),
        }
    }
}

fn service_script(service: &str, identity: &str, text: &str) -> String {
    format!(
        "tell application \"Messages\"\n    \
         set targetService to 1st service whose service type = {}\n    \
         set targetBuddy to buddy \"{}\" of targetService\n    \
         send \"{}\" to targetBuddy\n\
         end tell",
        service, identity, text
    )
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::IMessage => write!(f, "iMessage"),
            Channel::Sms => write!(f, "SMS"),
            Channel::Generic => write!(f, "generic"),
        }
    }
}

/// Escape text for embedding inside an AppleScript string literal.
///
/// Backslashes go first so the escapes added for quotes are not doubled.
pub fn escape_applescript(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            _ => out.push(c),
        }
    }
    out
}

/// Runs one transport command; success is the exit status and nothing else.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn run(&self, script: &str) -> Result<()>;
}

/// Executes AppleScript through `osascript -e`.
pub struct OsascriptTransport {
    timeout: Duration,
}

impl OsascriptTransport {
    pub fn new() -> Self {
        Self {
            timeout: SEND_TIMEOUT,
        }
    }
}

impl Default for OsascriptTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for OsascriptTransport {
    async fn run(&self, script: &str) -> Result<()> {
        let output = tokio::time::timeout(
            self.timeout,
            tokio::process::Command::new("osascript")
                .arg("-e")
                .arg(script)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .with_context(|| format!("osascript timed out after {}s", self.timeout.as_secs()))?
        .context("Failed to execute osascript")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "osascript exited with code {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            );
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct DeliveryAttempt {
    pub channel: Channel,
    pub error: Option<String>,
}

/// Outcome of one `send` call.
#[derive(Debug, Default)]
pub struct DeliveryReport {
    pub attempts: Vec<DeliveryAttempt>,
    /// The channel that delivered the message, if any did.
    pub channel: Option<Channel>,
}

impl DeliveryReport {
    pub fn succeeded(&self) -> bool {
        self.channel.is_some()
    }
}

/// Sends a message through the channel chain, stopping at the first success.
#[derive(Clone)]
pub struct Delivery {
    transport: Arc<dyn Transport>,
}

impl Delivery {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub async fn send(&self, identity: &str, text: &str) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        for channel in Channel::CHAIN {
            let script = channel.script(identity, text);
            match self.transport.run(&script).await {
                Ok(()) => {
                    info!("Sent via {} to [{}]: {}", channel, identity, text);
                    report.attempts.push(DeliveryAttempt {
                        channel,
                        error: None,
                    });
                    report.channel = Some(channel);
                    return report;
                }
                Err(e) => {
                    warn!("{} delivery to [{}] failed: {:#}", channel, identity, e);
                    report.attempts.push(DeliveryAttempt {
                        channel,
                        error: Some(format!("{:#}", e)),
                    });
                }
            }
        }

        let summary = report
            .attempts
            .iter()
            .map(|a| format!("{}: {}", a.channel, a.error.as_deref().unwrap_or("ok")))
            .collect::<Vec<_>>()
            .join("; ");
        error!("All send methods failed for [{}] ({})", identity, summary);
        report
    }
}
