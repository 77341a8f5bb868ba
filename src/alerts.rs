//! Alert delivery: outbound webhook and SMTP email.
//!
//! Delivery is fire-and-forget. [`AlertDispatcher::dispatch`] fans an event
//! out to every enabled sink, logs failures at warn level and never returns
//! an error; there is no retry and no ordering between sinks.

use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::config::{AlertsConfig, SmtpConfig};
use crate::models::AlertEvent;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);
const SMTP_TIMEOUT: Duration = Duration::from_secs(15);

/// One delivery backend.
#[async_trait]
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, event: &AlertEvent) -> Result<()>;
}

/// POSTs the event as JSON. Any non-2xx response is a failure.
pub struct WebhookSink {
    url: String,
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .context("failed to build webhook client")?;
        Ok(Self {
            url: url.to_string(),
            client,
        })
    }
}

#[async_trait]
impl AlertSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, event: &AlertEvent) -> Result<()> {
        self.client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .with_context(|| format!("webhook POST to {} failed", self.url))?
            .error_for_status()
            .with_context(|| format!("webhook {} rejected the alert", self.url))?;
        Ok(())
    }
}

/// Sends a plain-text email over STARTTLS with login credentials.
pub struct SmtpSink {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
}

impl SmtpSink {
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        let host = config.host.as_deref().unwrap_or_default();
        let credentials = Credentials::new(
            config.username.clone().unwrap_or_default(),
            config.password.clone().unwrap_or_default(),
        );
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .with_context(|| format!("invalid SMTP host: {}", host))?
            .port(config.port)
            .credentials(credentials)
            .timeout(Some(SMTP_TIMEOUT))
            .build();

        let from_addr = config.from_addr.as_deref().unwrap_or_default();
        let from = from_addr
            .parse::<Mailbox>()
            .with_context(|| format!("invalid from_addr: {}", from_addr))?;
        let to = config
            .to_addrs
            .iter()
            .map(|addr| {
                addr.parse::<Mailbox>()
                    .with_context(|| format!("invalid recipient: {}", addr))
            })
            .collect::<Result<Vec<Mailbox>>>()?;

        Ok(Self { mailer, from, to })
    }

    fn build_message(&self, event: &AlertEvent) -> Result<Message> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(alert_subject(event))
            .header(ContentType::TEXT_PLAIN);
        for to in &self.to {
            builder = builder.to(to.clone());
        }
        let body = serde_json::to_string_pretty(event)?;
        Ok(builder.body(body)?)
    }
}

#[async_trait]
impl AlertSink for SmtpSink {
    fn name(&self) -> &str {
        "smtp"
    }

    async fn send(&self, event: &AlertEvent) -> Result<()> {
        let message = self.build_message(event)?;
        self.mailer
            .send(message)
            .await
            .context("SMTP delivery failed")?;
        Ok(())
    }
}

/// `[OSINT HIT] <source> :: <title or origin>`
pub fn alert_subject(event: &AlertEvent) -> String {
    let label = event
        .title
        .as_deref()
        .filter(|t| !t.is_empty())
        .unwrap_or(&event.origin);
    format!("[OSINT HIT] {} :: {}", event.source, label)
}

/// Per-event delivery counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub delivered: usize,
    pub failed: usize,
}

/// Fans events out to every enabled sink. Cheap to clone.
#[derive(Clone, Default)]
pub struct AlertDispatcher {
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl AlertDispatcher {
    pub fn new(sinks: Vec<Arc<dyn AlertSink>>) -> Self {
        Self { sinks }
    }

    /// Build sinks for every enabled backend in the `[alerts]` section.
    pub fn from_config(config: &AlertsConfig) -> Result<Self> {
        let mut sinks: Vec<Arc<dyn AlertSink>> = Vec::new();
        if config.webhook.enabled {
            if let Some(url) = config.webhook.url.as_deref() {
                sinks.push(Arc::new(WebhookSink::new(url)?));
            }
        }
        if config.smtp.enabled {
            sinks.push(Arc::new(SmtpSink::new(&config.smtp)?));
        }
        Ok(Self::new(sinks))
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub async fn dispatch(&self, event: &AlertEvent) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        for sink in &self.sinks {
            match sink.send(event).await {
                Ok(()) => outcome.delivered += 1,
                Err(e) => {
                    outcome.failed += 1;
                    warn!(
                        sink = sink.name(),
                        source = %event.source,
                        origin = %event.origin,
                        error = %format!("{:#}", e),
                        "alert delivery failed"
                    );
                }
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ioc::Indicators;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event(title: Option<&str>) -> AlertEvent {
        AlertEvent {
            source: "feed".into(),
            origin: "https://example.com/a".into(),
            title: title.map(String::from),
            keywords: vec!["exploit".into()],
            regexes: vec![],
            iocs: Indicators::new(),
            snippet: "snippet".into(),
        }
    }

    struct Counting {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl AlertSink for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        async fn send(&self, _event: &AlertEvent) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("boom");
            }
            Ok(())
        }
    }

    #[test]
    fn test_subject_prefers_title() {
        assert_eq!(
            alert_subject(&event(Some("New exploit"))),
            "[OSINT HIT] feed :: New exploit"
        );
        assert_eq!(
            alert_subject(&event(None)),
            "[OSINT HIT] feed :: https://example.com/a"
        );
    }

    #[tokio::test]
    async fn test_failing_sink_does_not_stop_others() {
        let bad = Arc::new(Counting { calls: AtomicUsize::new(0), fail: true });
        let good = Arc::new(Counting { calls: AtomicUsize::new(0), fail: false });
        let dispatcher = AlertDispatcher::new(vec![
            bad.clone() as Arc<dyn AlertSink>,
            good.clone() as Arc<dyn AlertSink>,
        ]);

        let outcome = dispatcher.dispatch(&event(None)).await;
        assert_eq!(outcome, DispatchOutcome { delivered: 1, failed: 1 });
        assert_eq!(bad.calls.load(Ordering::SeqCst), 1);
        assert_eq!(good.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_disabled_backends_build_no_sinks() {
        let dispatcher = AlertDispatcher::from_config(&AlertsConfig::default()).unwrap();
        assert!(dispatcher.is_empty());
    }

    #[test]
    fn test_smtp_message_has_all_recipients() {
        let config = SmtpConfig {
            enabled: true,
            host: Some("smtp.example.com".into()),
            port: 587,
            username: Some("u".into()),
            password: Some("p".into()),
            from_addr: Some("osint@example.com".into()),
            to_addrs: vec!["a@example.com".into(), "b@example.com".into()],
        };
        let sink = SmtpSink::new(&config).unwrap();
        let message = sink.build_message(&event(Some("Hit"))).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("Subject: [OSINT HIT] feed :: Hit"));
        assert!(raw.contains("a@example.com"));
        assert!(raw.contains("b@example.com"));
    }
}
