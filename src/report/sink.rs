use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::warn;

use crate::report::ProposalReport;

#[async_trait]
pub trait ReportSink: Send + Sync {
    fn name(&self) -> &str;
    async fn send(&self, report: &ProposalReport) -> Result<()>;
}

pub struct StdoutSink;

#[async_trait]
impl ReportSink for StdoutSink {
    fn name(&self) -> &str {
        "stdout"
    }

    async fn send(&self, report: &ProposalReport) -> Result<()> {
        println!("# {}\n\n{}", report.title, report.body);
        Ok(())
    }
}

pub struct WebhookSink {
    client: Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("proposal-tracker/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build webhook HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ReportSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, report: &ProposalReport) -> Result<()> {
        let req = if self.url.contains("discord.com/api/webhooks")
            || self.url.contains("discordapp.com/api/webhooks")
        {
            let mut content = format!("**{}**\n{}", report.title, report.body);
            // Discord rejects messages over 2000 characters
            if content.chars().count() > 2000 {
                content = content.chars().take(1997).collect::<String>() + "...";
            }
            self.client
                .post(&self.url)
                .json(&serde_json::json!({ "content": content }))
        } else {
            self.client.post(&self.url).json(report)
        };

        req.send().await?.error_for_status()?;
        Ok(())
    }
}

/// Deliver the report to every sink. Returns how many accepted it; failures
/// are logged and do not stop delivery to the rest.
pub async fn publish(sinks: &[Box<dyn ReportSink>], report: &ProposalReport) -> usize {
    let mut delivered = 0;
    for sink in sinks {
        match sink.send(report).await {
            Ok(()) => delivered += 1,
            Err(e) => warn!("failed sending report via {}: {e:#}", sink.name()),
        }
    }
    delivered
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use anyhow::bail;

    use super::*;

    struct CountingSink(Arc<AtomicUsize>);

    #[async_trait]
    impl ReportSink for CountingSink {
        fn name(&self) -> &str {
            "counting"
        }

        async fn send(&self, _report: &ProposalReport) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct BrokenSink;

    #[async_trait]
    impl ReportSink for BrokenSink {
        fn name(&self) -> &str {
            "broken"
        }

        async fn send(&self, _report: &ProposalReport) -> Result<()> {
            bail!("channel unavailable")
        }
    }

    fn report() -> ProposalReport {
        ProposalReport {
            title: "Proposal updates: 0 events (0 high priority)".to_string(),
            body: String::new(),
            total_events: 0,
            high_priority_count: 0,
            by_tracker_type: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn failing_sink_does_not_block_others() {
        let counter = Arc::new(AtomicUsize::new(0));
        let sinks: Vec<Box<dyn ReportSink>> = vec![
            Box::new(BrokenSink),
            Box::new(CountingSink(counter.clone())),
            Box::new(StdoutSink),
        ];
        let delivered = publish(&sinks, &report()).await;
        assert_eq!(delivered, 2);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stdout_sink_always_succeeds() {
        tokio_test::assert_ok!(tokio_test::block_on(StdoutSink.send(&report())));
    }

    #[tokio::test]
    async fn unreachable_webhook_is_an_error() {
        let sink = WebhookSink::new("http://127.0.0.1:9/hook").expect("client builds");
        assert!(sink.send(&report()).await.is_err());
    }
}
