//! Delivery sinks
//!
//! Side-effect fan-out for emitted alerts. Sink failures are logged
//! and never propagate into the alert path.

use crate::manager::Alert;
use async_trait::async_trait;
use std::net::IpAddr;

/// A notification destination for emitted alerts.
#[async_trait]
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &str;
    async fn deliver(&self, alert: &Alert) -> anyhow::Result<()>;
}

/// Default sink: structured log line per alert.
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, alert: &Alert) -> anyhow::Result<()> {
        tracing::warn!(
            id = alert.id,
            threat = %alert.threat,
            severity = %alert.severity,
            confidence = alert.confidence,
            src = %alert.src_ip,
            dst = %alert.dst_ip,
            "ALERT"
        );
        Ok(())
    }
}

/// Automated response hook, invoked for high-severity alerts only.
#[async_trait]
pub trait ResponseSink: Send + Sync {
    fn name(&self) -> &str;
    async fn block_source(&self, source: IpAddr, alert: &Alert) -> anyhow::Result<()>;
}

/// Default response: record the request, touch nothing.
pub struct NoopResponseSink;

#[async_trait]
impl ResponseSink for NoopResponseSink {
    fn name(&self) -> &str {
        "noop"
    }

    async fn block_source(&self, source: IpAddr, alert: &Alert) -> anyhow::Result<()> {
        tracing::info!(id = alert.id, %source, "response sink noop");
        Ok(())
    }
}
