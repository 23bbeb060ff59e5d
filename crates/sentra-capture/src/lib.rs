//! Live interface capture
//!
//! Opens a named interface in promiscuous read-only mode and feeds
//! parsed packet summaries into the aggregation pipeline. Capture
//! never blocks on downstream; backpressure is absorbed by the flow
//! table, not by dropping reads here.

use sentra_common::{EngineCounters, PacketSummary, SentraError, SentraResult};
use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use pnet::datalink::{self, Channel, DataLinkReceiver, NetworkInterface};

const READ_TIMEOUT: Duration = Duration::from_millis(500);

/// An open capture channel on a single interface.
pub struct Capture {
    interface: NetworkInterface,
    rx: Box<dyn DataLinkReceiver>,
}

impl std::fmt::Debug for Capture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capture")
            .field("interface", &self.interface)
            .finish_non_exhaustive()
    }
}

impl Capture {
    /// Open the named interface for promiscuous capture.
    ///
    /// Fails with `InterfaceNotFound` when the name does not resolve
    /// and `InsufficientPrivilege` when the host denies raw capture.
    /// Callers must propagate the latter; there is no fallback.
    pub fn open(name: &str) -> SentraResult<Self> {
        let interface = datalink::interfaces()
            .into_iter()
            .find(|i| i.name == name)
            .ok_or_else(|| SentraError::InterfaceNotFound(name.to_string()))?;

        let config = datalink::Config {
            promiscuous: true,
            read_timeout: Some(READ_TIMEOUT),
            ..Default::default()
        };

        match datalink::channel(&interface, config) {
            Ok(Channel::Ethernet(_tx, rx)) => {
                tracing::info!(interface = %interface.name, "capture channel open");
                Ok(Self { interface, rx })
            }
            Ok(_) => Err(SentraError::Capture(format!(
                "unsupported channel type on {name}"
            ))),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                Err(SentraError::InsufficientPrivilege(name.to_string()))
            }
            Err(e) => Err(SentraError::Capture(format!("cannot open {name}: {e}"))),
        }
    }

    /// Interface this capture is bound to.
    pub fn interface_name(&self) -> &str {
        &self.interface.name
    }

    /// Run the capture loop on a dedicated thread, parsing each frame
    /// and pushing summaries into `tx` until `stop` is set or the
    /// receiver goes away. Timestamps are monotonic nanoseconds
    /// relative to `epoch`.
    pub fn spawn(
        mut self,
        epoch: Instant,
        tx: mpsc::UnboundedSender<PacketSummary>,
        counters: Arc<EngineCounters>,
        stop: Arc<AtomicBool>,
    ) -> SentraResult<std::thread::JoinHandle<()>> {
        let handle = std::thread::Builder::new()
            .name(format!("capture-{}", self.interface.name))
            .spawn(move || {
                let mut last_warn: Option<Instant> = None;
                loop {
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                    match self.rx.next() {
                        Ok(frame) => {
                            let ts_nanos = epoch.elapsed().as_nanos() as u64;
                            match PacketSummary::parse(frame, ts_nanos) {
                                Some(pkt) => {
                                    counters.packets_captured.fetch_add(1, Ordering::Relaxed);
                                    if tx.send(pkt).is_err() {
                                        // Aggregator is gone; nothing left to feed.
                                        break;
                                    }
                                }
                                None => {
                                    counters.parse_failures.fetch_add(1, Ordering::Relaxed);
                                }
                            }
                        }
                        Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                            // Idle interface; loop to re-check the stop flag.
                        }
                        Err(e) => {
                            counters.packets_dropped.fetch_add(1, Ordering::Relaxed);
                            if last_warn.map_or(true, |t| t.elapsed() >= Duration::from_secs(1)) {
                                tracing::warn!(
                                    interface = %self.interface.name,
                                    error = %e,
                                    "capture read failed"
                                );
                                last_warn = Some(Instant::now());
                            }
                        }
                    }
                }
                tracing::info!(interface = %self.interface.name, "capture stopped");
            })?;
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_interface() {
        let err = Capture::open("sentra-test-does-not-exist").unwrap_err();
        match err {
            SentraError::InterfaceNotFound(name) => {
                assert_eq!(name, "sentra-test-does-not-exist")
            }
            other => panic!("expected InterfaceNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_privilege_error_exit_code() {
        assert_eq!(
            SentraError::InsufficientPrivilege("eth0".into()).exit_code(),
            77
        );
    }
}
