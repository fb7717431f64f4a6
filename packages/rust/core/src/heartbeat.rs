//! Periodic introspection.
//!
//! A heartbeat reads a handful of counters from a component and logs them.
//! It never changes core state.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use eppn_shared::{ParticipantId, Result};

/// Counters reported by one heartbeat.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeartbeatReport {
    pub participant: ParticipantId,
    pub counters: BTreeMap<String, u64>,
}

impl HeartbeatReport {
    pub fn new(participant: ParticipantId) -> Self {
        Self {
            participant,
            counters: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: &str, value: u64) -> Self {
        self.counters.insert(name.to_string(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<u64> {
        self.counters.get(name).copied()
    }
}

/// Anything that can report a heartbeat.
#[async_trait]
pub trait HeartbeatSource: Send + Sync {
    async fn heartbeat(&self) -> Result<HeartbeatReport>;
}

/// Log `source`'s heartbeat every `period` until `shutdown` flips to `true`.
///
/// The first report is emitted one full period after start.
pub fn spawn_heartbeat(
    source: Arc<dyn HeartbeatSource>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match source.heartbeat().await {
                        Ok(report) => info!(
                            participant = %report.participant,
                            counters = ?report.counters,
                            "heartbeat"
                        ),
                        Err(e) => warn!(error = %e, "heartbeat failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("heartbeat stopped");
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct Counting {
        calls: AtomicU64,
    }

    #[async_trait]
    impl HeartbeatSource for Counting {
        async fn heartbeat(&self) -> Result<HeartbeatReport> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(HeartbeatReport::new(ParticipantId::new("counter")).with("calls", n))
        }
    }

    #[test]
    fn report_builder_collects_counters() {
        let report = HeartbeatReport::new(ParticipantId::new("sink-worker"))
            .with("summaries", 3)
            .with("ethics_reports", 1);
        assert_eq!(report.get("summaries"), Some(3));
        assert_eq!(report.get("missing"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_until_shutdown() {
        let source = Arc::new(Counting {
            calls: AtomicU64::new(0),
        });
        let (tx, rx) = watch::channel(false);
        let handle = spawn_heartbeat(source.clone(), Duration::from_secs(10), rx);

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);

        tx.send(true).expect("signal shutdown");
        handle.await.expect("join");

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }
}
