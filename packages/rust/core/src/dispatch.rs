//! Fan-out: route a message and hand each copy to the transport.
//!
//! Every destination gets its own task and its own timeout. A branch that
//! fails, times out or panics is reported on its own; siblings are never
//! cancelled and nothing already delivered is rolled back.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use eppn_shared::{Message, MessageKind, ParticipantId, Result};

use crate::heartbeat::{HeartbeatReport, HeartbeatSource};
use crate::router::{Forward, RouteTable};
use crate::transport::Transport;

/// Per-destination outcome of one dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchReport {
    pub kind: MessageKind,
    pub delivered: Vec<ParticipantId>,
    pub failed: Vec<(ParticipantId, String)>,
}

impl DispatchReport {
    /// No destination was configured for the message's kind.
    pub fn is_miss(&self) -> bool {
        self.delivered.is_empty() && self.failed.is_empty()
    }
}

#[derive(Debug, Default)]
struct DispatchStats {
    dispatched: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// The router's active half: owns the table and the outbound capability.
pub struct Dispatcher {
    id: ParticipantId,
    table: RouteTable,
    transport: Arc<dyn Transport>,
    send_timeout: Duration,
    stats: DispatchStats,
}

impl Dispatcher {
    pub fn new(table: RouteTable, transport: Arc<dyn Transport>, send_timeout: Duration) -> Self {
        Self {
            id: ParticipantId::new("router"),
            table,
            transport,
            send_timeout,
            stats: DispatchStats::default(),
        }
    }

    /// Route `message` and deliver a copy to every destination.
    #[instrument(skip_all, fields(kind = %message.kind(), doc_id = ?message.doc_id()))]
    pub async fn dispatch(&self, message: Message) -> DispatchReport {
        let kind = message.kind();
        let forwards = self.table.route(&message);
        self.stats.dispatched.fetch_add(1, Ordering::Relaxed);

        if forwards.is_empty() {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            return DispatchReport {
                kind,
                delivered: Vec::new(),
                failed: Vec::new(),
            };
        }

        let branches: Vec<_> = forwards
            .into_iter()
            .map(|Forward { destination, message }| {
                let transport = Arc::clone(&self.transport);
                let timeout = self.send_timeout;
                let target = destination.clone();
                let handle = tokio::spawn(async move {
                    match tokio::time::timeout(timeout, transport.send(&target, message)).await {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(e)) => Err(e.to_string()),
                        Err(_) => Err(format!("send timed out after {}ms", timeout.as_millis())),
                    }
                });
                (destination, handle)
            })
            .collect();

        let mut report = DispatchReport {
            kind,
            delivered: Vec::new(),
            failed: Vec::new(),
        };

        // All branches are already running; awaiting them in order only
        // collects results.
        for (destination, handle) in branches {
            let outcome = handle
                .await
                .unwrap_or_else(|e| Err(format!("send task aborted: {e}")));
            match outcome {
                Ok(()) => {
                    debug!(destination = %destination, "delivered");
                    report.delivered.push(destination);
                }
                Err(reason) => {
                    warn!(destination = %destination, error = %reason, "delivery failed");
                    report.failed.push((destination, reason));
                }
            }
        }

        self.stats
            .delivered
            .fetch_add(report.delivered.len() as u64, Ordering::Relaxed);
        self.stats
            .failed
            .fetch_add(report.failed.len() as u64, Ordering::Relaxed);

        report
    }
}

#[async_trait]
impl HeartbeatSource for Dispatcher {
    async fn heartbeat(&self) -> Result<HeartbeatReport> {
        Ok(HeartbeatReport::new(self.id.clone())
            .with("dispatched", self.stats.dispatched.load(Ordering::Relaxed))
            .with("delivered", self.stats.delivered.load(Ordering::Relaxed))
            .with("failed", self.stats.failed.load(Ordering::Relaxed))
            .with("dropped", self.stats.dropped.load(Ordering::Relaxed)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eppn_shared::{EppnError, Metadata, ParsedText, ParticipantsConfig};
    use tokio::sync::Mutex;

    /// Records deliveries; fails or stalls for configured destinations.
    #[derive(Default)]
    struct FlakyTransport {
        fail: Vec<ParticipantId>,
        stall: Vec<ParticipantId>,
        received: Mutex<Vec<(ParticipantId, Message)>>,
    }

    #[async_trait]
    impl Transport for FlakyTransport {
        async fn send(&self, destination: &ParticipantId, message: Message) -> Result<()> {
            if self.fail.contains(destination) {
                return Err(EppnError::delivery(destination.as_str(), "connection refused"));
            }
            if self.stall.contains(destination) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            self.received
                .lock()
                .await
                .push((destination.clone(), message));
            Ok(())
        }
    }

    fn parsed(doc_id: &str) -> Message {
        ParsedText {
            doc_id: doc_id.into(),
            sections: vec![],
            entities: vec![],
            metadata: Metadata::new(),
        }
        .into()
    }

    #[tokio::test]
    async fn failed_branch_does_not_block_sibling() {
        let transport = Arc::new(FlakyTransport {
            fail: vec![ParticipantId::new("summarization-worker")],
            ..FlakyTransport::default()
        });
        let dispatcher = Dispatcher::new(
            RouteTable::standard(),
            transport.clone(),
            Duration::from_secs(1),
        );

        let report = dispatcher.dispatch(parsed("d1")).await;

        assert_eq!(report.delivered, vec![ParticipantId::new("ethics-worker")]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, ParticipantId::new("summarization-worker"));
        assert!(report.failed[0].1.contains("connection refused"));

        let received = transport.received.lock().await;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].1.doc_id(), Some("d1"));
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_branch_does_not_cancel_sibling() {
        let transport = Arc::new(FlakyTransport {
            stall: vec![ParticipantId::new("ethics-worker")],
            ..FlakyTransport::default()
        });
        let dispatcher = Dispatcher::new(
            RouteTable::standard(),
            transport.clone(),
            Duration::from_millis(500),
        );

        let report = dispatcher.dispatch(parsed("d2")).await;

        assert_eq!(
            report.delivered,
            vec![ParticipantId::new("summarization-worker")]
        );
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].1.contains("timed out"));
    }

    #[tokio::test]
    async fn routing_miss_is_dropped_and_counted() {
        let participants = ParticipantsConfig {
            summarization: String::new(),
            ethics: String::new(),
            ..ParticipantsConfig::default()
        };
        let transport = Arc::new(FlakyTransport::default());
        let dispatcher = Dispatcher::new(
            RouteTable::from_participants(&participants),
            transport.clone(),
            Duration::from_secs(1),
        );

        let report = dispatcher.dispatch(parsed("d3")).await;
        assert!(report.is_miss());
        assert!(transport.received.lock().await.is_empty());

        let beat = dispatcher.heartbeat().await.expect("heartbeat");
        assert_eq!(beat.get("dispatched"), Some(1));
        assert_eq!(beat.get("dropped"), Some(1));
    }

    #[tokio::test]
    async fn heartbeat_tracks_outcomes() {
        let transport = Arc::new(FlakyTransport {
            fail: vec![ParticipantId::new("registry")],
            ..FlakyTransport::default()
        });
        let dispatcher = Dispatcher::new(RouteTable::standard(), transport, Duration::from_secs(1));

        dispatcher.dispatch(parsed("d1")).await;
        dispatcher
            .dispatch(
                eppn_shared::SummaryReady {
                    doc_id: "d1".into(),
                    summary: "s".into(),
                    key_points: vec![],
                    metadata: Metadata::new(),
                }
                .into(),
            )
            .await;

        let beat = dispatcher.heartbeat().await.expect("heartbeat");
        assert_eq!(beat.get("dispatched"), Some(2));
        assert_eq!(beat.get("delivered"), Some(3));
        assert_eq!(beat.get("failed"), Some(1));
    }
}
