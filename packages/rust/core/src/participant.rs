//! Participant contract and the per-participant inbox loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use eppn_shared::{Message, MessageKind, ParticipantId, Result};

use crate::heartbeat::HeartbeatSource;

/// A worker that consumes typed messages from its own inbox.
#[async_trait]
pub trait Participant: HeartbeatSource {
    /// Address on the delivery substrate.
    fn id(&self) -> &ParticipantId;

    /// Message kinds this participant has a handler for.
    fn accepts(&self, kind: MessageKind) -> bool;

    /// Handle one message. Only called for accepted kinds.
    async fn handle(&self, message: Message) -> Result<()>;
}

/// Outcome counters for one inbox loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InboxStats {
    pub handled: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub rejected: u64,
}

/// Process `inbox` one message at a time until every sender is gone.
///
/// Each message is handled under `handle_timeout`. Failures are logged and
/// counted; they never stop the loop.
pub async fn run_inbox(
    participant: Arc<dyn Participant>,
    mut inbox: mpsc::Receiver<Message>,
    handle_timeout: Duration,
) -> InboxStats {
    let id = participant.id().clone();
    let mut stats = InboxStats::default();
    info!(participant = %id, "inbox open");

    while let Some(message) = inbox.recv().await {
        let kind = message.kind();
        let doc_id = message.doc_id().map(str::to_owned);

        if !participant.accepts(kind) {
            warn!(participant = %id, kind = %kind, "message kind not accepted, discarding");
            stats.rejected += 1;
            continue;
        }

        match tokio::time::timeout(handle_timeout, participant.handle(message)).await {
            Ok(Ok(())) => {
                debug!(participant = %id, kind = %kind, ?doc_id, "message handled");
                stats.handled += 1;
            }
            Ok(Err(e)) => {
                error!(participant = %id, kind = %kind, ?doc_id, error = %e, "handler failed");
                stats.failed += 1;
            }
            Err(_) => {
                warn!(
                    participant = %id,
                    kind = %kind,
                    ?doc_id,
                    timeout_ms = handle_timeout.as_millis() as u64,
                    "handler timed out"
                );
                stats.timed_out += 1;
            }
        }
    }

    info!(
        participant = %id,
        handled = stats.handled,
        failed = stats.failed,
        timed_out = stats.timed_out,
        rejected = stats.rejected,
        "inbox closed"
    );
    stats
}
