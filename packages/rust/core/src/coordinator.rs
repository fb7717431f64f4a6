//! The `registry` participant: turns registration-bearing and stage-completion
//! messages into registry entries and ledger transactions.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{info, instrument};

use eppn_shared::{
    CrawlRequest, EppnError, EthicsReport, Message, MessageKind, ParticipantId, Result,
    SummaryReady,
};
use eppn_storage::{
    Ledger, LedgerTransaction, ParticipantDescriptor, ParticipantStatus, Registry, RegistryEntry,
    TransactionDescriptor, TransactionKind,
};

use crate::heartbeat::{HeartbeatReport, HeartbeatSource};
use crate::participant::Participant;

/// Source participant recorded for summary transactions.
pub const SUMMARIZER_SOURCE: &str = "summarizer";

/// Source participant recorded for ethics transactions.
pub const ETHICS_SOURCE: &str = "ethical_analyst";

/// Registry and ledger front-end, instantiated once with its stores.
pub struct Coordinator {
    id: ParticipantId,
    registry: Arc<Registry>,
    ledger: Arc<Ledger>,
}

impl Coordinator {
    pub fn new(id: ParticipantId, registry: Arc<Registry>, ledger: Arc<Ledger>) -> Self {
        Self {
            id,
            registry,
            ledger,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Register every URL of the request as an active participant and
    /// record one `registration` transaction.
    #[instrument(skip_all, fields(urls = request.urls.len()))]
    pub async fn handle_crawl_request(&self, request: &CrawlRequest) -> Result<Vec<RegistryEntry>> {
        if request.urls.is_empty() {
            info!("crawl request carries no urls, nothing to register");
            return Ok(Vec::new());
        }

        let descriptors = request
            .urls
            .iter()
            .map(|url| ParticipantDescriptor::new(url).with_metadata(request.metadata.clone()))
            .collect();
        let entries = self.registry.register_all(descriptors).await?;
        let total_count = self.registry.count().await;

        let payload = json!({
            "urls": request.urls,
            "metadata": request.metadata,
        });
        self.ledger
            .append(
                TransactionDescriptor::new(TransactionKind::Registration, self.id.as_str(), payload)
                    .with_summary(json!({
                        "registered": entries.len(),
                        "total_count": total_count,
                    })),
            )
            .await?;

        info!(registered = entries.len(), total_count, "registration recorded");
        Ok(entries)
    }

    /// Record one `summary_ready` transaction, fingerprinted over the summary text.
    #[instrument(skip_all, fields(doc_id = %msg.doc_id))]
    pub async fn handle_summary(&self, msg: &SummaryReady) -> Result<LedgerTransaction> {
        let descriptor = TransactionDescriptor::new(
            TransactionKind::SummaryReady,
            SUMMARIZER_SOURCE,
            Value::String(msg.summary.clone()),
        )
        .with_doc_id(&msg.doc_id)
        .with_summary(json!({
            "summary_chars": msg.summary.chars().count(),
            "key_points_count": msg.key_points.len(),
        }));

        let transaction = self.ledger.append(descriptor).await?;
        info!(sequence = transaction.sequence, "logged summary transaction");
        Ok(transaction)
    }

    /// Record one `ethics_report` transaction, fingerprinted over the report.
    #[instrument(skip_all, fields(doc_id = %msg.doc_id))]
    pub async fn handle_ethics(&self, msg: &EthicsReport) -> Result<LedgerTransaction> {
        let descriptor = TransactionDescriptor::new(
            TransactionKind::EthicsReport,
            ETHICS_SOURCE,
            Value::Object(msg.report.clone()),
        )
        .with_doc_id(&msg.doc_id)
        .with_summary(json!({
            "risks_count": msg.risks.len(),
            "recommendations_count": msg.recommendations.len(),
        }));

        let transaction = self.ledger.append(descriptor).await?;
        info!(sequence = transaction.sequence, "logged ethics transaction");
        Ok(transaction)
    }

    /// Transition a participant's entries and record a `status_change`
    /// transaction when anything changed.
    #[instrument(skip(self))]
    pub async fn set_status(&self, participant_id: &str, status: ParticipantStatus) -> Result<usize> {
        let changed = self.registry.set_status(participant_id, status).await?;
        if changed > 0 {
            self.ledger
                .append(
                    TransactionDescriptor::new(
                        TransactionKind::StatusChange,
                        self.id.as_str(),
                        json!({"participant_id": participant_id, "status": status}),
                    )
                    .with_summary(json!({"entries_changed": changed})),
                )
                .await?;
        }
        Ok(changed)
    }
}

#[async_trait]
impl HeartbeatSource for Coordinator {
    async fn heartbeat(&self) -> Result<HeartbeatReport> {
        Ok(HeartbeatReport::new(self.id.clone())
            .with("registered_participants", self.registry.count().await as u64)
            .with("ledger_transactions", self.ledger.len().await as u64))
    }
}

#[async_trait]
impl Participant for Coordinator {
    fn id(&self) -> &ParticipantId {
        &self.id
    }

    fn accepts(&self, kind: MessageKind) -> bool {
        matches!(
            kind,
            MessageKind::CrawlRequest | MessageKind::SummaryReady | MessageKind::EthicsReport
        )
    }

    async fn handle(&self, message: Message) -> Result<()> {
        match &message {
            Message::CrawlRequest(m) => self.handle_crawl_request(m).await.map(drop),
            Message::SummaryReady(m) => self.handle_summary(m).await.map(drop),
            Message::EthicsReport(m) => self.handle_ethics(m).await.map(drop),
            other => Err(EppnError::Unsupported {
                participant: self.id.to_string(),
                kind: other.kind().to_string(),
            }),
        }
    }
}
