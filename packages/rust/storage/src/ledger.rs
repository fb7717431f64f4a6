//! Coordination ledger: append-only audit trail of pipeline events.
//!
//! Transactions are ordered by durable append under the ledger's own lock.
//! Nothing in this module mutates or removes a transaction once written.
//! The ledger records; it does not judge content, so duplicate submissions
//! are logged and appended like any other.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use eppn_shared::Result;

use crate::json_store::JsonStore;

/// File name of the ledger document inside the registry directory.
pub const LEDGER_FILE_NAME: &str = "ledger.json";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Category of a recorded pipeline event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    SummaryReady,
    EthicsReport,
    Registration,
    StatusChange,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SummaryReady => "summary_ready",
            Self::EthicsReport => "ethics_report",
            Self::Registration => "registration",
            Self::StatusChange => "status_change",
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable ledger record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    /// Position in append order, starting at 1.
    pub sequence: u64,
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub source_participant: String,
    /// SHA-256 (hex) of the canonical JSON payload.
    pub integrity_fingerprint: String,
    pub payload_summary: Value,
}

/// What a caller submits; the ledger fills in ordering and fingerprint.
#[derive(Debug, Clone)]
pub struct TransactionDescriptor {
    pub kind: TransactionKind,
    pub doc_id: Option<String>,
    pub source_participant: String,
    /// Full payload, fingerprinted but not stored.
    pub payload: Value,
    pub payload_summary: Value,
}

impl TransactionDescriptor {
    pub fn new(kind: TransactionKind, source_participant: impl Into<String>, payload: Value) -> Self {
        Self {
            kind,
            doc_id: None,
            source_participant: source_participant.into(),
            payload,
            payload_summary: Value::Object(serde_json::Map::new()),
        }
    }

    pub fn with_doc_id(mut self, doc_id: impl Into<String>) -> Self {
        self.doc_id = Some(doc_id.into());
        self
    }

    pub fn with_summary(mut self, summary: Value) -> Self {
        self.payload_summary = summary;
        self
    }
}

/// The persisted ledger document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerDocument {
    pub transactions: Vec<LedgerTransaction>,
    pub last_sync: DateTime<Utc>,
}

impl LedgerDocument {
    fn empty() -> Self {
        Self {
            transactions: Vec::new(),
            last_sync: Utc::now(),
        }
    }
}

/// Result of [`Ledger::verify`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerAudit {
    pub transactions: usize,
    /// Sequences that do not follow their predecessor by exactly one.
    pub sequence_gaps: Vec<u64>,
    /// Sequences whose timestamp is earlier than their predecessor's.
    pub out_of_order: Vec<u64>,
    /// Fingerprints shared by more than one transaction, with their sequences.
    pub duplicate_fingerprints: Vec<(String, Vec<u64>)>,
}

impl LedgerAudit {
    /// Structural soundness. Duplicates are reported but do not make a
    /// ledger unsound.
    pub fn is_sound(&self) -> bool {
        self.sequence_gaps.is_empty() && self.out_of_order.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Fingerprinting
// ---------------------------------------------------------------------------

/// SHA-256 hex digest of `payload` in canonical form (object keys sorted,
/// no insignificant whitespace).
pub fn fingerprint(payload: &Value) -> String {
    let canonical = canonicalize(payload);
    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    format!("{:x}", hasher.finalize())
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, canonicalize(v))).collect();
            Value::Object(sorted.into_iter().map(|(k, v)| (k.clone(), v)).collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Owned ledger service. Share it behind an `Arc`.
#[derive(Debug)]
pub struct Ledger {
    store: JsonStore,
    state: Mutex<LedgerDocument>,
}

impl Ledger {
    /// Open the ledger in `dir`, creating an empty one if absent.
    pub fn open(dir: &Path) -> Result<Self> {
        Self::open_file(&dir.join(LEDGER_FILE_NAME))
    }

    /// Open the ledger stored at exactly `path`.
    ///
    /// Holds the store's exclusive lock until dropped; a second open of the
    /// same file fails with `Persistence`.
    pub fn open_file(path: &Path) -> Result<Self> {
        Self::load(JsonStore::open_exclusive(path)?)
    }

    /// Open the ledger in `dir` for audit. Takes no lock; `append` fails.
    pub fn open_read_only(dir: &Path) -> Result<Self> {
        Self::load(JsonStore::read_only(dir.join(LEDGER_FILE_NAME)))
    }

    fn load(store: JsonStore) -> Result<Self> {
        let path = store.path().to_path_buf();
        let doc: LedgerDocument = store.load_or_create(LedgerDocument::empty)?;

        info!(
            path = %path.display(),
            transactions = doc.transactions.len(),
            "ledger opened"
        );

        Ok(Self {
            store,
            state: Mutex::new(doc),
        })
    }

    /// Record one transaction and return it as written.
    #[instrument(skip_all, fields(kind = %descriptor.kind, doc_id = ?descriptor.doc_id))]
    pub async fn append(&self, descriptor: TransactionDescriptor) -> Result<LedgerTransaction> {
        let integrity_fingerprint = fingerprint(&descriptor.payload);

        let mut guard = self.state.lock().await;
        let last = guard.transactions.last();
        let now = Utc::now();
        // The writer's clock may step backwards; never record an earlier time.
        let timestamp = last.map_or(now, |t| t.timestamp.max(now));
        let sequence = last.map_or(1, |t| t.sequence + 1);

        if let Some(existing) = guard
            .transactions
            .iter()
            .find(|t| t.integrity_fingerprint == integrity_fingerprint)
        {
            warn!(
                existing_sequence = existing.sequence,
                fingerprint = %integrity_fingerprint,
                "payload already recorded, appending duplicate"
            );
        }

        let transaction = LedgerTransaction {
            sequence,
            id: Uuid::now_v7(),
            kind: descriptor.kind,
            doc_id: descriptor.doc_id,
            timestamp,
            source_participant: descriptor.source_participant,
            integrity_fingerprint,
            payload_summary: descriptor.payload_summary,
        };

        let mut next = guard.clone();
        next.transactions.push(transaction.clone());
        next.last_sync = timestamp;
        self.store.save(&next)?;
        *guard = next;

        info!(sequence, "ledger transaction appended");
        Ok(transaction)
    }

    /// Every transaction in append order. Audit and tooling use only.
    pub async fn read_all(&self) -> Vec<LedgerTransaction> {
        self.state.lock().await.transactions.clone()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.transactions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn last_sync(&self) -> DateTime<Utc> {
        self.state.lock().await.last_sync
    }

    /// Transactions tagged with `doc_id`, in append order.
    pub async fn for_doc(&self, doc_id: &str) -> Vec<LedgerTransaction> {
        self.state
            .lock()
            .await
            .transactions
            .iter()
            .filter(|t| t.doc_id.as_deref() == Some(doc_id))
            .cloned()
            .collect()
    }

    /// Transactions whose payload fingerprint equals `fp`.
    pub async fn find_fingerprint(&self, fp: &str) -> Vec<LedgerTransaction> {
        self.state
            .lock()
            .await
            .transactions
            .iter()
            .filter(|t| t.integrity_fingerprint == fp)
            .cloned()
            .collect()
    }

    /// Check ordering invariants and report duplicate payloads.
    pub async fn verify(&self) -> LedgerAudit {
        let guard = self.state.lock().await;
        audit(&guard.transactions)
    }

    /// Path of the backing document.
    pub fn path(&self) -> &Path {
        self.store.path()
    }
}

fn audit(transactions: &[LedgerTransaction]) -> LedgerAudit {
    let mut report = LedgerAudit {
        transactions: transactions.len(),
        ..LedgerAudit::default()
    };

    let mut expected = 1;
    let mut previous: Option<&LedgerTransaction> = None;
    let mut by_fingerprint: BTreeMap<&str, Vec<u64>> = BTreeMap::new();

    for t in transactions {
        if t.sequence != expected {
            report.sequence_gaps.push(t.sequence);
        }
        expected = t.sequence + 1;

        if previous.is_some_and(|p| t.timestamp < p.timestamp) {
            report.out_of_order.push(t.sequence);
        }
        previous = Some(t);

        by_fingerprint
            .entry(t.integrity_fingerprint.as_str())
            .or_default()
            .push(t.sequence);
    }

    report.duplicate_fingerprints = by_fingerprint
        .into_iter()
        .filter(|(_, seqs)| seqs.len() > 1)
        .map(|(fp, seqs)| (fp.to_string(), seqs))
        .collect();

    report
}
