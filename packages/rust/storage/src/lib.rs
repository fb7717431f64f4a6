//! Durable coordination state: the participant registry and the
//! coordination ledger.
//!
//! Both are single JSON documents ([`REGISTRY_FILE_NAME`], [`LEDGER_FILE_NAME`])
//! owned by one service object each. Callers never touch the files:
//!
//! - [`Registry`]: append/update-only participant directory
//! - [`Ledger`]: append-only event trail with content fingerprints
//!
//! Each service serializes its own writers; the two resources are
//! independent and no ordering holds between them.

mod json_store;
pub mod ledger;
pub mod registry;

pub use ledger::{
    LEDGER_FILE_NAME, Ledger, LedgerAudit, LedgerDocument, LedgerTransaction,
    TransactionDescriptor, TransactionKind, fingerprint,
};
pub use registry::{
    ParticipantDescriptor, ParticipantStatus, REGISTRY_FILE_NAME, Registry, RegistryEntry,
    RegistrySnapshot,
};
