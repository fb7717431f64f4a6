//! Shared types, error model, message catalog and configuration for EPPN.
//!
//! This crate is the foundation depended on by all other EPPN crates.
//! It provides:
//! - [`EppnError`]: the unified error type
//! - The message catalog ([`Message`] and its variants, [`validate`])
//! - Identifier types ([`ParticipantId`], [`MessageKind`], [`Role`])
//! - Configuration ([`AppConfig`], config loading)

pub mod catalog;
pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use catalog::{
    CrawlRequest, EthicsReport, Message, ParsedText, PdfReady, SummaryReady, shape_of, validate,
    validate_as,
};
pub use config::{
    AppConfig, HeartbeatConfig, InboxConfig, ParticipantsConfig, RoutingConfig, StorageConfig,
    config_dir, config_file_path, init_config, load_config, load_config_from, validate_config,
};
pub use error::{EppnError, Result};
pub use types::{MessageKind, Metadata, ParticipantId, Record, Role};
