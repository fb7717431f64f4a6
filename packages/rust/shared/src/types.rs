//! Core identifier and classification types shared across the pipeline.

use serde::{Deserialize, Serialize};

/// Open, additive key/value bag carried by every message.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// A structured record (sections, entities, reports).
pub type Record = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// ParticipantId
// ---------------------------------------------------------------------------

/// Opaque address of a participant on the delivery substrate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// MessageKind
// ---------------------------------------------------------------------------

/// The fixed set of message types exchanged on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    CrawlRequest,
    PdfReady,
    ParsedText,
    SummaryReady,
    EthicsReport,
}

impl MessageKind {
    /// Every kind, in pipeline order.
    pub const ALL: [MessageKind; 5] = [
        Self::CrawlRequest,
        Self::PdfReady,
        Self::ParsedText,
        Self::SummaryReady,
        Self::EthicsReport,
    ];

    /// Wire tag used in the `type` field of raw messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CrawlRequest => "crawl_request",
            Self::PdfReady => "pdf_ready",
            Self::ParsedText => "parsed_text",
            Self::SummaryReady => "summary_ready",
            Self::EthicsReport => "ethics_report",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown message type '{s}'"))
    }
}

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

/// Pipeline role a destination plays. Roles are resolved to concrete
/// participant addresses through configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Ingestion,
    Extraction,
    Summarization,
    Ethics,
    Sink,
    Registry,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ingestion => "ingestion",
            Self::Extraction => "extraction",
            Self::Summarization => "summarization",
            Self::Ethics => "ethics",
            Self::Sink => "sink",
            Self::Registry => "registry",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
