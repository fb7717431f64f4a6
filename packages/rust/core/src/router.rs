//! Static routing table: message kind → destination participants.
//!
//! Routing looks only at the kind of a message, never its contents. Each
//! kind maps to a fixed list of roles; roles resolve to addresses from the
//! `[participants]` config section.

use std::collections::HashMap;

use tracing::{info, warn};

use eppn_shared::{EppnError, Message, MessageKind, ParticipantId, ParticipantsConfig, Result, Role};

/// Roles that receive each message kind.
pub fn roles_for(kind: MessageKind) -> &'static [Role] {
    match kind {
        MessageKind::CrawlRequest => &[Role::Ingestion],
        MessageKind::PdfReady => &[Role::Extraction],
        MessageKind::ParsedText => &[Role::Summarization, Role::Ethics],
        MessageKind::SummaryReady | MessageKind::EthicsReport => &[Role::Sink, Role::Registry],
    }
}

/// One copy of a message addressed to one destination.
#[derive(Debug, Clone, PartialEq)]
pub struct Forward {
    pub destination: ParticipantId,
    pub message: Message,
}

/// Resolved routing table.
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: HashMap<MessageKind, Vec<ParticipantId>>,
}

impl RouteTable {
    /// Resolve every kind's roles to the configured addresses. Unassigned
    /// roles are left out; duplicate addresses collapse to one.
    pub fn from_participants(participants: &ParticipantsConfig) -> Self {
        let routes = MessageKind::ALL
            .into_iter()
            .map(|kind| {
                let mut destinations: Vec<ParticipantId> = Vec::new();
                for role in roles_for(kind) {
                    if let Some(addr) = participants.address(*role) {
                        if !destinations.contains(&addr) {
                            destinations.push(addr);
                        }
                    }
                }
                (kind, destinations)
            })
            .collect();
        Self { routes }
    }

    /// The table with default participant addresses.
    pub fn standard() -> Self {
        Self::from_participants(&ParticipantsConfig::default())
    }

    pub fn destinations(&self, kind: MessageKind) -> &[ParticipantId] {
        self.routes.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Kinds that currently route nowhere.
    pub fn missing_kinds(&self) -> Vec<MessageKind> {
        MessageKind::ALL
            .into_iter()
            .filter(|k| self.destinations(*k).is_empty())
            .collect()
    }

    /// Fail with [`EppnError::RoutingMiss`] if any kind routes nowhere.
    pub fn ensure_complete(&self) -> Result<()> {
        match self.missing_kinds().first() {
            Some(kind) => Err(EppnError::RoutingMiss {
                kind: kind.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Rows in pipeline order.
    pub fn rows(&self) -> impl Iterator<Item = (MessageKind, &[ParticipantId])> {
        MessageKind::ALL
            .into_iter()
            .map(move |kind| (kind, self.destinations(kind)))
    }

    /// Compute the forwarding actions for `message`.
    ///
    /// A kind with no destinations yields no actions; the miss is logged
    /// and the message dropped.
    pub fn route(&self, message: &Message) -> Vec<Forward> {
        let kind = message.kind();
        let destinations = self.destinations(kind);

        if destinations.is_empty() {
            warn!(
                kind = %kind,
                doc_id = ?message.doc_id(),
                "routing miss: no destinations configured, dropping message"
            );
            return Vec::new();
        }

        let names: Vec<&str> = destinations.iter().map(ParticipantId::as_str).collect();
        info!(
            kind = %kind,
            doc_id = ?message.doc_id(),
            destinations = ?names,
            "routing message"
        );

        destinations
            .iter()
            .map(|destination| Forward {
                destination: destination.clone(),
                message: message.clone(),
            })
            .collect()
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::standard()
    }
}
