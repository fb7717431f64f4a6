//! One-process wiring of the coordination core.
//!
//! A [`LocalNode`] owns the dispatcher, the registry/ledger coordinator and
//! the sink. Messages addressed to the coordinator or the sink land in
//! bounded in-process inboxes; everything else is spooled to the outbox
//! directory for external workers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use eppn_shared::{AppConfig, EppnError, Message, ParticipantId, Result, Role};
use eppn_storage::{Ledger, Registry};

use crate::coordinator::Coordinator;
use crate::dispatch::{DispatchReport, Dispatcher};
use crate::heartbeat::{HeartbeatSource, spawn_heartbeat};
use crate::participant::{InboxStats, Participant, run_inbox};
use crate::router::RouteTable;
use crate::sink::Sink;
use crate::transport::{ChannelTransport, SpoolTransport, Transport};

/// A running coordination node.
pub struct LocalNode {
    dispatcher: Arc<Dispatcher>,
    coordinator: Arc<Coordinator>,
    sink: Arc<Sink>,
    channels: Arc<ChannelTransport>,
    send_timeout: Duration,
    shutdown: watch::Sender<bool>,
    inboxes: Vec<(ParticipantId, JoinHandle<InboxStats>)>,
    heartbeats: Vec<JoinHandle<()>>,
}

impl LocalNode {
    /// Open the stores, build the route table and start the inbox and
    /// heartbeat tasks. Must be called from within a Tokio runtime.
    pub fn start(config: &AppConfig) -> Result<Self> {
        let table = RouteTable::from_participants(&config.participants);
        if config.routing.strict {
            table.ensure_complete()?;
        } else {
            for kind in table.missing_kinds() {
                warn!(kind = %kind, "no destination configured, messages of this kind will be dropped");
            }
        }

        let registry_dir = config.storage.registry_dir();
        let registry = Arc::new(Registry::open(&registry_dir)?);
        let ledger = Arc::new(Ledger::open(&registry_dir)?);

        let coordinator_id = config
            .participants
            .address(Role::Registry)
            .unwrap_or_else(|| ParticipantId::new("registry"));
        let sink_id = config
            .participants
            .address(Role::Sink)
            .unwrap_or_else(|| ParticipantId::new("sink-worker"));
        if coordinator_id == sink_id {
            return Err(EppnError::config(format!(
                "registry and sink cannot share the address `{coordinator_id}`"
            )));
        }

        let coordinator = Arc::new(Coordinator::new(coordinator_id, registry, ledger));
        let sink = Arc::new(Sink::new(sink_id, config.storage.sink_dir()));

        let spool: Arc<dyn Transport> = Arc::new(SpoolTransport::new(config.storage.outbox_dir()));
        let channels = Arc::new(ChannelTransport::with_fallback(spool));
        let transport: Arc<dyn Transport> = channels.clone();
        let dispatcher = Arc::new(Dispatcher::new(
            table,
            transport,
            config.routing.send_timeout(),
        ));

        let capacity = config.inbox.capacity;
        let handle_timeout = config.inbox.handle_timeout();
        let mut inboxes = Vec::new();

        // Only roles with a configured address are hosted here; an
        // unassigned role never receives routed traffic anyway.
        if config.participants.address(Role::Registry).is_some() {
            let participant: Arc<dyn Participant> = coordinator.clone();
            inboxes.push(host(&channels, participant, capacity, handle_timeout));
        }
        if config.participants.address(Role::Sink).is_some() {
            let participant: Arc<dyn Participant> = sink.clone();
            inboxes.push(host(&channels, participant, capacity, handle_timeout));
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let hb = &config.heartbeat;
        let router_source: Arc<dyn HeartbeatSource> = dispatcher.clone();
        let registry_source: Arc<dyn HeartbeatSource> = coordinator.clone();
        let sink_source: Arc<dyn HeartbeatSource> = sink.clone();
        let heartbeats = vec![
            spawn_heartbeat(
                router_source,
                Duration::from_secs(hb.router_secs),
                shutdown_rx.clone(),
            ),
            spawn_heartbeat(
                registry_source,
                Duration::from_secs(hb.registry_secs),
                shutdown_rx.clone(),
            ),
            spawn_heartbeat(sink_source, Duration::from_secs(hb.sink_secs), shutdown_rx),
        ];

        info!(
            data_dir = %config.storage.data_dir,
            local_participants = inboxes.len(),
            strict = config.routing.strict,
            "coordination node started"
        );

        Ok(Self {
            dispatcher,
            coordinator,
            sink,
            channels,
            send_timeout: config.routing.send_timeout(),
            shutdown,
            inboxes,
            heartbeats,
        })
    }

    /// Route one validated message and fan it out.
    pub async fn dispatch(&self, message: Message) -> DispatchReport {
        self.dispatcher.dispatch(message).await
    }

    /// Deliver `message` to exactly `destination`, bypassing the route
    /// table. Local participants get it in their inbox; any other address
    /// is spooled.
    pub async fn send(&self, destination: &ParticipantId, message: Message) -> Result<()> {
        info!(
            destination = %destination,
            kind = %message.kind(),
            doc_id = ?message.doc_id(),
            "direct send"
        );
        match tokio::time::timeout(self.send_timeout, self.channels.send(destination, message)).await
        {
            Ok(result) => result,
            Err(_) => Err(EppnError::delivery(
                destination.as_str(),
                format!("send timed out after {}ms", self.send_timeout.as_millis()),
            )),
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn registry(&self) -> &Arc<Registry> {
        self.coordinator.registry()
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        self.coordinator.ledger()
    }

    pub fn sink(&self) -> &Arc<Sink> {
        &self.sink
    }

    /// Stop heartbeats, let every inbox drain and wait for the loops to end.
    pub async fn shutdown(self) -> Vec<(ParticipantId, InboxStats)> {
        let _ = self.shutdown.send(true);
        self.channels.close_inboxes();

        let mut stats = Vec::with_capacity(self.inboxes.len());
        for (id, handle) in self.inboxes {
            match handle.await {
                Ok(s) => stats.push((id, s)),
                Err(e) => warn!(participant = %id, error = %e, "inbox task aborted"),
            }
        }
        for handle in self.heartbeats {
            let _ = handle.await;
        }

        info!("coordination node stopped");
        stats
    }
}

fn host(
    channels: &ChannelTransport,
    participant: Arc<dyn Participant>,
    capacity: usize,
    handle_timeout: Duration,
) -> (ParticipantId, JoinHandle<InboxStats>) {
    let id = participant.id().clone();
    let inbox = channels.open_inbox(id.clone(), capacity);
    let handle = tokio::spawn(run_inbox(participant, inbox, handle_timeout));
    (id, handle)
}
