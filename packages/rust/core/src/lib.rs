//! Coordination core for the EPPN document pipeline.
//!
//! Routes typed messages between the pipeline stages and keeps the
//! participant registry and coordination ledger up to date:
//!
//! - [`router`]: the fixed kind-to-role table
//! - [`dispatch`]: independent per-destination fan-out
//! - [`coordinator`] and [`sink`]: the two in-process participants
//! - [`node`]: one-process wiring of all of the above

pub mod coordinator;
pub mod dispatch;
pub mod heartbeat;
pub mod node;
pub mod participant;
pub mod router;
pub mod sink;
pub mod transport;

pub use coordinator::{Coordinator, ETHICS_SOURCE, SUMMARIZER_SOURCE};
pub use dispatch::{DispatchReport, Dispatcher};
pub use heartbeat::{HeartbeatReport, HeartbeatSource, spawn_heartbeat};
pub use node::LocalNode;
pub use participant::{InboxStats, Participant, run_inbox};
pub use router::{Forward, RouteTable, roles_for};
pub use sink::Sink;
pub use transport::{ChannelTransport, SpoolTransport, Transport};
