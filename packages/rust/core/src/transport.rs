//! Outbound delivery: the `send(destination, message)` seam.
//!
//! The real delivery substrate is external. Two local implementations are
//! provided for running the core in one process:
//!
//! - [`ChannelTransport`]: bounded in-process inboxes for local participants
//! - [`SpoolTransport`]: JSON-lines outbox files for external workers

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

use eppn_shared::{EppnError, Message, ParticipantId, Result};

/// Capability to hand a message to the delivery substrate.
///
/// Returning `Ok` means the substrate accepted the message, not that the
/// destination processed it.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, destination: &ParticipantId, message: Message) -> Result<()>;
}

// ---------------------------------------------------------------------------
// ChannelTransport
// ---------------------------------------------------------------------------

/// In-process transport over bounded `mpsc` inboxes.
///
/// Destinations without an inbox go to the fallback transport, if any.
pub struct ChannelTransport {
    inboxes: RwLock<HashMap<ParticipantId, mpsc::Sender<Message>>>,
    fallback: Option<Arc<dyn Transport>>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self {
            inboxes: RwLock::new(HashMap::new()),
            fallback: None,
        }
    }

    pub fn with_fallback(fallback: Arc<dyn Transport>) -> Self {
        Self {
            inboxes: RwLock::new(HashMap::new()),
            fallback: Some(fallback),
        }
    }

    /// Create the inbox for `id` and return its receiving end. Opening an
    /// inbox twice replaces the first one.
    pub fn open_inbox(&self, id: ParticipantId, capacity: usize) -> mpsc::Receiver<Message> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let mut inboxes = self.inboxes.write().unwrap_or_else(|e| e.into_inner());
        inboxes.insert(id, tx);
        rx
    }

    /// Drop every sender so inbox loops end once their queues drain.
    pub fn close_inboxes(&self) {
        self.inboxes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    fn sender_for(&self, id: &ParticipantId) -> Option<mpsc::Sender<Message>> {
        self.inboxes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }
}

impl Default for ChannelTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, destination: &ParticipantId, message: Message) -> Result<()> {
        // Take a sender clone so no lock is held across the await.
        match self.sender_for(destination) {
            Some(tx) => tx
                .send(message)
                .await
                .map_err(|_| EppnError::delivery(destination.as_str(), "inbox closed")),
            None => match &self.fallback {
                Some(fallback) => fallback.send(destination, message).await,
                None => Err(EppnError::delivery(destination.as_str(), "unknown destination")),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// SpoolTransport
// ---------------------------------------------------------------------------

/// Appends each message to `<dir>/<destination>.jsonl` for pickup by an
/// external worker.
pub struct SpoolTransport {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl SpoolTransport {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Spool file for `destination`. Characters outside `[A-Za-z0-9._-]`
    /// become `_`.
    pub fn spool_path(&self, destination: &ParticipantId) -> PathBuf {
        let name: String = destination
            .as_str()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{name}.jsonl"))
    }
}

#[async_trait]
impl Transport for SpoolTransport {
    async fn send(&self, destination: &ParticipantId, message: Message) -> Result<()> {
        let mut line = serde_json::to_string(&message)
            .map_err(|e| EppnError::delivery(destination.as_str(), e.to_string()))?;
        line.push('\n');

        let path = self.spool_path(destination);
        let _guard = self.write_lock.lock().await;

        std::fs::create_dir_all(&self.dir).map_err(|e| EppnError::io(&self.dir, e))?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| EppnError::io(&path, e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| EppnError::io(&path, e))?;

        debug!(destination = %destination, path = %path.display(), "spooled message");
        Ok(())
    }
}
