//! Participant registry: durable, append/update-only directory of known
//! participants.
//!
//! The registry owns its document behind a single async mutex. Each
//! mutation works on a copy of the snapshot, persists it atomically and only
//! then publishes it in memory, so a failed write leaves both disk and
//! memory untouched.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use eppn_shared::{EppnError, Metadata, Result};

use crate::json_store::JsonStore;

/// File name of the registry document inside the registry directory.
pub const REGISTRY_FILE_NAME: &str = "registry.json";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Lifecycle status of a registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    Active,
    Inactive,
}

impl ParticipantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }
}

impl std::fmt::Display for ParticipantStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ParticipantStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            other => Err(format!("unknown status '{other}': expected active or inactive")),
        }
    }
}

/// One sighting of a participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub participant_id: String,
    pub registered_at: DateTime<Utc>,
    pub status: ParticipantStatus,
    #[serde(default)]
    pub metadata: Metadata,
}

/// What a caller knows about a participant at registration time.
#[derive(Debug, Clone)]
pub struct ParticipantDescriptor {
    pub participant_id: String,
    pub metadata: Metadata,
}

impl ParticipantDescriptor {
    pub fn new(participant_id: impl Into<String>) -> Self {
        Self {
            participant_id: participant_id.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// The persisted registry document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub entries: Vec<RegistryEntry>,
    pub last_updated: DateTime<Utc>,
    pub total_count: usize,
}

impl RegistrySnapshot {
    fn empty() -> Self {
        Self {
            entries: Vec::new(),
            last_updated: Utc::now(),
            total_count: 0,
        }
    }

    /// `total_count` must always equal the number of entries.
    pub fn check(&self) -> std::result::Result<(), String> {
        if self.total_count != self.entries.len() {
            return Err(format!(
                "total_count {} does not match {} entries",
                self.total_count,
                self.entries.len()
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Owned registry service. Share it behind an `Arc`.
#[derive(Debug)]
pub struct Registry {
    store: JsonStore,
    state: Mutex<RegistrySnapshot>,
}

impl Registry {
    /// Open the registry in `dir`, creating an empty one if absent.
    pub fn open(dir: &Path) -> Result<Self> {
        Self::open_file(&dir.join(REGISTRY_FILE_NAME))
    }

    /// Open the registry stored at exactly `path`.
    ///
    /// Holds the store's exclusive lock until dropped; a second open of the
    /// same file fails with `Persistence`.
    pub fn open_file(path: &Path) -> Result<Self> {
        Self::load(JsonStore::open_exclusive(path)?)
    }

    /// Open the registry in `dir` for inspection. Takes no lock, so it can
    /// run next to a writer; every mutation fails with `Persistence`.
    pub fn open_read_only(dir: &Path) -> Result<Self> {
        Self::load(JsonStore::read_only(dir.join(REGISTRY_FILE_NAME)))
    }

    fn load(store: JsonStore) -> Result<Self> {
        let path = store.path().to_path_buf();
        let snapshot: RegistrySnapshot = store.load_or_create(RegistrySnapshot::empty)?;
        snapshot
            .check()
            .map_err(|msg| EppnError::persistence(&path, msg))?;

        info!(
            path = %path.display(),
            total_count = snapshot.total_count,
            "registry opened"
        );

        Ok(Self {
            store,
            state: Mutex::new(snapshot),
        })
    }

    /// Append one entry. Repeated identities are not deduplicated.
    pub async fn register(&self, descriptor: ParticipantDescriptor) -> Result<RegistryEntry> {
        let mut entries = self.register_all(vec![descriptor]).await?;
        entries
            .pop()
            .ok_or_else(|| EppnError::persistence(self.store.path(), "registration produced no entry"))
    }

    /// Append several entries as one durable write.
    #[instrument(skip_all, fields(count = descriptors.len()))]
    pub async fn register_all(
        &self,
        descriptors: Vec<ParticipantDescriptor>,
    ) -> Result<Vec<RegistryEntry>> {
        let mut guard = self.state.lock().await;
        let now = Utc::now();

        let added: Vec<RegistryEntry> = descriptors
            .into_iter()
            .map(|d| RegistryEntry {
                participant_id: d.participant_id,
                registered_at: now,
                status: ParticipantStatus::Active,
                metadata: d.metadata,
            })
            .collect();

        let mut next = guard.clone();
        next.entries.extend(added.iter().cloned());
        next.total_count = next.entries.len();
        next.last_updated = now;
        self.commit(&mut guard, next)?;

        for entry in &added {
            debug!(participant_id = %entry.participant_id, "registered participant");
        }
        info!(total_count = guard.total_count, "registry updated");

        Ok(added)
    }

    /// Transition every entry of `participant_id` to `status`.
    ///
    /// Returns the number of entries whose status changed. Nothing is
    /// written when no entry changes.
    #[instrument(skip(self))]
    pub async fn set_status(&self, participant_id: &str, status: ParticipantStatus) -> Result<usize> {
        let mut guard = self.state.lock().await;

        let mut next = guard.clone();
        let mut changed = 0;
        for entry in next
            .entries
            .iter_mut()
            .filter(|e| e.participant_id == participant_id && e.status != status)
        {
            entry.status = status;
            changed += 1;
        }

        if changed == 0 {
            debug!("no entries changed");
            return Ok(0);
        }

        next.last_updated = Utc::now();
        self.commit(&mut guard, next)?;
        info!(changed, "participant status updated");
        Ok(changed)
    }

    /// Current `total_count`, read from the snapshot header.
    pub async fn count(&self) -> usize {
        self.state.lock().await.total_count
    }

    /// A consistent copy of the whole registry.
    pub async fn snapshot(&self) -> RegistrySnapshot {
        self.state.lock().await.clone()
    }

    /// All entries recorded for one participant identity.
    pub async fn entries_for(&self, participant_id: &str) -> Vec<RegistryEntry> {
        self.state
            .lock()
            .await
            .entries
            .iter()
            .filter(|e| e.participant_id == participant_id)
            .cloned()
            .collect()
    }

    /// Path of the backing document.
    pub fn path(&self) -> &Path {
        self.store.path()
    }

    /// Check, persist, then publish `next`. Called with the lock held.
    fn commit(&self, current: &mut RegistrySnapshot, next: RegistrySnapshot) -> Result<()> {
        next.check()
            .map_err(|msg| EppnError::persistence(self.store.path(), msg))?;
        self.store.save(&next)?;
        *current = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("eppn-registry-test-{}", Uuid::now_v7()))
    }

    #[tokio::test]
    async fn open_creates_empty_registry() {
        let dir = temp_dir();
        let registry = Registry::open(&dir).expect("open");

        assert_eq!(registry.count().await, 0);
        assert!(dir.join(REGISTRY_FILE_NAME).exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn register_updates_count_and_timestamp() {
        let dir = temp_dir();
        let registry = Registry::open(&dir).expect("open");
        let before = registry.snapshot().await.last_updated;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let mut metadata = Metadata::new();
        metadata.insert("batch".into(), json!("b1"));
        let entry = registry
            .register(ParticipantDescriptor::new("http://a").with_metadata(metadata))
            .await
            .expect("register");

        assert_eq!(entry.participant_id, "http://a");
        assert_eq!(entry.status, ParticipantStatus::Active);
        assert_eq!(entry.metadata.get("batch"), Some(&json!("b1")));

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.total_count, 1);
        assert_eq!(snapshot.entries.len(), 1);
        assert_eq!(snapshot.last_updated, entry.registered_at);
        assert!(snapshot.last_updated > before);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn repeated_identity_appends() {
        let dir = temp_dir();
        let registry = Registry::open(&dir).expect("open");

        registry.register(ParticipantDescriptor::new("http://a")).await.expect("first");
        registry.register(ParticipantDescriptor::new("http://a")).await.expect("second");

        assert_eq!(registry.count().await, 2);
        assert_eq!(registry.entries_for("http://a").await.len(), 2);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_registers_lose_nothing() {
        let dir = temp_dir();
        let registry = Arc::new(Registry::open(&dir).expect("open"));
        let n = 40;

        let mut handles = Vec::new();
        for i in 0..n {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry
                    .register(ParticipantDescriptor::new(format!("http://p{i}")))
                    .await
            }));
        }
        for handle in handles {
            handle.await.expect("join").expect("register");
        }

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.total_count, n);
        assert_eq!(snapshot.entries.len(), n);

        // What is on disk agrees with what is in memory.
        drop(registry);
        let reopened = Registry::open(&dir).expect("reopen");
        assert_eq!(reopened.count().await, n);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn restart_yields_identical_snapshot() {
        let dir = temp_dir();
        let registry = Registry::open(&dir).expect("open");
        registry
            .register_all(vec![
                ParticipantDescriptor::new("http://a"),
                ParticipantDescriptor::new("http://b"),
            ])
            .await
            .expect("register");
        let before = registry.snapshot().await;
        drop(registry);

        let reopened = Registry::open(&dir).expect("reopen");
        assert_eq!(reopened.snapshot().await, before);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn status_transition_keeps_entries() {
        let dir = temp_dir();
        let registry = Registry::open(&dir).expect("open");
        registry
            .register_all(vec![
                ParticipantDescriptor::new("http://a"),
                ParticipantDescriptor::new("http://a"),
                ParticipantDescriptor::new("http://b"),
            ])
            .await
            .expect("register");

        let changed = registry
            .set_status("http://a", ParticipantStatus::Inactive)
            .await
            .expect("set status");
        assert_eq!(changed, 2);

        let again = registry
            .set_status("http://a", ParticipantStatus::Inactive)
            .await
            .expect("set status again");
        assert_eq!(again, 0);

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.total_count, 3);
        let inactive = snapshot
            .entries
            .iter()
            .filter(|e| e.status == ParticipantStatus::Inactive)
            .count();
        assert_eq!(inactive, 2);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn mismatched_count_fails_to_open() {
        let dir = temp_dir();
        std::fs::create_dir_all(&dir).expect("mkdir");
        let doc = json!({
            "entries": [],
            "last_updated": "2025-01-01T00:00:00Z",
            "total_count": 3,
        });
        std::fs::write(dir.join(REGISTRY_FILE_NAME), doc.to_string()).expect("write");

        let err = Registry::open(&dir).unwrap_err();
        assert!(err.to_string().contains("total_count 3"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn second_writer_cannot_open_same_registry() {
        let dir = temp_dir();
        let node = Registry::open(&dir).expect("open");
        node.register(ParticipantDescriptor::new("http://a"))
            .await
            .expect("register");

        let err = Registry::open(&dir).unwrap_err();
        assert!(matches!(err, EppnError::Persistence { .. }));

        node.register(ParticipantDescriptor::new("http://c"))
            .await
            .expect("register");
        drop(node);

        let reopened = Registry::open(&dir).expect("reopen");
        let ids: Vec<String> = reopened
            .snapshot()
            .await
            .entries
            .into_iter()
            .map(|e| e.participant_id)
            .collect();
        assert_eq!(ids, vec!["http://a", "http://c"]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn read_only_view_sees_writer_state_and_refuses_writes() {
        let dir = temp_dir();
        let writer = Registry::open(&dir).expect("open");
        writer
            .register(ParticipantDescriptor::new("http://a"))
            .await
            .expect("register");

        let view = Registry::open_read_only(&dir).expect("read only");
        assert_eq!(view.count().await, 1);
        let err = view
            .register(ParticipantDescriptor::new("http://b"))
            .await
            .unwrap_err();
        assert!(matches!(err, EppnError::Persistence { .. }));
        assert_eq!(view.count().await, 1);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn failed_write_changes_neither_memory_nor_disk() {
        let dir = temp_dir();
        let registry = Registry::open(&dir).expect("open");
        registry
            .register(ParticipantDescriptor::new("http://a"))
            .await
            .expect("register");
        let before = registry.snapshot().await;
        let on_disk = std::fs::read(dir.join(REGISTRY_FILE_NAME)).expect("read");

        std::fs::create_dir_all(dir.join(".registry.json.tmp")).expect("block temp path");
        let err = registry
            .register(ParticipantDescriptor::new("http://b"))
            .await
            .unwrap_err();
        assert!(matches!(err, EppnError::Persistence { .. }));
        let err = registry
            .set_status("http://a", ParticipantStatus::Inactive)
            .await
            .unwrap_err();
        assert!(matches!(err, EppnError::Persistence { .. }));

        assert_eq!(registry.snapshot().await, before);
        assert_eq!(
            std::fs::read(dir.join(REGISTRY_FILE_NAME)).expect("read"),
            on_disk
        );

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn status_parses() {
        assert_eq!("inactive".parse::<ParticipantStatus>(), Ok(ParticipantStatus::Inactive));
        assert!("gone".parse::<ParticipantStatus>().is_err());
    }
}
