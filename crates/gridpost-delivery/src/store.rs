//! Persistent state store for per-destination delivery state.
//!
//! Provides a trait-based abstraction so the queue and scheduler can be
//! tested without touching the filesystem. The production implementation
//! writes one JSON snapshot file per destination, atomically (temp file +
//! rename), so a crash never leaves a half-written snapshot behind.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use gridpost_core::models::{DestinationId, OutageState, QueueEntry};
use serde::{Deserialize, Serialize};

use crate::error::{DeliveryError, Result};

/// Durable per-destination state: queue contents plus outage bookkeeping.
///
/// Everything the delivery engine must survive a restart with. The entry
/// list keeps its enqueue sequence numbers, so ordering and the
/// no-duplicate-entry invariant hold across reloads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    /// Next sequence number to assign on enqueue.
    pub next_seq: u64,

    /// Total readings lost to queue overflow since setup.
    pub evicted_total: u64,

    /// Pending queue entries, in no particular order; the queue re-sorts
    /// by sequence number on load.
    pub entries: Vec<QueueEntry>,

    /// Failure bookkeeping for the destination.
    pub outage: OutageState,
}

/// Storage operations required by the delivery engine.
///
/// Load failures at destination startup are fatal for that destination;
/// save failures at runtime are logged and counted by the caller, never
/// raised into scheduler control flow.
pub trait StateStore: Send + Sync + std::fmt::Debug {
    /// Loads the persisted state for a destination, if any exists.
    fn load(&self, destination: &DestinationId) -> Result<Option<PersistedState>>;

    /// Saves the state for a destination, replacing any previous snapshot.
    fn save(&self, destination: &DestinationId, state: &PersistedState) -> Result<()>;

    /// Removes the persisted state for a destination (teardown).
    fn remove(&self, destination: &DestinationId) -> Result<()>;
}

/// File-backed store keeping one JSON snapshot per destination.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Creates a store rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            DeliveryError::configuration(format!(
                "cannot create state directory {}: {e}",
                dir.display()
            ))
        })?;
        Ok(Self { dir })
    }

    fn snapshot_path(&self, destination: &DestinationId) -> PathBuf {
        // Destination ids are operator-supplied; anything outside a safe
        // character set is replaced before it reaches the filesystem.
        let safe: String = destination
            .as_str()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }

    fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
        let tmp = path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(contents)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)
    }
}

impl StateStore for JsonFileStore {
    fn load(&self, destination: &DestinationId) -> Result<Option<PersistedState>> {
        let path = self.snapshot_path(destination);
        if !path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(&path)
            .map_err(|e| DeliveryError::store(destination.as_str(), e.to_string()))?;
        let state = serde_json::from_str(&contents).map_err(|e| {
            DeliveryError::store(
                destination.as_str(),
                format!("corrupt snapshot {}: {e}", path.display()),
            )
        })?;
        Ok(Some(state))
    }

    fn save(&self, destination: &DestinationId, state: &PersistedState) -> Result<()> {
        let path = self.snapshot_path(destination);
        let contents = serde_json::to_vec_pretty(state)
            .map_err(|e| DeliveryError::store(destination.as_str(), e.to_string()))?;
        Self::write_atomic(&path, &contents)
            .map_err(|e| DeliveryError::store(destination.as_str(), e.to_string()))
    }

    fn remove(&self, destination: &DestinationId) -> Result<()> {
        let path = self.snapshot_path(destination);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DeliveryError::store(destination.as_str(), e.to_string())),
        }
    }
}

pub mod mock {
    //! In-memory store for testing delivery logic without the filesystem.

    use std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicU64, Ordering},
            Mutex,
        },
    };

    use super::{DeliveryError, DestinationId, PersistedState, Result, StateStore};

    /// Mock store with injectable failures and operation counters.
    #[derive(Debug, Default)]
    pub struct MockStateStore {
        states: Mutex<HashMap<DestinationId, PersistedState>>,
        load_error: Mutex<Option<String>>,
        save_error: Mutex<Option<String>>,
        save_count: AtomicU64,
    }

    impl MockStateStore {
        /// Creates an empty mock store.
        pub fn new() -> Self {
            Self::default()
        }

        /// Seeds a destination with pre-existing state.
        pub fn seed(&self, destination: DestinationId, state: PersistedState) {
            self.states.lock().expect("store lock").insert(destination, state);
        }

        /// Makes every subsequent load fail with the given message.
        pub fn inject_load_error(&self, message: impl Into<String>) {
            *self.load_error.lock().expect("store lock") = Some(message.into());
        }

        /// Makes every subsequent save fail with the given message.
        pub fn inject_save_error(&self, message: impl Into<String>) {
            *self.save_error.lock().expect("store lock") = Some(message.into());
        }

        /// Returns how many saves have been performed.
        pub fn save_count(&self) -> u64 {
            self.save_count.load(Ordering::SeqCst)
        }

        /// Returns the currently stored state for a destination.
        pub fn stored(&self, destination: &DestinationId) -> Option<PersistedState> {
            self.states.lock().expect("store lock").get(destination).cloned()
        }
    }

    impl StateStore for MockStateStore {
        fn load(&self, destination: &DestinationId) -> Result<Option<PersistedState>> {
            if let Some(message) = self.load_error.lock().expect("store lock").clone() {
                return Err(DeliveryError::store(destination.as_str(), message));
            }
            Ok(self.states.lock().expect("store lock").get(destination).cloned())
        }

        fn save(&self, destination: &DestinationId, state: &PersistedState) -> Result<()> {
            if let Some(message) = self.save_error.lock().expect("store lock").clone() {
                return Err(DeliveryError::store(destination.as_str(), message));
            }
            self.save_count.fetch_add(1, Ordering::SeqCst);
            self.states.lock().expect("store lock").insert(destination.clone(), state.clone());
            Ok(())
        }

        fn remove(&self, destination: &DestinationId) -> Result<()> {
            self.states.lock().expect("store lock").remove(destination);
            Ok(())
        }
    }
}
