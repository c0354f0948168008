//! StateStore: redb-backed profile persistence for taskgrid.
//!
//! Provides typed operations over worker and retired profiles. All values
//! are JSON-serialized into redb's `&[u8]` value columns. The store
//! supports both on-disk and in-memory backends (the latter for testing).

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use taskgrid_placement::Profile;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::{ProfileSnapshot, ResourceProfiles};

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe profile store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "profile store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory profile store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Storage))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(WORKER_PROFILES).map_err(map_err!(Storage))?;
        txn.open_table(RETIRED_PROFILES).map_err(map_err!(Storage))?;
        txn.commit().map_err(map_err!(Storage))?;
        Ok(())
    }

    // ── Worker profiles ────────────────────────────────────────────

    /// Insert or replace the profile of `signature` on `worker`.
    pub fn put_profile(&self, worker: &str, signature: &str, profile: &Profile) -> StateResult<()> {
        let key = profile_key(worker, signature);
        let value = serde_json::to_vec(profile).map_err(map_err!(Encode))?;
        let txn = self.db.begin_write().map_err(map_err!(Storage))?;
        {
            let mut table = txn.open_table(WORKER_PROFILES).map_err(map_err!(Storage))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Storage))?;
        }
        txn.commit().map_err(map_err!(Storage))?;
        debug!(%key, executions = profile.executions(), "profile stored");
        Ok(())
    }

    /// All profiles stored for one worker, keyed by signature.
    pub fn worker_profiles(&self, worker: &str) -> StateResult<BTreeMap<String, Profile>> {
        let prefix = format!("{worker}:");
        let txn = self.db.begin_read().map_err(map_err!(Storage))?;
        let table = txn.open_table(WORKER_PROFILES).map_err(map_err!(Storage))?;
        let mut results = BTreeMap::new();
        for entry in table.iter().map_err(map_err!(Storage))? {
            let (key, value) = entry.map_err(map_err!(Storage))?;
            let Some(signature) = key.value().strip_prefix(prefix.as_str()) else {
                continue;
            };
            let profile: Profile =
                serde_json::from_slice(value.value()).map_err(map_err!(Decode))?;
            results.insert(signature.to_string(), profile);
        }
        Ok(results)
    }

    /// Move every profile of `worker` into the retired table, merging with
    /// what is already there. Returns how many profiles were moved.
    pub fn retire_worker(&self, worker: &str) -> StateResult<usize> {
        let profiles = self.worker_profiles(worker)?;
        let txn = self.db.begin_write().map_err(map_err!(Storage))?;
        {
            let mut live = txn.open_table(WORKER_PROFILES).map_err(map_err!(Storage))?;
            let mut retired = txn.open_table(RETIRED_PROFILES).map_err(map_err!(Storage))?;
            for (signature, profile) in &profiles {
                let mut merged = match retired.get(signature.as_str()).map_err(map_err!(Storage))? {
                    Some(guard) => serde_json::from_slice::<Profile>(guard.value())
                        .map_err(map_err!(Decode))?,
                    None => Profile::new(),
                };
                merged.accumulate(profile);
                let value = serde_json::to_vec(&merged).map_err(map_err!(Encode))?;
                retired
                    .insert(signature.as_str(), value.as_slice())
                    .map_err(map_err!(Storage))?;
                let key = profile_key(worker, signature);
                live.remove(key.as_str()).map_err(map_err!(Storage))?;
            }
        }
        txn.commit().map_err(map_err!(Storage))?;
        debug!(%worker, count = profiles.len(), "worker profiles retired");
        Ok(profiles.len())
    }

    // ── Retired profiles ───────────────────────────────────────────

    pub fn retired_profiles(&self) -> StateResult<BTreeMap<String, Profile>> {
        let txn = self.db.begin_read().map_err(map_err!(Storage))?;
        let table = txn.open_table(RETIRED_PROFILES).map_err(map_err!(Storage))?;
        let mut results = BTreeMap::new();
        for entry in table.iter().map_err(map_err!(Storage))? {
            let (key, value) = entry.map_err(map_err!(Storage))?;
            let profile: Profile =
                serde_json::from_slice(value.value()).map_err(map_err!(Decode))?;
            results.insert(key.value().to_string(), profile);
        }
        Ok(results)
    }

    // ── Snapshots ──────────────────────────────────────────────────

    /// Export everything as a JSON-friendly snapshot.
    pub fn export(&self) -> StateResult<ProfileSnapshot> {
        let txn = self.db.begin_read().map_err(map_err!(Storage))?;
        let table = txn.open_table(WORKER_PROFILES).map_err(map_err!(Storage))?;
        let mut snapshot = ProfileSnapshot::default();
        for entry in table.iter().map_err(map_err!(Storage))? {
            let (key, value) = entry.map_err(map_err!(Storage))?;
            let Some((worker, signature)) = split_key(key.value()) else {
                continue;
            };
            let profile: Profile =
                serde_json::from_slice(value.value()).map_err(map_err!(Decode))?;
            snapshot
                .resources
                .entry(worker.to_string())
                .or_insert_with(ResourceProfiles::default)
                .implementations
                .insert(signature.to_string(), profile);
        }
        drop(table);
        drop(txn);
        snapshot.retired = self.retired_profiles()?;
        Ok(snapshot)
    }

    /// Load a snapshot, replacing any overlapping entries.
    pub fn import(&self, snapshot: &ProfileSnapshot) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Storage))?;
        {
            let mut live = txn.open_table(WORKER_PROFILES).map_err(map_err!(Storage))?;
            for (worker, resource) in &snapshot.resources {
                for (signature, profile) in &resource.implementations {
                    let key = profile_key(worker, signature);
                    let value = serde_json::to_vec(profile).map_err(map_err!(Encode))?;
                    live.insert(key.as_str(), value.as_slice())
                        .map_err(map_err!(Storage))?;
                }
            }
            let mut retired = txn.open_table(RETIRED_PROFILES).map_err(map_err!(Storage))?;
            for (signature, profile) in &snapshot.retired {
                let value = serde_json::to_vec(profile).map_err(map_err!(Encode))?;
                retired
                    .insert(signature.as_str(), value.as_slice())
                    .map_err(map_err!(Storage))?;
            }
        }
        txn.commit().map_err(map_err!(Storage))?;
        debug!(workers = snapshot.resources.len(), "profile snapshot imported");
        Ok(())
    }
}
