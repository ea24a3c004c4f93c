//! Time-bounded cache from `(user, project, object id)` to the stored path
//! and display filename.
//!
//! Entries older than the TTL are never served; they are evicted lazily on
//! the next access. Deletes purge every entry under a `{user}_{project}_`
//! prefix before returning. The map is sharded (`DashMap`), so unrelated keys
//! never contend on one lock, and no lock is held while the metadata store
//! is queried.

use dashmap::DashMap;
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};
use tracing::{debug, info};

use super::{metadata_store::MetadataStore, storage_service::StorageResult};

/// Default lifetime of a cached resolution.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Where an object lives on disk and what it should be called on download.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedPath {
    /// Path relative to the storage base directory.
    pub path: String,
    pub filename: String,
    /// MD5 of the payload, when the record carries one.
    pub etag: Option<String>,
}

#[derive(Debug)]
struct CacheEntry {
    resolved: ResolvedPath,
    inserted_at: Instant,
}

#[derive(Debug)]
pub struct PathCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
    /// Bumped by every purge. A resolve only caches what it read from the
    /// store if no purge started in between.
    epoch: AtomicU64,
}

impl Default for PathCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl PathCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            epoch: AtomicU64::new(0),
        }
    }

    /// Composite key `{user}_{project}_{id}`.
    pub fn cache_key(user_key: &str, project: &str, id: &str) -> String {
        format!("{user_key}_{project}_{id}")
    }

    fn project_prefix(user_key: &str, project: &str) -> String {
        format!("{user_key}_{project}_")
    }

    /// Return a fresh entry, evicting it if it has outlived the TTL.
    pub fn get(&self, key: &str) -> Option<ResolvedPath> {
        if let Some(entry) = self.entries.get(key) {
            if entry.inserted_at.elapsed() < self.ttl {
                return Some(entry.resolved.clone());
            }
        } else {
            return None;
        }

        let ttl = self.ttl;
        self.entries
            .remove_if(key, |_, entry| entry.inserted_at.elapsed() >= ttl);
        None
    }

    /// Resolve an object, consulting the store only on a cache miss.
    ///
    /// `Ok(None)` means the object does not exist (or lacks a path), which is
    /// an expected outcome rather than a fault.
    pub async fn resolve(
        &self,
        store: &dyn MetadataStore,
        user_key: &str,
        project: &str,
        id: &str,
    ) -> StorageResult<Option<ResolvedPath>> {
        let key = Self::cache_key(user_key, project, id);
        if let Some(hit) = self.get(&key) {
            debug!(%key, "path cache hit");
            return Ok(Some(hit));
        }

        let epoch = self.epoch.load(Ordering::SeqCst);
        let Some(record) = store.find_object(user_key, project, id).await? else {
            info!(user_key, project, id, "object not found in metadata store");
            return Ok(None);
        };
        if record.storage_path.is_empty() || record.filename.is_empty() {
            info!(user_key, project, id, "object record has no storage path");
            return Ok(None);
        }

        let resolved = ResolvedPath {
            path: record.storage_path,
            filename: record.filename,
            etag: record.etag,
        };
        self.insert_if_unpurged(key, resolved.clone(), epoch);
        debug!(user_key, project, id, "path cache miss, entry stored");
        Ok(Some(resolved))
    }

    fn insert_if_unpurged(&self, key: String, resolved: ResolvedPath, epoch: u64) {
        // The epoch check runs under the shard lock, so it is ordered against
        // the purge's retain pass over the same shard.
        let entry = self.entries.entry(key);
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return;
        }
        entry.insert(CacheEntry {
            resolved,
            inserted_at: Instant::now(),
        });
    }

    /// Drop every entry under `{user}_{project}_`. Returns how many went.
    pub fn purge_project(&self, user_key: &str, project: &str) -> usize {
        let prefix = Self::project_prefix(user_key, project);
        self.epoch.fetch_add(1, Ordering::SeqCst);

        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(&prefix));
        let removed = before.saturating_sub(self.entries.len());
        debug!(%prefix, removed, "purged path cache entries");
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
