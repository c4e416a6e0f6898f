//! The dedup index: a durable `(entity class, entity id) -> content hash`
//! map, backed by `sled`.
//!
//! Keys are a fixed-width composite of a 1-byte class discriminator and an
//! 8-byte big-endian entity id. Values are versioned with an enum (mirroring
//! the reference cache's `VersionedCacheEntry` pattern) so the on-disk
//! format can evolve without a migration step.

use std::path::Path;

use chrono::{DateTime, Utc};
use discog_types::{ContentHash, EntityClass};
use log::{debug, warn};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum DedupError {
    #[error("error opening dedup store at {0:?}")]
    Open(std::path::PathBuf, #[source] sled::Error),

    #[error("error reading dedup entry")]
    Get(#[source] sled::Error),

    #[error("error writing dedup entry")]
    Insert(#[source] sled::Error),

    #[error("error flushing dedup store to disk")]
    Flush(#[source] sled::Error),

    #[error("error encoding dedup entry")]
    Encode(#[source] rmp_serde::encode::Error),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct DedupEntryV0 {
    content_hash: ContentHash,
    last_seen: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
enum VersionedDedupEntry {
    V0(DedupEntryV0),
}

/// A single dedup lookup result.
#[derive(Debug, Clone, Copy)]
pub struct DedupEntry {
    pub content_hash: ContentHash,
    pub last_seen: DateTime<Utc>,
}

/// Cheaply `Clone`: `sled::Db` is itself a handle around shared state, so
/// cloning hands out another reference to the same on-disk store rather than
/// copying it — this is how the pipeline task (lookups) and the publisher's
/// confirm task (updates) share one index per entity class.
#[derive(Clone)]
pub struct DedupIndex {
    db: sled::Db,
}

fn composite_key(class: EntityClass, entity_id: i64) -> [u8; 9] {
    let mut key = [0u8; 9];
    key[0] = class.discriminant();
    key[1..].copy_from_slice(&entity_id.to_be_bytes());
    key
}

impl DedupIndex {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DedupError> {
        let path = path.as_ref();
        let db = sled::open(path).map_err(|e| DedupError::Open(path.to_path_buf(), e))?;
        Ok(Self { db })
    }

    /// True iff the stored hash equals the supplied hash. Returns `false`
    /// (not yet seen, or seen with a different hash) when no entry exists or
    /// the hash differs — callers use this to decide `PUBLISH` vs `DROP`.
    pub fn seen(&self, class: EntityClass, entity_id: i64, hash: &ContentHash) -> Result<bool, DedupError> {
        match self.get(class, entity_id)? {
            Some(entry) => Ok(&entry.content_hash == hash),
            None => Ok(false),
        }
    }

    pub fn get(&self, class: EntityClass, entity_id: i64) -> Result<Option<DedupEntry>, DedupError> {
        let key = composite_key(class, entity_id);
        let Some(raw) = self.db.get(key).map_err(DedupError::Get)? else {
            return Ok(None);
        };

        match rmp_serde::from_slice::<VersionedDedupEntry>(&raw) {
            Ok(VersionedDedupEntry::V0(entry)) => {
                Ok(Some(DedupEntry { content_hash: entry.content_hash, last_seen: entry.last_seen }))
            }
            Err(err) => {
                warn!(
                    "event=dedup_entry_corrupt class={class} id={entity_id} error={err}. \
                    Treating as unseen."
                );
                Ok(None)
            }
        }
    }

    /// Upserts after a broker-confirmed publish. The dedup index is updated
    /// after confirmation, never before.
    pub fn update(&self, class: EntityClass, entity_id: i64, hash: ContentHash) -> Result<(), DedupError> {
        let key = composite_key(class, entity_id);
        let entry = VersionedDedupEntry::V0(DedupEntryV0 { content_hash: hash, last_seen: Utc::now() });
        let encoded = rmp_serde::to_vec(&entry).map_err(DedupError::Encode)?;
        self.db.insert(key, encoded).map_err(DedupError::Insert)?;
        Ok(())
    }

    /// Durably persists all pending writes; must be called before the
    /// corresponding progress-cursor advance is considered valid.
    pub fn flush(&self) -> Result<(), DedupError> {
        self.db.flush().map_err(DedupError::Flush)?;
        Ok(())
    }

    /// Warms an in-memory cache for one entity class at startup.
    pub fn bulk_load(&self, class: EntityClass) -> impl Iterator<Item = (i64, ContentHash)> + '_ {
        let prefix = [class.discriminant()];
        self.db.scan_prefix(prefix).filter_map(move |entry| {
            let (key, value) = entry.ok()?;
            if key.len() != 9 {
                return None;
            }
            let entity_id = i64::from_be_bytes(key[1..9].try_into().ok()?);
            match rmp_serde::from_slice::<VersionedDedupEntry>(&value).ok()? {
                VersionedDedupEntry::V0(entry) => Some((entity_id, entry.content_hash)),
            }
        })
    }

    pub fn len_for(&self, class: EntityClass) -> usize {
        debug!("event=dedup_count class={class}");
        self.db.scan_prefix([class.discriminant()]).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use discog_types::content_hash;

    #[test]
    fn unseen_entity_reports_false() {
        let dir = tempfile::tempdir().unwrap();
        let index = DedupIndex::open(dir.path().join("dedup.db")).unwrap();
        let hash = content_hash(b"x");
        assert!(!index.seen(EntityClass::Artist, 1, &hash).unwrap());
    }

    #[test]
    fn matching_hash_after_update_is_seen() {
        let dir = tempfile::tempdir().unwrap();
        let index = DedupIndex::open(dir.path().join("dedup.db")).unwrap();
        let hash = content_hash(b"x");
        index.update(EntityClass::Artist, 1, hash).unwrap();
        assert!(index.seen(EntityClass::Artist, 1, &hash).unwrap());
    }

    #[test]
    fn changed_content_is_not_seen() {
        let dir = tempfile::tempdir().unwrap();
        let index = DedupIndex::open(dir.path().join("dedup.db")).unwrap();
        let original = content_hash(b"x");
        let changed = content_hash(b"y");
        index.update(EntityClass::Artist, 1, original).unwrap();
        assert!(!index.seen(EntityClass::Artist, 1, &changed).unwrap());
    }

    #[test]
    fn entity_classes_are_partitioned() {
        let dir = tempfile::tempdir().unwrap();
        let index = DedupIndex::open(dir.path().join("dedup.db")).unwrap();
        let hash = content_hash(b"x");
        index.update(EntityClass::Artist, 1, hash).unwrap();
        assert!(!index.seen(EntityClass::Label, 1, &hash).unwrap());
    }

    #[test]
    fn bulk_load_returns_all_entries_for_class() {
        let dir = tempfile::tempdir().unwrap();
        let index = DedupIndex::open(dir.path().join("dedup.db")).unwrap();
        for id in 0..5 {
            index.update(EntityClass::Master, id, content_hash(&id.to_be_bytes())).unwrap();
        }
        index.update(EntityClass::Release, 99, content_hash(b"other class")).unwrap();

        let loaded: Vec<_> = index.bulk_load(EntityClass::Master).collect();
        assert_eq!(loaded.len(), 5);
        assert_eq!(index.len_for(EntityClass::Release), 1);
    }
}
