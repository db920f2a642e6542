//! Durable key/value cache with named buckets, used by capture mode.
//!
//! Backed by a single embedded [`sled`] database opened once per process.
//! Buckets map to sled trees. Writes are flushed before `set` returns, so a
//! completed capture survives a crash. Writers are serialized per bucket;
//! readers go straight to the tree.
//!
//! Bucket-existence semantics are deliberately strict at this layer:
//! `get` and `delete_bucket` on a bucket that was never created return
//! [`Error::BucketNotFound`]. The friendlier empty-list behavior for the
//! "all captured pairs" read path lives with the caller, not here.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;

use crate::errors::{Error, Result};

/// Captured request/response pairs.
pub const REQUESTS_BUCKET: &str = "requestsBucket";
/// Admin tokens.
pub const TOKEN_BUCKET: &str = "tokenBucket";
/// Schema and bookkeeping metadata.
pub const META_BUCKET: &str = "metaBucket";

/// Values are stored in an envelope carrying a monotonic sequence number so
/// `get_all` can return insertion order regardless of key order.
const SEQ_PREFIX_LEN: usize = 8;

#[derive(Debug)]
pub struct Cache {
    db: sled::Db,
    write_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl Cache {
    /// Open (or create) the cache file. Call once per process.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path.as_ref())?;
        tracing::info!(path = %path.as_ref().display(), "cache opened");
        Ok(Cache {
            db,
            write_locks: Mutex::new(HashMap::new()),
        })
    }

    fn bucket_exists(&self, bucket: &str) -> bool {
        self.db
            .tree_names()
            .iter()
            .any(|name| name.as_ref() == bucket.as_bytes())
    }

    fn write_lock(&self, bucket: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.write_locks.lock().expect("cache lock table poisoned");
        locks.entry(bucket.to_string()).or_default().clone()
    }

    /// Store a value durably. Creates the bucket on first write.
    pub async fn set(&self, bucket: &str, key: &[u8], value: &[u8]) -> Result<()> {
        let lock = self.write_lock(bucket);
        let _guard = lock.lock().await;

        let tree = self.db.open_tree(bucket)?;
        let seq = self.db.generate_id()?;
        let mut envelope = Vec::with_capacity(SEQ_PREFIX_LEN + value.len());
        envelope.extend_from_slice(&seq.to_be_bytes());
        envelope.extend_from_slice(value);
        tree.insert(key, envelope)?;
        tree.flush_async().await?;
        Ok(())
    }

    /// Fetch a value. A bucket that was never created is an error; a key
    /// missing from an existing bucket returns `Ok(None)`.
    pub fn get(&self, bucket: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if !self.bucket_exists(bucket) {
            return Err(Error::BucketNotFound { bucket: bucket.to_string() });
        }
        let tree = self.db.open_tree(bucket)?;
        Ok(tree.get(key)?.map(|envelope| envelope[SEQ_PREFIX_LEN..].to_vec()))
    }

    /// Every value in the bucket, in insertion order.
    pub fn get_all(&self, bucket: &str) -> Result<Vec<Vec<u8>>> {
        if !self.bucket_exists(bucket) {
            return Err(Error::BucketNotFound { bucket: bucket.to_string() });
        }
        let tree = self.db.open_tree(bucket)?;
        let mut entries: Vec<(u64, Vec<u8>)> = Vec::new();
        for item in tree.iter() {
            let (_, envelope) = item?;
            if envelope.len() < SEQ_PREFIX_LEN {
                continue;
            }
            let mut seq_bytes = [0u8; SEQ_PREFIX_LEN];
            seq_bytes.copy_from_slice(&envelope[..SEQ_PREFIX_LEN]);
            entries.push((u64::from_be_bytes(seq_bytes), envelope[SEQ_PREFIX_LEN..].to_vec()));
        }
        entries.sort_by_key(|(seq, _)| *seq);
        Ok(entries.into_iter().map(|(_, value)| value).collect())
    }

    /// Delete a bucket and everything in it. Deleting a bucket that does
    /// not exist returns [`Error::BucketNotFound`]; deleting twice
    /// therefore succeeds once.
    pub async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        let lock = self.write_lock(bucket);
        let _guard = lock.lock().await;

        if !self.bucket_exists(bucket) {
            return Err(Error::BucketNotFound { bucket: bucket.to_string() });
        }
        self.db.drop_tree(bucket)?;
        self.db.flush_async().await?;
        Ok(())
    }
}

/// Stable fingerprint of a capture request: SHA-256 over its canonical JSON
/// (serde_json emits object keys sorted), hex-encoded.
pub fn fingerprint<T: Serialize>(view: &T) -> String {
    let canonical = serde_json::to_vec(view).unwrap_or_default();
    let digest = Sha256::digest(&canonical);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
