// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::{GuardianError, GuardianResult};
use async_trait::async_trait;
use rocksdb::{DBWithThreadMode, MultiThreaded, Options, WriteOptions};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Opaque keyed blob storage backing the deposit event cache.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get_blob(&self, key: &str) -> GuardianResult<Option<Vec<u8>>>;

    async fn set_blob(&self, key: &str, value: Vec<u8>) -> GuardianResult<()>;

    /// Deleting a missing key is not an error.
    async fn delete_blob(&self, key: &str) -> GuardianResult<()>;
}

/// RocksDB-backed store, one entry per key. Calls run on the blocking pool.
#[derive(Clone)]
pub struct RocksDbCacheStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
}

impl RocksDbCacheStore {
    pub fn open(path: impl AsRef<Path>) -> GuardianResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DBWithThreadMode::<MultiThreaded>::open(&opts, path.as_ref()).map_err(|e| {
            GuardianError::CacheStoreError(format!(
                "failed to open cache db at {:?}: {}",
                path.as_ref(),
                e
            ))
        })?;
        Ok(Self { db: Arc::new(db) })
    }

    async fn blocking<T, F>(&self, op: F) -> GuardianResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&DBWithThreadMode<MultiThreaded>) -> Result<T, rocksdb::Error> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || op(&db))
            .await
            .map_err(|e| GuardianError::InternalError(format!("cache db task failed: {}", e)))?
            .map_err(|e| GuardianError::CacheStoreError(e.to_string()))
    }
}

#[async_trait]
impl CacheStore for RocksDbCacheStore {
    async fn get_blob(&self, key: &str) -> GuardianResult<Option<Vec<u8>>> {
        let key = key.to_string();
        self.blocking(move |db| db.get(key.as_bytes())).await
    }

    async fn set_blob(&self, key: &str, value: Vec<u8>) -> GuardianResult<()> {
        let key = key.to_string();
        self.blocking(move |db| {
            let mut write_opts = WriteOptions::default();
            write_opts.set_sync(true);
            db.put_opt(key.as_bytes(), value, &write_opts)
        })
        .await
    }

    async fn delete_blob(&self, key: &str) -> GuardianResult<()> {
        let key = key.to_string();
        self.blocking(move |db| db.delete(key.as_bytes())).await
    }
}

#[derive(Default)]
pub struct InMemoryCacheStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get_blob(&self, key: &str) -> GuardianResult<Option<Vec<u8>>> {
        Ok(self.blobs.read().await.get(key).cloned())
    }

    async fn set_blob(&self, key: &str, value: Vec<u8>) -> GuardianResult<()> {
        self.blobs.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete_blob(&self, key: &str) -> GuardianResult<()> {
        self.blobs.write().await.remove(key);
        Ok(())
    }
}
