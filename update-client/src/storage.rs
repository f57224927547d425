// Copyright 2024 The Fuchsia Authors
//
// Licensed under a BSD-style license <LICENSE-BSD>, Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0>, or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to
// those terms.

//! Key-value persistence for per-component registration state.
//!
//! The engine records the installed version and fingerprint after every
//! successful update so the next check reports them. Writes are buffered
//! until `commit`.

use futures::future::LocalBoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::rc::Rc;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Clone, Debug, Error)]
#[error("storage failure: {0}")]
pub struct StorageError(pub String);

pub trait Storage {
    fn get_string(&self, key: &str) -> LocalBoxFuture<'_, Option<String>>;
    fn set_string(&mut self, key: &str, value: &str)
        -> LocalBoxFuture<'_, Result<(), StorageError>>;
    fn remove(&mut self, key: &str) -> LocalBoxFuture<'_, Result<(), StorageError>>;
    /// Makes every buffered write durable.
    fn commit(&mut self) -> LocalBoxFuture<'_, Result<(), StorageError>>;
}

/// In-memory [`Storage`], for tests and embedders that do not persist.
#[derive(Debug, Default)]
pub struct MemStorage {
    data: HashMap<String, String>,
    /// False whenever there are uncommitted writes.
    committed: bool,
}

impl MemStorage {
    pub fn new() -> Self {
        MemStorage { data: HashMap::new(), committed: true }
    }

    pub fn committed(&self) -> bool {
        self.committed
    }
}

impl Storage for MemStorage {
    fn get_string(&self, key: &str) -> LocalBoxFuture<'_, Option<String>> {
        let value = self.data.get(key).cloned();
        async move { value }.boxed_local()
    }

    fn set_string(
        &mut self,
        key: &str,
        value: &str,
    ) -> LocalBoxFuture<'_, Result<(), StorageError>> {
        self.data.insert(key.to_string(), value.to_string());
        self.committed = false;
        async { Ok(()) }.boxed_local()
    }

    fn remove(&mut self, key: &str) -> LocalBoxFuture<'_, Result<(), StorageError>> {
        self.data.remove(key);
        self.committed = false;
        async { Ok(()) }.boxed_local()
    }

    fn commit(&mut self) -> LocalBoxFuture<'_, Result<(), StorageError>> {
        self.committed = true;
        async { Ok(()) }.boxed_local()
    }
}

/// Namespaced view over a shared [`Storage`] holding component registration
/// data. Failed writes are logged and swallowed; persistence is best-effort
/// and never fails an otherwise successful update.
#[derive(Clone)]
pub struct PersistedData {
    storage: Rc<futures::lock::Mutex<Box<dyn Storage>>>,
}

fn version_key(id: &str) -> String {
    format!("updateclientdata.apps.{id}.pv")
}

fn fingerprint_key(id: &str) -> String {
    format!("updateclientdata.apps.{id}.fp")
}

impl PersistedData {
    pub fn new(storage: Rc<futures::lock::Mutex<Box<dyn Storage>>>) -> Self {
        PersistedData { storage }
    }

    pub async fn get_product_version(&self, id: &str) -> Option<String> {
        self.storage.lock().await.get_string(&version_key(id)).await
    }

    pub async fn get_fingerprint(&self, id: &str) -> Option<String> {
        self.storage.lock().await.get_string(&fingerprint_key(id)).await
    }

    /// Records the state of a completed install and commits.
    pub async fn set_product_version_and_fingerprint(
        &self,
        id: &str,
        version: &str,
        fingerprint: Option<&str>,
    ) {
        let mut storage = self.storage.lock().await;
        if let Err(e) = storage.set_string(&version_key(id), version).await {
            error!("could not persist version for {id}: {e}");
            return;
        }
        let fingerprint_result = match fingerprint {
            Some(fingerprint) => storage.set_string(&fingerprint_key(id), fingerprint).await,
            None => storage.remove(&fingerprint_key(id)).await,
        };
        if let Err(e) = fingerprint_result {
            error!("could not persist fingerprint for {id}: {e}");
            return;
        }
        if let Err(e) = storage.commit().await {
            warn!("could not commit registration data for {id}: {e}");
        }
    }

    pub async fn remove_registration(&self, id: &str) {
        let mut storage = self.storage.lock().await;
        let _ = storage.remove(&version_key(id)).await;
        let _ = storage.remove(&fingerprint_key(id)).await;
        if let Err(e) = storage.commit().await {
            warn!("could not commit registration removal for {id}: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn persisted() -> (PersistedData, Rc<futures::lock::Mutex<Box<dyn Storage>>>) {
        let storage: Rc<futures::lock::Mutex<Box<dyn Storage>>> =
            Rc::new(futures::lock::Mutex::new(Box::new(MemStorage::new())));
        (PersistedData::new(Rc::clone(&storage)), storage)
    }

    #[tokio::test]
    async fn test_mem_storage_commit_tracking() {
        let mut storage = MemStorage::new();
        assert!(storage.committed());
        storage.set_string("k", "v").await.unwrap();
        assert!(!storage.committed());
        storage.commit().await.unwrap();
        assert!(storage.committed());
        assert_eq!(storage.get_string("k").await.as_deref(), Some("v"));
        assert_eq!(storage.get_string("missing").await, None);
    }

    #[tokio::test]
    async fn test_persisted_data_round_trip() {
        let (persisted, storage) = persisted();
        assert_eq!(persisted.get_product_version("abc").await, None);

        persisted.set_product_version_and_fingerprint("abc", "1.2.3", Some("fp1")).await;
        assert_eq!(persisted.get_product_version("abc").await.as_deref(), Some("1.2.3"));
        assert_eq!(persisted.get_fingerprint("abc").await.as_deref(), Some("fp1"));
        assert_eq!(
            storage.lock().await.get_string("updateclientdata.apps.abc.pv").await.as_deref(),
            Some("1.2.3")
        );

        persisted.set_product_version_and_fingerprint("abc", "1.2.4", None).await;
        assert_eq!(persisted.get_fingerprint("abc").await, None);

        persisted.remove_registration("abc").await;
        assert_eq!(persisted.get_product_version("abc").await, None);
    }
}
