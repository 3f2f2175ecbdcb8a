//! Current/legacy endpoint selection for object storage.

use super::client::SwiftClient;
use super::object_store::{ObjectBody, ObjectStore};
use crate::catalog_store::ContentId;
use crate::config::SwiftSettings;
use crate::error::{LibrarianError, LibrarianResult};
use anyhow::Result;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub enum ObjectStoreStrategy {
    Disabled,
    Single(Arc<dyn ObjectStore>),
    /// Writes go to `current`; reads fall back to `legacy`; deletes hit both.
    Migrating {
        current: Arc<dyn ObjectStore>,
        legacy: Arc<dyn ObjectStore>,
    },
}

/// The configured strategy with every call bounded by the object store
/// timeout. Uploads are the exception: a transfer may take any time as long
/// as it keeps moving, so each store bounds its own upload requests.
pub struct TieredObjectStore {
    strategy: ObjectStoreStrategy,
    timeout: Duration,
}

impl TieredObjectStore {
    pub fn new(strategy: ObjectStoreStrategy, timeout: Duration) -> Self {
        Self { strategy, timeout }
    }

    pub fn disabled() -> Self {
        Self::new(ObjectStoreStrategy::Disabled, Duration::from_secs(30))
    }

    pub fn from_settings(settings: &SwiftSettings) -> Result<Self> {
        let timeout = Duration::from_secs(settings.timeout_secs);
        if !settings.enabled {
            info!("Object storage disabled, content stays in the local spool");
            return Ok(Self::disabled());
        }
        let current = match &settings.current {
            Some(credentials) => Arc::new(SwiftClient::new(
                "swift",
                credentials.clone(),
                settings.segment_size,
                timeout,
            )?) as Arc<dyn ObjectStore>,
            None => anyhow::bail!("swift enabled without credentials"),
        };
        let strategy = match &settings.legacy {
            Some(credentials) => {
                let legacy = Arc::new(SwiftClient::new(
                    "swift_legacy",
                    credentials.clone(),
                    settings.segment_size,
                    timeout,
                )?);
                info!("Object storage migrating: writes to current, reads fall back to legacy");
                ObjectStoreStrategy::Migrating { current, legacy }
            }
            None => {
                info!("Object storage enabled with a single endpoint");
                ObjectStoreStrategy::Single(current)
            }
        };
        Ok(Self::new(strategy, timeout))
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self.strategy, ObjectStoreStrategy::Disabled)
    }

    async fn bounded<T, F>(&self, fut: F) -> LibrarianResult<T>
    where
        F: Future<Output = LibrarianResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(LibrarianError::ObjectStoreTimeout(self.timeout.as_secs())),
        }
    }

    fn current(&self) -> Option<&Arc<dyn ObjectStore>> {
        match &self.strategy {
            ObjectStoreStrategy::Disabled => None,
            ObjectStoreStrategy::Single(current) => Some(current),
            ObjectStoreStrategy::Migrating { current, .. } => Some(current),
        }
    }

    fn legacy(&self) -> Option<&Arc<dyn ObjectStore>> {
        match &self.strategy {
            ObjectStoreStrategy::Migrating { legacy, .. } => Some(legacy),
            _ => None,
        }
    }

    pub async fn put_file(
        &self,
        content_id: ContentId,
        path: &Path,
        size: u64,
    ) -> LibrarianResult<()> {
        let current = self.current().ok_or_else(|| {
            LibrarianError::ObjectStore("object storage is disabled".to_string())
        })?;
        current.put_file(content_id, path, size).await
    }

    /// Read from `current`, then from `legacy`. A failing current endpoint
    /// does not hide a copy that only the legacy endpoint has.
    pub async fn get(&self, content_id: ContentId) -> LibrarianResult<Option<ObjectBody>> {
        let Some(current) = self.current() else {
            return Ok(None);
        };
        let current_result = self.bounded(current.get(content_id)).await;
        let current_error = match current_result {
            Ok(Some(body)) => return Ok(Some(body)),
            Ok(None) => None,
            Err(e) => Some(e),
        };

        if let Some(legacy) = self.legacy() {
            match self.bounded(legacy.get(content_id)).await {
                Ok(Some(body)) => {
                    debug!("Content {} served from {}", content_id, legacy.name());
                    return Ok(Some(body));
                }
                Ok(None) => {}
                Err(e) => warn!("Legacy object store read of {} failed: {}", content_id, e),
            }
        }

        match current_error {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }

    pub async fn exists(&self, content_id: ContentId) -> LibrarianResult<bool> {
        let Some(current) = self.current() else {
            return Ok(false);
        };
        if self.bounded(current.exists(content_id)).await? {
            return Ok(true);
        }
        match self.legacy() {
            Some(legacy) => self.bounded(legacy.exists(content_id)).await,
            None => Ok(false),
        }
    }

    pub async fn delete(&self, content_id: ContentId) -> LibrarianResult<()> {
        if let Some(current) = self.current() {
            self.bounded(current.delete(content_id)).await?;
        }
        if let Some(legacy) = self.legacy() {
            self.bounded(legacy.delete(content_id)).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::object_store::{read_body, MemoryObjectStore};
    use super::*;
    use async_trait::async_trait;

    fn migrating() -> (Arc<MemoryObjectStore>, Arc<MemoryObjectStore>, TieredObjectStore) {
        let current = Arc::new(MemoryObjectStore::new("current"));
        let legacy = Arc::new(MemoryObjectStore::new("legacy"));
        let store = TieredObjectStore::new(
            ObjectStoreStrategy::Migrating {
                current: current.clone(),
                legacy: legacy.clone(),
            },
            Duration::from_secs(5),
        );
        (current, legacy, store)
    }

    #[tokio::test]
    async fn disabled_store_has_nothing() {
        let store = TieredObjectStore::disabled();
        assert!(!store.is_enabled());
        assert!(store.get(1).await.unwrap().is_none());
        assert!(!store.exists(1).await.unwrap());
        store.delete(1).await.unwrap();
    }

    #[tokio::test]
    async fn writes_go_to_current_only() {
        let (current, legacy, store) = migrating();
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("blob");
        std::fs::write(&path, b"abc").unwrap();

        store.put_file(1, &path, 3).await.unwrap();
        assert!(current.contains(1));
        assert!(!legacy.contains(1));
    }

    #[tokio::test]
    async fn reads_fall_back_to_legacy() {
        let (_current, legacy, store) = migrating();
        legacy.insert(9, &b"old bytes"[..]);

        assert!(store.exists(9).await.unwrap());
        let body = store.get(9).await.unwrap().unwrap();
        assert_eq!(read_body(body).await.unwrap(), b"old bytes");
    }

    #[tokio::test]
    async fn deletes_hit_both_endpoints() {
        let (current, legacy, store) = migrating();
        current.insert(4, &b"x"[..]);
        legacy.insert(4, &b"x"[..]);

        store.delete(4).await.unwrap();
        assert!(!current.contains(4));
        assert!(!legacy.contains(4));
    }

    struct StalledStore;

    #[async_trait]
    impl ObjectStore for StalledStore {
        fn name(&self) -> &str {
            "stalled"
        }
        async fn put_file(&self, _: ContentId, _: &Path, _: u64) -> LibrarianResult<()> {
            futures::future::pending().await
        }
        async fn get(&self, _: ContentId) -> LibrarianResult<Option<ObjectBody>> {
            futures::future::pending().await
        }
        async fn exists(&self, _: ContentId) -> LibrarianResult<bool> {
            futures::future::pending().await
        }
        async fn delete(&self, _: ContentId) -> LibrarianResult<()> {
            futures::future::pending().await
        }
    }

    struct SlowSegmentsStore {
        inner: MemoryObjectStore,
        segments: u32,
    }

    #[async_trait]
    impl ObjectStore for SlowSegmentsStore {
        fn name(&self) -> &str {
            "slow"
        }
        async fn put_file(&self, id: ContentId, path: &Path, size: u64) -> LibrarianResult<()> {
            for _ in 0..self.segments {
                tokio::time::sleep(Duration::from_millis(30)).await;
            }
            self.inner.put_file(id, path, size).await
        }
        async fn get(&self, id: ContentId) -> LibrarianResult<Option<ObjectBody>> {
            self.inner.get(id).await
        }
        async fn exists(&self, id: ContentId) -> LibrarianResult<bool> {
            self.inner.exists(id).await
        }
        async fn delete(&self, id: ContentId) -> LibrarianResult<()> {
            self.inner.delete(id).await
        }
    }

    #[tokio::test]
    async fn long_uploads_are_not_cut_off() {
        let slow = Arc::new(SlowSegmentsStore {
            inner: MemoryObjectStore::new("memory"),
            segments: 5,
        });
        let store = TieredObjectStore::new(
            ObjectStoreStrategy::Single(slow.clone()),
            Duration::from_millis(50),
        );
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("blob");
        std::fs::write(&path, b"big").unwrap();

        store.put_file(3, &path, 3).await.unwrap();
        assert!(slow.inner.contains(3));
    }

    #[tokio::test]
    async fn stalled_calls_time_out() {
        let store = TieredObjectStore::new(
            ObjectStoreStrategy::Single(Arc::new(StalledStore)),
            Duration::from_millis(50),
        );
        let err = store.exists(1).await.unwrap_err();
        assert!(matches!(err, LibrarianError::ObjectStoreTimeout(_)));
    }
}
