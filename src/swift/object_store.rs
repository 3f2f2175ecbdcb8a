//! Object storage abstraction.

use crate::catalog_store::ContentId;
use crate::error::{LibrarianError, LibrarianResult};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

/// A stored object being read back.
pub struct ObjectBody {
    pub size: u64,
    pub stream: BoxStream<'static, std::io::Result<Bytes>>,
}

/// Remote durable copy of committed content, keyed by content id.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Short label used in logs and metrics.
    fn name(&self) -> &str;

    /// Upload the spool file at `path` as the object for `content_id`.
    /// Callers apply no overall deadline; implementations bound stalls.
    async fn put_file(&self, content_id: ContentId, path: &Path, size: u64) -> LibrarianResult<()>;

    /// Returns `None` if the object does not exist.
    async fn get(&self, content_id: ContentId) -> LibrarianResult<Option<ObjectBody>>;

    async fn exists(&self, content_id: ContentId) -> LibrarianResult<bool>;

    /// Deleting a missing object is not an error.
    async fn delete(&self, content_id: ContentId) -> LibrarianResult<()>;
}

/// Process-local object store, used when exercising migration without a
/// Swift cluster.
#[derive(Default)]
pub struct MemoryObjectStore {
    name: String,
    objects: Mutex<HashMap<ContentId, Bytes>>,
}

impl MemoryObjectStore {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            objects: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, content_id: ContentId, data: impl Into<Bytes>) {
        if let Ok(mut objects) = self.objects.lock() {
            objects.insert(content_id, data.into());
        }
    }

    pub fn contains(&self, content_id: ContentId) -> bool {
        self.objects
            .lock()
            .map(|objects| objects.contains_key(&content_id))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.objects.lock().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> LibrarianResult<std::sync::MutexGuard<'_, HashMap<ContentId, Bytes>>> {
        self.objects
            .lock()
            .map_err(|_| LibrarianError::ObjectStore(format!("{} mutex poisoned", self.name)))
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put_file(&self, content_id: ContentId, path: &Path, size: u64) -> LibrarianResult<()> {
        let data = tokio::fs::read(path).await?;
        if data.len() as u64 != size {
            return Err(LibrarianError::ObjectStore(format!(
                "{} changed size while uploading: expected {}, read {}",
                path.display(),
                size,
                data.len()
            )));
        }
        self.lock()?.insert(content_id, Bytes::from(data));
        Ok(())
    }

    async fn get(&self, content_id: ContentId) -> LibrarianResult<Option<ObjectBody>> {
        let data = self.lock()?.get(&content_id).cloned();
        Ok(data.map(|data| ObjectBody {
            size: data.len() as u64,
            stream: futures::stream::once(async move { Ok(data) }).boxed(),
        }))
    }

    async fn exists(&self, content_id: ContentId) -> LibrarianResult<bool> {
        Ok(self.lock()?.contains_key(&content_id))
    }

    async fn delete(&self, content_id: ContentId) -> LibrarianResult<()> {
        self.lock()?.remove(&content_id);
        Ok(())
    }
}

/// Collect an object body into memory. Test and maintenance helper.
pub async fn read_body(body: ObjectBody) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(body.size as usize);
    let mut stream = body.stream;
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk?);
    }
    Ok(out)
}
