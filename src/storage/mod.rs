//! Byte placement for one partition.
//!
//! Uploads stream into a temp file under `incoming/`, are verified, and are
//! renamed into their sharded path inside the catalog transaction that
//! records them. Reads prefer the local spool and fall back to object
//! storage.

mod digest;
pub mod layout;
mod maintenance;

pub use digest::{ContentHasher, DigestAlgorithm};
pub use maintenance::{ClearReport, MaintenanceGuard};

use crate::catalog_store::{AliasId, ContentId, NewLibraryFile, PartitionCatalog};
use crate::error::{LibrarianError, LibrarianResult};
use crate::partition::Partition;
use crate::swift::TieredObjectStore;
use anyhow::anyhow;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use tempfile::TempPath;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::StreamReader;
use tracing::{debug, info, warn};

/// An upload in progress. Dropping it removes the temp file.
pub struct UploadHandle {
    file: tokio::fs::File,
    temp_path: TempPath,
    hasher: ContentHasher,
}

impl UploadHandle {
    /// Append bytes in arrival order.
    pub async fn write(&mut self, bytes: &[u8]) -> LibrarianResult<()> {
        self.file.write_all(bytes).await?;
        self.hasher.update(bytes);
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.hasher.bytes_hashed()
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }
}

/// Metadata accompanying a commit.
#[derive(Debug, Clone, Default)]
pub struct CommitRequest {
    pub filename: String,
    pub mime_type: String,
    pub expires: Option<i64>,
    /// Hex digest the client claims, in the configured algorithm.
    pub expected_digest: Option<String>,
    pub expected_size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub content_id: ContentId,
    pub alias_id: AliasId,
    pub digest: String,
    pub size: u64,
}

pub type ContentReader = Pin<Box<dyn AsyncRead + Send>>;

/// Committed bytes opened for reading.
pub struct OpenedFile {
    pub size: u64,
    source: OpenedSource,
}

enum OpenedSource {
    Local(tokio::fs::File),
    Remote(ContentReader),
}

impl OpenedFile {
    pub fn is_local(&self) -> bool {
        matches!(self.source, OpenedSource::Local(_))
    }

    /// Reader over `len` bytes starting at `start`.
    pub async fn into_reader(self, start: u64, len: u64) -> LibrarianResult<ContentReader> {
        match self.source {
            OpenedSource::Local(mut file) => {
                if start > 0 {
                    file.seek(SeekFrom::Start(start)).await?;
                }
                Ok(Box::pin(file.take(len)))
            }
            OpenedSource::Remote(mut reader) => {
                if start > 0 {
                    let skipped =
                        tokio::io::copy(&mut (&mut reader).take(start), &mut tokio::io::sink())
                            .await?;
                    if skipped < start {
                        return Err(LibrarianError::StorageIo(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "object shorter than its recorded size",
                        )));
                    }
                }
                Ok(Box::pin(reader.take(len)))
            }
        }
    }

    pub async fn read_all(self) -> LibrarianResult<Vec<u8>> {
        let size = self.size;
        let mut reader = self.into_reader(0, size).await?;
        let mut out = Vec::with_capacity(size as usize);
        reader.read_to_end(&mut out).await?;
        Ok(out)
    }
}

pub struct LibrarianStorage {
    partition: Partition,
    root: PathBuf,
    catalog: PartitionCatalog,
    object_store: Arc<TieredObjectStore>,
    digest_algorithm: DigestAlgorithm,
}

impl LibrarianStorage {
    /// Opens (creating if needed) the spool rooted at `root`.
    pub fn new(
        root: &Path,
        catalog: PartitionCatalog,
        object_store: Arc<TieredObjectStore>,
        digest_algorithm: DigestAlgorithm,
    ) -> anyhow::Result<Self> {
        for dir in [layout::INCOMING_DIR, layout::LOST_AND_FOUND_DIR] {
            std::fs::create_dir_all(root.join(dir))
                .map_err(|e| anyhow!("Failed to create {:?}: {}", root.join(dir), e))?;
        }
        let partition = catalog.partition();
        info!("Opened {} spool at {:?}", partition, root);
        Ok(Self {
            partition,
            root: root.to_path_buf(),
            catalog,
            object_store,
            digest_algorithm,
        })
    }

    pub fn partition(&self) -> Partition {
        self.partition
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn catalog(&self) -> &PartitionCatalog {
        &self.catalog
    }

    pub fn object_store(&self) -> &Arc<TieredObjectStore> {
        &self.object_store
    }

    pub fn digest_algorithm(&self) -> DigestAlgorithm {
        self.digest_algorithm
    }

    pub fn local_path(&self, content_id: ContentId) -> PathBuf {
        layout::absolute_path(&self.root, content_id)
    }

    pub fn exists_locally(&self, content_id: ContentId) -> bool {
        self.local_path(content_id).is_file()
    }

    pub fn begin_upload(&self) -> LibrarianResult<UploadHandle> {
        let temp = tempfile::Builder::new()
            .prefix("upload-")
            .tempfile_in(self.root.join(layout::INCOMING_DIR))?;
        let (file, temp_path) = temp.into_parts();
        Ok(UploadHandle {
            file: tokio::fs::File::from_std(file),
            temp_path,
            hasher: self.digest_algorithm.hasher(),
        })
    }

    /// Verify the upload and record it. On any error the temp file is gone
    /// and the catalog holds no trace of the upload.
    pub async fn commit(
        &self,
        handle: UploadHandle,
        request: CommitRequest,
    ) -> LibrarianResult<StoredFile> {
        let UploadHandle {
            mut file,
            temp_path,
            hasher,
        } = handle;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        let size = hasher.bytes_hashed();
        let digest = hasher.finalize_hex();

        if let Some(declared) = request.expected_size {
            if declared != size {
                return Err(LibrarianError::SizeMismatch {
                    declared,
                    received: size,
                });
            }
        }
        if let Some(expected) = &request.expected_digest {
            if !expected.eq_ignore_ascii_case(&digest) {
                return Err(LibrarianError::DigestMismatch {
                    expected: expected.to_ascii_lowercase(),
                    actual: digest,
                });
            }
        }

        let new_file = NewLibraryFile {
            filename: request.filename,
            mime_type: request.mime_type,
            expires: request.expires,
            size,
            digest: digest.clone(),
        };
        let catalog = self.catalog.clone();
        let root = self.root.clone();

        let (content_id, alias_id) = tokio::task::spawn_blocking(move || {
            let mut temp_path = Some(temp_path);
            let mut placed: Option<PathBuf> = None;
            let result = catalog.add_file(&new_file, &mut |content_id| {
                let temp = temp_path
                    .take()
                    .ok_or_else(|| anyhow!("upload already placed"))?;
                let final_path = layout::absolute_path(&root, content_id);
                if let Some(parent) = final_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                temp.persist_noclobber(&final_path)
                    .map_err(|e| anyhow!("Failed to place content {}: {}", content_id, e.error))?;
                placed = Some(final_path);
                Ok(())
            });
            if result.is_err() {
                if let Some(path) = placed {
                    if let Err(e) = std::fs::remove_file(&path) {
                        warn!("Failed to remove orphaned {:?}: {}", path, e);
                    }
                }
            }
            result
        })
        .await
        .map_err(|e| LibrarianError::Catalog(anyhow!("commit task failed: {}", e)))??;

        debug!(
            "Committed {} bytes as content {} alias {} in {}",
            size, content_id, alias_id, self.partition
        );
        Ok(StoredFile {
            content_id,
            alias_id,
            digest,
            size,
        })
    }

    /// Open committed bytes, local spool first, then object storage.
    pub async fn open(&self, content_id: ContentId) -> LibrarianResult<OpenedFile> {
        match tokio::fs::File::open(self.local_path(content_id)).await {
            Ok(file) => {
                let size = file.metadata().await?.len();
                return Ok(OpenedFile {
                    size,
                    source: OpenedSource::Local(file),
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        match self.object_store.get(content_id).await? {
            Some(body) => Ok(OpenedFile {
                size: body.size,
                source: OpenedSource::Remote(Box::pin(StreamReader::new(body.stream))),
            }),
            None => Err(LibrarianError::NotFound),
        }
    }

    /// Remove the spool file and any object store copy. Missing copies are
    /// not an error.
    pub async fn delete(&self, content_id: ContentId) -> LibrarianResult<()> {
        self.remove_local(content_id).await?;
        self.object_store.delete(content_id).await
    }

    /// Remove only the spool copy.
    pub async fn remove_local(&self, content_id: ContentId) -> LibrarianResult<bool> {
        match tokio::fs::remove_file(self.local_path(content_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Wipe every shard directory. See [`MaintenanceGuard`].
    pub fn clear_storage(
        &self,
        requested_host: &str,
        guard: &MaintenanceGuard,
    ) -> LibrarianResult<ClearReport> {
        guard.check(requested_host)?;
        maintenance::clear_shards(&self.root)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::catalog_store::{Catalog, SqliteCatalog};
    use crate::swift::{MemoryObjectStore, ObjectStoreStrategy};
    use std::time::Duration;
    use tempfile::TempDir;

    pub(crate) struct TestStorage {
        pub dir: TempDir,
        pub catalog: Arc<SqliteCatalog>,
        pub storage: Arc<LibrarianStorage>,
    }

    pub(crate) fn make_storage_with(
        partition: Partition,
        object_store: TieredObjectStore,
    ) -> TestStorage {
        let dir = TempDir::new().unwrap();
        let catalog = Arc::new(SqliteCatalog::new(dir.path().join("librarian.db")).unwrap());
        let storage = Arc::new(
            LibrarianStorage::new(
                &dir.path().join(partition.as_str()),
                PartitionCatalog::new(catalog.clone(), partition),
                Arc::new(object_store),
                DigestAlgorithm::Sha256,
            )
            .unwrap(),
        );
        TestStorage {
            dir,
            catalog,
            storage,
        }
    }

    pub(crate) fn make_storage(partition: Partition) -> TestStorage {
        make_storage_with(partition, TieredObjectStore::disabled())
    }

    pub(crate) async fn store_bytes(
        storage: &LibrarianStorage,
        name: &str,
        data: &[u8],
    ) -> StoredFile {
        let mut handle = storage.begin_upload().unwrap();
        handle.write(data).await.unwrap();
        storage
            .commit(
                handle,
                CommitRequest {
                    filename: name.to_string(),
                    mime_type: "application/octet-stream".to_string(),
                    expected_size: Some(data.len() as u64),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
    }

    fn incoming_is_empty(storage: &LibrarianStorage) -> bool {
        std::fs::read_dir(storage.root().join(layout::INCOMING_DIR))
            .unwrap()
            .next()
            .is_none()
    }

    #[tokio::test]
    async fn commit_places_file_and_records_rows() {
        let t = make_storage(Partition::Public);
        let data = b"abc\0defg";
        let stored = store_bytes(&t.storage, "a.bin", data).await;

        assert_eq!(stored.size, 8);
        assert_eq!(stored.digest, DigestAlgorithm::Sha256.digest_bytes(data));
        assert!(t.storage.exists_locally(stored.content_id));
        assert!(incoming_is_empty(&t.storage));

        let resolved = t
            .catalog
            .get_alias(Partition::Public, stored.alias_id)
            .unwrap()
            .unwrap();
        assert_eq!(resolved.content.digest, stored.digest);

        let opened = t.storage.open(stored.content_id).await.unwrap();
        assert!(opened.is_local());
        assert_eq!(opened.read_all().await.unwrap(), data);
    }

    #[tokio::test]
    async fn digest_mismatch_leaves_no_trace() {
        let t = make_storage(Partition::Public);
        let mut handle = t.storage.begin_upload().unwrap();
        handle.write(b"payload").await.unwrap();
        let err = t
            .storage
            .commit(
                handle,
                CommitRequest {
                    filename: "a".to_string(),
                    mime_type: "text/plain".to_string(),
                    expected_digest: Some("00".repeat(32)),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, LibrarianError::DigestMismatch { .. }));
        assert!(incoming_is_empty(&t.storage));
        assert_eq!(t.catalog.stats(Partition::Public).unwrap().content_count, 0);
    }

    #[tokio::test]
    async fn size_mismatch_is_rejected() {
        let t = make_storage(Partition::Public);
        let mut handle = t.storage.begin_upload().unwrap();
        handle.write(b"short").await.unwrap();
        let err = t
            .storage
            .commit(
                handle,
                CommitRequest {
                    filename: "a".to_string(),
                    mime_type: "text/plain".to_string(),
                    expected_size: Some(10),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LibrarianError::SizeMismatch {
                declared: 10,
                received: 5
            }
        ));
        assert!(incoming_is_empty(&t.storage));
    }

    #[tokio::test]
    async fn dropped_upload_removes_temp_file() {
        let t = make_storage(Partition::Public);
        let mut handle = t.storage.begin_upload().unwrap();
        handle.write(b"partial").await.unwrap();
        let temp = handle.temp_path().to_path_buf();
        assert!(temp.exists());
        drop(handle);
        assert!(!temp.exists());
    }

    #[tokio::test]
    async fn identical_uploads_get_distinct_ids() {
        let t = make_storage(Partition::Public);
        let first = store_bytes(&t.storage, "a", b"same").await;
        let second = store_bytes(&t.storage, "b", b"same").await;
        assert_ne!(first.content_id, second.content_id);
        assert_eq!(first.digest, second.digest);
        assert!(t.storage.exists_locally(first.content_id));
        assert!(t.storage.exists_locally(second.content_id));
    }

    #[tokio::test]
    async fn commit_never_overwrites_existing_path() {
        let t = make_storage(Partition::Public);
        // Squat on the path the next content id will use.
        let squatted = t.storage.local_path(1);
        std::fs::create_dir_all(squatted.parent().unwrap()).unwrap();
        std::fs::write(&squatted, b"existing").unwrap();

        let mut handle = t.storage.begin_upload().unwrap();
        handle.write(b"new").await.unwrap();
        let result = t
            .storage
            .commit(
                handle,
                CommitRequest {
                    filename: "a".to_string(),
                    mime_type: "text/plain".to_string(),
                    ..Default::default()
                },
            )
            .await;

        assert!(result.is_err());
        assert_eq!(std::fs::read(&squatted).unwrap(), b"existing");
        assert_eq!(t.catalog.stats(Partition::Public).unwrap().content_count, 0);
    }

    #[tokio::test]
    async fn open_falls_back_to_object_store() {
        let remote = Arc::new(MemoryObjectStore::new("memory"));
        let t = make_storage_with(
            Partition::Public,
            TieredObjectStore::new(
                ObjectStoreStrategy::Single(remote.clone()),
                Duration::from_secs(5),
            ),
        );
        let stored = store_bytes(&t.storage, "a", b"0123456789").await;
        remote.insert(stored.content_id, &b"0123456789"[..]);
        assert!(t.storage.remove_local(stored.content_id).await.unwrap());

        let opened = t.storage.open(stored.content_id).await.unwrap();
        assert!(!opened.is_local());
        let mut reader = opened.into_reader(3, 4).await.unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"3456");
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let t = make_storage(Partition::Public);
        let stored = store_bytes(&t.storage, "a", b"x").await;
        t.storage.delete(stored.content_id).await.unwrap();
        t.storage.delete(stored.content_id).await.unwrap();
        assert!(matches!(
            t.storage.open(stored.content_id).await,
            Err(LibrarianError::NotFound)
        ));
    }
}
