//! Wires the catalog, per-partition storage, listeners and jobs together.

use crate::background_jobs::jobs::{GarbageCollectionJob, SwiftFeedJob};
use crate::background_jobs::JobScheduler;
use crate::catalog_store::{PartitionCatalog, SqliteCatalog};
use crate::config::AppConfig;
use crate::gc::GarbageCollector;
use crate::partition::Partition;
use crate::server::{run_server, ServerConfig, ServerState, UpstreamProxy};
use crate::storage::{LibrarianStorage, MaintenanceGuard};
use crate::swift::{SwiftFeeder, TieredObjectStore};
use crate::upload::UploadServer;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub struct Librarian {
    config: AppConfig,
    catalog: Arc<SqliteCatalog>,
    public: Arc<LibrarianStorage>,
    restricted: Arc<LibrarianStorage>,
}

impl Librarian {
    /// Open the catalog and both spools, with the object store configured
    /// in `config.swift`.
    pub fn open(config: AppConfig) -> Result<Self> {
        let object_store = Arc::new(
            TieredObjectStore::from_settings(&config.swift)
                .context("Failed to configure the object store")?,
        );
        Self::open_with_object_store(config, object_store)
    }

    pub fn open_with_object_store(
        config: AppConfig,
        object_store: Arc<TieredObjectStore>,
    ) -> Result<Self> {
        let db_path = config.catalog_db_path();
        info!("Opening SQLite catalog database at {:?}...", db_path);
        let catalog = Arc::new(SqliteCatalog::new(&db_path)?);

        let open_storage = |partition: Partition| -> Result<Arc<LibrarianStorage>> {
            let settings = config.partition(partition);
            Ok(Arc::new(LibrarianStorage::new(
                &settings.root,
                PartitionCatalog::new(catalog.clone(), partition),
                object_store.clone(),
                config.digest_algorithm,
            )?))
        };
        let public = open_storage(Partition::Public)?;
        let restricted = open_storage(Partition::Restricted)?;

        Ok(Self {
            config,
            catalog,
            public,
            restricted,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<SqliteCatalog> {
        &self.catalog
    }

    pub fn storage(&self, partition: Partition) -> &Arc<LibrarianStorage> {
        match partition {
            Partition::Public => &self.public,
            Partition::Restricted => &self.restricted,
        }
    }

    pub fn maintenance_guard(&self) -> Result<MaintenanceGuard> {
        MaintenanceGuard::new(
            &self.config.public_hostname,
            &self.config.production_hostname_pattern,
        )
    }

    pub fn garbage_collector(&self, partition: Partition) -> GarbageCollector {
        GarbageCollector::new(self.storage(partition).clone(), self.config.gc.clone())
    }

    pub fn swift_feeder(&self, partition: Partition) -> SwiftFeeder {
        SwiftFeeder::new(self.storage(partition).clone(), &self.config.swift)
    }

    /// Bind both listeners of `partition` on their configured ports.
    pub async fn bind(&self, partition: Partition) -> Result<(TcpListener, TcpListener)> {
        let settings = self.config.partition(partition);
        let upload = TcpListener::bind(("0.0.0.0", settings.upload_port))
            .await
            .with_context(|| format!("Failed to bind {} upload port {}", partition, settings.upload_port))?;
        let download = TcpListener::bind(("0.0.0.0", settings.download_port))
            .await
            .with_context(|| {
                format!("Failed to bind {} download port {}", partition, settings.download_port)
            })?;
        Ok((upload, download))
    }

    /// Serve one partition on the given listeners until `shutdown` fires.
    pub fn serve(
        &self,
        partition: Partition,
        upload_listener: TcpListener,
        download_listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<Vec<JoinHandle<()>>> {
        let storage = self.storage(partition).clone();
        let settings = self.config.partition(partition);

        let proxy = match &settings.upstream {
            Some(upstream) => {
                info!("{} falls back to upstream {}", partition, upstream);
                Some(Arc::new(UpstreamProxy::new(
                    upstream,
                    self.config.socket_timeout(),
                )?))
            }
            None => None,
        };

        let server_config = ServerConfig {
            partition,
            requests_logging_level: self.config.logging_level.clone(),
            port: settings.download_port,
            content_cache_age_sec: self.config.content_cache_age_sec,
        };
        let state = ServerState::new(server_config, storage.clone(), proxy);

        let upload_server = Arc::new(UploadServer::new(
            storage,
            self.config.socket_timeout(),
            self.config.max_upload_size,
        ));

        let upload_shutdown = shutdown.clone();
        let upload_task = tokio::spawn(async move {
            upload_server.serve(upload_listener, upload_shutdown).await;
        });
        let download_task = tokio::spawn(async move {
            if let Err(e) = run_server(state, download_listener, shutdown).await {
                error!("Download server for {} failed: {:#}", partition, e);
            }
        });
        Ok(vec![upload_task, download_task])
    }

    /// Register the feeder and GC jobs of `partition`.
    pub async fn register_jobs(&self, partition: Partition, scheduler: &mut JobScheduler) {
        if self.storage(partition).object_store().is_enabled() {
            let interval = Duration::from_secs(self.config.swift.feed_interval_secs.max(1));
            scheduler
                .register_job(Arc::new(SwiftFeedJob::new(
                    self.swift_feeder(partition),
                    partition,
                    interval,
                )))
                .await;
        }

        let interval = Duration::from_secs(self.config.gc.interval_hours * 3600);
        scheduler
            .register_job(Arc::new(GarbageCollectionJob::new(
                self.garbage_collector(partition),
                partition,
                interval,
            )))
            .await;
    }
}
