//! Test server lifecycle management
//!
//! Each test gets an isolated librarian with its own catalog and spools,
//! serving both partitions on random ports.

use super::constants::*;
use librarian::config::{AppConfig, CliConfig};
use librarian::{Librarian, LibrarianClient, Partition, RequestsLoggingLevel};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Knobs tests may turn before the servers start.
#[derive(Default, Clone)]
pub struct TestOptions {
    /// `host:port` public misses are forwarded to
    pub public_upstream: Option<String>,
    /// `host:port` restricted misses are forwarded to
    pub restricted_upstream: Option<String>,
    pub public_hostname: Option<String>,
}

/// Where one partition of a test librarian listens.
#[derive(Clone, Debug)]
pub struct Endpoints {
    pub partition: Partition,
    /// `127.0.0.1:port` of the upload listener
    pub upload_addr: String,
    /// Base URL of the download listener (e.g., "http://127.0.0.1:12345")
    pub base_url: String,
}

impl Endpoints {
    /// `host:port` of the download listener, usable as an upstream.
    pub fn download_addr(&self) -> String {
        self.base_url.trim_start_matches("http://").to_string()
    }
}

/// Test librarian instance with isolated catalog and spools
///
/// When dropped, the servers shut down and temp resources are cleaned up.
pub struct TestLibrarian {
    pub librarian: Arc<Librarian>,
    pub public: Endpoints,
    pub restricted: Endpoints,

    // Private fields - keep resources alive until drop
    _temp_dir: TempDir,
    shutdown: CancellationToken,
}

impl TestLibrarian {
    pub async fn spawn() -> Self {
        Self::spawn_with(TestOptions::default()).await
    }

    /// Spawns a new librarian on random ports
    ///
    /// # Panics
    ///
    /// Panics if the config does not resolve, a port cannot be bound, or the
    /// servers do not become ready within the timeout.
    pub async fn spawn_with(options: TestOptions) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");

        let cli = CliConfig {
            db_dir: Some(temp_dir.path().to_path_buf()),
            logging_level: RequestsLoggingLevel::None,
            content_cache_age_sec: 3600,
            public_hostname: Some(
                options
                    .public_hostname
                    .unwrap_or_else(|| TEST_HOSTNAME.to_string()),
            ),
            public_upstream: options.public_upstream,
            restricted_upstream: options.restricted_upstream,
            ..Default::default()
        };
        let mut config = AppConfig::resolve(&cli, None).expect("Failed to resolve config");
        config.socket_timeout_secs = TEST_SOCKET_TIMEOUT_SECS;
        config.gc.grace_period_hours = 0;

        let librarian = Arc::new(Librarian::open(config).expect("Failed to open librarian"));
        let shutdown = CancellationToken::new();

        let public = Self::serve(&librarian, Partition::Public, &shutdown).await;
        let restricted = Self::serve(&librarian, Partition::Restricted, &shutdown).await;

        let server = Self {
            librarian,
            public,
            restricted,
            _temp_dir: temp_dir,
            shutdown,
        };
        server.wait_for_ready(&server.public).await;
        server.wait_for_ready(&server.restricted).await;
        server
    }

    async fn serve(
        librarian: &Librarian,
        partition: Partition,
        shutdown: &CancellationToken,
    ) -> Endpoints {
        let upload = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind upload port");
        let download = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind download port");
        let endpoints = Endpoints {
            partition,
            upload_addr: upload.local_addr().unwrap().to_string(),
            base_url: format!("http://{}", download.local_addr().unwrap()),
        };
        librarian
            .serve(partition, upload, download, shutdown.clone())
            .expect("Failed to start servers");
        endpoints
    }

    pub fn endpoints(&self, partition: Partition) -> &Endpoints {
        match partition {
            Partition::Public => &self.public,
            Partition::Restricted => &self.restricted,
        }
    }

    /// The library's own client, pointed at `partition`.
    pub fn client(&self, partition: Partition) -> LibrarianClient {
        let endpoints = self.endpoints(partition);
        LibrarianClient::new(
            endpoints.upload_addr.clone(),
            endpoints.base_url.clone(),
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
            self.librarian.config().digest_algorithm,
        )
        .expect("Failed to build client")
    }

    /// Waits for the download listener by polling /health
    async fn wait_for_ready(&self, endpoints: &Endpoints) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/health", endpoints.base_url)).send().await {
                Ok(response) if response.status().is_success() => return,
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

impl Drop for TestLibrarian {
    fn drop(&mut self) {
        self.shutdown.cancel();
        // TempDir will be cleaned up automatically
    }
}
