use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use librarian::background_jobs::JobScheduler;
use librarian::config::{AppConfig, CliConfig, FileConfig};
use librarian::server::{metrics, run_metrics_server};
use librarian::{Librarian, Partition, RequestsLoggingLevel};
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Serve {
    Public,
    Restricted,
    Both,
}

impl Serve {
    fn partitions(self) -> Vec<Partition> {
        match self {
            Serve::Public => vec![Partition::Public],
            Serve::Restricted => vec![Partition::Restricted],
            Serve::Both => vec![Partition::Public, Partition::Restricted],
        }
    }
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Directory holding the catalog database and, by default, both spools.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// Path to a TOML config file. Its values override the CLI.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Which partitions this process serves.
    #[clap(long, value_enum, default_value_t = Serve::Both)]
    pub partition: Serve,

    /// Added to every configured port, so several workers can share a host.
    #[clap(long, default_value_t = 0)]
    pub worker_index: u16,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = 9095)]
    pub metrics_port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// The maximum age of public content in HTTP caches, in seconds.
    #[clap(long, default_value_t = 86400)]
    pub content_cache_age_sec: usize,

    /// Hostname this deployment is reached at.
    #[clap(long)]
    pub public_hostname: Option<String>,

    /// `host:port` of the librarian public misses are forwarded to.
    #[clap(long)]
    pub public_upstream: Option<String>,

    /// `host:port` of the librarian restricted misses are forwarded to.
    #[clap(long)]
    pub restricted_upstream: Option<String>,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            db_dir: self.db_dir.clone(),
            worker_index: self.worker_index,
            metrics_port: self.metrics_port,
            logging_level: self.logging_level.clone(),
            content_cache_age_sec: self.content_cache_age_sec,
            public_hostname: self.public_hostname.clone(),
            public_upstream: self.public_upstream.clone(),
            restricted_upstream: self.restricted_upstream.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    info!("Librarian revision {}", env!("LIBRARIAN_REVISION"));

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;

    info!("Initializing metrics...");
    metrics::init_metrics();

    let librarian = Librarian::open(config)?;
    let shutdown = CancellationToken::new();
    let mut tasks = Vec::new();
    let mut scheduler = JobScheduler::new(shutdown.child_token());

    for partition in cli_args.partition.partitions() {
        let (upload, download) = librarian.bind(partition).await?;
        tasks.extend(librarian.serve(partition, upload, download, shutdown.clone())?);
        librarian.register_jobs(partition, &mut scheduler).await;
    }

    let metrics_port = librarian.config().metrics_port;
    let metrics_listener = TcpListener::bind(("0.0.0.0", metrics_port))
        .await
        .with_context(|| format!("Failed to bind metrics port {}", metrics_port))?;
    let metrics_shutdown = shutdown.clone();
    tasks.push(tokio::spawn(async move {
        if let Err(e) = run_metrics_server(metrics_listener, metrics_shutdown).await {
            error!("Metrics server failed: {:#}", e);
        }
    }));

    info!(
        "Starting background job scheduler with {} jobs",
        scheduler.job_count().await
    );
    let scheduler_task = tokio::spawn(async move { scheduler.run().await });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down...");
    shutdown.cancel();

    for task in tasks {
        if let Err(e) = task.await {
            warn!("Server task ended abnormally: {}", e);
        }
    }
    if tokio::time::timeout(Duration::from_secs(35), scheduler_task)
        .await
        .is_err()
    {
        warn!("Background jobs did not stop in time");
    }
    info!("Bye");
    Ok(())
}
