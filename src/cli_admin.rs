use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use librarian::config::{AppConfig, CliConfig, FileConfig};
use librarian::{Librarian, Partition};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod cli_style;

use cli_style::{get_styles, print_error, print_key_value, print_section_header, print_success};

fn parse_path(s: &str) -> Result<PathBuf> {
    let original_path = PathBuf::from(s);
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
#[command(styles=get_styles())]
struct CliArgs {
    /// Directory holding the catalog database.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// Path to the TOML config file the server runs with.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Deletes every stored file of a partition. Refused unless `host` is
    /// this deployment's hostname and that hostname is not production.
    ClearStorage {
        #[clap(long)]
        host: String,
        #[clap(long, value_enum)]
        partition: Partition,
    },

    /// Runs one garbage collection sweep.
    Gc {
        #[clap(long, value_enum)]
        partition: Partition,
    },

    /// Copies unmigrated content into the object store once.
    FeedSwift {
        #[clap(long, value_enum)]
        partition: Partition,
    },

    /// Shows content counts and sizes.
    Stats {
        #[clap(long, value_enum)]
        partition: Partition,
    },
}

async fn execute(librarian: &Librarian, command: Command) -> Result<()> {
    let cancel = CancellationToken::new();
    match command {
        Command::ClearStorage { host, partition } => {
            let guard = librarian.maintenance_guard()?;
            let report = librarian
                .storage(partition)
                .clear_storage(&host, &guard)
                .with_context(|| format!("Cannot clear {} storage", partition))?;
            print_success(&format!(
                "Removed {} shard directories from {}",
                report.removed_shards, partition
            ));
            for entry in report.skipped_entries {
                print_key_value("left in place", &entry);
            }
        }
        Command::Gc { partition } => {
            let report = librarian.garbage_collector(partition).sweep(&cancel).await?;
            print_section_header(&format!("GC of {}", partition));
            print_key_value("expired aliases", &report.expired_aliases.to_string());
            print_key_value("repointed aliases", &report.repointed_aliases.to_string());
            print_key_value("deleted content", &report.deleted_content.to_string());
            print_key_value("deleted files", &report.deleted_files.to_string());
            print_key_value("content count", &report.content_count.to_string());
            print_key_value("total bytes", &report.total_bytes.to_string());
        }
        Command::FeedSwift { partition } => {
            if !librarian.storage(partition).object_store().is_enabled() {
                anyhow::bail!("No object store is configured");
            }
            let report = librarian.swift_feeder(partition).feed_once(&cancel).await?;
            print_section_header(&format!("Swift feed of {}", partition));
            print_key_value("migrated", &report.migrated.to_string());
            print_key_value("missing locally", &report.missing_locally.to_string());
            print_key_value("failed", &report.failed.to_string());
        }
        Command::Stats { partition } => {
            let stats = librarian.storage(partition).catalog().stats()?;
            print_section_header(&format!("{} partition", partition));
            print_key_value("content count", &stats.content_count.to_string());
            print_key_value("total bytes", &stats.total_bytes.to_string());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = cli_args.config.as_deref().map(FileConfig::load).transpose()?;
    let cli_config = CliConfig {
        db_dir: cli_args.db_dir.clone(),
        ..Default::default()
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;
    let librarian = Librarian::open(config)?;

    if let Err(e) = execute(&librarian, cli_args.command).await {
        print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
    Ok(())
}
