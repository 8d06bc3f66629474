use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod config;
mod telemetry;

use config::{default_config_path, AppConfig};
use crawl_sources::{build_registry, HttpClient, PrivateFeedRegistry};
use crawl_sync::{ArchiveLayout, ProgressChannel, ProgressEvent, RunContext, SourcePreview, SyncOrchestrator};
use telemetry::TelemetryConfig;

#[derive(Parser)]
#[command(name = "crawlavator")]
#[command(about = "Incrementally archive podcast feeds and other content sources")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (overrides the configuration file)
    #[arg(short, long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Download everything new from the enabled sources
    Sync {
        /// Only sync these source ids (repeatable)
        #[arg(short, long = "source")]
        sources: Vec<String>,

        /// Enumerate and reconcile, but download nothing
        #[arg(long)]
        dry_run: bool,

        /// Download at most N new items per source
        #[arg(long)]
        limit: Option<usize>,

        /// Try items again that were denied access on earlier runs
        #[arg(long)]
        retry_restricted: bool,

        /// Print progress events as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// List registered sources
    Sources,
    /// Show recent sync runs
    Log {
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },
    /// Manage private RSS feeds
    Feeds {
        #[command(subcommand)]
        action: FeedActions,
    },
    /// Inspect or edit the archive manifest
    Manifest {
        #[command(subcommand)]
        action: ManifestActions,
    },
    /// Validate configuration
    Config {
        #[command(subcommand)]
        action: ConfigActions,
    },
}

#[derive(Subcommand)]
enum FeedActions {
    /// Validate and register a feed
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        url: String,
        #[arg(long)]
        author: Option<String>,
    },
    /// Remove a feed by id
    Remove { id: String },
    /// List registered feeds
    List,
}

#[derive(Subcommand)]
enum ManifestActions {
    /// Per-source entry counts
    Summary,
    /// Drop one entry so the item is considered again
    Forget { source: String, item: String },
}

#[derive(Subcommand)]
enum ConfigActions {
    /// Validate configuration file
    Validate,
    /// Show current configuration
    Show,
    /// Generate default configuration
    Generate {
        /// Output path for configuration
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);

    if let Commands::Config { action } = &cli.command {
        let _telemetry = telemetry::init(&TelemetryConfig::default(), cli.log_level.as_deref())?;
        return match action {
            ConfigActions::Validate => validate_config(&config_path).await,
            ConfigActions::Show => show_config(&config_path).await,
            ConfigActions::Generate { output } => generate_config(output.as_deref()).await,
        };
    }

    let config = AppConfig::load_or_default(&config_path).await?;
    let guard = telemetry::init(&config.telemetry, cli.log_level.as_deref())?;
    debug!(session_id = %guard.session_id(), config = %config_path.display(), "Configuration loaded");
    config.validate()?;

    match cli.command {
        Commands::Sync {
            sources,
            dry_run,
            limit,
            retry_restricted,
            json,
        } => run_sync(&config, &sources, dry_run, limit, retry_restricted, json).await,
        Commands::Sources => list_sources(&config),
        Commands::Log { limit } => show_log(&config, limit).await,
        Commands::Feeds { action } => manage_feeds(&config, action).await,
        Commands::Manifest { action } => manage_manifest(&config, action).await,
        Commands::Config { .. } => Ok(()),
    }
}

async fn run_sync(
    config: &AppConfig,
    selected: &[String],
    dry_run: bool,
    limit: Option<usize>,
    retry_restricted: bool,
    json: bool,
) -> Result<()> {
    let http = HttpClient::new(config.http_options())?;
    let registry = build_registry(&config.sources, &config.archive.private_feeds_file, &http)?;
    let sources = registry.select(selected)?;
    if sources.is_empty() {
        bail!("No sources enabled");
    }

    let orchestrator = SyncOrchestrator::new(
        config.sync_options(limit, retry_restricted),
        config.manifest_store(),
        config.sync_log(),
    )?;

    let cancel = CancellationToken::new();
    let ctx = RunContext::new(ArchiveLayout::new(&config.archive.root)).with_cancel(cancel.clone());
    info!(run_id = %ctx.run_id, sources = sources.len(), dry_run, root = %config.archive.root.display(), "Starting sync");

    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; stopping after the current item");
            interrupt.cancel();
        }
    });

    let (reporter, mut channel) = ProgressChannel::new(config.download.event_buffer);
    let printer = tokio::spawn(async move {
        while let Some(event) = channel.recv().await {
            if json {
                match serde_json::to_string(&event) {
                    Ok(line) => println!("{}", line),
                    Err(e) => debug!(error = %e, "Unserializable progress event"),
                }
            } else if let Some(line) = format_event(&event) {
                println!("{}", line);
            }
        }
    });

    if dry_run {
        let previews = orchestrator.preview(&sources, &ctx, &reporter).await;
        drop(reporter);
        let _ = printer.await;
        if !json {
            print_previews(&previews);
        }
        return Ok(());
    }

    let run = orchestrator.run(&sources, &ctx, &reporter).await;
    let dropped = reporter.dropped();
    drop(reporter);
    let _ = printer.await;

    if dropped > 0 {
        debug!(dropped, "Progress events dropped");
    }
    if !json {
        println!();
        println!("{}", run.summary());
    }
    Ok(())
}

/// One console line per event; the final summary is printed separately
fn format_event(event: &ProgressEvent) -> Option<String> {
    match event {
        ProgressEvent::Status { message } => Some(format!("  {}", message)),
        ProgressEvent::Progress {
            source_id,
            percent,
            message,
            ..
        } => Some(format!("[{:>3}%] {}: {}", percent, source_id, message)),
        ProgressEvent::Warning { message, source_id } => Some(match source_id {
            Some(id) => format!("  warning ({}): {}", id, message),
            None => format!("  warning: {}", message),
        }),
        ProgressEvent::Error { message, source_id } => Some(match source_id {
            Some(id) => format!("  error ({}): {}", id, message),
            None => format!("  error: {}", message),
        }),
        ProgressEvent::SourceComplete { result } => Some(match &result.error {
            Some(error) => format!("✗ {} failed: {}", result.source_name, error),
            None => format!(
                "✓ {}: {} downloaded, {} already local, {} errors",
                result.source_name, result.downloaded, result.local, result.download_errors
            ),
        }),
        ProgressEvent::Complete { .. } => None,
    }
}

fn print_previews(previews: &[SourcePreview]) {
    for preview in previews {
        println!();
        if let Some(error) = &preview.error {
            println!("{} ({}): failed: {}", preview.source_name, preview.source_id, error);
            continue;
        }
        let counts = &preview.counts;
        println!(
            "{} ({}): {} indexed, {} local, {} to fetch, {} deferred, {} restricted, {} missing locator, {} type excluded",
            preview.source_name,
            preview.source_id,
            counts.indexed,
            counts.local,
            counts.to_fetch,
            counts.deferred,
            counts.restricted,
            counts.missing_locator,
            counts.type_excluded
        );
        for item in &preview.to_fetch {
            let date = item.date.map(|d| d.to_string()).unwrap_or_default();
            println!("  + {:<10} {}", date, item.title);
        }
    }
}

fn list_sources(config: &AppConfig) -> Result<()> {
    let http = HttpClient::new(config.http_options())?;
    let registry = build_registry(&config.sources, &config.archive.private_feeds_file, &http)?;

    println!("{:<24} {:<32} {:<6} {}", "ID", "NAME", "AUTH", "ASSETS");
    for descriptor in registry.descriptors() {
        let assets: Vec<&str> = descriptor.asset_types.iter().map(|a| a.as_str()).collect();
        println!(
            "{:<24} {:<32} {:<6} {}",
            descriptor.id,
            descriptor.name,
            if descriptor.requires_auth { "yes" } else { "no" },
            assets.join(",")
        );
    }
    Ok(())
}

async fn show_log(config: &AppConfig, limit: usize) -> Result<()> {
    let runs = config.sync_log().recent(limit).await?;
    if runs.is_empty() {
        println!("No sync runs recorded in {}", config.sync_log().path().display());
        return Ok(());
    }

    for run in runs {
        println!(
            "{}  {}  {} sources  {} downloaded  {} local  {} errors  {} failed sources{}",
            run.timestamp.format("%Y-%m-%d %H:%M:%S"),
            run.run_id,
            run.sources.len(),
            run.totals.downloaded,
            run.totals.local,
            run.totals.errors,
            run.totals.failed_sources,
            if run.cancelled { "  (cancelled)" } else { "" }
        );
    }
    Ok(())
}

async fn manage_feeds(config: &AppConfig, action: FeedActions) -> Result<()> {
    let registry = PrivateFeedRegistry::new(&config.archive.private_feeds_file);

    match action {
        FeedActions::Add { name, url, author } => {
            let http = HttpClient::new(config.http_options())?;
            let feed = registry.add(&http, &name, &url, author.as_deref()).await?;
            println!("✓ Added '{}' as {}", feed.name, feed.id);
        }
        FeedActions::Remove { id } => {
            let feed = registry.remove(&id).await?;
            println!("✓ Removed '{}'", feed.name);
        }
        FeedActions::List => {
            let feeds = registry.list().await?;
            if feeds.is_empty() {
                println!("No private feeds registered");
            }
            for feed in feeds {
                println!(
                    "{:<24} {:<32} {} (added {})",
                    feed.id,
                    feed.name,
                    feed.url,
                    feed.added_date.format("%Y-%m-%d")
                );
            }
        }
    }
    Ok(())
}

async fn manage_manifest(config: &AppConfig, action: ManifestActions) -> Result<()> {
    let store = config.manifest_store();
    let mut manifest = store.load().await?;

    match action {
        ManifestActions::Summary => {
            println!("{:<24} {:>8} {:>10} {:>6} {:>12}", "SOURCE", "COMPLETE", "RESTRICTED", "FAILED", "BYTES");
            for summary in manifest.summary() {
                println!(
                    "{:<24} {:>8} {:>10} {:>6} {:>12}",
                    summary.source_id, summary.complete, summary.restricted, summary.failed, summary.total_bytes
                );
            }
            if let Some(last) = manifest.last_sync {
                println!("Last sync: {}", last.format("%Y-%m-%d %H:%M:%S"));
            }
        }
        ManifestActions::Forget { source, item } => {
            let Some(entry) = manifest.forget(&source, &item) else {
                bail!("No manifest entry for {} / {}", source, item);
            };
            store.save(&manifest).await?;
            println!("✓ Forgot {} ({})", item, entry.path.display());
        }
    }
    Ok(())
}

async fn validate_config(path: &Path) -> Result<()> {
    info!("Validating configuration at {}", path.display());

    let config = AppConfig::load(path).await?;
    match config.validate() {
        Ok(()) => {
            println!("✓ Configuration is valid");
            println!("Archive root: {}", config.archive.root.display());
            println!("Sources configured: {}", config.sources.len());
            Ok(())
        }
        Err(e) => {
            println!("✗ Configuration validation failed: {}", e);
            Err(e)
        }
    }
}

async fn show_config(path: &Path) -> Result<()> {
    let config = AppConfig::load_or_default(path).await?;
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

async fn generate_config(output_path: Option<&Path>) -> Result<()> {
    let config = AppConfig::default();

    if let Some(path) = output_path {
        config.save(path).await?;
        println!("Configuration generated at {}", path.display());
    } else {
        println!("{}", toml::to_string_pretty(&config)?);
    }

    Ok(())
}
