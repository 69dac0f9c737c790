use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use fundscout_client::{HtmlListingParser, ReqwestTransport};
use fundscout_core::traits::{GrantStore, NullStore, RunLogStore};
use fundscout_core::{AppConfig, AppError, Orchestrator, ScrapeContext, TracingScrapeReporter};
use fundscout_db::{Database, DatabaseConfig};

#[derive(Parser)]
#[command(name = "fundscout", version, about = "Grant discovery scraper")]
struct Cli {
    /// Path to the source catalog (JSON)
    #[arg(long, global = true, env = "FUNDSCOUT_SOURCES_FILE")]
    sources: Option<PathBuf>,

    /// Abort the whole command after this many seconds
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered sources
    Sources,

    /// Scrape one source
    Run {
        /// Source id from the catalog
        #[arg(short, long)]
        source: String,

        /// Scrape and normalize without touching the database
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },

    /// Scrape every source concurrently
    RunAll {
        /// Scrape and normalize without touching the database
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },

    /// Check reachability of every source's base URL
    Health,

    /// Show recent run logs
    Runs {
        /// Only runs of this source
        #[arg(short, long)]
        source: Option<String>,

        /// Number of results to show
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("fundscout=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.sources)?;
    tracing::debug!(sources = config.catalog.sources.len(), "Configuration loaded");
    let transport =
        ReqwestTransport::from_config(&config).context("Failed to create HTTP client")?;
    let ctx = ScrapeContext::new(config, transport);

    let outcome = with_deadline(cli.timeout_secs, dispatch(cli.command, ctx.clone())).await;
    ctx.shutdown().await;
    outcome
}

fn load_config(sources: Option<PathBuf>) -> Result<AppConfig> {
    let config = match sources {
        Some(path) => AppConfig::from_lookup(|key| {
            if key == "FUNDSCOUT_SOURCES_FILE" {
                Some(path.display().to_string())
            } else {
                std::env::var(key).ok()
            }
        }),
        None => AppConfig::from_env(),
    };
    config.context("Failed to load configuration")
}

async fn with_deadline(
    timeout_secs: Option<u64>,
    work: impl Future<Output = Result<()>>,
) -> Result<()> {
    match timeout_secs {
        None => work.await,
        Some(secs) => tokio::time::timeout(Duration::from_secs(secs), work)
            .await
            .map_err(|_| anyhow::anyhow!(AppError::Timeout(secs)))?,
    }
}

async fn dispatch(command: Commands, ctx: ScrapeContext<ReqwestTransport>) -> Result<()> {
    let parser = HtmlListingParser::new()?;

    match command {
        Commands::Sources => {
            for source in &ctx.config().catalog.sources {
                println!("{:<24} {}", source.source_id, source.base_url);
                if !source.description.is_empty() {
                    println!("{:<24} {}", "", source.description);
                }
            }
        }
        Commands::Health => {
            let orchestrator = dry_run(ctx, parser)?;
            let reports = orchestrator.health().await;
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }
        Commands::Run { source, dry_run: true } => {
            let orchestrator = dry_run(ctx, parser)?;
            cmd_run(&orchestrator, &source).await?;
        }
        Commands::Run { source, dry_run: false } => {
            let db = connect_db().await?;
            let orchestrator = Orchestrator::new(
                ctx,
                parser,
                db.grant_repo(),
                db.run_log_repo(),
                TracingScrapeReporter,
            )?;
            cmd_run(&orchestrator, &source).await?;
        }
        Commands::RunAll { dry_run: true } => {
            let orchestrator = dry_run(ctx, parser)?;
            cmd_run_all(&orchestrator).await?;
        }
        Commands::RunAll { dry_run: false } => {
            let db = connect_db().await?;
            let orchestrator = Orchestrator::new(
                ctx,
                parser,
                db.grant_repo(),
                db.run_log_repo(),
                TracingScrapeReporter,
            )?;
            cmd_run_all(&orchestrator).await?;
        }
        Commands::Runs { source, limit } => {
            let db = connect_db().await?;
            let runs = db.run_log_repo().recent_runs(source.as_deref(), limit).await?;
            if runs.is_empty() {
                println!("No runs recorded");
            }
            for run in runs {
                println!(
                    "{}  {:<24} {:<8} found={} added={} updated={} {}s{}",
                    run.start_time.format("%Y-%m-%d %H:%M:%S"),
                    run.source_name,
                    run.status,
                    run.grants_found,
                    run.grants_added,
                    run.grants_updated,
                    run.duration_seconds.unwrap_or(0),
                    run.error_message
                        .map(|e| format!("  ({e})"))
                        .unwrap_or_default(),
                );
            }
        }
    }

    Ok(())
}

type DryRunOrchestrator =
    Orchestrator<ReqwestTransport, HtmlListingParser, NullStore, NullStore, TracingScrapeReporter>;

fn dry_run(
    ctx: ScrapeContext<ReqwestTransport>,
    parser: HtmlListingParser,
) -> Result<DryRunOrchestrator> {
    Ok(Orchestrator::new(
        ctx,
        parser,
        NullStore,
        NullStore,
        TracingScrapeReporter,
    )?)
}

/// Connect to PostgreSQL using DATABASE_URL and apply migrations.
async fn connect_db() -> Result<Database> {
    let config = DatabaseConfig::from_env()?;
    let db = Database::connect(&config)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await?;
    Ok(db)
}

async fn cmd_run<G, L>(
    orchestrator: &Orchestrator<ReqwestTransport, HtmlListingParser, G, L, TracingScrapeReporter>,
    source: &str,
) -> Result<()>
where
    G: GrantStore + 'static,
    L: RunLogStore + 'static,
{
    let result = orchestrator.run_source(source).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn cmd_run_all<G, L>(
    orchestrator: &Orchestrator<ReqwestTransport, HtmlListingParser, G, L, TracingScrapeReporter>,
) -> Result<()>
where
    G: GrantStore + 'static,
    L: RunLogStore + 'static,
{
    let results = orchestrator.run_all().await;
    let total = results.len();

    let mut failed = 0;
    let mut report = BTreeMap::new();
    for (source, result) in results {
        let entry = match result {
            Ok(run) => serde_json::to_value(&run)?,
            Err(e) => {
                failed += 1;
                json!({ "source_id": source, "error": e.to_string() })
            }
        };
        report.insert(source, entry);
    }
    println!("{}", serde_json::to_string_pretty(&report)?);

    if failed > 0 {
        anyhow::bail!("{failed} of {total} sources failed");
    }
    Ok(())
}
