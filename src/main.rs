use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use proposal_tracker::analyzer::{Analyzer, ClaudeCliAnalyzer, NoopAnalyzer};
use proposal_tracker::config::{Config, ConfigOverrides};
use proposal_tracker::git::GitCli;
use proposal_tracker::output::csv::{events_to_csv, stored_events_to_csv};
use proposal_tracker::output::json::render_json;
use proposal_tracker::output::table::{
    render_events_table, render_status_table, render_stored_events_table, render_trackers_table,
};
use proposal_tracker::proposal::TrackerType;
use proposal_tracker::report::{
    aggregate, filter_high_priority, publish, ReportSink, StdoutSink, WebhookSink,
};
use proposal_tracker::snapshot::SnapshotStore;
use proposal_tracker::tracking::{check_all, sync_trackers, CheckAllResult, ProposalTracker};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
    Csv,
}

#[derive(Debug, Parser)]
#[command(
    name = "proposal-tracker",
    about = "Track EIP, PEP, Rust RFC and Django DEP repositories for proposal changes"
)]
struct Cli {
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,
    #[arg(long)]
    db: Option<String>,
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    output: OutputFormat,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Reconcile stored trackers with the config file
    Sync,
    /// Sync, then check every tracker for new proposal events
    Check {
        #[arg(long)]
        concurrency: Option<usize>,
        #[arg(long = "tracker-type")]
        tracker_type: Option<TrackerType>,
    },
    Trackers,
    Events {
        #[arg(long, default_value_t = 50)]
        limit: usize,
        #[arg(long = "tracker-type")]
        tracker_type: Option<TrackerType>,
    },
    Config {
        #[arg(long)]
        init: bool,
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load(Some(&config_path))?;
    config.apply_overrides(ConfigOverrides {
        db_path: cli.db.clone(),
        concurrency: match &cli.command {
            Commands::Check { concurrency, .. } => *concurrency,
            _ => None,
        },
    });

    if let Commands::Config { init, show } = &cli.command {
        return handle_config_command(*init, *show, &config, &config_path);
    }

    let store = Arc::new(SnapshotStore::open(&config.resolved_db_path())?);

    match &cli.command {
        Commands::Sync => {
            let summary = sync_trackers(&store, &config.trackers)?;
            match cli.output {
                OutputFormat::Table => println!(
                    "trackers: {} created, {} updated, {} deleted, {} total",
                    summary.created, summary.updated, summary.deleted, summary.total
                ),
                _ => println!("{}", render_json(&summary)?),
            }
        }
        Commands::Check { tracker_type, .. } => {
            let summary = sync_trackers(&store, &config.trackers)?;
            info!(
                "synced trackers: {} created, {} updated, {} deleted",
                summary.created, summary.updated, summary.deleted
            );
            let trackers = store
                .list_trackers()?
                .into_iter()
                .filter(|t| tracker_type.map_or(true, |wanted| t.tracker_type == wanted))
                .collect::<Vec<_>>();
            if trackers.is_empty() {
                warn!("no trackers configured; add [[trackers]] entries to {}", config_path.display());
            }

            let orchestrator = Arc::new(ProposalTracker::new(
                store.clone(),
                Arc::new(GitCli::new(
                    config.resolved_workspace_dir(),
                    config.git_timeout(),
                )),
                build_analyzer(&config),
            ));
            let result = check_all(orchestrator, trackers, config.check.concurrency).await;
            print_check(&result, cli.output)?;
            send_report(&config, &result, cli.output).await?;
        }
        Commands::Trackers => {
            let trackers = store.list_trackers()?;
            match cli.output {
                OutputFormat::Table => println!("{}", render_trackers_table(&trackers)),
                OutputFormat::Json => println!("{}", render_json(&trackers)?),
                OutputFormat::Csv => {
                    warn!("CSV output for trackers not implemented, using JSON");
                    println!("{}", render_json(&trackers)?);
                }
            }
        }
        Commands::Events {
            limit,
            tracker_type,
        } => {
            let events = store.recent_events(*limit, *tracker_type)?;
            match cli.output {
                OutputFormat::Table => println!("{}", render_stored_events_table(&events)),
                OutputFormat::Json => println!("{}", render_json(&events)?),
                OutputFormat::Csv => print!("{}", stored_events_to_csv(&events)?),
            }
        }
        Commands::Config { .. } => {}
    }

    Ok(())
}

fn handle_config_command(init: bool, show: bool, config: &Config, config_path: &Path) -> Result<()> {
    if init {
        Config::write_template(config_path)?;
        println!("Wrote config template to {}", config_path.display());
    }
    if show || !init {
        println!("{}", render_json(config)?);
    }
    Ok(())
}

fn build_analyzer(config: &Config) -> Arc<dyn Analyzer> {
    if !config.analyzer.enabled {
        return Arc::new(NoopAnalyzer);
    }
    Arc::new(ClaudeCliAnalyzer::new(
        config.analyzer.command.clone(),
        config.analyzer_timeout(),
        config.analyzer.language.clone(),
    ))
}

fn print_check(result: &CheckAllResult, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            if result.events.is_empty() {
                println!("No proposal events detected.");
            } else {
                println!("{}", render_events_table(&result.events));
            }
            println!("{}", render_status_table(&result.tracker_statuses));
            let (success, failed, skipped) = result.status_counts();
            println!("success={success} failed={failed} skipped={skipped}");
        }
        OutputFormat::Json => println!("{}", render_json(result)?),
        OutputFormat::Csv => print!("{}", events_to_csv(&result.events)?),
    }
    Ok(())
}

async fn send_report(config: &Config, result: &CheckAllResult, format: OutputFormat) -> Result<()> {
    let events = if config.notify.high_priority_only {
        filter_high_priority(&result.events)
    } else {
        result.events.clone()
    };
    let Some(report) = aggregate(&events) else {
        return Ok(());
    };

    let mut sinks: Vec<Box<dyn ReportSink>> = Vec::new();
    // machine-readable output owns stdout
    if config.notify.enable_stdout && format == OutputFormat::Table {
        sinks.push(Box::new(StdoutSink));
    }
    if !config.notify.webhook_url.is_empty() {
        sinks.push(Box::new(WebhookSink::new(config.notify.webhook_url.clone())?));
    }
    let delivered = publish(&sinks, &report).await;
    info!("report delivered to {delivered}/{} sinks", sinks.len());
    Ok(())
}
