use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod ai;
mod app;
mod cli;
mod config;
mod db;
mod error;
mod extract;
mod ingest;
mod models;
mod report;
mod sources;

use app::{probe_sources, App};
use cli::{Cli, Command, Pipeline};
use config::Config;
use error::{AppError, Result};
use report::Tier;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match dispatch(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %e, "Aborted");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// `Ok(false)` means the command finished but something needs attention.
async fn dispatch(cli: Cli) -> Result<bool> {
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Scrape(pipeline) => {
            each_tracker(config, &pipeline, |app, tracker| {
                Box::pin(async move {
                    let summary = app.scrape(&tracker).await?;
                    println!("[{tracker}] {summary}");
                    for (source, reason) in &summary.failures {
                        println!("  failed: {source}: {reason}");
                    }
                    Ok(())
                })
            })
            .await
        }
        Command::Analyze(pipeline) => {
            each_tracker(config, &pipeline, |app, tracker| {
                Box::pin(async move {
                    let summary = app.analyze(&tracker).await?;
                    println!("[{tracker}] {summary}");
                    Ok(())
                })
            })
            .await
        }
        Command::Report { pipeline, tier } => {
            let tier = Tier::try_from(tier)?;
            each_tracker(config, &pipeline, move |app, tracker| {
                Box::pin(async move {
                    let (path, count) = app.report(&tracker, tier).await?;
                    println!("[{tracker}] {count} articles, {tier} -> {}", path.display());
                    Ok(())
                })
            })
            .await
        }
        Command::Run { pipeline, tier } => {
            let tier = tier.map(Tier::try_from).transpose()?;
            each_tracker(config, &pipeline, move |app, tracker| {
                Box::pin(async move { app.run(&tracker, tier).await })
            })
            .await
        }
        Command::List => list(config).await,
        Command::Validate { test_connections } => validate(&config, test_connections).await,
        Command::TestConnection => {
            let backend = ai::build_backend(&config.ai)?;
            println!("Testing {} ({})…", backend.provider(), backend.model_name());
            match backend.test_connection().await {
                Ok(reply) => {
                    println!("OK: {}", reply.trim());
                    Ok(true)
                }
                Err(e) => {
                    println!("Connection failed: {e}");
                    Ok(false)
                }
            }
        }
        Command::Search { value } => {
            let repository = db::Repository::new(&config.db_path).await?;
            let hits = repository.search_by_indicator(&value).await?;
            if hits.is_empty() {
                println!("No indicators matching '{value}'");
            }
            for hit in hits {
                let published = hit
                    .published_at
                    .map(|d| d.format("%Y-%m-%d").to_string())
                    .unwrap_or_else(|| "----------".to_string());
                println!(
                    "{published}  [{}] {} {}  {}\n            {}",
                    hit.tracker, hit.indicator.kind, hit.indicator.value, hit.title, hit.url
                );
            }
            Ok(true)
        }
    }
}

type TrackerJob<'a> =
    std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + 'a>>;

/// Run `job` for each selected tracker. A configuration problem stops only
/// its own tracker; store faults stop everything.
async fn each_tracker<F>(config: Config, pipeline: &Pipeline, job: F) -> Result<bool>
where
    F: for<'a> Fn(&'a App, String) -> TrackerJob<'a>,
{
    let trackers = config.selected_trackers(pipeline.tracker.as_deref())?;
    if trackers.is_empty() {
        println!("No enabled trackers configured in {}", Config::config_path().display());
        return Ok(true);
    }

    let app = App::new(config, pipeline.limits()).await?;
    let mut clean = true;
    for tracker in trackers {
        info!(tracker = %tracker, "Starting");
        match job(&app, tracker.clone()).await {
            Ok(()) => {}
            Err(e) if matches!(e, AppError::ConfigValidation { .. } | AppError::Config(_)) => {
                error!(tracker = %tracker, "Skipping tracker");
                eprintln!("{e}");
                clean = false;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(clean)
}

async fn list(config: Config) -> Result<bool> {
    let repository = db::Repository::new(&config.db_path).await?;
    for (name, tracker) in &config.trackers {
        let stats = repository.tracker_stats(name).await?;
        println!(
            "{name:<20} {:<30} {:>3} sources  {:>5} articles ({} pending, {} analyzed){}",
            tracker.display_name(name),
            tracker.sources.len(),
            stats.total,
            stats.pending,
            stats.analyzed,
            if tracker.enabled { "" } else { "  [disabled]" }
        );
    }
    Ok(true)
}

async fn validate(config: &Config, test_connections: bool) -> Result<bool> {
    let issues = config.validate();
    for issue in &issues {
        println!("{issue}");
    }
    if !issues.is_empty() {
        println!("{} problem(s) found", issues.len());
        return Ok(false);
    }
    println!("All source definitions are valid");

    if !test_connections {
        return Ok(true);
    }
    let mut reachable = true;
    for tracker in config.trackers.keys() {
        let sources = config.sources_for(tracker)?;
        for (name, outcome) in probe_sources(&sources).await? {
            match outcome {
                Ok(status) => println!("[{tracker}] {name}: HTTP {status}"),
                Err(e) => {
                    reachable = false;
                    println!("[{tracker}] {name}: {e}");
                }
            }
        }
    }
    Ok(reachable)
}
