//! Resale Scout command line
//!
//! Every command prints its result as JSON on stdout.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use resale_scout_lib::application::price_report::DEFAULT_PERIOD_DAYS;
use resale_scout_lib::application::{BatchOptions, ScoutContext, ScrapeOptions};
use resale_scout_lib::infrastructure::config::ConfigManager;
use resale_scout_lib::infrastructure::init_logging_with_config;
use resale_scout_lib::infrastructure::logging::log_system_info;

const DEFAULT_REFRESH_LIMIT: u32 = 50;

#[derive(Debug, Parser)]
#[command(name = "resale-scout")]
#[command(about = "Marketplace listing extraction, catalog matching and price drift monitoring")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
enum Command {
    /// Scrape one listing and store it
    Scrape {
        url: String,
        #[command(flatten)]
        options: ScrapeArgs,
    },
    /// Scrape many listings in bounded chunks
    Batch {
        #[arg(required_unless_present = "file")]
        urls: Vec<String>,
        /// File with one URL per line; `#` starts a comment
        #[arg(long)]
        file: Option<PathBuf>,
        #[command(flatten)]
        options: ScrapeArgs,
    },
    /// Re-verify monitored listings (all active ones when no id is given)
    Monitor { product_ids: Vec<i64> },
    /// Search the target catalog for a stored product
    Match { product_id: i64 },
    /// Price trend report
    Report {
        product_ids: Vec<i64>,
        #[arg(long, default_value_t = DEFAULT_PERIOD_DAYS)]
        days: i64,
    },
    /// Re-run matching for products with missing or old match sets
    RefreshMatches {
        /// Defaults to `matching.stale_after_days`
        #[arg(long)]
        max_age_days: Option<i64>,
        #[arg(long, default_value_t = DEFAULT_REFRESH_LIMIT)]
        limit: u32,
    },
    /// Stop monitoring a product
    Suspend { product_id: i64 },
    /// Resume monitoring a product
    Resume { product_id: i64 },
    /// Drop a product's inventory record; the product row is kept
    Archive { product_id: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Args)]
struct ScrapeArgs {
    /// Overwrite an already stored listing
    #[arg(long)]
    force: bool,
    #[arg(long)]
    download_images: bool,
}

impl From<ScrapeArgs> for ScrapeOptions {
    fn from(args: ScrapeArgs) -> Self {
        Self {
            force: args.force,
            download_images: args.download_images,
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn read_url_file(path: &Path) -> Result<Vec<String>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read URL list {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(ToString::to_string)
        .collect())
}

async fn run(context: &ScoutContext, command: Command, cancel: &CancellationToken) -> Result<()> {
    match command {
        Command::Scrape { url, options } => {
            let result = context.scraper.scrape_product(&url, options.into(), cancel).await;
            print_json(&result)
        }
        Command::Batch { mut urls, file, options } => {
            if let Some(path) = file {
                urls.extend(read_url_file(&path).await?);
            }
            let batch_options = BatchOptions::from_config(&context.config.batch, options.into());
            let report = context.batch.run_batch(&urls, batch_options, cancel).await;
            print_json(&report)
        }
        Command::Monitor { product_ids } => {
            let filter = (!product_ids.is_empty()).then_some(product_ids.as_slice());
            let report = context.monitor.run_check(filter, cancel).await?;
            print_json(&report)
        }
        Command::Match { product_id } => {
            let result = context.matcher.find_matches(product_id, cancel).await?;
            print_json(&result)
        }
        Command::Report { product_ids, days } => {
            let filter = (!product_ids.is_empty()).then_some(product_ids.as_slice());
            let report = context.reporter.generate_price_report(filter, days).await?;
            print_json(&report)
        }
        Command::RefreshMatches { max_age_days, limit } => {
            let max_age_days = max_age_days.unwrap_or(context.config.matching.stale_after_days);
            let report = context.matcher.refresh_stale_matches(max_age_days, limit, cancel).await?;
            print_json(&report)
        }
        Command::Suspend { product_id } => {
            let changed = context.monitor.suspend(product_id).await?;
            print_json(&serde_json::json!({ "productId": product_id, "monitoringEnabled": false, "changed": changed }))
        }
        Command::Resume { product_id } => {
            let changed = context.monitor.resume(product_id).await?;
            print_json(&serde_json::json!({ "productId": product_id, "monitoringEnabled": true, "changed": changed }))
        }
        Command::Archive { product_id } => {
            context.monitor.archive(product_id).await?;
            print_json(&serde_json::json!({ "productId": product_id, "archived": true }))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let Cli { command } = Cli::parse();

    let config = ConfigManager::new()?.load_config().await?;
    init_logging_with_config(&config.logging, &config.log_dir()?)?;
    log_system_info();

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling outstanding work");
            on_signal.cancel();
        }
    });

    let context = ScoutContext::from_config(config).await?;
    info!(?command, "Running command");
    run(&context, command, &cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Command, clap::Error> {
        Cli::try_parse_from(std::iter::once("resale-scout").chain(args.iter().copied())).map(|cli| cli.command)
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_scrape_with_switches_in_any_position() {
        let expected = Command::Scrape {
            url: "https://jp.mercari.com/item/m1".into(),
            options: ScrapeArgs {
                force: true,
                download_images: false,
            },
        };
        assert_eq!(parse(&["scrape", "--force", "https://jp.mercari.com/item/m1"]).unwrap(), expected);
        assert_eq!(parse(&["scrape", "https://jp.mercari.com/item/m1", "--force"]).unwrap(), expected);
    }

    #[test]
    fn parses_report_with_days_and_ids() {
        assert_eq!(
            parse(&["report", "3", "--days", "14", "7"]).unwrap(),
            Command::Report {
                product_ids: vec![3, 7],
                days: 14
            }
        );
        assert_eq!(
            parse(&["report"]).unwrap(),
            Command::Report {
                product_ids: vec![],
                days: DEFAULT_PERIOD_DAYS
            }
        );
    }

    #[test]
    fn batch_accepts_a_url_file_alone() {
        let command = parse(&["batch", "--file", "urls.txt", "--download-images"]).unwrap();
        assert_eq!(
            command,
            Command::Batch {
                urls: vec![],
                file: Some(PathBuf::from("urls.txt")),
                options: ScrapeArgs {
                    force: false,
                    download_images: true,
                },
            }
        );
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["explode"]).is_err());
        assert!(parse(&["match"]).is_err());
        assert!(parse(&["match", "abc"]).is_err());
        assert!(parse(&["batch"]).is_err());
        assert!(parse(&["monitor", "--verbose"]).is_err());
        assert!(parse(&["report", "--days"]).is_err());
    }

    #[test]
    fn refresh_defaults_to_configured_age() {
        assert_eq!(
            parse(&["refresh-matches", "--limit", "5"]).unwrap(),
            Command::RefreshMatches {
                max_age_days: None,
                limit: 5
            }
        );
        assert_eq!(
            parse(&["refresh-matches"]).unwrap(),
            Command::RefreshMatches {
                max_age_days: None,
                limit: DEFAULT_REFRESH_LIMIT
            }
        );
    }

    #[test]
    fn archive_takes_a_product_id() {
        assert_eq!(parse(&["archive", "42"]).unwrap(), Command::Archive { product_id: 42 });
        assert!(parse(&["archive"]).is_err());
    }
}
