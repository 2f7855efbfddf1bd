//! SheetFX Binary
//!
//! Look up rates, refresh the rate cache and convert spreadsheet ranges.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sheetfx_common::parse_supported;
use sheetfx_fx::{
    ApiStatus, ConversionEngine, ConversionRequest, HttpRateProvider, RateCache, RateResolver,
    RefreshStrategy,
};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sheetfx_cli::{AppConfig, ConversionSession, Selection, SpreadsheetBinding, XlsxWorkbook};

/// SheetFX CLI
#[derive(Parser, Debug)]
#[command(name = "sheetfx")]
#[command(about = "Currency conversion for spreadsheet ranges")]
struct Args {
    /// Rate service base URL
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Cache file path
    #[arg(long, global = true)]
    cache_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the rate for a currency pair
    Rate {
        from: String,
        to: String,
    },

    /// Refresh rate tables for every supported currency
    Refresh {
        /// `direct` or `cross:<CODE>`
        #[arg(long)]
        strategy: Option<RefreshStrategy>,
    },

    /// Convert a cell range of an .xlsx workbook in place
    Convert {
        /// Workbook file
        file: PathBuf,

        /// Cell range, e.g. `B2:D20` or `Sheet1!B2:D20`
        #[arg(short, long)]
        range: Selection,

        /// Source currency
        #[arg(long)]
        from: String,

        /// Target currency
        #[arg(long)]
        to: String,

        /// Decimal places
        #[arg(short, long)]
        precision: Option<u32>,

        /// Write text with the currency code appended
        #[arg(long)]
        suffix: bool,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Report rate service reachability and cache state
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = AppConfig::from_env();
    if let Some(url) = args.api_url.clone() {
        config.api_url = url;
    }
    if let Some(path) = args.cache_file.clone() {
        config.cache_file = path;
    }
    if let Command::Refresh {
        strategy: Some(strategy),
    } = &args.command
    {
        config.refresh_strategy = strategy.clone();
    }
    if let Command::Convert {
        precision: Some(precision),
        ..
    } = &args.command
    {
        config.precision = *precision;
    }

    init_logging(&config);

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    let resolver = Arc::new(build_resolver(&config)?);
    info!(
        provider = resolver.provider_name(),
        cache_file = %config.cache_file.display(),
        cached_bases = resolver.cache().len(),
        "Rate resolver ready"
    );

    match args.command {
        Command::Rate { from, to } => {
            let universe = &resolver.config().currencies;
            let from = parse_supported(&from, universe)?;
            let to = parse_supported(&to, universe)?;
            let resolved = resolver.get_rate(&from, &to).await?;
            println!("1 {from} = {} {to} ({})", resolved.rate, resolved.provenance);
        }
        Command::Refresh { .. } => {
            let print_progress = |current: usize, total: usize, message: &str| {
                eprintln!("[{current}/{total}] {message}");
            };
            let report = resolver.refresh_all_rates(Some(&print_progress)).await;
            let refreshed = report.values().filter(|ok| **ok).count();
            println!("Refreshed {refreshed}/{} currencies.", report.len());

            let failed: Vec<_> = report
                .iter()
                .filter(|(_, ok)| !**ok)
                .map(|(code, _)| code.to_string())
                .collect();
            if !failed.is_empty() {
                println!("Failed: {}", failed.join(", "));
            }
        }
        Command::Convert {
            file,
            range,
            from,
            to,
            suffix,
            json,
            ..
        } => {
            let universe = &resolver.config().currencies;
            let from = parse_supported(&from, universe)?;
            let to = parse_supported(&to, universe)?;
            let mut request = ConversionRequest::new(from, to).with_precision(config.precision);
            if suffix {
                request = request.with_currency_suffix();
            }

            let mut workbook = XlsxWorkbook::new();
            let name = workbook
                .open_workbook(&file)
                .with_context(|| format!("Failed to open {}", file.display()))?;
            workbook.select(range);
            info!(workbook = %name, "Workbook opened");

            let mut session = ConversionSession::new(workbook, ConversionEngine::new(resolver));
            let outcome = session.convert_selection(&request, None).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                println!("{}: {}", outcome.range, outcome.stats);
                if !outcome.written {
                    println!("Nothing converted, workbook unchanged.");
                }
            }
        }
        Command::Status => {
            let status = resolver.probe_api().await;
            let stats = resolver.cache().stats(chrono::Utc::now());
            println!(
                "API: {}",
                match status {
                    ApiStatus::Online => "online",
                    ApiStatus::Offline => "offline",
                }
            );
            println!(
                "Cache: {} bases ({} fresh, {} expired), TTL {} minutes",
                stats.total_entries,
                stats.fresh_entries,
                stats.expired_entries,
                resolver.cache().ttl().num_minutes()
            );
            println!("Refresh strategy: {}", config.refresh_strategy);
        }
    }

    Ok(())
}

fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone()),
    );
    let registry = tracing_subscriber::registry().with(filter);

    if config.log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn build_resolver(config: &AppConfig) -> anyhow::Result<RateResolver> {
    let resolver_config = config.resolver_config();
    let provider = HttpRateProvider::new(config.api_url.clone(), resolver_config.fetch_timeout)
        .context("Failed to build HTTP client")?;
    let cache = RateCache::load(config.cache_file.clone(), config.rate_cache_ttl());

    Ok(RateResolver::new(Arc::new(provider), cache, resolver_config))
}
