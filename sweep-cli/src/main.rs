//! onion-sweep CLI
//!
//! Crawls a paginated .onion listing over Tor and keeps the sites that answer.

mod config;

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use sweep_core::{PageToken, DEFAULT_OUTPUT_PATH};
use sweep_runtime::{CrawlError, CrawlSummary, Crawler, ResultStore};
use sweep_tor::{check_tor_connection, TorConfig, TorTransport};

use crate::config::{CrawlOverrides, CrawlSettings, FileConfig};

#[derive(Parser)]
#[command(name = "onion-sweep")]
#[command(author, version, about = "Crawl a .onion listing over Tor and record the sites that answer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbosity level (0-3); RUST_LOG takes precedence when set
    #[arg(short, long, default_value = "1", global = true)]
    verbose: u8,

    /// TOML configuration file
    #[arg(short, long, global = true, env = "ONION_SWEEP_CONFIG")]
    config: Option<PathBuf>,

    /// Tor SOCKS proxy address (host:port or socks5h://host:port)
    #[arg(long, global = true, env = "ONION_SWEEP_SOCKS_ADDR")]
    socks_addr: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Walk the listing and probe every new site
    Crawl {
        /// First listing page token
        #[arg(long)]
        start_page: Option<PageToken>,

        /// Number of listing pages to process
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        max_pages: Option<u32>,

        /// Snapshot file of accessible sites (read on start, rewritten on each find)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Minimum delay between probes, in seconds
        #[arg(long)]
        min_delay: Option<f64>,

        /// Maximum delay between probes, in seconds
        #[arg(long)]
        max_delay: Option<f64>,

        /// Page token increment between listing pages
        #[arg(long)]
        page_stride: Option<u128>,

        /// Listing URL template containing {page}
        #[arg(long)]
        listing_url: Option<String>,

        /// CSS selector of the link container ("" scans the whole page)
        #[arg(long)]
        container: Option<String>,

        /// Skip the pause between listing pages
        #[arg(long)]
        no_page_delay: bool,

        /// Do not verify the Tor proxy before crawling
        #[arg(long)]
        skip_proxy_check: bool,
    },

    /// Check Tor connection status
    Status,

    /// Show what a snapshot file holds
    Summary {
        /// Snapshot file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = match cli.verbose {
        0 => "error",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let file = match &cli.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let tor_config = file.tor_config(cli.socks_addr.as_deref());

    match cli.command {
        Commands::Crawl {
            start_page,
            max_pages,
            output,
            min_delay,
            max_delay,
            page_stride,
            listing_url,
            container,
            no_page_delay,
            skip_proxy_check,
        } => {
            let overrides = CrawlOverrides {
                start_page,
                max_pages,
                output,
                min_delay,
                max_delay,
                page_stride,
                listing_url,
                container,
                no_page_delay,
            };
            let settings = CrawlSettings::resolve(&file, &overrides)?;
            run_crawl(settings, tor_config, skip_proxy_check).await?;
        }
        Commands::Status => {
            check_status(&tor_config).await?;
        }
        Commands::Summary { output } => {
            let path = output
                .or(file.crawl.output)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_PATH));
            show_snapshot(path)?;
        }
    }

    Ok(())
}

async fn run_crawl(settings: CrawlSettings, tor_config: TorConfig, skip_proxy_check: bool) -> Result<()> {
    println!("🧅 onion-sweep - .onion listing accessibility crawler\n");
    println!("📄 Listing: {}", settings.crawl.listing.url_template);
    println!(
        "🔢 Pages: {} from {} (stride {})",
        settings.crawl.max_pages, settings.crawl.start_page, settings.crawl.listing.stride
    );
    println!(
        "⏱️  Delay between probes: {:.1}-{:.1}s",
        settings.crawl.probe_delay.min().as_secs_f64(),
        settings.crawl.probe_delay.max().as_secs_f64()
    );
    println!("💾 Output: {}\n", settings.output.display());

    if skip_proxy_check {
        warn!("Skipping Tor proxy check");
    } else {
        println!("🔌 Checking Tor connection...");
        match check_tor_connection(&tor_config).await {
            Ok(status) => {
                let ip = status.exit_ip.as_deref().unwrap_or("unknown");
                println!("✅ Tor connection OK (exit IP: {})\n", ip);
            }
            Err(e) => {
                error!("Tor connection test failed: {}", e);
                println!("❌ Cannot proceed without Tor");
                println!("   Expected proxy at: {}", tor_config.socks_addr);
                println!("   Start Tor with: sudo systemctl start tor (or brew services start tor)");
                return Err(e).context("Tor proxy check failed");
            }
        }
    }

    let store = ResultStore::open(&settings.output)
        .with_context(|| format!("Cannot open snapshot {}", settings.output.display()))?;
    let transport = Arc::new(TorTransport::new(&tor_config)?);

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if relay_interrupts(tokio::signal::ctrl_c, stop_tx).await {
            warn!("Second interrupt, exiting immediately");
            std::process::exit(130);
        }
    });

    let mut crawler = Crawler::new(settings.crawl, transport, store)?.with_shutdown(stop_rx);

    match crawler.run().await {
        Ok(summary) => {
            print_summary(&summary, &settings.output);
            Ok(())
        }
        Err(CrawlError::FetchFailureStreakExceeded {
            streak,
            last_page,
            summary,
        }) => {
            print_summary(&summary, &settings.output);
            anyhow::bail!(
                "listing unreachable: {} consecutive page fetches failed (last page {})",
                streak,
                last_page
            )
        }
        Err(e) => Err(e.into()),
    }
}

/// The first signal asks the crawler to stop; returns true on a second one.
async fn relay_interrupts<S, Fut>(mut signal: S, stop: watch::Sender<bool>) -> bool
where
    S: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal().await {
        warn!("Cannot listen for Ctrl-C: {}", e);
        return false;
    }
    info!("Interrupt received, stopping after the current request (Ctrl-C again to quit now)");
    let _ = stop.send(true);

    signal().await.is_ok()
}

fn print_summary(summary: &CrawlSummary, output: &std::path::Path) {
    println!("\n{}", "=".repeat(60));
    println!("📊 Run {} {}", summary.run_id, summary.outcome);
    println!(
        "   Pages: {} processed, {} skipped (next page {})",
        summary.pages_processed, summary.pages_skipped, summary.last_page
    );
    println!(
        "   Sites: {} found, {} already known, {} tested, {} accessible",
        summary.discovered, summary.skipped_known, summary.tested, summary.accessible
    );
    if summary.persist_failures > 0 {
        println!("   ⚠️  {} snapshot writes failed, see log", summary.persist_failures);
    }
    println!(
        "💾 {} accessible sites in {}",
        summary.total_accessible,
        output.display()
    );
}

async fn check_status(config: &TorConfig) -> Result<()> {
    println!("🔌 Checking Tor connection...\n");

    match check_tor_connection(config).await {
        Ok(status) => {
            println!("✅ Tor is running and accessible");
            println!("   Proxy: {}", config.socks_addr);
            if let Some(ip) = status.exit_ip {
                println!("   Exit IP: {}", ip);
            }
            Ok(())
        }
        Err(e) => {
            println!("❌ Tor is not accessible");
            println!("   Expected proxy at: {}", config.socks_addr);
            println!("\n   To install Tor:");
            println!("   - Linux: sudo apt install tor");
            println!("   - Mac: brew install tor");
            println!("   - Then start: sudo systemctl start tor (or brew services start tor)");
            Err(e.into())
        }
    }
}

fn show_snapshot(path: PathBuf) -> Result<()> {
    if !path.exists() {
        println!("No snapshot at {}", path.display());
        return Ok(());
    }

    let store = ResultStore::open(&path)?;
    let snapshot = store.snapshot();

    println!("💾 {}", path.display());
    println!("   Last updated: {}", snapshot.last_updated.to_rfc3339());
    println!("   Accessible sites: {}\n", snapshot.total_accessible_sites);

    for site in &snapshot.accessible_sites {
        let label = if site.label.is_empty() { "-" } else { site.label.as_str() };
        println!("   {}  {:>6.2}s  {}", site.domain, site.response_time, label);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Notify;

    fn signal_from(notify: &Arc<Notify>) -> impl FnMut() -> std::pin::Pin<Box<dyn Future<Output = std::io::Result<()>> + Send>> {
        let notify = Arc::clone(notify);
        move || {
            let notify = Arc::clone(&notify);
            Box::pin(async move {
                notify.notified().await;
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn test_first_interrupt_stops_second_forces_exit() {
        let notify = Arc::new(Notify::new());
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let relay = tokio::spawn(relay_interrupts(signal_from(&notify), stop_tx));

        notify.notify_one();
        stop_rx.changed().await.unwrap();
        assert!(*stop_rx.borrow());
        assert!(!relay.is_finished());

        notify.notify_one();
        assert!(relay.await.unwrap());
    }

    #[tokio::test]
    async fn test_signal_setup_failure_never_forces_exit() {
        let (stop_tx, stop_rx) = watch::channel(false);
        let failing = || async { Err(std::io::Error::other("no signal handler")) };

        assert!(!relay_interrupts(failing, stop_tx).await);
        assert!(!*stop_rx.borrow());
    }
}
