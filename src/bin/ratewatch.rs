//! ratewatch CLI - serve the read API, run the crawler, inspect the log
//!
//! ## Example Usage
//!
//! ```bash
//! # Serve the read API
//! ratewatch serve --listen 0.0.0.0:8080
//!
//! # Fetch one provider cycle into the log
//! ratewatch fetch
//!
//! # Fetch continuously, once per hour
//! ratewatch fetch --watch --interval 3600
//!
//! # Print the latest snapshot
//! ratewatch show
//!
//! # Poll a running service and render updates
//! ratewatch watch http://localhost:8080/api/rates
//! ```

use clap::{Parser, Subcommand};
use log::info;
use ratewatch::client::{HttpFetcher, RefreshClient, ViewState};
use ratewatch::display::render_table;
use ratewatch::ingest::{IngestConfig, Ingestor};
use ratewatch::service::{serve, SnapshotService};
use ratewatch::types::CurrencyCode;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// ratewatch: exchange-rate snapshot tracker
#[derive(Parser)]
#[command(name = "ratewatch")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Exchange-rate snapshot tracker", long_about = None)]
struct Cli {
    /// Path to the observation log database
    #[arg(long, global = true, default_value = "data/currency_rates.db")]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the latest-rates read API
    Serve {
        /// Listen address
        #[arg(short, long, default_value = "127.0.0.1:8080")]
        listen: SocketAddr,
    },

    /// Fetch rates from the provider and append them to the log
    Fetch {
        /// Base currency
        #[arg(short, long, default_value = "USD")]
        base: String,

        /// Keep fetching on an interval instead of exiting after one cycle
        #[arg(short, long)]
        watch: bool,

        /// Seconds between cycles
        #[arg(short, long, default_value = "3600")]
        interval: u64,
    },

    /// Print the latest snapshot from the local log
    Show,

    /// Poll a running service and render each update
    Watch {
        /// Read API endpoint
        #[arg(default_value = "http://127.0.0.1:8080/api/rates")]
        url: String,

        /// Seconds between polls
        #[arg(short, long, default_value = "60")]
        interval: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { listen } => {
            info!("serving snapshots from {}", cli.db.display());
            serve(listen, SnapshotService::new(cli.db)).await?;
        }

        Commands::Fetch {
            base,
            watch,
            interval,
        } => {
            let config = IngestConfig {
                base: CurrencyCode::parse(&base)?,
                interval: Duration::from_secs(interval),
                ..IngestConfig::default()
            };
            let ingestor = Ingestor::new(&cli.db, config)?;
            if watch {
                ingestor.run().await?;
            } else {
                let appended = ingestor.run_once().await?;
                println!("appended {} observations", appended);
            }
        }

        Commands::Show => {
            let snapshot = SnapshotService::new(cli.db).get_snapshot().await?;
            print!("{}", render_table(&snapshot));
        }

        Commands::Watch { url, interval } => {
            let fetcher = HttpFetcher::new(url, Duration::from_secs(10))?;
            let client = RefreshClient::new(fetcher, Duration::from_secs(interval));
            let (mut rx, handle) = client.spawn();

            loop {
                tokio::select! {
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        render_view(&rx.borrow_and_update());
                    }
                    _ = tokio::signal::ctrl_c() => {
                        break;
                    }
                }
            }
            handle.stop().await;
        }
    }

    Ok(())
}

fn render_view(state: &ViewState) {
    match state {
        ViewState::Loading => println!("Loading..."),
        ViewState::Failed(error) => println!("No data yet: {}", error),
        ViewState::Ready { snapshot, error } => {
            if let Some(error) = error {
                println!("!! refresh failed, showing last good snapshot: {}", error);
            }
            print!("{}", render_table(snapshot));
        }
    }
}
