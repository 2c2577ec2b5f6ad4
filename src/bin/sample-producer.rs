use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use log_chain::producer::sample_event;

#[derive(Parser, Debug)]
#[command(name = "sample-producer", about = "Post sample booking logs to a log-chain server")]
struct Args {
    /// Base URL of the log-chain server
    #[arg(long, default_value = "http://localhost:8080")]
    url: String,

    /// Value of the `source` field
    #[arg(long, default_value = "booking-service")]
    source: String,

    /// Milliseconds between events
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,

    /// Stop after this many events (runs forever when absent)
    #[arg(long)]
    count: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .context("Failed to build HTTP client")?;
    let endpoint = format!("{}/ingest", args.url.trim_end_matches('/'));
    info!("Posting events to {} every {} ms", endpoint, args.interval_ms);

    let mut interval = tokio::time::interval(Duration::from_millis(args.interval_ms));
    let mut sequence = 0u64;
    loop {
        interval.tick().await;
        if args.count.is_some_and(|count| sequence >= count) {
            break;
        }
        sequence += 1;

        let event = sample_event(&args.source, sequence);
        match client.post(&endpoint).json(&event).send().await {
            Ok(response) if response.status().is_success() => {
                info!("SMART-CONTRACT-BOOKING-CREATE - Log written: {}", sequence);
            }
            Ok(response) => error!("Event {} rejected with {}", sequence, response.status()),
            Err(e) => error!("Event {} not delivered: {}", sequence, e),
        }
    }

    info!("Sent {} events", sequence);
    Ok(())
}
