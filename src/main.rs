use std::process::ExitCode;

use anyhow::Result;
use twmap_core::Config;
use twmap_services::{RefreshOutcome, RefreshPipeline, WeatherSnapshot};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    twmap_core::init()?;

    let (config, _validation) = Config::load_validated()?;
    tracing::info!(
        "Using dataset {} with database {}",
        config.cwa.dataset.id(),
        config.storage.db_path.display()
    );

    let pipeline = RefreshPipeline::from_config(&config)?;
    let mut snapshot = WeatherSnapshot::new();
    snapshot.load(&pipeline).await;

    let outcome = snapshot.refresh(&pipeline).await;
    match &outcome {
        RefreshOutcome::Refreshed(summary) => {
            println!(
                "Refreshed: {} record(s) saved, {} dropped",
                summary.saved, summary.rejected
            );
        }
        RefreshOutcome::Failed(failure) => {
            println!("Refresh failed: {}", failure.user_message());
            if failure.is_retryable() {
                println!("This looks temporary; run twmap again to retry.");
            }
        }
    }

    let removed = pipeline.cleanup().await?;
    if removed > 0 {
        println!("Removed {} record(s) past the retention window", removed);
    }

    let stats = pipeline.statistics().await?;
    println!("\nStore:");
    println!("  Records:   {}", stats.total_records);
    println!("  Locations: {}", stats.unique_locations);
    if let (Some(oldest), Some(newest)) = (&stats.oldest_forecast_time, &stats.newest_forecast_time)
    {
        println!("  Range:     {} .. {}", oldest, newest);
    }

    if !snapshot.is_empty() {
        println!("\nLatest temperatures by band:");
        for (band, count) in snapshot.band_counts() {
            println!("  {:<18} {:>4}  {}", band.label(), count, band.hex());
        }
    }

    Ok(if outcome.is_refreshed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
