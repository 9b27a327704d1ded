mod attribute;
mod calibrate;
mod config;
mod error;
mod export;
mod ledger;
mod logging;
mod report;
mod sampler;
mod snapshot;
mod telemetry;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use crate::config::Cli;
use crate::error::MonitorError;
use crate::telemetry::NvmlTelemetry;
use crate::telemetry::TelemetrySource;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();
    logging::init();

    let config = Cli::parse().into_config()?;

    let mut source =
        NvmlTelemetry::init(config.gpu_index).context("failed to initialize GPU telemetry")?;

    if let Some(filter) = &config.sampler.filter {
        ensure_target_running(&mut source, filter)?;
        tracing::info!("Tracking target process filter: {filter}");
    }

    tracing::info!("Calibrating idle power...");
    let baseline = calibrate::measure_idle(
        &mut source,
        calibrate::CALIBRATION_READS,
        calibrate::CALIBRATION_SPACING,
    );
    if baseline.degraded {
        tracing::warn!(
            "Idle calibration failed, falling back to {} W; attribution will be approximate",
            baseline.idle_power_w
        );
    }

    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, finishing up");
            signal_token.cancel();
        }
    });

    let outcome = sampler::run(&mut source, &baseline, &config.sampler, token).await;

    report::print_report(
        &outcome.ledger,
        outcome.run_duration,
        config.sampler.filter.as_deref(),
    );
    export::write_csv(&config.csv_path, outcome.ledger.samples())?;

    Ok(())
}

/// A filter that matches nothing at startup would silently attribute
/// nothing for the whole run, so it aborts instead, listing what is
/// visible.
fn ensure_target_running<S: TelemetrySource>(source: &mut S, filter: &str) -> Result<()> {
    let visible: Vec<String> = source
        .process_snapshots()
        .into_iter()
        .map(|p| p.name)
        .collect();
    let needle = filter.to_lowercase();
    if visible.iter().any(|name| name.to_lowercase().contains(&needle)) {
        return Ok(());
    }
    Err(MonitorError::NoTargetProcess {
        filter: filter.to_string(),
        visible,
    }
    .into())
}
