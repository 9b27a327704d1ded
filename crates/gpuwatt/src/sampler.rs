//! The sampling loop: Calibrating has already produced an [`IdleBaseline`];
//! this module drives Running and Finalizing.
//!
//! Ticks are strictly sequential, one snapshot at a time, so the ledger is
//! never read while being written. The loop sleeps for the configured
//! interval but integrates energy over the measured elapsed time, which
//! keeps totals correct under scheduling jitter or a slow telemetry call.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::attribute::attribute;
use crate::attribute::DenominatorPolicy;
use crate::attribute::WeightVector;
use crate::ledger::EnergyLedger;
use crate::snapshot::IdleBaseline;
use crate::telemetry::TelemetrySource;

pub struct SamplerConfig {
    pub duration: Duration,
    pub interval: Duration,
    pub weights: WeightVector,
    pub policy: DenominatorPolicy,
    pub filter: Option<String>,
}

pub struct RunOutcome {
    pub ledger: EnergyLedger,
    /// Actual wall-clock time spent running, not the nominal target.
    pub run_duration: Duration,
}

/// Samples until the configured duration elapses or the token is
/// cancelled. Cancellation takes effect between ticks; a tick in flight is
/// always folded in completely.
pub async fn run<S: TelemetrySource>(
    source: &mut S,
    baseline: &IdleBaseline,
    config: &SamplerConfig,
    token: CancellationToken,
) -> RunOutcome {
    let started = Instant::now();
    let mut last_tick = started;
    let mut ledger = EnergyLedger::default();

    tracing::info!(
        duration_secs = config.duration.as_secs_f64(),
        interval_ms = config.interval.as_millis() as u64,
        "sampling started"
    );

    loop {
        let elapsed_total = started.elapsed();
        if elapsed_total >= config.duration {
            break;
        }
        let wait = config.interval.min(config.duration - elapsed_total);
        tokio::select! {
            _ = token.cancelled() => {
                tracing::info!("cancellation requested, stopping after current tick");
                break;
            }
            _ = tokio::time::sleep(wait) => {}
        }

        let now = Instant::now();
        let elapsed_secs = now.duration_since(last_tick).as_secs_f64();
        last_tick = now;

        let snapshot = source.snapshot();
        let deltas: HashMap<String, f64> = if snapshot.power_w.is_some() {
            attribute(
                &snapshot,
                baseline,
                &config.weights,
                config.policy,
                elapsed_secs,
                config.filter.as_deref(),
            )
        } else {
            // No power reading, no attribution; the tick still advances the
            // elapsed-time reference so the next interval is measured right.
            tracing::debug!("aggregate power unavailable, skipping attribution this tick");
            HashMap::new()
        };
        tracing::debug!(
            power_w = snapshot.power_w.unwrap_or(0.0),
            processes = snapshot.processes.len(),
            elapsed_secs,
            "tick"
        );
        ledger.merge(&deltas);
        ledger.record_snapshot(snapshot, elapsed_secs);
    }

    let run_duration = started.elapsed();
    tracing::info!(
        run_secs = run_duration.as_secs_f64(),
        samples = ledger.samples().len(),
        "sampling finished"
    );
    RunOutcome {
        ledger,
        run_duration,
    }
}
