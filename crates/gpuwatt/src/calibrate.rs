//! Idle-power calibration, run once before sampling starts.
//!
//! Idle power is not zero: memory refresh, fans and display engines draw
//! power with no compute running. The processes resident at calibration
//! time matter too, because attribution later treats their idle share as
//! "already there" rather than newly arrived.

use std::time::Duration;

use crate::snapshot::IdleBaseline;
use crate::telemetry::TelemetrySource;

/// Number of closely spaced power readings averaged into the baseline.
pub const CALIBRATION_READS: usize = 5;

/// Spacing between calibration readings, independent of the main sampling
/// interval.
pub const CALIBRATION_SPACING: Duration = Duration::from_millis(50);

/// Fallback idle power when every calibration reading fails. Small but
/// positive, so resident processes are still charged something for keeping
/// the board awake.
pub const DEFAULT_IDLE_POWER_W: f64 = 10.0;

/// Averages `reads` aggregate-power readings and records the processes
/// resident at idle. Never fails: if every reading is unavailable the
/// returned baseline uses [`DEFAULT_IDLE_POWER_W`], an empty process set
/// and `degraded = true` for the caller to warn about.
pub fn measure_idle<S: TelemetrySource>(
    source: &mut S,
    reads: usize,
    spacing: Duration,
) -> IdleBaseline {
    let mut readings = Vec::with_capacity(reads);
    for i in 0..reads {
        if let Some(watts) = source.aggregate_power_w() {
            readings.push(watts);
        }
        if i + 1 < reads {
            std::thread::sleep(spacing);
        }
    }

    let idle_processes: std::collections::HashSet<String> = source
        .process_snapshots()
        .into_iter()
        .map(|p| p.name)
        .collect();

    if readings.is_empty() {
        tracing::debug!("all {reads} calibration readings failed");
        return IdleBaseline {
            idle_power_w: DEFAULT_IDLE_POWER_W,
            idle_process_count: 0,
            idle_processes: Default::default(),
            degraded: true,
        };
    }

    let idle_power_w = readings.iter().sum::<f64>() / readings.len() as f64;
    tracing::info!(
        idle_power_w,
        successful_reads = readings.len(),
        idle_process_count = idle_processes.len(),
        "idle baseline established"
    );
    IdleBaseline {
        idle_power_w,
        idle_process_count: idle_processes.len(),
        idle_processes,
        degraded: false,
    }
}
