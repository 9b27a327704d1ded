//! Plain data passed between the calibrator, the attributor and the ledger.

use std::collections::HashSet;
use std::time::SystemTime;

/// Per-process utilization percentages, one per GPU subsystem, each in [0, 100].
/// Counters the driver does not report are normalized to 0.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UtilizationVector {
    /// SM (compute) utilization
    pub sm: f64,
    /// Memory bandwidth utilization
    pub mem: f64,
    /// Video encoder utilization
    pub enc: f64,
    /// Video decoder utilization
    pub dec: f64,
}

/// One process as seen on the GPU at a single sampling instant.
#[derive(Debug, Clone)]
pub struct ProcessSnapshot {
    pub pid: u32,
    /// Stable ledger key. Falls back to `pid:<n>` when name resolution fails.
    pub name: String,
    pub util: UtilizationVector,
    pub memory_used_mb: Option<f64>,
}

/// Everything the telemetry source reports for one tick.
#[derive(Debug, Clone)]
pub struct TelemetrySnapshot {
    pub timestamp: SystemTime,
    /// Aggregate board power draw. `None` when the reading is unavailable;
    /// such a tick is skipped for attribution and exported as 0.
    pub power_w: Option<f64>,
    /// GPU-wide compute utilization percentage
    pub gpu_util: f64,
    /// GPU-wide memory bandwidth utilization percentage
    pub mem_util: f64,
    pub processes: Vec<ProcessSnapshot>,
}

/// Idle-power baseline established once at startup, immutable afterwards.
#[derive(Debug, Clone)]
pub struct IdleBaseline {
    pub idle_power_w: f64,
    /// Number of processes resident on the GPU during calibration.
    pub idle_process_count: usize,
    /// Names of the processes resident during calibration.
    pub idle_processes: HashSet<String>,
    /// True when every calibration reading failed and the fallback constant
    /// was used instead of a measurement.
    pub degraded: bool,
}
