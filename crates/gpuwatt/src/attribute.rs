//! Splits one aggregate power reading across the processes resident on the
//! GPU for one sampling interval.
//!
//! The model: idle power is divided among resident processes head-count
//! style, and power above idle is divided in proportion to each process's
//! weighted utilization. Zero-utilization processes keep their pro-rata
//! idle share, so a process parked on the GPU is still charged for keeping
//! it awake.

use std::collections::HashMap;

use clap::ValueEnum;

use crate::error::MonitorError;
use crate::snapshot::IdleBaseline;
use crate::snapshot::TelemetrySnapshot;
use crate::snapshot::UtilizationVector;

/// Relative power cost per utilization-percent of each GPU subsystem.
/// Configured once at startup, immutable for the run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightVector {
    pub compute: f64,
    pub memory: f64,
    pub encoder: f64,
    pub decoder: f64,
}

impl Default for WeightVector {
    fn default() -> Self {
        Self {
            compute: 1.0,
            memory: 0.4,
            encoder: 0.3,
            decoder: 0.3,
        }
    }
}

impl WeightVector {
    pub fn new(compute: f64, memory: f64, encoder: f64, decoder: f64) -> Result<Self, MonitorError> {
        for (name, w) in [
            ("compute", compute),
            ("memory", memory),
            ("encoder", encoder),
            ("decoder", decoder),
        ] {
            if w < 0.0 || !w.is_finite() {
                return Err(MonitorError::InvalidConfig(format!(
                    "{name} weight must be a non-negative number, got {w}"
                )));
            }
        }
        Ok(Self {
            compute,
            memory,
            encoder,
            decoder,
        })
    }

    /// Collapses a utilization vector into a single scalar proportional to
    /// estimated power cost.
    pub fn weighted(&self, util: &UtilizationVector) -> f64 {
        self.compute * util.sm
            + self.memory * util.mem
            + self.encoder * util.enc
            + self.decoder * util.dec
    }
}

/// How the aggregate weighted utilization (the active-power denominator) is
/// formed. The two variants are not numerically identical; `ProcessSum` is
/// the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DenominatorPolicy {
    /// Sum of the per-process weighted utilizations.
    ProcessSum,
    /// Weights applied to the GPU-wide aggregate compute/memory counters,
    /// plus the summed per-process encoder/decoder terms. For drivers whose
    /// per-process SM counters are unreliable.
    AggregateBlend,
}

/// Computes the energy each process is charged for one tick.
///
/// Pure function of its inputs. Returns joules keyed by process name;
/// empty when the power reading was unavailable or no process is resident.
/// With `filter` set, only matching names (case-insensitive substring)
/// receive entries and the remainder of the aggregate energy is
/// deliberately left unattributed.
pub fn attribute(
    snapshot: &TelemetrySnapshot,
    baseline: &IdleBaseline,
    weights: &WeightVector,
    policy: DenominatorPolicy,
    elapsed_secs: f64,
    filter: Option<&str>,
) -> HashMap<String, f64> {
    let Some(power_w) = snapshot.power_w else {
        return HashMap::new();
    };
    let processes = &snapshot.processes;
    if processes.is_empty() {
        return HashMap::new();
    }

    let per_process: Vec<f64> = processes.iter().map(|p| weights.weighted(&p.util)).collect();
    let raw_denominator = match policy {
        DenominatorPolicy::ProcessSum => per_process.iter().sum::<f64>(),
        DenominatorPolicy::AggregateBlend => {
            weights.compute * snapshot.gpu_util
                + weights.memory * snapshot.mem_util
                + processes
                    .iter()
                    .map(|p| weights.encoder * p.util.enc + weights.decoder * p.util.dec)
                    .sum::<f64>()
        }
    };
    // A denominator of zero means nothing was active; 1 keeps the division
    // defined and leaves every active share at zero.
    let denominator = if raw_denominator <= 0.0 {
        1.0
    } else {
        raw_denominator
    };

    let active_power = (power_w - baseline.idle_power_w).max(0.0);
    let current_count = processes.len() as f64;
    let filter_lower = filter.map(str::to_lowercase);

    let mut energy = HashMap::new();
    for (process, weighted_util) in processes.iter().zip(&per_process) {
        // Processes observed at calibration split the idle power among the
        // idle population; late arrivals split it among everyone present now.
        let idle_share = if baseline.idle_process_count > 0
            && baseline.idle_processes.contains(&process.name)
        {
            baseline.idle_power_w / baseline.idle_process_count as f64
        } else {
            baseline.idle_power_w / current_count
        };
        let active_share = weighted_util / denominator * active_power;

        if let Some(f) = &filter_lower {
            if !process.name.to_lowercase().contains(f.as_str()) {
                continue;
            }
        }
        *energy.entry(process.name.clone()).or_insert(0.0) +=
            (idle_share + active_share) * elapsed_secs;
    }
    energy
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::SystemTime;

    use super::*;
    use crate::snapshot::ProcessSnapshot;
    use crate::telemetry::testing::process;

    fn baseline(idle_power_w: f64, names: &[&str]) -> IdleBaseline {
        IdleBaseline {
            idle_power_w,
            idle_process_count: names.len(),
            idle_processes: names.iter().map(|s| s.to_string()).collect(),
            degraded: false,
        }
    }

    fn snapshot(power_w: Option<f64>, processes: Vec<ProcessSnapshot>) -> TelemetrySnapshot {
        TelemetrySnapshot {
            timestamp: SystemTime::now(),
            power_w,
            gpu_util: 0.0,
            mem_util: 0.0,
            processes,
        }
    }

    fn compute(sm: f64) -> UtilizationVector {
        UtilizationVector {
            sm,
            ..Default::default()
        }
    }

    const UNIT_WEIGHTS: WeightVector = WeightVector {
        compute: 1.0,
        memory: 0.0,
        encoder: 0.0,
        decoder: 0.0,
    };

    #[test]
    fn rejects_negative_weight() {
        assert!(WeightVector::new(1.0, -0.1, 0.3, 0.3).is_err());
        assert!(WeightVector::new(1.0, 0.4, 0.3, 0.3).is_ok());
    }

    #[test]
    fn worked_scenario_sole_active_process() {
        // idle 10 W over 2 baseline processes, one sole contributor at
        // weighted utilization 100, 50 W aggregate, 1 s interval:
        // 10/2 + 1.0 * (50 - 10) = 45 J.
        let base = baseline(10.0, &["game", "compositor"]);
        let snap = snapshot(
            Some(50.0),
            vec![
                process("game", 100, compute(100.0)),
                process("compositor", 200, compute(0.0)),
            ],
        );
        let energy = attribute(
            &snap,
            &base,
            &UNIT_WEIGHTS,
            DenominatorPolicy::ProcessSum,
            1.0,
            None,
        );
        assert!((energy["game"] - 45.0).abs() < 1e-9);
        assert!((energy["compositor"] - 5.0).abs() < 1e-9);
    }

    #[test]
    fn idle_shares_sum_to_idle_power() {
        let base = baseline(12.0, &["a", "b", "c"]);
        let snap = snapshot(
            Some(12.0),
            vec![
                process("a", 1, compute(0.0)),
                process("b", 2, compute(0.0)),
                process("c", 3, compute(0.0)),
            ],
        );
        let energy = attribute(
            &snap,
            &base,
            &UNIT_WEIGHTS,
            DenominatorPolicy::ProcessSum,
            1.0,
            None,
        );
        let total: f64 = energy.values().sum();
        assert!((total - 12.0).abs() < 1e-9);
    }

    #[test]
    fn active_shares_sum_to_active_power() {
        let base = baseline(10.0, &["a", "b"]);
        let snap = snapshot(
            Some(70.0),
            vec![
                process("a", 1, compute(30.0)),
                process("b", 2, compute(90.0)),
            ],
        );
        let energy = attribute(
            &snap,
            &base,
            &UNIT_WEIGHTS,
            DenominatorPolicy::ProcessSum,
            1.0,
            None,
        );
        // idle shares sum to 10, active shares to 60
        let total: f64 = energy.values().sum();
        assert!((total - 70.0).abs() < 1e-9);
        // b carries three quarters of the active power
        assert!((energy["b"] - (5.0 + 45.0)).abs() < 1e-9);
    }

    #[test]
    fn zero_utilization_process_at_idle_power_gets_idle_share_only() {
        let base = baseline(10.0, &["sleeper"]);
        let snap = snapshot(Some(10.0), vec![process("sleeper", 1, compute(0.0))]);
        let energy = attribute(
            &snap,
            &base,
            &UNIT_WEIGHTS,
            DenominatorPolicy::ProcessSum,
            1.0,
            None,
        );
        assert!((energy["sleeper"] - 10.0).abs() < 1e-9);
    }

    #[test]
    fn unavailable_power_attributes_nothing() {
        let base = baseline(10.0, &["a"]);
        let snap = snapshot(None, vec![process("a", 1, compute(100.0))]);
        let energy = attribute(
            &snap,
            &base,
            &UNIT_WEIGHTS,
            DenominatorPolicy::ProcessSum,
            1.0,
            None,
        );
        assert!(energy.is_empty());
    }

    #[test]
    fn late_arrival_splits_idle_over_current_population() {
        let base = baseline(9.0, &["resident"]);
        let snap = snapshot(
            Some(9.0),
            vec![
                process("resident", 1, compute(0.0)),
                process("newcomer", 2, compute(0.0)),
                process("another", 3, compute(0.0)),
            ],
        );
        let energy = attribute(
            &snap,
            &base,
            &UNIT_WEIGHTS,
            DenominatorPolicy::ProcessSum,
            1.0,
            None,
        );
        assert!((energy["resident"] - 9.0).abs() < 1e-9);
        assert!((energy["newcomer"] - 3.0).abs() < 1e-9);
        assert!((energy["another"] - 3.0).abs() < 1e-9);
    }

    #[test]
    fn degraded_baseline_redistributes_over_current_processes() {
        let base = IdleBaseline {
            idle_power_w: 10.0,
            idle_process_count: 0,
            idle_processes: HashSet::new(),
            degraded: true,
        };
        let snap = snapshot(
            Some(10.0),
            vec![
                process("a", 1, compute(0.0)),
                process("b", 2, compute(0.0)),
            ],
        );
        let energy = attribute(
            &snap,
            &base,
            &UNIT_WEIGHTS,
            DenominatorPolicy::ProcessSum,
            1.0,
            None,
        );
        assert!((energy["a"] - 5.0).abs() < 1e-9);
        assert!((energy["b"] - 5.0).abs() < 1e-9);
    }

    #[test]
    fn filter_keeps_only_matching_process() {
        let base = baseline(10.0, &["alpha", "beta", "gamma"]);
        let snap = snapshot(
            Some(40.0),
            vec![
                process("alpha", 1, compute(50.0)),
                process("beta", 2, compute(50.0)),
                process("gamma", 3, compute(0.0)),
            ],
        );
        let energy = attribute(
            &snap,
            &base,
            &UNIT_WEIGHTS,
            DenominatorPolicy::ProcessSum,
            1.0,
            Some("BET"),
        );
        assert_eq!(energy.len(), 1);
        // beta's shares are unchanged by the filter: 10/3 idle + 15 active
        assert!((energy["beta"] - (10.0 / 3.0 + 15.0)).abs() < 1e-9);
    }

    #[test]
    fn attribution_is_pure() {
        let base = baseline(10.0, &["a", "b"]);
        let snap = snapshot(
            Some(33.0),
            vec![
                process("a", 1, compute(20.0)),
                process("b", 2, compute(60.0)),
            ],
        );
        let first = attribute(
            &snap,
            &base,
            &UNIT_WEIGHTS,
            DenominatorPolicy::ProcessSum,
            0.5,
            None,
        );
        let second = attribute(
            &snap,
            &base,
            &UNIT_WEIGHTS,
            DenominatorPolicy::ProcessSum,
            0.5,
            None,
        );
        assert_eq!(first, second);
    }

    #[test]
    fn aggregate_blend_uses_gpu_wide_counters() {
        let base = baseline(0.0, &[]);
        let mut snap = snapshot(
            Some(100.0),
            vec![
                process("a", 1, compute(50.0)),
                process("b", 2, compute(50.0)),
            ],
        );
        snap.gpu_util = 200.0; // inflated denominator halves every share
        let energy = attribute(
            &snap,
            &base,
            &UNIT_WEIGHTS,
            DenominatorPolicy::AggregateBlend,
            1.0,
            None,
        );
        assert!((energy["a"] - 25.0).abs() < 1e-9);
        assert!((energy["b"] - 25.0).abs() < 1e-9);
    }

    #[test]
    fn power_below_idle_clamps_active_to_zero() {
        let base = baseline(20.0, &["a"]);
        let snap = snapshot(Some(15.0), vec![process("a", 1, compute(100.0))]);
        let energy = attribute(
            &snap,
            &base,
            &UNIT_WEIGHTS,
            DenominatorPolicy::ProcessSum,
            1.0,
            None,
        );
        // only the idle share remains
        assert!((energy["a"] - 20.0).abs() < 1e-9);
    }

    #[test]
    fn weighted_utilization_combines_all_subsystems() {
        let weights = WeightVector::default();
        let util = UtilizationVector {
            sm: 50.0,
            mem: 25.0,
            enc: 10.0,
            dec: 0.0,
        };
        assert!((weights.weighted(&util) - (50.0 + 10.0 + 3.0)).abs() < 1e-9);
    }
}
