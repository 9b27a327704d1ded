//! Append-only accumulation of attributed energy and raw sample history.

use std::collections::HashMap;

use crate::snapshot::TelemetrySnapshot;

/// Owned exclusively by the sampling loop while running, then handed to the
/// reporter read-only. Values only ever grow.
#[derive(Debug, Default)]
pub struct EnergyLedger {
    per_process_j: HashMap<String, f64>,
    total_energy_j: f64,
    samples: Vec<TelemetrySnapshot>,
}

impl EnergyLedger {
    /// Folds one tick's attributed energy increments in.
    pub fn merge(&mut self, deltas: &HashMap<String, f64>) {
        for (name, joules) in deltas {
            debug_assert!(*joules >= 0.0);
            *self.per_process_j.entry(name.clone()).or_insert(0.0) += joules;
        }
    }

    /// Appends the raw snapshot and integrates aggregate power over the
    /// measured elapsed time. An unavailable power reading adds nothing.
    pub fn record_snapshot(&mut self, snapshot: TelemetrySnapshot, elapsed_secs: f64) {
        if let Some(power_w) = snapshot.power_w {
            self.total_energy_j += power_w * elapsed_secs;
        }
        self.samples.push(snapshot);
    }

    /// Total GPU energy over the run, attributed or not.
    pub fn total_energy_j(&self) -> f64 {
        self.total_energy_j
    }

    pub fn per_process_j(&self) -> &HashMap<String, f64> {
        &self.per_process_j
    }

    pub fn samples(&self) -> &[TelemetrySnapshot] {
        &self.samples
    }
}
