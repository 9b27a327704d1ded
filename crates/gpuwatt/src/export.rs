//! Per-sample CSV export, one row per tick, written once at the end of the
//! run for offline analysis.

use std::path::Path;

use anyhow::Context;
use anyhow::Result;
use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;

use crate::snapshot::TelemetrySnapshot;

#[derive(Serialize)]
struct SampleRow {
    timestamp: String,
    power_w: f64,
    gpu_util: f64,
    mem_util: f64,
    process_count: usize,
}

pub fn write_csv(path: &Path, samples: &[TelemetrySnapshot]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    for sample in samples {
        let timestamp: DateTime<Utc> = sample.timestamp.into();
        writer.serialize(SampleRow {
            timestamp: timestamp.to_rfc3339(),
            // unavailable readings are exported as 0
            power_w: sample.power_w.unwrap_or(0.0),
            gpu_util: sample.gpu_util,
            mem_util: sample.mem_util,
            process_count: sample.processes.len(),
        })?;
    }
    writer.flush()?;
    tracing::info!("sample log written to {}", path.display());
    Ok(())
}
