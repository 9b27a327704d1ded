//! GPU telemetry access through NVML.
//!
//! The core never talks to NVML directly; it consumes [`TelemetrySource`],
//! which returns plain data and reports unavailability as `None`/empty
//! instead of errors. Tests drive the core with a scripted source.

use std::collections::HashMap;
use std::time::SystemTime;

use anyhow::Context;
use anyhow::Result;
use nvml_wrapper::enums::device::UsedGpuMemory;
use nvml_wrapper::error::NvmlError;
use nvml_wrapper::struct_wrappers::device::ProcessUtilizationSample;
use nvml_wrapper::Nvml;

use crate::snapshot::ProcessSnapshot;
use crate::snapshot::TelemetrySnapshot;
use crate::snapshot::UtilizationVector;

/// One-per-tick view of the GPU. Every accessor tolerates driver
/// unavailability; a failed query is `None` or empty, never an error.
pub trait TelemetrySource {
    /// Current aggregate board power in watts.
    fn aggregate_power_w(&mut self) -> Option<f64>;

    /// GPU-wide (compute %, memory bandwidth %) utilization.
    fn aggregate_utilization(&mut self) -> Option<(f64, f64)>;

    /// Processes currently resident on the GPU with their utilization
    /// counters. Empty when the query fails or nothing is running.
    fn process_snapshots(&mut self) -> Vec<ProcessSnapshot>;

    /// Composes the three accessors into one tick's snapshot.
    fn snapshot(&mut self) -> TelemetrySnapshot {
        let power_w = self.aggregate_power_w();
        let (gpu_util, mem_util) = self.aggregate_utilization().unwrap_or((0.0, 0.0));
        TelemetrySnapshot {
            timestamp: SystemTime::now(),
            power_w,
            gpu_util,
            mem_util,
            processes: self.process_snapshots(),
        }
    }
}

/// NVML-backed telemetry for a single device.
pub struct NvmlTelemetry {
    nvml: Nvml,
    device_index: u32,
    /// High-water mark for `process_utilization_stats`, so each tick only
    /// averages samples newer than the previous tick.
    last_seen_timestamp: u64,
}

impl NvmlTelemetry {
    /// Initializes NVML and verifies the device exists.
    pub fn init(device_index: u32) -> Result<Self> {
        let nvml = init_nvml()?;
        let device = nvml
            .device_by_index(device_index)
            .with_context(|| format!("GPU device {device_index} not found"))?;
        let name = device.name().unwrap_or_else(|_| "unknown".to_string());
        tracing::info!("Monitoring GPU {}: {}", device_index, name);
        drop(device);

        Ok(Self {
            nvml,
            device_index,
            last_seen_timestamp: 0,
        })
    }

    fn utilization_samples(&mut self) -> HashMap<u32, UtilizationVector> {
        let Ok(device) = self.nvml.device_by_index(self.device_index) else {
            return HashMap::new();
        };
        let samples = match device.process_utilization_stats(self.last_seen_timestamp) {
            Ok(samples) => samples,
            // NotFound means no process produced a sample since the last
            // timestamp, e.g. right after startup.
            Err(NvmlError::NotFound) => Vec::new(),
            Err(e) => {
                tracing::debug!("process utilization query failed: {e}");
                Vec::new()
            }
        };

        let mut grouped: HashMap<u32, Vec<&ProcessUtilizationSample>> = HashMap::new();
        for sample in &samples {
            // The driver occasionally reports garbage counters above 100%.
            if sample.sm_util > 100
                || sample.mem_util > 100
                || sample.enc_util > 100
                || sample.dec_util > 100
            {
                continue;
            }
            if sample.timestamp > self.last_seen_timestamp {
                grouped.entry(sample.pid).or_default().push(sample);
            }
        }
        if let Some(newest) = samples.iter().map(|s| s.timestamp).max() {
            self.last_seen_timestamp = self.last_seen_timestamp.max(newest);
        }

        grouped
            .into_iter()
            .map(|(pid, samples)| {
                let n = samples.len() as f64;
                let mut util = UtilizationVector::default();
                for s in &samples {
                    util.sm += s.sm_util as f64;
                    util.mem += s.mem_util as f64;
                    util.enc += s.enc_util as f64;
                    util.dec += s.dec_util as f64;
                }
                util.sm /= n;
                util.mem /= n;
                util.enc /= n;
                util.dec /= n;
                (pid, util)
            })
            .collect()
    }
}

impl TelemetrySource for NvmlTelemetry {
    fn aggregate_power_w(&mut self) -> Option<f64> {
        let device = self.nvml.device_by_index(self.device_index).ok()?;
        // NVML reports milliwatts.
        device.power_usage().ok().map(|mw| mw as f64 / 1000.0)
    }

    fn aggregate_utilization(&mut self) -> Option<(f64, f64)> {
        let device = self.nvml.device_by_index(self.device_index).ok()?;
        device
            .utilization_rates()
            .ok()
            .map(|u| (u.gpu as f64, u.memory as f64))
    }

    fn process_snapshots(&mut self) -> Vec<ProcessSnapshot> {
        let utilizations = self.utilization_samples();

        let Ok(device) = self.nvml.device_by_index(self.device_index) else {
            return Vec::new();
        };
        let mut infos = device.running_compute_processes().unwrap_or_default();
        infos.extend(device.running_graphics_processes().unwrap_or_default());

        let mut seen = std::collections::HashSet::new();
        let mut processes = Vec::with_capacity(infos.len());
        for info in infos {
            if !seen.insert(info.pid) {
                continue;
            }
            let memory_used_mb = match info.used_gpu_memory {
                UsedGpuMemory::Used(bytes) => Some(bytes as f64 / (1024.0 * 1024.0)),
                UsedGpuMemory::Unavailable => None,
            };
            processes.push(ProcessSnapshot {
                pid: info.pid,
                name: process_name(info.pid),
                util: utilizations.get(&info.pid).copied().unwrap_or_default(),
                memory_used_mb,
            });
        }
        processes
    }
}

fn init_nvml() -> Result<Nvml> {
    match Nvml::init() {
        Ok(nvml) => Ok(nvml),
        Err(_) => {
            tracing::warn!("Standard NVML init failed, trying with explicit library path");
            Nvml::builder()
                .lib_path(std::ffi::OsStr::new("libnvidia-ml.so.1"))
                .init()
                .context("failed to initialize NVML")
        }
    }
}

/// Resolves a PID to its short command name via procfs.
fn process_name(pid: u32) -> String {
    match std::fs::read_to_string(format!("/proc/{pid}/comm")) {
        Ok(comm) if !comm.trim().is_empty() => comm.trim().to_string(),
        _ => format!("pid:{pid}"),
    }
}
