use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::attribute::DenominatorPolicy;
use crate::attribute::WeightVector;
use crate::error::MonitorError;
use crate::sampler::SamplerConfig;

#[derive(Parser)]
#[command(
    name = "gpuwatt",
    about = "Attributes GPU energy consumption to individual processes",
    version
)]
pub struct Cli {
    #[arg(
        short = 'p',
        long = "process",
        help = "Only attribute energy to processes whose name contains this string (case-insensitive)"
    )]
    pub process: Option<String>,

    #[arg(
        short = 'd',
        long = "duration",
        env = "GPUWATT_DURATION_SECS",
        default_value_t = 60,
        help = "Run duration in seconds"
    )]
    pub duration_secs: u64,

    #[arg(
        short = 'i',
        long = "interval",
        env = "GPUWATT_INTERVAL_MS",
        default_value_t = 1000,
        help = "Sampling interval in milliseconds"
    )]
    pub interval_ms: u64,

    #[arg(
        long,
        default_value_t = 1.0,
        help = "Power weight per percent of SM (compute) utilization"
    )]
    pub weight_compute: f64,

    #[arg(
        long,
        default_value_t = 0.4,
        help = "Power weight per percent of memory bandwidth utilization"
    )]
    pub weight_memory: f64,

    #[arg(
        long,
        default_value_t = 0.3,
        help = "Power weight per percent of encoder utilization"
    )]
    pub weight_encoder: f64,

    #[arg(
        long,
        default_value_t = 0.3,
        help = "Power weight per percent of decoder utilization"
    )]
    pub weight_decoder: f64,

    #[arg(
        long,
        value_enum,
        default_value = "process-sum",
        help = "How the active-power denominator is formed"
    )]
    pub denominator: DenominatorPolicy,

    #[arg(
        long,
        value_hint = clap::ValueHint::FilePath,
        help = "CSV sample log path (defaults to gpu_energy_<timestamp>.csv)"
    )]
    pub csv_path: Option<PathBuf>,

    #[arg(
        long,
        env = "GPUWATT_GPU_INDEX",
        default_value_t = 0,
        help = "NVML index of the GPU to monitor"
    )]
    pub gpu_index: u32,
}

pub struct RunConfig {
    pub gpu_index: u32,
    pub csv_path: PathBuf,
    pub sampler: SamplerConfig,
}

impl Cli {
    /// Validates the arguments into an immutable run configuration.
    /// Negative weights and non-positive duration/interval are fatal here,
    /// before any sampling begins.
    pub fn into_config(self) -> Result<RunConfig, MonitorError> {
        if self.duration_secs == 0 {
            return Err(MonitorError::InvalidConfig(
                "duration must be positive".to_string(),
            ));
        }
        if self.interval_ms == 0 {
            return Err(MonitorError::InvalidConfig(
                "interval must be positive".to_string(),
            ));
        }
        let weights = WeightVector::new(
            self.weight_compute,
            self.weight_memory,
            self.weight_encoder,
            self.weight_decoder,
        )?;

        let csv_path = self.csv_path.unwrap_or_else(|| {
            PathBuf::from(format!(
                "gpu_energy_{}.csv",
                chrono::Local::now().format("%Y%m%d_%H%M%S")
            ))
        });

        Ok(RunConfig {
            gpu_index: self.gpu_index,
            csv_path,
            sampler: SamplerConfig {
                duration: Duration::from_secs(self.duration_secs),
                interval: Duration::from_millis(self.interval_ms),
                weights,
                policy: self.denominator,
                filter: self.process,
            },
        })
    }
}
