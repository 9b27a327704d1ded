use thiserror::Error;

/// Fatal startup conditions. Everything recoverable (an unavailable power
/// reading, a failed calibration pass) is degraded locally and never
/// surfaced through this type.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(
        "target process '{filter}' not found running on the GPU, visible processes: [{}]",
        .visible.join(", ")
    )]
    NoTargetProcess { filter: String, visible: Vec<String> },
}
