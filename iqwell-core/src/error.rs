use thiserror::Error;

/// All errors produced by iqwell-core.
#[derive(Debug, Error)]
pub enum IqwellError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("device error: {0}")]
    Device(String),

    #[error("acquisition stalled: no data arrived within the configured pull timeout")]
    AcquisitionStalled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, IqwellError>;
