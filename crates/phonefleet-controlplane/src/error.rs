use phonefleet_provider::{ProviderError, ProviderType};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControlPlaneError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Provider {0} does not support reconciliation")]
    UnsupportedProvider(ProviderType),

    #[error("Device {0} has no external id")]
    MissingExternalId(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ControlPlaneError>;
