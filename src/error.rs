//! Error types for wg-provision
//!
//! This module defines the error taxonomy used throughout the crate.
//! We use `thiserror` for ergonomic error definitions and `anyhow` for
//! error propagation in the binary's top-level code.

use thiserror::Error;

/// Main error type for provisioning operations
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// The address pool has no free addresses left (recoverable; retry
    /// after a revoke or widen the subnet)
    #[error("Address pool exhausted: no free addresses in subnet")]
    AllocationExhausted,

    /// Caller-supplied key material is malformed (user-correctable)
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Config rendering failed on malformed inputs; indicates a bug in the
    /// caller rather than a normal failure path
    #[error("Render error: {0}")]
    Render(String),

    /// The WireGuard interface does not exist yet (deployment not ready,
    /// request fails gracefully)
    #[error("Device not ready: {0}")]
    DeviceNotReady(String),

    /// The device rejected a peer mutation or the control call failed
    #[error("Device error: {0}")]
    Device(String),

    /// The device was mutated but durable state was not saved; device and
    /// saved config now disagree and need operator reconciliation
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProvisionError {
    /// Stable kind label for logs and the control API
    pub fn kind(&self) -> &'static str {
        match self {
            ProvisionError::AllocationExhausted => "allocation_exhausted",
            ProvisionError::InvalidKey(_) => "invalid_key",
            ProvisionError::Render(_) => "render_error",
            ProvisionError::DeviceNotReady(_) => "device_not_ready",
            ProvisionError::Device(_) => "device_error",
            ProvisionError::Persistence(_) => "persistence_error",
            ProvisionError::Config(_) => "config_error",
            ProvisionError::Io(_) => "io_error",
        }
    }
}

/// Result type alias using ProvisionError
pub type Result<T> = std::result::Result<T, ProvisionError>;

impl From<toml::de::Error> for ProvisionError {
    fn from(err: toml::de::Error) -> Self {
        ProvisionError::Config(err.to_string())
    }
}
