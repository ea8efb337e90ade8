use thiserror::Error;

/// Error type for every hardware wallet operation.
///
/// Each failure is local to the in-flight call; device sessions are always
/// released before one of these is returned.
#[derive(Debug, Error)]
pub enum HardwareWalletError {
    /// Derivation path does not follow `44'/60|61'/x'/n`.
    #[error("Invalid derivation path: {0}")]
    InvalidDerivationPath(String),

    /// The device transport is unavailable on this host.
    #[error("Device not supported: {0}")]
    DeviceNotSupported(String),

    /// Any rejection coming back from the transport or the device app.
    #[error("Device communication error: {0}")]
    DeviceCommunication(String),

    /// Signing was requested for an address that was never enumerated.
    #[error("address unknown '{0}'")]
    UnknownAddress(String),

    /// The device returned a signature that does not match the request.
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// Transaction fields could not be parsed or encoded.
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    /// Chain-id lookup failed.
    #[error("Network error: {0}")]
    Network(String),

    /// A device or network call did not complete in time.
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// Configuration could not be loaded or is inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl HardwareWalletError {
    /// Errors where a fresh attempt by the caller may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HardwareWalletError::Network(_) | HardwareWalletError::Timeout(_)
        )
    }

    /// Errors that indicate the device produced something untrustworthy.
    pub fn is_critical(&self) -> bool {
        matches!(self, HardwareWalletError::InvalidSignature(_))
    }
}

impl From<serde_json::Error> for HardwareWalletError {
    fn from(err: serde_json::Error) -> Self {
        HardwareWalletError::InvalidTransaction(err.to_string())
    }
}

impl From<hex::FromHexError> for HardwareWalletError {
    fn from(err: hex::FromHexError) -> Self {
        HardwareWalletError::InvalidTransaction(format!("invalid hex: {}", err))
    }
}

impl From<tokio::time::error::Elapsed> for HardwareWalletError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        HardwareWalletError::Timeout(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HardwareWalletError>;
