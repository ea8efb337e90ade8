//! Trezor device management

use super::messages::{parse_failure, parse_features, MessageType, TrezorMessage};
use super::transport::TrezorTransport;
use crate::core::errors::{HardwareWalletError, Result};
use crate::hardware::session::AppConfiguration;
use std::time::Duration;
use tracing::{debug, info};

/// Trezor device
pub struct TrezorDevice {
    transport: TrezorTransport,
    features: AppConfiguration,
}

impl TrezorDevice {
    /// Open the device and run `Initialize`.
    pub fn connect(timeout: Duration) -> Result<Self> {
        info!("Connecting to Trezor hardware wallet...");
        let transport = TrezorTransport::open(timeout)?;
        let features = Self::initialize(&transport)?;
        Ok(Self { transport, features })
    }

    fn initialize(transport: &TrezorTransport) -> Result<AppConfiguration> {
        let response = transport.exchange(&TrezorMessage::initialize())?;
        let response = expect(response, MessageType::Features)?;
        let features = parse_features(&response.payload)?;
        info!("Trezor: {} v{}", features.name, features.version);
        Ok(features)
    }

    pub fn features(&self) -> &AppConfiguration {
        &self.features
    }

    /// Send `message`, acknowledging button requests until a real answer arrives.
    pub fn call(&self, message: &TrezorMessage) -> Result<TrezorMessage> {
        let mut response = self.transport.exchange(message)?;

        loop {
            match response.msg_type {
                MessageType::ButtonRequest => {
                    debug!("waiting for confirmation on the Trezor");
                    response = self.transport.exchange(&TrezorMessage::button_ack())?;
                }
                MessageType::Failure => {
                    return Err(HardwareWalletError::DeviceCommunication(parse_failure(&response.payload)));
                }
                MessageType::PinMatrixRequest | MessageType::PassphraseRequest => {
                    return Err(HardwareWalletError::DeviceCommunication(
                        "Trezor is locked. Unlock it with Trezor Suite first.".to_string(),
                    ));
                }
                _ => return Ok(response),
            }
        }
    }
}

/// Fail unless `response` is of type `wanted`.
pub fn expect(response: TrezorMessage, wanted: MessageType) -> Result<TrezorMessage> {
    match response.msg_type {
        t if t == wanted => Ok(response),
        MessageType::Failure => Err(HardwareWalletError::DeviceCommunication(parse_failure(&response.payload))),
        other => Err(HardwareWalletError::DeviceCommunication(format!(
            "expected {:?}, received {:?}",
            wanted, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::trezor::messages::encode_string_field;

    #[test]
    fn test_expect_matching_type() {
        let msg = TrezorMessage::new(MessageType::Features, vec![]);
        assert!(expect(msg, MessageType::Features).is_ok());
    }

    #[test]
    fn test_expect_failure_carries_device_message() {
        let msg = TrezorMessage::new(MessageType::Failure, encode_string_field(2, "Cancelled"));
        let err = expect(msg, MessageType::EthereumAddress).unwrap_err();
        assert_eq!(err.to_string(), "Device communication error: Cancelled");
    }

    #[test]
    fn test_expect_unexpected_type() {
        let msg = TrezorMessage::new(MessageType::Success, vec![]);
        assert!(matches!(
            expect(msg, MessageType::EthereumTxRequest),
            Err(HardwareWalletError::DeviceCommunication(_))
        ));
    }
}
