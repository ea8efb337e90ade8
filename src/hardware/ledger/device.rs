//! Ledger device management

use super::apdu::{ApduCommand, ApduResponse};
use super::transport::LedgerTransport;
use crate::core::errors::{HardwareWalletError, Result};
use crate::hardware::session::AppConfiguration;
use std::time::Duration;
use tracing::info;

/// Ledger device
pub struct LedgerDevice {
    transport: LedgerTransport,
}

impl LedgerDevice {
    pub fn connect(timeout: Duration) -> Result<Self> {
        info!("Connecting to Ledger hardware wallet...");
        let transport = LedgerTransport::open(timeout)?;
        Ok(Self { transport })
    }

    /// Flags and version of the Ethereum app.
    pub fn get_app_configuration(&self) -> Result<AppConfiguration> {
        let response = self
            .exchange(&ApduCommand::get_app_configuration())?
            .into_result("get app configuration")?;
        let config = parse_app_configuration(&response.data)?;
        info!("Ledger app: {} v{}", config.name, config.version);
        Ok(config)
    }

    pub fn exchange(&self, command: &ApduCommand) -> Result<ApduResponse> {
        self.transport.exchange(command)
    }
}

/// `flags || major || minor || patch`
pub fn parse_app_configuration(data: &[u8]) -> Result<AppConfiguration> {
    if data.len() < 4 {
        return Err(HardwareWalletError::DeviceCommunication(
            "incomplete app configuration".to_string(),
        ));
    }

    Ok(AppConfiguration {
        name: "Ethereum".to_string(),
        version: format!("{}.{}.{}", data[1], data[2], data[3]),
        flags: data[0],
    })
}
