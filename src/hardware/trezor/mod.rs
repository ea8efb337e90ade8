//! Trezor hardware wallet binding
//!
//! Speaks the Trezor wire protocol over USB HID (Trezor One and Model T).
//! HID I/O is blocking and runs on tokio's blocking pool.

pub mod device;
pub mod ethereum_app;
pub mod messages;
pub mod transport;

pub use device::TrezorDevice;
pub use ethereum_app::TrezorEthereumApp;
pub use transport::TrezorTransport;

use crate::core::derivation::Bip32Path;
use crate::core::errors::{HardwareWalletError, Result};
use crate::core::transaction::decode_hex_padded;
use crate::hardware::session::{AppConfiguration, DeviceAddress, DeviceSession, DeviceSignature, DeviceTransport};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Opens sessions on the first attached Trezor.
#[derive(Debug, Clone)]
pub struct TrezorHid {
    io_timeout: Duration,
}

impl TrezorHid {
    pub fn new(io_timeout: Duration) -> Self {
        Self { io_timeout }
    }
}

impl Default for TrezorHid {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

#[async_trait]
impl DeviceTransport for TrezorHid {
    type Session = TrezorSession;

    fn name(&self) -> &str {
        "Trezor"
    }

    async fn is_supported(&self) -> bool {
        tokio::task::spawn_blocking(transport::is_present)
            .await
            .unwrap_or(false)
    }

    async fn open(&self) -> Result<TrezorSession> {
        let timeout = self.io_timeout;
        let app = tokio::task::spawn_blocking(move || {
            TrezorDevice::connect(timeout).map(TrezorEthereumApp::new)
        })
        .await
        .map_err(|e| HardwareWalletError::DeviceCommunication(format!("Trezor open task failed: {}", e)))??;

        Ok(TrezorSession {
            app: Arc::new(Mutex::new(Some(app))),
        })
    }
}

/// An open Trezor connection.
pub struct TrezorSession {
    app: Arc<Mutex<Option<TrezorEthereumApp>>>,
}

impl TrezorSession {
    async fn run<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&TrezorEthereumApp) -> Result<R> + Send + 'static,
    {
        let app = self.app.clone();
        tokio::task::spawn_blocking(move || {
            let guard = app.lock();
            let app = guard
                .as_ref()
                .ok_or_else(|| HardwareWalletError::DeviceCommunication("Trezor session closed".to_string()))?;
            f(app)
        })
        .await
        .map_err(|e| HardwareWalletError::DeviceCommunication(format!("Trezor task failed: {}", e)))?
    }
}

#[async_trait]
impl DeviceSession for TrezorSession {
    async fn get_address(&mut self, path: &str, display: bool, _chain_code: bool) -> Result<DeviceAddress> {
        let bip32 = Bip32Path::from_str(path)?;
        self.run(move |app| app.get_address(&bip32, display)).await
    }

    async fn sign_transaction(&mut self, path: &str, payload_hex: &str) -> Result<DeviceSignature> {
        let bip32 = Bip32Path::from_str(path)?;
        let payload = decode_hex_padded(payload_hex)?;
        self.run(move |app| app.sign_transaction(&bip32, &payload)).await
    }

    async fn app_configuration(&mut self) -> Result<AppConfiguration> {
        self.run(|app| Ok(app.get_app_configuration())).await
    }

    fn close(&mut self) {
        // Lock held by a timed-out blocking task: the app goes with the last Arc.
        if let Some(mut guard) = self.app.try_lock() {
            guard.take();
        }
        debug!("Trezor session closed");
    }
}
