//! Ledger hardware wallet binding
//!
//! Talks to the Ledger Ethereum app over USB HID. HID I/O is blocking, so
//! every device call runs on tokio's blocking pool.

pub mod apdu;
pub mod device;
pub mod ethereum_app;
pub mod transport;

pub use device::LedgerDevice;
pub use ethereum_app::LedgerEthereumApp;
pub use transport::LedgerTransport;

use crate::core::derivation::Bip32Path;
use crate::core::errors::{HardwareWalletError, Result};
use crate::core::transaction::decode_hex_padded;
use crate::hardware::session::{AppConfiguration, DeviceAddress, DeviceSession, DeviceSignature, DeviceTransport};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Opens sessions on the first attached Ledger.
#[derive(Debug, Clone)]
pub struct LedgerHid {
    io_timeout: Duration,
}

impl LedgerHid {
    pub fn new(io_timeout: Duration) -> Self {
        Self { io_timeout }
    }
}

impl Default for LedgerHid {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

#[async_trait]
impl DeviceTransport for LedgerHid {
    type Session = LedgerSession;

    fn name(&self) -> &str {
        "Ledger"
    }

    async fn is_supported(&self) -> bool {
        tokio::task::spawn_blocking(transport::is_present)
            .await
            .unwrap_or(false)
    }

    async fn open(&self) -> Result<LedgerSession> {
        let timeout = self.io_timeout;
        let app = tokio::task::spawn_blocking(move || {
            LedgerDevice::connect(timeout).map(LedgerEthereumApp::new)
        })
        .await
        .map_err(|e| HardwareWalletError::DeviceCommunication(format!("Ledger open task failed: {}", e)))??;

        Ok(LedgerSession {
            app: Arc::new(Mutex::new(Some(app))),
        })
    }
}

/// An open Ledger connection. Dropping the app releases the HID handle.
pub struct LedgerSession {
    app: Arc<Mutex<Option<LedgerEthereumApp>>>,
}

impl LedgerSession {
    async fn run<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&LedgerEthereumApp) -> Result<R> + Send + 'static,
    {
        let app = self.app.clone();
        tokio::task::spawn_blocking(move || {
            let guard = app.lock();
            let app = guard
                .as_ref()
                .ok_or_else(|| HardwareWalletError::DeviceCommunication("Ledger session closed".to_string()))?;
            f(app)
        })
        .await
        .map_err(|e| HardwareWalletError::DeviceCommunication(format!("Ledger task failed: {}", e)))?
    }
}

#[async_trait]
impl DeviceSession for LedgerSession {
    async fn get_address(&mut self, path: &str, display: bool, chain_code: bool) -> Result<DeviceAddress> {
        let bip32 = Bip32Path::from_str(path)?;
        self.run(move |app| app.get_address(&bip32, display, chain_code)).await
    }

    async fn sign_transaction(&mut self, path: &str, payload_hex: &str) -> Result<DeviceSignature> {
        let bip32 = Bip32Path::from_str(path)?;
        let payload = decode_hex_padded(payload_hex)?;
        self.run(move |app| app.sign_transaction(&bip32, &payload)).await
    }

    async fn app_configuration(&mut self) -> Result<AppConfiguration> {
        self.run(|app| app.get_app_configuration()).await
    }

    fn close(&mut self) {
        // Lock held by a timed-out blocking task: the app goes with the last Arc.
        if let Some(mut guard) = self.app.try_lock() {
            guard.take();
        }
        debug!("Ledger session closed");
    }
}
