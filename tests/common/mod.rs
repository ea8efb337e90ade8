//! Shared test doubles: a scripted device and a software-key device.

#![allow(dead_code)]

use async_trait::async_trait;
use defi_hardware_wallet::blockchain::network::{ChainIdProvider, FixedChainId};
use defi_hardware_wallet::core::config::WalletConfig;
use defi_hardware_wallet::hardware::{
    AppConfiguration, DeviceAddress, DeviceSession, DeviceSignature, DeviceTransport, HardwareWallet,
};
use defi_hardware_wallet::{HardwareWalletError, Result};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::H256;
use ethers::utils::keccak256;
use ethers::utils::rlp::Rlp;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use std::time::Duration;

/// Address the scripted device reports for a path ending in `index`.
pub fn mock_address(index: u32) -> String {
    format!("0x{:040X}", 0xABCD_EF00u64 + u64::from(index))
}

fn trailing_index(path: &str) -> u32 {
    path.rsplit('/').next().and_then(|i| i.parse().ok()).unwrap_or(0)
}

#[derive(Debug, Default)]
pub struct MockState {
    pub opens: usize,
    pub closes: usize,
    pub open_sessions: usize,
    pub max_open_sessions: usize,
    /// `(path, display)` per address request.
    pub address_requests: Vec<(String, bool)>,
    /// `(path, payload_hex)` per sign request.
    pub sign_requests: Vec<(String, String)>,
    pub fail_address_at: Option<u32>,
    pub sign_response: Option<DeviceSignature>,
    pub sign_error: Option<String>,
    pub sign_hangs: bool,
    pub sign_delay: Option<Duration>,
    pub app: Option<AppConfiguration>,
}

/// Scripted device. All sessions share the same state.
#[derive(Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    supported: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            supported: true,
        }
    }

    pub fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::new()
        }
    }

    pub fn with_signature(self, signature: DeviceSignature) -> Self {
        self.state.lock().sign_response = Some(signature);
        self
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock()
    }
}

#[async_trait]
impl DeviceTransport for MockTransport {
    type Session = MockSession;

    fn name(&self) -> &str {
        "Mock"
    }

    async fn is_supported(&self) -> bool {
        self.supported
    }

    async fn open(&self) -> Result<MockSession> {
        let mut state = self.state.lock();
        state.opens += 1;
        state.open_sessions += 1;
        state.max_open_sessions = state.max_open_sessions.max(state.open_sessions);
        Ok(MockSession {
            state: self.state.clone(),
        })
    }
}

pub struct MockSession {
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl DeviceSession for MockSession {
    async fn get_address(&mut self, path: &str, display: bool, _chain_code: bool) -> Result<DeviceAddress> {
        let mut state = self.state.lock();
        state.address_requests.push((path.to_string(), display));

        let index = trailing_index(path);
        if state.fail_address_at == Some(index) {
            return Err(HardwareWalletError::DeviceCommunication(format!(
                "device unplugged at index {}",
                index
            )));
        }
        Ok(DeviceAddress::new(mock_address(index)))
    }

    async fn sign_transaction(&mut self, path: &str, payload_hex: &str) -> Result<DeviceSignature> {
        let (hangs, delay) = {
            let mut state = self.state.lock();
            state.sign_requests.push((path.to_string(), payload_hex.to_string()));
            (state.sign_hangs, state.sign_delay)
        };

        if hangs {
            std::future::pending::<()>().await;
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.state.lock();
        if let Some(message) = &state.sign_error {
            return Err(HardwareWalletError::DeviceCommunication(message.clone()));
        }
        state
            .sign_response
            .clone()
            .ok_or_else(|| HardwareWalletError::DeviceCommunication("no signature scripted".to_string()))
    }

    async fn app_configuration(&mut self) -> Result<AppConfiguration> {
        Ok(self.state.lock().app.clone().unwrap_or(AppConfiguration {
            name: "Ethereum".to_string(),
            version: "1.10.4".to_string(),
            flags: 0x01,
        }))
    }

    fn close(&mut self) {
        let mut state = self.state.lock();
        state.closes += 1;
        state.open_sessions -= 1;
    }
}

/// Device backed by software keys, one per derivation path.
///
/// Signs like firmware does: keccak of the payload, `v = recid + 35 + 2 * chain_id`
/// with the chain id read from the payload. `chain_id_skew` makes it sign for a
/// different chain.
#[derive(Clone, Default)]
pub struct SoftwareTransport {
    pub chain_id_skew: u64,
}

impl SoftwareTransport {
    pub fn wallet_for(path: &str) -> LocalWallet {
        LocalWallet::from_bytes(&keccak256(path.as_bytes())).expect("keccak output is a valid key")
    }
}

#[async_trait]
impl DeviceTransport for SoftwareTransport {
    type Session = SoftwareSession;

    fn name(&self) -> &str {
        "Software"
    }

    async fn is_supported(&self) -> bool {
        true
    }

    async fn open(&self) -> Result<SoftwareSession> {
        Ok(SoftwareSession {
            chain_id_skew: self.chain_id_skew,
        })
    }
}

pub struct SoftwareSession {
    chain_id_skew: u64,
}

#[async_trait]
impl DeviceSession for SoftwareSession {
    async fn get_address(&mut self, path: &str, _display: bool, _chain_code: bool) -> Result<DeviceAddress> {
        let wallet = SoftwareTransport::wallet_for(path);
        Ok(DeviceAddress::new(ethers::utils::to_checksum(&wallet.address(), None)))
    }

    async fn sign_transaction(&mut self, path: &str, payload_hex: &str) -> Result<DeviceSignature> {
        let payload = hex::decode(payload_hex)?;
        let chain_id: u64 = Rlp::new(&payload)
            .val_at(6)
            .map_err(|e| HardwareWalletError::InvalidTransaction(e.to_string()))?;

        let signature = SoftwareTransport::wallet_for(path)
            .sign_hash(H256::from(keccak256(&payload)))
            .map_err(|e| HardwareWalletError::DeviceCommunication(e.to_string()))?;

        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        signature.r.to_big_endian(&mut r);
        signature.s.to_big_endian(&mut s);
        Ok(DeviceSignature {
            v: signature.v - 27 + 35 + 2 * (chain_id + self.chain_id_skew),
            r: r.to_vec(),
            s: s.to_vec(),
        })
    }

    async fn app_configuration(&mut self) -> Result<AppConfiguration> {
        Ok(AppConfiguration {
            name: "Software".to_string(),
            version: "0.0.0".to_string(),
            flags: 0,
        })
    }

    fn close(&mut self) {}
}

/// Chain id source that always fails.
pub struct UnreachableChain;

#[async_trait]
impl ChainIdProvider for UnreachableChain {
    async fn network_id(&self) -> Result<u64> {
        Err(HardwareWalletError::Network("connection refused".to_string()))
    }
}

pub fn config_with(path: &str, window_size: u32) -> WalletConfig {
    let mut config = WalletConfig::default();
    config.derivation.path = path.to_string();
    config.derivation.window_size = window_size;
    config
}

/// Initialised wallet on chain `chain_id`.
pub async fn wallet<T: DeviceTransport>(
    transport: T,
    chain_id: u64,
    config: WalletConfig,
) -> HardwareWallet<T, FixedChainId> {
    let wallet = HardwareWallet::new(transport, FixedChainId(chain_id), config);
    assert!(wallet.init().await);
    wallet
}
