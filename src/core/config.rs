use crate::core::errors::{HardwareWalletError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Which device family to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    #[default]
    Ledger,
    Trezor,
}

/// What to do when the chain id recovered from `v` differs from the network's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainIdMismatchPolicy {
    /// Fail the signing call with `InvalidSignature`.
    #[default]
    Reject,
    /// Log and return the transaction with `chain_id_mismatch` set.
    Warn,
}

/// Derivation path configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivationConfig {
    /// Template path, `44'/60|61'/x'/n`
    #[serde(default = "DerivationConfig::default_path")]
    pub path: String,

    /// Number of sibling accounts derived per enumeration
    #[serde(default = "DerivationConfig::default_window_size")]
    pub window_size: u32,

    /// Ask the device to show each address for confirmation
    #[serde(default)]
    pub ask_confirmation: bool,
}

impl DerivationConfig {
    fn default_path() -> String { "44'/60'/0'/0".to_string() }
    fn default_window_size() -> u32 { 5 }
}

impl Default for DerivationConfig {
    fn default() -> Self {
        Self {
            path: Self::default_path(),
            window_size: Self::default_window_size(),
            ask_confirmation: false,
        }
    }
}

/// Device configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default)]
    pub kind: DeviceKind,

    /// Upper bound for every device call (seconds)
    #[serde(default = "DeviceConfig::default_timeout_secs")]
    pub timeout_secs: u64,
}

impl DeviceConfig {
    fn default_timeout_secs() -> u64 { 60 }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            kind: DeviceKind::default(),
            timeout_secs: Self::default_timeout_secs(),
        }
    }
}

/// Network configuration used to resolve the chain id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "NetworkConfig::default_rpc_url")]
    pub rpc_url: String,

    /// Skip the RPC lookup and sign for this chain id
    #[serde(default)]
    pub chain_id: Option<u64>,

    #[serde(default = "NetworkConfig::default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl NetworkConfig {
    fn default_rpc_url() -> String { "https://eth.llamarpc.com".to_string() }
    fn default_request_timeout_secs() -> u64 { 10 }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            rpc_url: Self::default_rpc_url(),
            chain_id: None,
            request_timeout_secs: Self::default_request_timeout_secs(),
        }
    }
}

/// Signing configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SigningConfig {
    #[serde(default)]
    pub chain_id_mismatch: ChainIdMismatchPolicy,

    /// Recover the signer from the returned signature and compare with `from`
    #[serde(default)]
    pub verify_signer: bool,
}

/// Hardware wallet configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WalletConfig {
    #[serde(default)]
    pub derivation: DerivationConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub signing: SigningConfig,
}

impl WalletConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| HardwareWalletError::Config(e.to_string()))
    }

    /// Load a TOML file and apply `WALLET_*` environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            HardwareWalletError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load from `CONFIG_PATH` (default `config.toml`); a missing file yields defaults.
    pub fn load_default() -> Result<Self> {
        let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
        if Path::new(&config_path).exists() {
            return Self::load(&config_path);
        }

        debug!("{} not found, using default configuration", config_path);
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("WALLET_DERIVATION_PATH") {
            self.derivation.path = path;
        }
        if let Ok(url) = std::env::var("WALLET_ETHEREUM_RPC_URL") {
            self.network.rpc_url = url;
        }
        if let Ok(chain_id) = std::env::var("WALLET_CHAIN_ID") {
            let chain_id = chain_id
                .trim()
                .parse::<u64>()
                .map_err(|e| HardwareWalletError::Config(format!("WALLET_CHAIN_ID: {}", e)))?;
            self.network.chain_id = Some(chain_id);
        }
        if let Ok(secs) = std::env::var("WALLET_DEVICE_TIMEOUT_SECS") {
            self.device.timeout_secs = secs
                .trim()
                .parse::<u64>()
                .map_err(|e| HardwareWalletError::Config(format!("WALLET_DEVICE_TIMEOUT_SECS: {}", e)))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.derivation.window_size == 0 {
            return Err(HardwareWalletError::Config("window_size must be at least 1".to_string()));
        }
        if self.device.timeout_secs == 0 {
            return Err(HardwareWalletError::Config("device timeout_secs must be at least 1".to_string()));
        }
        if self.network.chain_id.is_none() && self.network.rpc_url.trim().is_empty() {
            return Err(HardwareWalletError::Config(
                "either network.rpc_url or network.chain_id must be set".to_string(),
            ));
        }
        Ok(())
    }
}
