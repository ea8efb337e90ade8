//! Hardware wallet session
//!
//! Ties a device transport, a chain id source and the address cache together
//! and serialises device operations.

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::blockchain::network::ChainIdProvider;
use crate::core::address_cache::AddressPathCache;
use crate::core::config::WalletConfig;
use crate::core::derivation::DerivationPath;
use crate::core::errors::{HardwareWalletError, Result};
use crate::core::transaction::{SignedTransaction, UnsignedTransaction};
use crate::hardware::accounts::AccountEnumerator;
use crate::hardware::session::{with_timeout, AppConfiguration, DeviceSession, DeviceTransport, SessionGuard};
use crate::hardware::signer::{SignerOptions, TransactionSigner};

pub struct HardwareWallet<T: DeviceTransport, C: ChainIdProvider> {
    transport: T,
    chain: C,
    config: WalletConfig,
    cache: AddressPathCache,
    supported: OnceCell<bool>,
    accounts: RwLock<Option<Vec<String>>>,
    device_lock: Mutex<()>,
}

impl<T: DeviceTransport, C: ChainIdProvider> HardwareWallet<T, C> {
    pub fn new(transport: T, chain: C, config: WalletConfig) -> Self {
        Self::with_cache(transport, chain, config, AddressPathCache::new())
    }

    /// Build a session around an existing cache, e.g. one shared with another session.
    pub fn with_cache(transport: T, chain: C, config: WalletConfig, cache: AddressPathCache) -> Self {
        Self {
            transport,
            chain,
            config,
            cache,
            supported: OnceCell::new(),
            accounts: RwLock::new(None),
            device_lock: Mutex::new(()),
        }
    }

    /// Probe the transport once. Later calls return the first result.
    pub async fn init(&self) -> bool {
        if let Some(supported) = self.supported.get() {
            return *supported;
        }

        let supported = self.transport.is_supported().await;
        if supported {
            info!(device = self.transport.name(), "hardware wallet transport available");
        } else {
            warn!(device = self.transport.name(), "hardware wallet transport not available");
        }
        *self.supported.get_or_init(|| supported)
    }

    pub fn is_supported(&self) -> bool {
        self.supported.get().copied().unwrap_or(false)
    }

    fn ensure_supported(&self) -> Result<()> {
        if self.is_supported() {
            Ok(())
        } else {
            Err(HardwareWalletError::DeviceNotSupported(format!(
                "{} is not supported on this host",
                self.transport.name()
            )))
        }
    }

    /// Accounts of the configured window. Enumerates on the first call only.
    pub async fn get_accounts(&self) -> Result<Vec<String>> {
        self.ensure_supported()?;
        let _guard = self.device_lock.lock().await;

        if let Some(accounts) = self.accounts() {
            return Ok(accounts);
        }

        let path = DerivationPath::parse(&self.config.derivation.path)?;
        let enumerator = AccountEnumerator::new(&self.transport, &self.cache, self.config.device.timeout());
        let accounts = enumerator
            .enumerate(
                &path,
                self.config.derivation.window_size,
                self.config.derivation.ask_confirmation,
            )
            .await?;

        *self.accounts.write() = Some(accounts.clone());
        Ok(accounts)
    }

    /// Sign `tx` with the key `tx.from` was enumerated from.
    pub async fn sign_transaction(&self, tx: &UnsignedTransaction) -> Result<SignedTransaction> {
        self.ensure_supported()?;
        let _guard = self.device_lock.lock().await;

        let signer = TransactionSigner::new(
            &self.transport,
            &self.chain,
            &self.cache,
            SignerOptions::from(&self.config),
        );
        signer.sign(tx).await
    }

    /// Version information of the device application.
    pub async fn get_app_config(&self) -> Result<AppConfiguration> {
        self.ensure_supported()?;
        let _guard = self.device_lock.lock().await;

        let timeout = self.config.device.timeout();
        let mut session = SessionGuard::open(&self.transport, timeout).await?;
        let app = with_timeout(timeout, "app_configuration", session.app_configuration()).await?;
        session.release();

        info!(device = self.transport.name(), app = %app.name, version = %app.version, "device app configuration");
        Ok(app)
    }

    /// Derivation path an enumerated address came from.
    pub fn address_path(&self, address: &str) -> Option<String> {
        self.cache.path_for(address)
    }

    /// Accounts from the last enumeration, if any.
    pub fn accounts(&self) -> Option<Vec<String>> {
        self.accounts.read().clone()
    }

    pub fn cache(&self) -> &AddressPathCache {
        &self.cache
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}
