//! Transaction signing against a hardware device
//!
//! Resolves the sender's derivation path from the cache, serialises the
//! unsigned transaction with EIP-155 placeholders, has the device sign it and
//! reassembles the signed raw transaction.

use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::blockchain::network::ChainIdProvider;
use crate::core::address_cache::AddressPathCache;
use crate::core::config::{ChainIdMismatchPolicy, WalletConfig};
use crate::core::errors::{HardwareWalletError, Result};
use crate::core::transaction::{SignedTransaction, UnsignedTransaction};
use crate::hardware::session::{with_timeout, DeviceSession, DeviceTransport, SessionGuard};
use ethers::types::Address;

const FIRMWARE_MISMATCH_MSG: &str = "Invalid signature received. Please update your device firmware.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignerOptions {
    pub timeout: Duration,
    pub mismatch_policy: ChainIdMismatchPolicy,
    pub verify_signer: bool,
}

impl Default for SignerOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            mismatch_policy: ChainIdMismatchPolicy::Reject,
            verify_signer: false,
        }
    }
}

impl From<&WalletConfig> for SignerOptions {
    fn from(config: &WalletConfig) -> Self {
        Self {
            timeout: config.device.timeout(),
            mismatch_policy: config.signing.chain_id_mismatch,
            verify_signer: config.signing.verify_signer,
        }
    }
}

pub struct TransactionSigner<'a, T: DeviceTransport, C: ChainIdProvider + ?Sized> {
    transport: &'a T,
    chain: &'a C,
    cache: &'a AddressPathCache,
    options: SignerOptions,
}

impl<'a, T: DeviceTransport, C: ChainIdProvider + ?Sized> TransactionSigner<'a, T, C> {
    pub fn new(transport: &'a T, chain: &'a C, cache: &'a AddressPathCache, options: SignerOptions) -> Self {
        Self { transport, chain, cache, options }
    }

    pub async fn sign(&self, tx: &UnsignedTransaction) -> Result<SignedTransaction> {
        let path = self
            .cache
            .path_for(&tx.from)
            .ok_or_else(|| HardwareWalletError::UnknownAddress(tx.from.clone()))?;

        let chain_id = with_timeout(self.options.timeout, "chain id lookup", self.chain.network_id()).await?;
        let payload = tx.signing_payload(chain_id)?;

        let mut session = SessionGuard::open(self.transport, self.options.timeout).await?;
        let device_signature = with_timeout(
            self.options.timeout,
            "sign_transaction",
            session.sign_transaction(&path, &payload),
        )
        .await?;

        let signed = SignedTransaction::assemble(tx, chain_id, device_signature.to_signature()?)?;

        if signed.chain_id_mismatch {
            match self.options.mismatch_policy {
                ChainIdMismatchPolicy::Reject => {
                    warn!(
                        expected = chain_id,
                        recovered = ?signed.recovered_chain_id,
                        v = signed.v,
                        "chain id mismatch in device signature"
                    );
                    return Err(HardwareWalletError::InvalidSignature(FIRMWARE_MISMATCH_MSG.to_string()));
                }
                ChainIdMismatchPolicy::Warn => {
                    warn!(
                        expected = chain_id,
                        recovered = ?signed.recovered_chain_id,
                        v = signed.v,
                        "chain id mismatch in device signature, returning flagged transaction"
                    );
                }
            }
        }

        if self.options.verify_signer {
            self.verify_signer(tx, &signed)?;
        }

        session.release();
        info!(device = self.transport.name(), path = %path, chain_id, "transaction signed");
        Ok(signed)
    }

    fn verify_signer(&self, tx: &UnsignedTransaction, signed: &SignedTransaction) -> Result<()> {
        let expected = Address::from_str(tx.from.trim()).map_err(|e| {
            HardwareWalletError::InvalidTransaction(format!("invalid 'from' address '{}': {}", tx.from, e))
        })?;
        let recovered = signed.recover_signer()?;
        if recovered != expected {
            return Err(HardwareWalletError::InvalidSignature(format!(
                "signature recovers to {:?}, expected {:?}",
                recovered, expected
            )));
        }
        Ok(())
    }
}
