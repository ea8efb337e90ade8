//! Device abstraction shared by the Ledger and Trezor bindings
//!
//! A `DeviceTransport` opens exclusive sessions; a `DeviceSession` exposes the
//! capability set `{get_address, sign_transaction, app_configuration}`.
//! `SessionGuard` makes sure every opened session is closed exactly once.

use crate::core::errors::{HardwareWalletError, Result};
use crate::core::transaction::decode_hex_padded;
use async_trait::async_trait;
use ethers::types::{Signature, U256};
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::time::Duration;
use tracing::{debug, warn};

/// Address reported by the device for a derivation path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAddress {
    /// `0x`-prefixed hex address, in whatever case the device reports.
    pub address: String,
    pub public_key: Option<Vec<u8>>,
    pub chain_code: Option<Vec<u8>>,
}

impl DeviceAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            public_key: None,
            chain_code: None,
        }
    }
}

/// Raw signature components returned by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSignature {
    pub v: u64,
    pub r: Vec<u8>,
    pub s: Vec<u8>,
}

impl DeviceSignature {
    /// Decode hex components as returned by vendor SDKs (`0x` optional).
    pub fn from_hex(v: &str, r: &str, s: &str) -> Result<Self> {
        let v_bytes = decode_hex_padded(v)?;
        if v_bytes.is_empty() || v_bytes.len() > 8 {
            return Err(HardwareWalletError::InvalidSignature(format!(
                "unexpected v length: {} bytes",
                v_bytes.len()
            )));
        }
        let v = v_bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));

        Ok(Self {
            v,
            r: decode_hex_padded(r)?,
            s: decode_hex_padded(s)?,
        })
    }

    /// Convert into an `ethers` signature; `r` and `s` must fit in 32 bytes.
    pub fn to_signature(&self) -> Result<Signature> {
        if self.r.len() > 32 || self.s.len() > 32 {
            return Err(HardwareWalletError::InvalidSignature(format!(
                "signature component too long: r={} s={}",
                self.r.len(),
                self.s.len()
            )));
        }
        Ok(Signature {
            r: U256::from_big_endian(&self.r),
            s: U256::from_big_endian(&self.s),
            v: self.v,
        })
    }
}

/// Version information of the on-device application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfiguration {
    pub name: String,
    pub version: String,
    pub flags: u8,
}

/// An open, exclusive connection to a device.
#[async_trait]
pub trait DeviceSession: Send {
    /// Derive the address at `path`; `display` asks for on-device confirmation.
    async fn get_address(&mut self, path: &str, display: bool, chain_code: bool) -> Result<DeviceAddress>;

    /// Sign the unsigned RLP payload (lowercase hex, no `0x`) with the key at `path`.
    async fn sign_transaction(&mut self, path: &str, payload_hex: &str) -> Result<DeviceSignature>;

    async fn app_configuration(&mut self) -> Result<AppConfiguration>;

    /// Release the underlying transport. Called exactly once per session.
    fn close(&mut self);
}

/// Factory for device sessions.
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    type Session: DeviceSession + 'static;

    /// Human readable device family, used in logs and error messages.
    fn name(&self) -> &str;

    /// Whether this host can reach the device at all.
    async fn is_supported(&self) -> bool;

    async fn open(&self) -> Result<Self::Session>;
}

/// Closes the wrapped session on `release()` or drop, whichever comes first.
pub struct SessionGuard<S: DeviceSession> {
    session: S,
    device: String,
    closed: bool,
}

impl<S: DeviceSession> SessionGuard<S> {
    /// Open a session from `transport`, bounded by `timeout`.
    pub async fn open<T>(transport: &T, timeout: Duration) -> Result<Self>
    where
        T: DeviceTransport<Session = S>,
    {
        let device = transport.name().to_string();
        let session = with_timeout(timeout, "open transport", transport.open()).await?;
        debug!(device = %device, "device session opened");
        Ok(Self {
            session,
            device,
            closed: false,
        })
    }

    /// Close the session now.
    pub fn release(mut self) {
        self.close_once();
    }

    fn close_once(&mut self) {
        if !self.closed {
            self.closed = true;
            self.session.close();
            debug!(device = %self.device, "device session closed");
        }
    }
}

impl<S: DeviceSession> Deref for SessionGuard<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.session
    }
}

impl<S: DeviceSession> DerefMut for SessionGuard<S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.session
    }
}

impl<S: DeviceSession> Drop for SessionGuard<S> {
    fn drop(&mut self) {
        self.close_once();
    }
}

/// Run `fut`, mapping expiry of `timeout` to `HardwareWalletError::Timeout`.
pub async fn with_timeout<F, T>(timeout: Duration, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!("{} timed out after {:?}", what, timeout);
            Err(HardwareWalletError::Timeout(format!(
                "{} did not complete within {:?}",
                what, timeout
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingSession {
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl DeviceSession for CountingSession {
        async fn get_address(&mut self, path: &str, _: bool, _: bool) -> Result<DeviceAddress> {
            Err(HardwareWalletError::DeviceCommunication(format!("no key at {}", path)))
        }

        async fn sign_transaction(&mut self, _: &str, _: &str) -> Result<DeviceSignature> {
            std::future::pending().await
        }

        async fn app_configuration(&mut self) -> Result<AppConfiguration> {
            Ok(AppConfiguration {
                name: "Test".into(),
                version: "1.0.0".into(),
                flags: 0,
            })
        }

        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct CountingTransport {
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl DeviceTransport for CountingTransport {
        type Session = CountingSession;

        fn name(&self) -> &str {
            "counting"
        }

        async fn is_supported(&self) -> bool {
            true
        }

        async fn open(&self) -> Result<CountingSession> {
            Ok(CountingSession {
                closes: self.closes.clone(),
            })
        }
    }

    #[tokio::test]
    async fn test_release_closes_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        let transport = CountingTransport { closes: closes.clone() };

        let guard = SessionGuard::open(&transport, Duration::from_secs(1)).await.unwrap();
        guard.release();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_drop_on_error_closes_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        let transport = CountingTransport { closes: closes.clone() };

        let result = async {
            let mut guard = SessionGuard::open(&transport, Duration::from_secs(1)).await?;
            guard.get_address("44'/60'/0'/0", false, false).await
        }
        .await;

        assert!(result.is_err());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_still_closes() {
        let closes = Arc::new(AtomicUsize::new(0));
        let transport = CountingTransport { closes: closes.clone() };

        let mut guard = SessionGuard::open(&transport, Duration::from_secs(1)).await.unwrap();
        let result = with_timeout(
            Duration::from_millis(50),
            "sign",
            guard.sign_transaction("44'/60'/0'/0", "c0"),
        )
        .await;
        drop(guard);

        assert!(matches!(result, Err(HardwareWalletError::Timeout(_))));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_signature_from_hex() {
        let sig = DeviceSignature::from_hex("25", "0x01", "02").unwrap();
        assert_eq!(sig.v, 37);
        let converted = sig.to_signature().unwrap();
        assert_eq!(converted.r, U256::one());
        assert_eq!(converted.s, U256::from(2));

        let wide = DeviceSignature::from_hex("0x0150f831", "01", "01").unwrap();
        assert_eq!(wide.v, 22_083_633);
    }

    #[test]
    fn test_signature_rejects_oversized_components() {
        let sig = DeviceSignature { v: 37, r: vec![1u8; 33], s: vec![1u8; 32] };
        assert!(matches!(sig.to_signature(), Err(HardwareWalletError::InvalidSignature(_))));
        assert!(DeviceSignature::from_hex("", "01", "01").is_err());
    }
}
