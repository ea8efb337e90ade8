//! Account enumeration
//!
//! Derives a window of sibling addresses in a single device session and
//! records where each one came from in the `AddressPathCache`.

use std::time::Duration;
use tracing::{debug, info};

use crate::core::address_cache::AddressPathCache;
use crate::core::derivation::DerivationPath;
use crate::core::errors::{HardwareWalletError, Result};
use crate::hardware::session::{with_timeout, DeviceSession, DeviceTransport, SessionGuard};

pub struct AccountEnumerator<'a, T: DeviceTransport> {
    transport: &'a T,
    cache: &'a AddressPathCache,
    timeout: Duration,
}

impl<'a, T: DeviceTransport> AccountEnumerator<'a, T> {
    pub fn new(transport: &'a T, cache: &'a AddressPathCache, timeout: Duration) -> Self {
        Self { transport, cache, timeout }
    }

    /// Derive `window_size` addresses starting at `path`'s index.
    ///
    /// Addresses are requested one at a time in increasing index order. The
    /// first device failure aborts the walk; entries cached before the failure
    /// are kept.
    pub async fn enumerate(
        &self,
        path: &DerivationPath,
        window_size: u32,
        display: bool,
    ) -> Result<Vec<String>> {
        if window_size == 0 {
            return Err(HardwareWalletError::Config("window_size must be at least 1".to_string()));
        }

        let paths = path.siblings(window_size)?;
        let mut session = SessionGuard::open(self.transport, self.timeout).await?;
        let mut addresses = Vec::with_capacity(paths.len());

        for sibling in paths {
            let derived = with_timeout(
                self.timeout,
                "get_address",
                session.get_address(&sibling, display, false),
            )
            .await?;
            debug!(path = %sibling, address = %derived.address, "derived address");

            self.cache.insert(&derived.address, &sibling);
            addresses.push(derived.address);
        }

        session.release();
        info!(
            device = self.transport.name(),
            count = addresses.len(),
            "enumerated accounts from {}",
            path
        );
        Ok(addresses)
    }
}
