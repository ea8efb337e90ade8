//! Address → derivation path cache
//!
//! Filled by account enumeration, read by the transaction signer to find the
//! path a sender address was derived from. Entries are never evicted.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Shared, internally locked map from lower-case address to derivation path.
#[derive(Debug, Clone, Default)]
pub struct AddressPathCache {
    inner: Arc<RwLock<HashMap<String, String>>>,
}

impl AddressPathCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the path an address was derived from. Returns the previous path, if any.
    pub fn insert(&self, address: &str, path: &str) -> Option<String> {
        let key = address.to_lowercase();
        debug!(address = %key, path, "caching derivation path");
        self.inner.write().insert(key, path.to_string())
    }

    /// Case-insensitive lookup.
    pub fn path_for(&self, address: &str) -> Option<String> {
        self.inner.read().get(&address.to_lowercase()).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
