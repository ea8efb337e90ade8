pub mod address_cache;
pub mod config;
pub mod derivation;
pub mod errors;
pub mod transaction;

pub use address_cache::AddressPathCache;
pub use derivation::{Bip32Path, DerivationPath};
pub use errors::{HardwareWalletError, Result};
pub use transaction::{SignedTransaction, UnsignedTransaction};
