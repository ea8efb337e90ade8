//! Hardware wallet integration
//!
//! One signer abstraction over two device bindings (Ledger, Trezor). The
//! bindings are compiled in with the `ledger` / `trezor` features; everything
//! else works against the `DeviceTransport` / `DeviceSession` traits.

pub mod accounts;
pub mod session;
pub mod signer;
pub mod wallet;

#[cfg(feature = "ledger")]
pub mod ledger;

#[cfg(feature = "trezor")]
pub mod trezor;

pub use accounts::AccountEnumerator;
pub use session::{
    with_timeout, AppConfiguration, DeviceAddress, DeviceSession, DeviceSignature, DeviceTransport,
    SessionGuard,
};
pub use signer::{SignerOptions, TransactionSigner};
pub use wallet::HardwareWallet;

#[cfg(feature = "ledger")]
pub use ledger::LedgerHid;

#[cfg(feature = "trezor")]
pub use trezor::TrezorHid;
