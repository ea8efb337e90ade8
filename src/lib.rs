// src/lib.rs
//! Ethereum account enumeration and transaction signing on Ledger and Trezor
//! hardware wallets.

pub mod blockchain;
pub mod cli;
pub mod core;

// Device abstraction is always built; the concrete HID bindings sit behind
// the `ledger` / `trezor` features.
pub mod hardware;

pub use crate::core::errors::{HardwareWalletError, Result};
pub use crate::hardware::HardwareWallet;
