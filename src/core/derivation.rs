//! BIP44 derivation path handling
//!
//! Hardware wallets accept account paths of the form
//!
//!   * 44'/60'/x'/n   (Ethereum)
//!   * 44'/61'/x'/n   (Ethereum Classic)
//!
//! Note: no hardened derivation on `n`, so sibling accounts are obtained by
//! incrementing the trailing index.
//!
//! BIP44 itself specifies `m / purpose' / coin_type' / account' / change / address_index`.

use crate::core::errors::{HardwareWalletError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

static ACCOUNT_PATH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^((?:m/)?44'/6[01]'/[0-9]+'?/)([0-9]+)$").expect("static derivation path pattern")
});

const INVALID_PATH_MSG: &str =
    "To get multiple accounts your derivation path must follow pattern 44'/60|61'/x'/n ";

/// Hardened index offset.
pub const HARDENED: u32 = 0x8000_0000;

/// An account derivation path split into its fixed prefix and trailing index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivationPath {
    base_path: String,
    start_index: u32,
}

impl DerivationPath {
    /// Parse and validate a path template such as `44'/60'/0'/0`.
    pub fn parse(path: &str) -> Result<Self> {
        let caps = ACCOUNT_PATH_RE
            .captures(path)
            .ok_or_else(|| HardwareWalletError::InvalidDerivationPath(INVALID_PATH_MSG.to_string()))?;

        let base_path = caps[1].to_string();
        let start_index = caps[2]
            .parse::<u32>()
            .map_err(|_| HardwareWalletError::InvalidDerivationPath(INVALID_PATH_MSG.to_string()))?;

        Ok(Self { base_path, start_index })
    }

    /// Everything through the account segment, trailing slash included.
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn start_index(&self) -> u32 {
        self.start_index
    }

    /// Path of the account `offset` positions after the start index.
    pub fn sibling(&self, offset: u32) -> Result<String> {
        let index = self.start_index.checked_add(offset).ok_or_else(|| {
            HardwareWalletError::InvalidDerivationPath(format!(
                "index overflow: {} + {}",
                self.start_index, offset
            ))
        })?;
        Ok(format!("{}{}", self.base_path, index))
    }

    /// The first `count` sibling paths, in increasing index order.
    pub fn siblings(&self, count: u32) -> Result<Vec<String>> {
        (0..count).map(|offset| self.sibling(offset)).collect()
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.base_path, self.start_index)
    }
}

/// BIP32 path as raw child indices, used by the device wire encodings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bip32Path {
    pub path: Vec<u32>,
}

impl Bip32Path {
    pub fn new(path: Vec<u32>) -> Self {
        Self { path }
    }

    /// Parse `m/44'/60'/0'/0` or `44'/60'/0'/0`; `'` and `h` both mark hardening.
    pub fn from_str(path_str: &str) -> Result<Self> {
        let trimmed = path_str.strip_prefix("m/").unwrap_or(path_str);
        if trimmed.is_empty() || trimmed == "m" {
            return Err(HardwareWalletError::InvalidDerivationPath(format!(
                "path must contain at least one component: {}",
                path_str
            )));
        }

        let mut path = Vec::new();
        for part in trimmed.split('/') {
            let hardened = part.ends_with('\'') || part.ends_with('h');
            let num_str = part.trim_end_matches('\'').trim_end_matches('h');
            if num_str.is_empty() {
                return Err(HardwareWalletError::InvalidDerivationPath(format!(
                    "invalid path component '{}' in {}",
                    part, path_str
                )));
            }

            let num: u32 = num_str.parse().map_err(|_| {
                HardwareWalletError::InvalidDerivationPath(format!("invalid path: {}", path_str))
            })?;
            if num >= HARDENED {
                return Err(HardwareWalletError::InvalidDerivationPath(format!(
                    "path component out of range: {}",
                    part
                )));
            }

            path.push(if hardened { HARDENED | num } else { num });
        }

        if path.len() > 10 {
            return Err(HardwareWalletError::InvalidDerivationPath(format!(
                "path too deep ({} components): {}",
                path.len(),
                path_str
            )));
        }

        Ok(Self { path })
    }

    /// Ledger encoding: depth byte followed by big-endian u32 indices.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(1 + self.path.len() * 4);
        bytes.push(self.path.len() as u8);
        for index in &self.path {
            bytes.extend_from_slice(&index.to_be_bytes());
        }
        bytes
    }
}
