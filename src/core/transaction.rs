//! Legacy Ethereum transaction building and EIP-155 reassembly
//!
//! RLP serialisation is delegated to `ethers`. With `chain_id` set on the
//! request, the unsigned encoding carries the EIP-155 placeholders
//! (`v = chain_id`, `r = s = empty`) so the chain id is covered by the value
//! the device signs.

use crate::core::errors::{HardwareWalletError, Result};
use ethers::types::{Address, Bytes, Signature, TransactionRequest, H256, U256};
use ethers::utils::keccak256;
use serde::{Deserialize, Deserializer, Serialize};
use std::str::FromStr;

/// Transaction fields as supplied by a web3-style caller.
///
/// Quantities accept `0x`-prefixed hex, bare hex-free decimal strings, or JSON
/// numbers. `gas` is accepted as an alias of `gasLimit`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsignedTransaction {
    pub from: String,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default, deserialize_with = "deserialize_quantity")]
    pub nonce: U256,
    #[serde(default, deserialize_with = "deserialize_quantity")]
    pub gas_price: U256,
    #[serde(default, alias = "gas", deserialize_with = "deserialize_quantity")]
    pub gas_limit: U256,
    #[serde(default, deserialize_with = "deserialize_quantity")]
    pub value: U256,
    #[serde(default, deserialize_with = "deserialize_data")]
    pub data: Bytes,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum QuantityRepr {
    Number(u64),
    Text(String),
}

fn deserialize_quantity<'de, D>(deserializer: D) -> std::result::Result<U256, D::Error>
where
    D: Deserializer<'de>,
{
    match QuantityRepr::deserialize(deserializer)? {
        QuantityRepr::Number(n) => Ok(U256::from(n)),
        QuantityRepr::Text(s) => parse_quantity(&s).map_err(serde::de::Error::custom),
    }
}

fn deserialize_data<'de, D>(deserializer: D) -> std::result::Result<Bytes, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw {
        None => Ok(Bytes::default()),
        Some(s) => decode_hex_padded(&s)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom),
    }
}

/// Parse a quantity: `0x` hex or decimal. An empty string or `0x` is zero.
pub fn parse_quantity(input: &str) -> Result<U256> {
    let trimmed = input.trim();
    if let Some(hex_digits) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        if hex_digits.is_empty() {
            return Ok(U256::zero());
        }
        return U256::from_str_radix(hex_digits, 16).map_err(|e| {
            HardwareWalletError::InvalidTransaction(format!("invalid hex quantity '{}': {}", input, e))
        });
    }
    if trimmed.is_empty() {
        return Ok(U256::zero());
    }
    U256::from_dec_str(trimmed).map_err(|e| {
        HardwareWalletError::InvalidTransaction(format!("invalid quantity '{}': {}", input, e))
    })
}

/// Strip an optional `0x` and left-pad odd-length hex before decoding.
pub fn decode_hex_padded(input: &str) -> Result<Vec<u8>> {
    let stripped = input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
        .unwrap_or(input);
    if stripped.len() % 2 == 0 {
        Ok(hex::decode(stripped)?)
    } else {
        Ok(hex::decode(format!("0{}", stripped))?)
    }
}

fn parse_address(field: &str, value: &str) -> Result<Address> {
    Address::from_str(value.trim()).map_err(|e| {
        HardwareWalletError::InvalidTransaction(format!("invalid '{}' address '{}': {}", field, value, e))
    })
}

impl UnsignedTransaction {
    /// Parse from a web3-style JSON object.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Recipient, `None` for contract creation (absent, empty or `0x`).
    pub fn recipient(&self) -> Result<Option<Address>> {
        match self.to.as_deref().map(str::trim) {
            None | Some("") | Some("0x") => Ok(None),
            Some(to) => parse_address("to", to).map(Some),
        }
    }

    /// Build the `ethers` request carrying the EIP-155 chain id.
    pub fn to_request(&self, chain_id: u64) -> Result<TransactionRequest> {
        let mut request = TransactionRequest::new()
            .from(parse_address("from", &self.from)?)
            .nonce(self.nonce)
            .gas_price(self.gas_price)
            .gas(self.gas_limit)
            .value(self.value)
            .data(self.data.clone())
            .chain_id(chain_id);

        if let Some(to) = self.recipient()? {
            request = request.to(to);
        }

        Ok(request)
    }

    /// Lowercase hex (no `0x`) of the unsigned RLP with EIP-155 placeholders.
    pub fn signing_payload(&self, chain_id: u64) -> Result<String> {
        let request = self.to_request(chain_id)?;
        Ok(hex::encode(request.rlp()))
    }
}

/// `floor((v - 35) / 2)`; `None` when `v` is not an EIP-155 value.
pub fn recover_chain_id(v: u64) -> Option<u64> {
    v.checked_sub(35).map(|x| x / 2)
}

/// A transaction with its device signature applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignedTransaction {
    pub unsigned: UnsignedTransaction,
    pub chain_id: u64,
    pub v: u64,
    pub r: U256,
    pub s: U256,
    pub recovered_chain_id: Option<u64>,
    /// Set when the signature's chain id differs from `chain_id`.
    pub chain_id_mismatch: bool,
    /// `0x`-prefixed canonical RLP hex.
    pub raw: String,
}

impl SignedTransaction {
    /// Apply `signature` to `unsigned` and re-serialise.
    pub fn assemble(unsigned: &UnsignedTransaction, chain_id: u64, signature: Signature) -> Result<Self> {
        let request = unsigned.to_request(chain_id)?;
        let raw = format!("0x{}", hex::encode(request.rlp_signed(&signature)));
        let recovered_chain_id = recover_chain_id(signature.v);

        Ok(Self {
            unsigned: unsigned.clone(),
            chain_id,
            v: signature.v,
            r: signature.r,
            s: signature.s,
            recovered_chain_id,
            chain_id_mismatch: recovered_chain_id != Some(chain_id),
            raw,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn signature(&self) -> Signature {
        Signature { r: self.r, s: self.s, v: self.v }
    }

    /// Keccak-256 of the signed encoding.
    pub fn hash(&self) -> Result<H256> {
        let bytes = decode_hex_padded(&self.raw)?;
        Ok(H256::from(keccak256(bytes)))
    }

    /// Address that produced the signature over the EIP-155 sighash.
    pub fn recover_signer(&self) -> Result<Address> {
        let request = self.unsigned.to_request(self.chain_id)?;
        self.signature()
            .recover(request.sighash())
            .map_err(|e| HardwareWalletError::InvalidSignature(format!("signature recovery failed: {}", e)))
    }
}
