//! Ledger Ethereum app

use super::apdu::ApduCommand;
use super::device::LedgerDevice;
use crate::core::derivation::Bip32Path;
use crate::core::errors::{HardwareWalletError, Result};
use crate::hardware::session::{AppConfiguration, DeviceAddress, DeviceSignature};
use ethers::utils::rlp::Rlp;
use tracing::{debug, info};

/// Ledger Ethereum App
pub struct LedgerEthereumApp {
    device: LedgerDevice,
}

impl LedgerEthereumApp {
    pub fn new(device: LedgerDevice) -> Self {
        Self { device }
    }

    pub fn get_address(&self, path: &Bip32Path, display: bool, chain_code: bool) -> Result<DeviceAddress> {
        debug!("Ledger get address, path: {:?}", path.path);

        let command = ApduCommand::get_eth_address(path.to_bytes(), display, chain_code);
        let response = self.device.exchange(&command)?.into_result("get address")?;
        parse_address_response(&response.data, chain_code)
    }

    /// Sign an unsigned legacy transaction RLP.
    pub fn sign_transaction(&self, path: &Bip32Path, payload: &[u8]) -> Result<DeviceSignature> {
        info!("Ledger sign Ethereum transaction, path: {:?}", path.path);

        let commands = ApduCommand::sign_transaction_chunks(&path.to_bytes(), payload);
        let mut last = None;
        for (i, command) in commands.iter().enumerate() {
            debug!("sending sign chunk {}/{}", i + 1, commands.len());
            last = Some(self.device.exchange(command)?.into_result("sign transaction")?);
        }

        let response = last.ok_or_else(|| {
            HardwareWalletError::DeviceCommunication("no sign response received".to_string())
        })?;
        parse_signature_response(&response.data, payload_chain_id(payload))
    }

    pub fn get_app_configuration(&self) -> Result<AppConfiguration> {
        self.device.get_app_configuration()
    }
}

/// `pk_len || pk || addr_len || ascii(addr) [|| chain_code(32)]`
pub fn parse_address_response(data: &[u8], chain_code: bool) -> Result<DeviceAddress> {
    let truncated = || HardwareWalletError::DeviceCommunication("incomplete address response".to_string());

    let pk_len = *data.first().ok_or_else(truncated)? as usize;
    let public_key = data.get(1..1 + pk_len).ok_or_else(truncated)?.to_vec();

    let mut offset = 1 + pk_len;
    let addr_len = *data.get(offset).ok_or_else(truncated)? as usize;
    offset += 1;
    let ascii = data.get(offset..offset + addr_len).ok_or_else(truncated)?;
    offset += addr_len;

    let address = std::str::from_utf8(ascii)
        .map_err(|_| HardwareWalletError::DeviceCommunication("address is not ASCII".to_string()))?;

    let chain_code = if chain_code {
        Some(data.get(offset..offset + 32).ok_or_else(truncated)?.to_vec())
    } else {
        None
    };

    Ok(DeviceAddress {
        address: format!("0x{}", address.trim_start_matches("0x")),
        public_key: Some(public_key),
        chain_code,
    })
}

/// `v(1) || r(32) || s(32)`
pub fn parse_signature_response(data: &[u8], chain_id: Option<u64>) -> Result<DeviceSignature> {
    if data.len() < 65 {
        return Err(HardwareWalletError::DeviceCommunication(format!(
            "incomplete signature response: {} bytes",
            data.len()
        )));
    }

    Ok(DeviceSignature {
        v: widen_v(data[0], chain_id),
        r: data[1..33].to_vec(),
        s: data[33..65].to_vec(),
    })
}

/// Chain id from the EIP-155 placeholder slot of an unsigned legacy RLP.
pub fn payload_chain_id(payload: &[u8]) -> Option<u64> {
    let rlp = Rlp::new(payload);
    if rlp.item_count().ok()? < 7 {
        return None;
    }
    rlp.val_at::<u64>(6).ok()
}

/// The app returns only the low byte of `v`. Recover the full value when the
/// chain id pushes `chain_id * 2 + 35` past one byte.
pub fn widen_v(v: u8, chain_id: Option<u64>) -> u64 {
    let Some(base) = chain_id.and_then(|id| id.checked_mul(2)).and_then(|x| x.checked_add(35)) else {
        return u64::from(v);
    };

    for candidate in [base, base + 1] {
        if candidate & 0xFF == u64::from(v) {
            return candidate;
        }
    }
    u64::from(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address_response(chain_code: Option<&[u8]>) -> Vec<u8> {
        let mut data = vec![65u8];
        data.extend_from_slice(&[0x04; 65]);
        let addr = b"9d8A62f656a8d1615C1294fd71e9CFb3E4855A4F";
        data.push(addr.len() as u8);
        data.extend_from_slice(addr);
        if let Some(cc) = chain_code {
            data.extend_from_slice(cc);
        }
        data
    }

    #[test]
    fn test_parse_address_response() {
        let parsed = parse_address_response(&address_response(None), false).unwrap();
        assert_eq!(parsed.address, "0x9d8A62f656a8d1615C1294fd71e9CFb3E4855A4F");
        assert_eq!(parsed.public_key.map(|pk| pk.len()), Some(65));
        assert!(parsed.chain_code.is_none());
    }

    #[test]
    fn test_parse_address_with_chain_code() {
        let parsed = parse_address_response(&address_response(Some(&[7u8; 32])), true).unwrap();
        assert_eq!(parsed.chain_code, Some(vec![7u8; 32]));

        assert!(parse_address_response(&address_response(None), true).is_err());
    }

    #[test]
    fn test_truncated_address_response() {
        let data = address_response(None);
        assert!(parse_address_response(&data[..50], false).is_err());
        assert!(parse_address_response(&[], false).is_err());
    }

    #[test]
    fn test_parse_signature_response() {
        let mut data = vec![37u8];
        data.extend_from_slice(&[1u8; 32]);
        data.extend_from_slice(&[2u8; 32]);

        let sig = parse_signature_response(&data, Some(1)).unwrap();
        assert_eq!(sig.v, 37);
        assert_eq!(sig.r, vec![1u8; 32]);
        assert_eq!(sig.s, vec![2u8; 32]);

        assert!(parse_signature_response(&data[..64], Some(1)).is_err());
    }

    #[test]
    fn test_widen_v_for_large_chain_ids() {
        // Sepolia: 11155111 * 2 + 35 = 22310257 = 0x0154_6D71
        assert_eq!(widen_v(0x71, Some(11_155_111)), 22_310_257);
        assert_eq!(widen_v(0x72, Some(11_155_111)), 22_310_258);
        assert_eq!(widen_v(38, Some(1)), 38);
        assert_eq!(widen_v(27, None), 27);
    }

    #[test]
    fn test_payload_chain_id() {
        let payload =
            hex::decode("ec098504a817c800825208943535353535353535353535353535353535353535880de0b6b3a764000080018080")
                .unwrap();
        assert_eq!(payload_chain_id(&payload), Some(1));
        assert_eq!(payload_chain_id(&[0xc0]), None);
    }
}
