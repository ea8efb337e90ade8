//! Trezor Ethereum app

use super::device::{expect, TrezorDevice};
use super::messages::{
    parse_ethereum_address, EthereumSignTx, EthereumTxRequest, MessageType, TrezorMessage, MAX_DATA_CHUNK,
};
use crate::core::derivation::Bip32Path;
use crate::core::errors::{HardwareWalletError, Result};
use crate::hardware::session::{AppConfiguration, DeviceAddress, DeviceSignature};
use ethers::utils::rlp::{DecoderError, Rlp};
use tracing::{debug, info};

/// Trezor Ethereum App
pub struct TrezorEthereumApp {
    device: TrezorDevice,
}

impl TrezorEthereumApp {
    pub fn new(device: TrezorDevice) -> Self {
        Self { device }
    }

    pub fn get_address(&self, path: &Bip32Path, show_display: bool) -> Result<DeviceAddress> {
        debug!("Trezor get address, path: {:?}", path.path);

        let response = self
            .device
            .call(&TrezorMessage::ethereum_get_address(&path.path, show_display))?;
        let response = expect(response, MessageType::EthereumAddress)?;
        Ok(DeviceAddress::new(parse_ethereum_address(&response.payload)?))
    }

    /// Sign an unsigned legacy transaction RLP.
    pub fn sign_transaction(&self, path: &Bip32Path, payload: &[u8]) -> Result<DeviceSignature> {
        info!("Trezor sign Ethereum transaction, path: {:?}", path.path);

        let tx = sign_tx_from_rlp(path, payload)?;
        let mut offset = tx.data.len().min(MAX_DATA_CHUNK);
        let mut response = self.device.call(&tx.to_message())?;

        loop {
            let request = EthereumTxRequest::parse(&expect(response, MessageType::EthereumTxRequest)?.payload)?;

            match request.data_length {
                Some(len) if len > 0 => {
                    let end = offset + len as usize;
                    let chunk = tx.data.get(offset..end).ok_or_else(|| {
                        HardwareWalletError::DeviceCommunication(format!(
                            "Trezor requested {} bytes beyond the transaction data",
                            len
                        ))
                    })?;
                    debug!("sending data chunk {}..{}", offset, end);
                    offset = end;
                    response = self.device.call(&TrezorMessage::ethereum_tx_ack(chunk))?;
                }
                _ => return signature_from_request(request),
            }
        }
    }

    pub fn get_app_configuration(&self) -> AppConfiguration {
        self.device.features().clone()
    }
}

fn signature_from_request(request: EthereumTxRequest) -> Result<DeviceSignature> {
    match (request.signature_v, request.signature_r, request.signature_s) {
        (Some(v), Some(r), Some(s)) => Ok(DeviceSignature { v: u64::from(v), r, s }),
        _ => Err(HardwareWalletError::DeviceCommunication(
            "Trezor returned an incomplete signature".to_string(),
        )),
    }
}

/// Split the unsigned legacy RLP into the fields `EthereumSignTx` carries.
pub fn sign_tx_from_rlp(path: &Bip32Path, payload: &[u8]) -> Result<EthereumSignTx> {
    let rlp_error = |e: DecoderError| HardwareWalletError::InvalidTransaction(format!("invalid RLP payload: {}", e));

    let rlp = Rlp::new(payload);
    let items = rlp.item_count().map_err(rlp_error)?;
    if items != 9 {
        return Err(HardwareWalletError::InvalidTransaction(format!(
            "expected 9 RLP items with EIP-155 placeholders, found {}",
            items
        )));
    }

    let bytes_at = |i: usize| -> Result<Vec<u8>> {
        let item = rlp.at(i).map_err(rlp_error)?;
        Ok(item.data().map_err(rlp_error)?.to_vec())
    };

    let to = bytes_at(3)?;
    Ok(EthereumSignTx {
        address_n: path.path.clone(),
        nonce: bytes_at(0)?,
        gas_price: bytes_at(1)?,
        gas_limit: bytes_at(2)?,
        to: if to.is_empty() { String::new() } else { format!("0x{}", hex::encode(to)) },
        value: bytes_at(4)?,
        data: bytes_at(5)?,
        chain_id: rlp.val_at::<u64>(6).map_err(rlp_error)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const EIP155_PAYLOAD: &str =
        "ec098504a817c800825208943535353535353535353535353535353535353535880de0b6b3a764000080018080";

    #[test]
    fn test_sign_tx_from_rlp() {
        let path = Bip32Path::from_str("44'/60'/0'/0").unwrap();
        let tx = sign_tx_from_rlp(&path, &hex::decode(EIP155_PAYLOAD).unwrap()).unwrap();

        assert_eq!(tx.address_n, path.path);
        assert_eq!(tx.nonce, vec![0x09]);
        assert_eq!(tx.gas_price, vec![0x04, 0xa8, 0x17, 0xc8, 0x00]);
        assert_eq!(tx.gas_limit, vec![0x52, 0x08]);
        assert_eq!(tx.to, "0x3535353535353535353535353535353535353535");
        assert_eq!(tx.value, vec![0x0d, 0xe0, 0xb6, 0xb3, 0xa7, 0x64, 0x00, 0x00]);
        assert!(tx.data.is_empty());
        assert_eq!(tx.chain_id, 1);
    }

    #[test]
    fn test_sign_tx_rejects_payload_without_chain_id() {
        let path = Bip32Path::from_str("44'/60'/0'/0").unwrap();
        // 6-item pre-EIP-155 list
        let payload = hex::decode("c6808080808080").unwrap();
        assert!(sign_tx_from_rlp(&path, &payload).is_err());
        assert!(sign_tx_from_rlp(&path, &[0xc0]).is_err());
    }

    #[test]
    fn test_incomplete_signature() {
        let request = EthereumTxRequest {
            signature_v: Some(37),
            signature_r: Some(vec![1; 32]),
            ..Default::default()
        };
        assert!(signature_from_request(request).is_err());
    }
}
