//! Trezor protobuf messages
//!
//! Minimal hand-written protobuf encoding for the handful of messages the
//! Ethereum flow needs.

use crate::core::errors::{HardwareWalletError, Result};
use crate::hardware::session::AppConfiguration;

/// Largest `data_initial_chunk` / `data_chunk` the firmware accepts.
pub const MAX_DATA_CHUNK: usize = 1024;

/// Message types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MessageType {
    Initialize = 0,
    Success = 2,
    Failure = 3,
    Features = 17,
    PinMatrixRequest = 18,
    ButtonRequest = 26,
    ButtonAck = 27,
    PassphraseRequest = 41,
    EthereumGetAddress = 56,
    EthereumAddress = 57,
    EthereumSignTx = 58,
    EthereumTxRequest = 59,
    EthereumTxAck = 60,
}

impl MessageType {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::Initialize),
            2 => Some(Self::Success),
            3 => Some(Self::Failure),
            17 => Some(Self::Features),
            18 => Some(Self::PinMatrixRequest),
            26 => Some(Self::ButtonRequest),
            27 => Some(Self::ButtonAck),
            41 => Some(Self::PassphraseRequest),
            56 => Some(Self::EthereumGetAddress),
            57 => Some(Self::EthereumAddress),
            58 => Some(Self::EthereumSignTx),
            59 => Some(Self::EthereumTxRequest),
            60 => Some(Self::EthereumTxAck),
            _ => None,
        }
    }
}

/// Trezor message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrezorMessage {
    pub msg_type: MessageType,
    pub payload: Vec<u8>,
}

impl TrezorMessage {
    pub fn new(msg_type: MessageType, payload: Vec<u8>) -> Self {
        Self { msg_type, payload }
    }

    /// `type(u16 BE) || length(u32 BE) || payload`
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(6 + self.payload.len());
        buf.extend_from_slice(&(self.msg_type as u16).to_be_bytes());
        buf.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        if data.len() < 6 {
            return Err(wire_error("message too short"));
        }

        let msg_type_val = u16::from_be_bytes([data[0], data[1]]);
        let msg_type = MessageType::from_u16(msg_type_val)
            .ok_or_else(|| wire_error(&format!("unknown message type: {}", msg_type_val)))?;

        let msg_len = u32::from_be_bytes([data[2], data[3], data[4], data[5]]) as usize;
        let payload = data
            .get(6..6 + msg_len)
            .ok_or_else(|| wire_error("incomplete message"))?
            .to_vec();

        Ok(Self { msg_type, payload })
    }

    pub fn initialize() -> Self {
        Self::new(MessageType::Initialize, vec![])
    }

    pub fn button_ack() -> Self {
        Self::new(MessageType::ButtonAck, vec![])
    }

    pub fn ethereum_get_address(path: &[u32], show_display: bool) -> Self {
        let mut payload = encode_bip32_path(path);
        payload.extend(encode_bool_field(2, show_display));
        Self::new(MessageType::EthereumGetAddress, payload)
    }

    pub fn ethereum_tx_ack(chunk: &[u8]) -> Self {
        Self::new(MessageType::EthereumTxAck, encode_bytes_field(1, chunk))
    }
}

fn wire_error(msg: &str) -> HardwareWalletError {
    HardwareWalletError::DeviceCommunication(format!("Trezor protocol error: {}", msg))
}

/// Fields of a legacy `EthereumSignTx`. Quantities are minimal big-endian bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EthereumSignTx {
    pub address_n: Vec<u32>,
    pub nonce: Vec<u8>,
    pub gas_price: Vec<u8>,
    pub gas_limit: Vec<u8>,
    /// `0x`-prefixed recipient, empty for contract creation
    pub to: String,
    pub value: Vec<u8>,
    pub data: Vec<u8>,
    pub chain_id: u64,
}

impl EthereumSignTx {
    /// Encode with the first data chunk; the rest is requested by the device.
    pub fn to_message(&self) -> TrezorMessage {
        let mut payload = encode_bip32_path(&self.address_n);
        payload.extend(encode_bytes_field(2, &self.nonce));
        payload.extend(encode_bytes_field(3, &self.gas_price));
        payload.extend(encode_bytes_field(4, &self.gas_limit));
        if !self.to.is_empty() {
            payload.extend(encode_string_field(11, &self.to));
        }
        payload.extend(encode_bytes_field(6, &self.value));
        if !self.data.is_empty() {
            let initial = &self.data[..self.data.len().min(MAX_DATA_CHUNK)];
            payload.extend(encode_bytes_field(7, initial));
            payload.extend(encode_uint64_field(8, self.data.len() as u64));
        }
        payload.extend(encode_uint64_field(9, self.chain_id));
        TrezorMessage::new(MessageType::EthereumSignTx, payload)
    }
}

/// `EthereumTxRequest`: either more data is wanted or the signature is ready.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EthereumTxRequest {
    pub data_length: Option<u32>,
    pub signature_v: Option<u32>,
    pub signature_r: Option<Vec<u8>>,
    pub signature_s: Option<Vec<u8>>,
}

impl EthereumTxRequest {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut request = Self::default();
        for (field, value) in decode_fields(payload)? {
            match (field, value) {
                (1, FieldValue::Varint(v)) => request.data_length = Some(v as u32),
                (2, FieldValue::Varint(v)) => request.signature_v = Some(v as u32),
                (3, FieldValue::Bytes(b)) => request.signature_r = Some(b),
                (4, FieldValue::Bytes(b)) => request.signature_s = Some(b),
                _ => {}
            }
        }
        Ok(request)
    }
}

/// Address from `EthereumAddress`: field 2 (string) on current firmware,
/// field 1 (raw 20 bytes) on old firmware.
pub fn parse_ethereum_address(payload: &[u8]) -> Result<String> {
    let mut legacy = None;
    for (field, value) in decode_fields(payload)? {
        match (field, value) {
            (2, FieldValue::Bytes(b)) => {
                let text = String::from_utf8(b).map_err(|_| wire_error("address is not UTF-8"))?;
                return Ok(text);
            }
            (1, FieldValue::Bytes(b)) if b.len() == 20 => legacy = Some(format!("0x{}", hex::encode(b))),
            _ => {}
        }
    }
    legacy.ok_or_else(|| wire_error("EthereumAddress without address"))
}

/// `Failure.message` (field 2), if present.
pub fn parse_failure(payload: &[u8]) -> String {
    decode_fields(payload)
        .ok()
        .and_then(|fields| {
            fields.into_iter().find_map(|(field, value)| match (field, value) {
                (2, FieldValue::Bytes(b)) => Some(String::from_utf8_lossy(&b).into_owned()),
                _ => None,
            })
        })
        .unwrap_or_else(|| "unknown failure".to_string())
}

/// Model and firmware version from `Features`.
pub fn parse_features(payload: &[u8]) -> Result<AppConfiguration> {
    let mut major = 0;
    let mut minor = 0;
    let mut patch = 0;
    let mut model = None;
    let mut vendor = None;

    for (field, value) in decode_fields(payload)? {
        match (field, value) {
            (1, FieldValue::Bytes(b)) => vendor = Some(String::from_utf8_lossy(&b).into_owned()),
            (2, FieldValue::Varint(v)) => major = v,
            (3, FieldValue::Varint(v)) => minor = v,
            (4, FieldValue::Varint(v)) => patch = v,
            (21, FieldValue::Bytes(b)) => model = Some(String::from_utf8_lossy(&b).into_owned()),
            _ => {}
        }
    }

    let vendor = vendor.unwrap_or_else(|| "trezor.io".to_string());
    let name = match model {
        Some(model) => format!("Trezor Model {}", model),
        None => vendor,
    };

    Ok(AppConfiguration {
        name,
        version: format!("{}.{}.{}", major, minor, patch),
        flags: 0,
    })
}

/// BIP32 path as repeated field 1 (varint).
pub fn encode_bip32_path(path: &[u32]) -> Vec<u8> {
    let mut buf = Vec::new();
    for &index in path {
        buf.push(0x08);
        encode_varint(&mut buf, index as u64);
    }
    buf
}

/// Protobuf varint encoding
pub fn encode_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Protobuf varint decoding; returns the value and bytes consumed.
pub fn decode_varint(data: &[u8]) -> Result<(u64, usize)> {
    let mut result = 0u64;
    let mut shift = 0;

    for (i, &byte) in data.iter().enumerate() {
        result |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok((result, i + 1));
        }
        shift += 7;
        if shift >= 64 {
            return Err(wire_error("varint overflow"));
        }
    }

    Err(wire_error("incomplete varint"))
}

pub fn encode_string_field(field_num: u32, value: &str) -> Vec<u8> {
    encode_bytes_field(field_num, value.as_bytes())
}

pub fn encode_bytes_field(field_num: u32, value: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(value.len() + 4);
    encode_varint(&mut buf, ((field_num << 3) | 2) as u64);
    encode_varint(&mut buf, value.len() as u64);
    buf.extend_from_slice(value);
    buf
}

pub fn encode_uint64_field(field_num: u32, value: u64) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_varint(&mut buf, (field_num << 3) as u64);
    encode_varint(&mut buf, value);
    buf
}

pub fn encode_bool_field(field_num: u32, value: bool) -> Vec<u8> {
    encode_uint64_field(field_num, u64::from(value))
}

/// Decoded field value (wire types 0 and 2; fixed-width fields are skipped).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Varint(u64),
    Bytes(Vec<u8>),
}

/// Flat decode of a message body into `(field number, value)` pairs.
pub fn decode_fields(mut data: &[u8]) -> Result<Vec<(u32, FieldValue)>> {
    let mut fields = Vec::new();

    while !data.is_empty() {
        let (key, used) = decode_varint(data)?;
        data = &data[used..];
        let field = (key >> 3) as u32;

        match key & 0x07 {
            0 => {
                let (value, used) = decode_varint(data)?;
                data = &data[used..];
                fields.push((field, FieldValue::Varint(value)));
            }
            1 => data = data.get(8..).ok_or_else(|| wire_error("truncated fixed64"))?,
            2 => {
                let (len, used) = decode_varint(data)?;
                data = &data[used..];
                let len = len as usize;
                let bytes = data.get(..len).ok_or_else(|| wire_error("truncated field"))?;
                fields.push((field, FieldValue::Bytes(bytes.to_vec())));
                data = &data[len..];
            }
            5 => data = data.get(4..).ok_or_else(|| wire_error("truncated fixed32"))?,
            wire => return Err(wire_error(&format!("unsupported wire type {}", wire))),
        }
    }

    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_serialization() {
        let msg = TrezorMessage::new(MessageType::Initialize, vec![0x01, 0x02, 0x03]);
        let serialized = msg.serialize();

        assert_eq!(&serialized[0..2], &[0x00, 0x00]);
        assert_eq!(&serialized[2..6], &[0x00, 0x00, 0x00, 0x03]);
        assert_eq!(&serialized[6..], &[0x01, 0x02, 0x03]);
        assert_eq!(TrezorMessage::deserialize(&serialized).unwrap(), msg);
    }

    #[test]
    fn test_message_deserialization_errors() {
        assert!(TrezorMessage::deserialize(&[0x00]).is_err());
        assert!(TrezorMessage::deserialize(&[0x00, 0x02, 0x00, 0x00, 0x00, 0x10, 0x01]).is_err());
        assert!(TrezorMessage::deserialize(&[0xFF, 0xFF, 0x00, 0x00, 0x00, 0x00]).is_err());
    }

    #[test]
    fn test_varint_encoding() {
        let mut buf = Vec::new();
        encode_varint(&mut buf, 300);
        assert_eq!(buf, vec![0xAC, 0x02]);
        assert_eq!(decode_varint(&buf).unwrap(), (300, 2));
    }

    #[test]
    fn test_varint_errors() {
        assert!(decode_varint(&[0x80]).is_err());
        assert!(decode_varint(&[0x80; 10]).is_err());
    }

    #[test]
    fn test_get_address_message() {
        let msg = TrezorMessage::ethereum_get_address(&[0x8000002C, 0x8000003C, 0x80000000, 0], true);
        let fields = decode_fields(&msg.payload).unwrap();

        assert_eq!(fields.len(), 5);
        assert_eq!(fields[0], (1, FieldValue::Varint(0x8000002C)));
        assert_eq!(fields[3], (1, FieldValue::Varint(0)));
        assert_eq!(fields[4], (2, FieldValue::Varint(1)));
    }

    #[test]
    fn test_sign_tx_message_fields() {
        let tx = EthereumSignTx {
            address_n: vec![0x8000002C, 0x8000003C, 0x80000000, 0],
            nonce: vec![0x09],
            gas_price: vec![0x04, 0xa8, 0x17, 0xc8, 0x00],
            gas_limit: vec![0x52, 0x08],
            to: "0x3535353535353535353535353535353535353535".to_string(),
            value: vec![0x0d, 0xe0, 0xb6, 0xb3, 0xa7, 0x64, 0x00, 0x00],
            data: vec![0xAB; 1500],
            chain_id: 1,
        };
        let fields = decode_fields(&tx.to_message().payload).unwrap();

        let find = |n: u32| fields.iter().find(|(f, _)| *f == n).map(|(_, v)| v.clone());
        assert_eq!(find(2), Some(FieldValue::Bytes(vec![0x09])));
        assert_eq!(find(11), Some(FieldValue::Bytes(tx.to.as_bytes().to_vec())));
        assert_eq!(find(7), Some(FieldValue::Bytes(vec![0xAB; MAX_DATA_CHUNK])));
        assert_eq!(find(8), Some(FieldValue::Varint(1500)));
        assert_eq!(find(9), Some(FieldValue::Varint(1)));
    }

    #[test]
    fn test_parse_tx_request() {
        let mut payload = encode_uint64_field(2, 37);
        payload.extend(encode_bytes_field(3, &[1u8; 32]));
        payload.extend(encode_bytes_field(4, &[2u8; 32]));

        let request = EthereumTxRequest::parse(&payload).unwrap();
        assert_eq!(request.signature_v, Some(37));
        assert_eq!(request.signature_r, Some(vec![1u8; 32]));
        assert!(request.data_length.is_none());

        let more = EthereumTxRequest::parse(&encode_uint64_field(1, 1024)).unwrap();
        assert_eq!(more.data_length, Some(1024));
    }

    #[test]
    fn test_parse_ethereum_address() {
        let current = encode_string_field(2, "0x9d8A62f656a8d1615C1294fd71e9CFb3E4855A4F");
        assert_eq!(
            parse_ethereum_address(&current).unwrap(),
            "0x9d8A62f656a8d1615C1294fd71e9CFb3E4855A4F"
        );

        let legacy = encode_bytes_field(1, &[0x35; 20]);
        assert_eq!(
            parse_ethereum_address(&legacy).unwrap(),
            "0x3535353535353535353535353535353535353535"
        );

        assert!(parse_ethereum_address(&[]).is_err());
    }

    #[test]
    fn test_parse_features() {
        let mut payload = encode_string_field(1, "trezor.io");
        payload.extend(encode_uint64_field(2, 2));
        payload.extend(encode_uint64_field(3, 6));
        payload.extend(encode_uint64_field(4, 4));
        payload.extend(encode_string_field(21, "T"));

        let features = parse_features(&payload).unwrap();
        assert_eq!(features.name, "Trezor Model T");
        assert_eq!(features.version, "2.6.4");
    }

    #[test]
    fn test_parse_failure() {
        let mut payload = encode_uint64_field(1, 4);
        payload.extend(encode_string_field(2, "Action cancelled by user"));
        assert_eq!(parse_failure(&payload), "Action cancelled by user");
        assert_eq!(parse_failure(&[]), "unknown failure");
    }
}
