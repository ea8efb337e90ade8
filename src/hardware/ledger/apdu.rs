//! APDU (Application Protocol Data Unit) framing for the Ledger Ethereum app

use crate::core::errors::{HardwareWalletError, Result};
use tracing::debug;

/// Largest data field a short APDU can carry.
pub const MAX_APDU_DATA: usize = 255;

/// APDU class byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ApduClass {
    /// CLA used by the Ethereum app
    Ethereum = 0xE0,
}

/// Ethereum app instructions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ApduInstruction {
    /// Derive the address (and optionally chain code) for a BIP32 path
    GetEthAddress = 0x02,
    /// Sign a legacy RLP transaction, chunked
    SignTransaction = 0x04,
    /// App flags and version
    GetAppConfiguration = 0x06,
}

/// P1 of `SignTransaction`
pub const P1_FIRST_CHUNK: u8 = 0x00;
pub const P1_MORE_CHUNKS: u8 = 0x80;

/// APDU command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduCommand {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    pub data: Vec<u8>,
}

impl ApduCommand {
    pub fn new(cla: ApduClass, ins: ApduInstruction, p1: u8, p2: u8, data: Vec<u8>) -> Self {
        Self {
            cla: cla as u8,
            ins: ins as u8,
            p1,
            p2,
            data,
        }
    }

    /// `GET_ETH_ADDRESS` for the encoded path.
    pub fn get_eth_address(path_bytes: Vec<u8>, display: bool, chain_code: bool) -> Self {
        Self::new(
            ApduClass::Ethereum,
            ApduInstruction::GetEthAddress,
            u8::from(display),
            u8::from(chain_code),
            path_bytes,
        )
    }

    pub fn get_app_configuration() -> Self {
        Self::new(ApduClass::Ethereum, ApduInstruction::GetAppConfiguration, 0x00, 0x00, vec![])
    }

    /// Split a signing request into `SIGN` commands.
    ///
    /// The first chunk starts with the encoded path; every chunk carries at most
    /// `MAX_APDU_DATA` bytes.
    pub fn sign_transaction_chunks(path_bytes: &[u8], payload: &[u8]) -> Vec<Self> {
        let mut commands = Vec::new();
        let first_room = MAX_APDU_DATA.saturating_sub(path_bytes.len());
        let first_len = first_room.min(payload.len());

        let mut first = path_bytes.to_vec();
        first.extend_from_slice(&payload[..first_len]);
        commands.push(Self::new(
            ApduClass::Ethereum,
            ApduInstruction::SignTransaction,
            P1_FIRST_CHUNK,
            0x00,
            first,
        ));

        for chunk in payload[first_len..].chunks(MAX_APDU_DATA) {
            commands.push(Self::new(
                ApduClass::Ethereum,
                ApduInstruction::SignTransaction,
                P1_MORE_CHUNKS,
                0x00,
                chunk.to_vec(),
            ));
        }

        commands
    }

    /// Serialise as `CLA INS P1 P2 Lc data`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(5 + self.data.len());
        bytes.push(self.cla);
        bytes.push(self.ins);
        bytes.push(self.p1);
        bytes.push(self.p2);
        bytes.push(self.data.len() as u8);
        bytes.extend_from_slice(&self.data);

        debug!(
            "APDU command: CLA={:02X} INS={:02X} P1={:02X} P2={:02X} Len={}",
            self.cla,
            self.ins,
            self.p1,
            self.p2,
            self.data.len()
        );

        bytes
    }
}

/// APDU response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduResponse {
    pub data: Vec<u8>,
    pub sw1: u8,
    pub sw2: u8,
}

impl ApduResponse {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 2 {
            return Err(HardwareWalletError::DeviceCommunication(
                "APDU response too short".to_string(),
            ));
        }

        let len = bytes.len();
        let sw1 = bytes[len - 2];
        let sw2 = bytes[len - 1];
        let data = bytes[..len - 2].to_vec();

        debug!("APDU response: SW1={:02X} SW2={:02X} DataLen={}", sw1, sw2, data.len());

        Ok(Self { data, sw1, sw2 })
    }

    pub fn is_success(&self) -> bool {
        self.sw1 == 0x90 && self.sw2 == 0x00
    }

    pub fn status_code(&self) -> u16 {
        ((self.sw1 as u16) << 8) | (self.sw2 as u16)
    }

    pub fn error_description(&self) -> String {
        match self.status_code() {
            0x9000 => "success".to_string(),
            0x6985 => "Condition of use not satisfied (denied by the user?)".to_string(),
            0x6982 => "Security status not satisfied (device locked?)".to_string(),
            0x6A80 => "Invalid data".to_string(),
            0x6A82 => "Ethereum app not open".to_string(),
            0x6B00 => "Incorrect parameter P1 or P2".to_string(),
            0x6D00 => "Instruction not supported (is the Ethereum app open?)".to_string(),
            0x6E00 => "Class not supported (is the Ethereum app open?)".to_string(),
            0x6700 => "Incorrect length".to_string(),
            0x6F00 => "Technical problem".to_string(),
            code => format!("Unknown status: {:04X}", code),
        }
    }

    /// Turn a non-success status word into `DeviceCommunication`.
    pub fn into_result(self, what: &str) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(HardwareWalletError::DeviceCommunication(format!(
                "{} failed: {} (0x{:04X})",
                what,
                self.error_description(),
                self.status_code()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apdu_command_serialization() {
        let cmd = ApduCommand::get_eth_address(vec![0x01, 0x02, 0x03], true, false);

        let bytes = cmd.to_bytes();
        assert_eq!(bytes[0], 0xE0); // CLA
        assert_eq!(bytes[1], 0x02); // INS
        assert_eq!(bytes[2], 0x01); // P1 display
        assert_eq!(bytes[3], 0x00); // P2 no chain code
        assert_eq!(bytes[4], 0x03); // Lc
        assert_eq!(&bytes[5..], &[0x01, 0x02, 0x03]);
    }

    #[test]
    fn test_empty_data_command() {
        let bytes = ApduCommand::get_app_configuration().to_bytes();
        assert_eq!(bytes, vec![0xE0, 0x06, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_sign_single_chunk() {
        let path = vec![0u8; 21];
        let payload = vec![0xAAu8; 100];
        let commands = ApduCommand::sign_transaction_chunks(&path, &payload);

        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].p1, P1_FIRST_CHUNK);
        assert_eq!(commands[0].data.len(), 121);
        assert_eq!(&commands[0].data[..21], &path[..]);
    }

    #[test]
    fn test_sign_multi_chunk() {
        let path = vec![0u8; 21];
        let payload: Vec<u8> = (0..600u32).map(|i| i as u8).collect();
        let commands = ApduCommand::sign_transaction_chunks(&path, &payload);

        // 234 + 255 + 111
        assert_eq!(commands.len(), 3);
        assert_eq!(commands[0].data.len(), MAX_APDU_DATA);
        assert_eq!(commands[1].p1, P1_MORE_CHUNKS);
        assert_eq!(commands[1].data.len(), MAX_APDU_DATA);
        assert_eq!(commands[2].data.len(), 111);

        let rebuilt: Vec<u8> = commands
            .iter()
            .flat_map(|c| c.data.iter().copied())
            .skip(path.len())
            .collect();
        assert_eq!(rebuilt, payload);
    }

    #[test]
    fn test_apdu_response_parsing() {
        let response = ApduResponse::from_bytes(&[0x01, 0x02, 0x03, 0x90, 0x00]).unwrap();
        assert_eq!(response.data, vec![0x01, 0x02, 0x03]);
        assert!(response.is_success());
    }

    #[test]
    fn test_apdu_response_error() {
        let response = ApduResponse::from_bytes(&[0x69, 0x85]).unwrap();
        assert!(!response.is_success());
        assert_eq!(response.status_code(), 0x6985);

        let err = response.into_result("sign").unwrap_err();
        assert!(matches!(err, HardwareWalletError::DeviceCommunication(_)));
        assert!(err.to_string().contains("denied by the user"));
    }

    #[test]
    fn test_apdu_response_too_short() {
        assert!(ApduResponse::from_bytes(&[0x90]).is_err());
    }
}
