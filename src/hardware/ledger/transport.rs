//! Ledger HID transport
//!
//! APDUs are split into 64-byte HID reports tagged with a channel, a command
//! tag and a sequence number. The first report also carries the APDU length.

use super::apdu::{ApduCommand, ApduResponse};
use crate::core::errors::{HardwareWalletError, Result};
use hidapi::{HidApi, HidDevice};
use std::time::Duration;
use tracing::{debug, info};

/// Ledger USB parameters
pub const LEDGER_VENDOR_ID: u16 = 0x2C97;
pub const LEDGER_USAGE_PAGE: u16 = 0xFFA0;

/// HID report size
const HID_PACKET_SIZE: usize = 64;

const CHANNEL: u16 = 0x0101;

const TAG_APDU: u8 = 0x05;

/// Upper bound on response reports
const MAX_RESPONSE_PACKETS: u16 = 128;

/// Whether a Ledger is attached to this host.
pub fn is_present() -> bool {
    match HidApi::new() {
        Ok(api) => api
            .device_list()
            .any(|d| d.vendor_id() == LEDGER_VENDOR_ID && d.usage_page() == LEDGER_USAGE_PAGE),
        Err(e) => {
            debug!("HID API unavailable: {}", e);
            false
        }
    }
}

/// Split an APDU into HID write reports (leading report id 0x00 included).
pub fn build_hid_packets(apdu: &[u8]) -> Vec<Vec<u8>> {
    let mut packets = Vec::new();
    let total_len = apdu.len();
    let mut offset = 0;
    let mut sequence = 0u16;

    loop {
        let mut packet = vec![0u8; HID_PACKET_SIZE + 1];
        packet[1..3].copy_from_slice(&CHANNEL.to_be_bytes());
        packet[3] = TAG_APDU;
        packet[4..6].copy_from_slice(&sequence.to_be_bytes());

        let data_start = if sequence == 0 {
            packet[6..8].copy_from_slice(&(total_len as u16).to_be_bytes());
            8
        } else {
            6
        };

        let chunk_size = (HID_PACKET_SIZE + 1 - data_start).min(total_len - offset);
        packet[data_start..data_start + chunk_size].copy_from_slice(&apdu[offset..offset + chunk_size]);
        offset += chunk_size;

        packets.push(packet);
        sequence += 1;

        if offset >= total_len {
            break;
        }
    }

    packets
}

/// Reassembles response reports (as read, without report id).
#[derive(Debug, Default)]
pub struct ResponseAssembler {
    data: Vec<u8>,
    total_len: Option<usize>,
    sequence: u16,
}

impl ResponseAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one report. Returns the full response once complete.
    pub fn push(&mut self, packet: &[u8]) -> Result<Option<Vec<u8>>> {
        if packet.len() < 5 {
            return Err(HardwareWalletError::DeviceCommunication("HID report too short".to_string()));
        }

        let channel = u16::from_be_bytes([packet[0], packet[1]]);
        if channel != CHANNEL || packet[2] != TAG_APDU {
            debug!("ignoring HID report on channel {:04X} tag {:02X}", channel, packet[2]);
            return Ok(None);
        }

        let seq = u16::from_be_bytes([packet[3], packet[4]]);
        if seq != self.sequence {
            return Err(HardwareWalletError::DeviceCommunication(format!(
                "sequence mismatch: expected {}, got {}",
                self.sequence, seq
            )));
        }

        if self.sequence == 0 {
            if packet.len() < 7 {
                return Err(HardwareWalletError::DeviceCommunication("HID report too short".to_string()));
            }
            self.total_len = Some(u16::from_be_bytes([packet[5], packet[6]]) as usize);
            self.data.extend_from_slice(&packet[7..]);
        } else {
            self.data.extend_from_slice(&packet[5..]);
        }
        self.sequence += 1;

        match self.total_len {
            Some(len) if self.data.len() >= len => {
                let mut data = std::mem::take(&mut self.data);
                data.truncate(len);
                Ok(Some(data))
            }
            _ if self.sequence > MAX_RESPONSE_PACKETS => Err(HardwareWalletError::DeviceCommunication(
                "too many response packets".to_string(),
            )),
            _ => Ok(None),
        }
    }
}

/// Ledger HID transport
pub struct LedgerTransport {
    device: HidDevice,
    timeout: Duration,
}

impl LedgerTransport {
    /// Open the first attached Ledger.
    pub fn open(timeout: Duration) -> Result<Self> {
        let api = HidApi::new()
            .map_err(|e| HardwareWalletError::DeviceNotSupported(format!("HID API init failed: {}", e)))?;

        let device_info = api
            .device_list()
            .find(|d| d.vendor_id() == LEDGER_VENDOR_ID && d.usage_page() == LEDGER_USAGE_PAGE)
            .ok_or_else(|| {
                HardwareWalletError::DeviceCommunication(
                    "No Ledger device found. Make sure it is connected and unlocked.".to_string(),
                )
            })?;

        let device = device_info
            .open_device(&api)
            .map_err(|e| HardwareWalletError::DeviceCommunication(format!("failed to open Ledger: {}", e)))?;

        info!(
            product = device_info.product_string().unwrap_or("unknown"),
            "connected to Ledger device"
        );

        Ok(Self { device, timeout })
    }

    /// Send an APDU and wait for its response.
    pub fn exchange(&self, command: &ApduCommand) -> Result<ApduResponse> {
        let packets = build_hid_packets(&command.to_bytes());

        for (i, packet) in packets.iter().enumerate() {
            debug!("writing HID report {}/{}", i + 1, packets.len());
            self.device
                .write(packet)
                .map_err(|e| HardwareWalletError::DeviceCommunication(format!("HID write failed: {}", e)))?;
        }

        let response = ApduResponse::from_bytes(&self.receive_response()?)?;
        debug!("APDU exchanged, status {:04X}", response.status_code());
        Ok(response)
    }

    fn receive_response(&self) -> Result<Vec<u8>> {
        let mut assembler = ResponseAssembler::new();
        let timeout_ms = i32::try_from(self.timeout.as_millis()).unwrap_or(i32::MAX);

        loop {
            let mut packet = [0u8; HID_PACKET_SIZE];
            let read_len = self
                .device
                .read_timeout(&mut packet, timeout_ms)
                .map_err(|e| HardwareWalletError::DeviceCommunication(format!("HID read failed: {}", e)))?;

            if read_len == 0 {
                return Err(HardwareWalletError::Timeout("no response from Ledger".to_string()));
            }

            if let Some(data) = assembler.push(&packet[..read_len])? {
                return Ok(data);
            }
        }
    }
}
