//! Trezor HID transport
//!
//! Every 64-byte report starts with `?`. The first report of a message adds
//! `##` followed by the message type and length.

use super::messages::TrezorMessage;
use crate::core::errors::{HardwareWalletError, Result};
use hidapi::{HidApi, HidDevice};
use std::time::Duration;
use tracing::{debug, info};

/// Trezor USB parameters
pub const TREZOR_VENDOR_ID: u16 = 0x534C; // SatoshiLabs
pub const TREZOR_ONE_PRODUCT_ID: u16 = 0x0001;
pub const TREZOR_T_VENDOR_ID: u16 = 0x1209;
pub const TREZOR_T_PRODUCT_ID: u16 = 0x53C1;

/// HID report size
const HID_PACKET_SIZE: usize = 64;

const REPORT_MAGIC: u8 = b'?';
const HEADER_MAGIC: &[u8] = b"##";

fn is_trezor(vendor_id: u16, product_id: u16) -> bool {
    (vendor_id == TREZOR_VENDOR_ID && product_id == TREZOR_ONE_PRODUCT_ID)
        || (vendor_id == TREZOR_T_VENDOR_ID && product_id == TREZOR_T_PRODUCT_ID)
}

/// Whether a Trezor is attached to this host.
pub fn is_present() -> bool {
    match HidApi::new() {
        Ok(api) => api
            .device_list()
            .any(|d| is_trezor(d.vendor_id(), d.product_id())),
        Err(e) => {
            debug!("HID API unavailable: {}", e);
            false
        }
    }
}

/// Split a serialised message into HID write reports (leading report id 0x00 included).
pub fn build_packets(serialized: &[u8]) -> Vec<Vec<u8>> {
    let mut stream = Vec::with_capacity(HEADER_MAGIC.len() + serialized.len());
    stream.extend_from_slice(HEADER_MAGIC);
    stream.extend_from_slice(serialized);

    stream
        .chunks(HID_PACKET_SIZE - 1)
        .map(|chunk| {
            let mut packet = vec![0u8; HID_PACKET_SIZE + 1];
            packet[1] = REPORT_MAGIC;
            packet[2..2 + chunk.len()].copy_from_slice(chunk);
            packet
        })
        .collect()
}

/// Reassembles a message from read reports (no report id).
#[derive(Debug, Default)]
pub struct MessageAssembler {
    data: Vec<u8>,
    total_len: Option<usize>,
}

impl MessageAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one report. Returns the decoded message once complete.
    pub fn push(&mut self, packet: &[u8]) -> Result<Option<TrezorMessage>> {
        if packet.first() != Some(&REPORT_MAGIC) {
            return Err(HardwareWalletError::DeviceCommunication(
                "invalid Trezor report header".to_string(),
            ));
        }

        match self.total_len {
            None => {
                if packet.len() < 9 || &packet[1..3] != HEADER_MAGIC {
                    return Err(HardwareWalletError::DeviceCommunication(
                        "invalid Trezor message header".to_string(),
                    ));
                }
                let len = u32::from_be_bytes([packet[5], packet[6], packet[7], packet[8]]) as usize;
                self.total_len = Some(6 + len);
                self.data.extend_from_slice(&packet[3..]);
            }
            Some(_) => self.data.extend_from_slice(&packet[1..]),
        }

        match self.total_len {
            Some(len) if self.data.len() >= len => {
                self.data.truncate(len);
                TrezorMessage::deserialize(&self.data).map(Some)
            }
            _ => Ok(None),
        }
    }
}

/// Trezor HID transport
pub struct TrezorTransport {
    device: HidDevice,
    timeout: Duration,
}

impl TrezorTransport {
    /// Open the first attached Trezor One or Model T.
    pub fn open(timeout: Duration) -> Result<Self> {
        let api = HidApi::new()
            .map_err(|e| HardwareWalletError::DeviceNotSupported(format!("HID API init failed: {}", e)))?;

        let device_info = api
            .device_list()
            .find(|d| is_trezor(d.vendor_id(), d.product_id()))
            .ok_or_else(|| {
                HardwareWalletError::DeviceCommunication(
                    "No Trezor device found. Make sure it is connected.".to_string(),
                )
            })?;

        let device = device_info
            .open_device(&api)
            .map_err(|e| HardwareWalletError::DeviceCommunication(format!("failed to open Trezor: {}", e)))?;

        info!(
            product = device_info.product_string().unwrap_or("unknown"),
            "connected to Trezor device"
        );

        Ok(Self { device, timeout })
    }

    pub fn write(&self, message: &TrezorMessage) -> Result<()> {
        let packets = build_packets(&message.serialize());
        debug!("sending Trezor message {:?} in {} reports", message.msg_type, packets.len());

        for packet in &packets {
            self.device
                .write(packet)
                .map_err(|e| HardwareWalletError::DeviceCommunication(format!("HID write failed: {}", e)))?;
        }
        Ok(())
    }

    pub fn read(&self) -> Result<TrezorMessage> {
        let mut assembler = MessageAssembler::new();
        let timeout_ms = i32::try_from(self.timeout.as_millis()).unwrap_or(i32::MAX);

        loop {
            let mut packet = [0u8; HID_PACKET_SIZE];
            let read_len = self
                .device
                .read_timeout(&mut packet, timeout_ms)
                .map_err(|e| HardwareWalletError::DeviceCommunication(format!("HID read failed: {}", e)))?;

            if read_len == 0 {
                return Err(HardwareWalletError::Timeout("no response from Trezor".to_string()));
            }

            if let Some(message) = assembler.push(&packet[..read_len])? {
                debug!("received Trezor message {:?}, {} bytes", message.msg_type, message.payload.len());
                return Ok(message);
            }
        }
    }

    pub fn exchange(&self, message: &TrezorMessage) -> Result<TrezorMessage> {
        self.write(message)?;
        self.read()
    }
}
