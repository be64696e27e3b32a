// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The 8-byte SETUP packet and its wire-format sub-fields.
//!
//! All multi-byte USB wire fields are little-endian; the helpers here make
//! that explicit at the byte-array <-> typed-value boundary rather than
//! relying on host endianness.

/// Direction carried in `bmRequestType` bit 7.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum RequestDirection {
    HostToDevice,
    DeviceToHost,
}

/// Request type carried in `bmRequestType` bits 5-6.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum RequestKind {
    Standard,
    Class,
    Vendor,
    Reserved,
}

/// Recipient carried in `bmRequestType` bits 0-4.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum Recipient {
    Device,
    Interface,
    Endpoint,
    Other,
}

/// Standard request codes (`bRequest` when `RequestKind::Standard`).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum StandardRequest {
    GetStatus,
    ClearFeature,
    SetFeature,
    SetAddress,
    GetDescriptor,
    SetDescriptor,
    GetConfiguration,
    SetConfiguration,
    GetInterface,
    SetInterface,
    SynchFrame,
    Unknown(u8),
}

impl From<u8> for StandardRequest {
    fn from(b: u8) -> Self {
        match b {
            0x00 => Self::GetStatus,
            0x01 => Self::ClearFeature,
            0x03 => Self::SetFeature,
            0x05 => Self::SetAddress,
            0x06 => Self::GetDescriptor,
            0x07 => Self::SetDescriptor,
            0x08 => Self::GetConfiguration,
            0x09 => Self::SetConfiguration,
            0x0A => Self::GetInterface,
            0x0B => Self::SetInterface,
            0x0C => Self::SynchFrame,
            other => Self::Unknown(other),
        }
    }
}

/// `ENDPOINT_HALT` feature selector, the only feature this stack implements.
pub const FEATURE_ENDPOINT_HALT: u16 = 0x0000;

/// The decoded 8-byte SETUP packet.
///
/// Invariant: every SETUP packet delivered by a HWIF back-end is exactly 8
/// bytes and lands on endpoint 0 (`§3` Setup packet).
#[derive(Debug, Copy, Clone)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[repr(align(2))]
pub struct SetupPacket {
    pub direction: RequestDirection,
    pub kind: RequestKind,
    pub recipient: Recipient,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl SetupPacket {
    pub const SIZE: usize = 8;

    /// Decode the little-endian 8-byte wire form.
    pub fn from_bytes(b: &[u8; 8]) -> Self {
        let bm_request_type = b[0];
        let direction = if bm_request_type & 0x80 != 0 {
            RequestDirection::DeviceToHost
        } else {
            RequestDirection::HostToDevice
        };
        let kind = match (bm_request_type >> 5) & 0x03 {
            0 => RequestKind::Standard,
            1 => RequestKind::Class,
            2 => RequestKind::Vendor,
            _ => RequestKind::Reserved,
        };
        let recipient = match bm_request_type & 0x1F {
            0 => Recipient::Device,
            1 => Recipient::Interface,
            2 => Recipient::Endpoint,
            _ => Recipient::Other,
        };
        SetupPacket {
            direction,
            kind,
            recipient,
            request: b[1],
            value: u16::from_le_bytes([b[2], b[3]]),
            index: u16::from_le_bytes([b[4], b[5]]),
            length: u16::from_le_bytes([b[6], b[7]]),
        }
    }

    pub fn to_bytes(self) -> [u8; 8] {
        let mut bm_request_type = match self.direction {
            RequestDirection::HostToDevice => 0x00,
            RequestDirection::DeviceToHost => 0x80,
        };
        bm_request_type |= match self.kind {
            RequestKind::Standard => 0 << 5,
            RequestKind::Class => 1 << 5,
            RequestKind::Vendor => 2 << 5,
            RequestKind::Reserved => 3 << 5,
        };
        bm_request_type |= match self.recipient {
            Recipient::Device => 0,
            Recipient::Interface => 1,
            Recipient::Endpoint => 2,
            Recipient::Other => 3,
        };
        let value = self.value.to_le_bytes();
        let index = self.index.to_le_bytes();
        let length = self.length.to_le_bytes();
        [
            bm_request_type,
            self.request,
            value[0],
            value[1],
            index[0],
            index[1],
            length[0],
            length[1],
        ]
    }

    /// `wValue` high byte, used as a descriptor type selector.
    pub fn value_high(&self) -> u8 {
        (self.value >> 8) as u8
    }

    /// `wValue` low byte, used as a descriptor index selector.
    pub fn value_low(&self) -> u8 {
        (self.value & 0xFF) as u8
    }

    /// `wIndex` low byte, used as the interface/endpoint number.
    pub fn index_low(&self) -> u8 {
        (self.index & 0xFF) as u8
    }

    /// `wIndex` high byte.
    pub fn index_high(&self) -> u8 {
        (self.index >> 8) as u8
    }

    pub fn standard_request(&self) -> StandardRequest {
        StandardRequest::from(self.request)
    }

    /// Whether this request has a host-to-device data stage (`OUT` data
    /// carried after the SETUP packet).
    pub fn has_out_data_stage(&self) -> bool {
        self.length > 0 && self.direction == RequestDirection::HostToDevice
    }

    /// Whether this request has a device-to-host data stage (`IN` data
    /// returned before the status phase).
    pub fn has_in_data_stage(&self) -> bool {
        self.length > 0 && self.direction == RequestDirection::DeviceToHost
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn decodes_get_descriptor_device() {
        // 80 06 00 01 00 00 40 00 -- GET_DESCRIPTOR(device), length=64
        let bytes = [0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x40, 0x00];
        let setup = SetupPacket::from_bytes(&bytes);
        assert_eq!(setup.direction, RequestDirection::DeviceToHost);
        assert_eq!(setup.kind, RequestKind::Standard);
        assert_eq!(setup.recipient, Recipient::Device);
        assert_eq!(setup.standard_request(), StandardRequest::GetDescriptor);
        assert_eq!(setup.value_high(), 0x01);
        assert_eq!(setup.value_low(), 0x00);
        assert_eq!(setup.length, 64);
        assert!(setup.has_in_data_stage());
        assert!(!setup.has_out_data_stage());
    }

    #[test]
    fn decodes_cdc_set_line_coding() {
        // 21 20 00 00 00 00 07 00 -- SET_LINE_CODING, interface 0, length=7
        let bytes = [0x21, 0x20, 0x00, 0x00, 0x00, 0x00, 0x07, 0x00];
        let setup = SetupPacket::from_bytes(&bytes);
        assert_eq!(setup.direction, RequestDirection::HostToDevice);
        assert_eq!(setup.kind, RequestKind::Class);
        assert_eq!(setup.recipient, Recipient::Interface);
        assert_eq!(setup.request, 0x20);
        assert!(setup.has_out_data_stage());
    }

    #[test]
    fn round_trips_through_bytes() {
        let bytes = [0xA1, 0x21, 0x00, 0x00, 0x00, 0x00, 0x07, 0x00];
        let setup = SetupPacket::from_bytes(&bytes);
        assert_eq!(setup.to_bytes(), bytes);
    }
}
