// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Descriptor set assembly.
//!
//! A single composite configuration descriptor is built once, at
//! `DeviceCore` construction time, by concatenating function-specific
//! fragments in the fixed order the distilled spec names (MSC, then each
//! CDC-ACM group, then Printer, then HID). `wTotalLength` is computed from
//! the actual bytes written rather than hand-maintained, so it can never
//! drift from the rendered structure (`§8`: "`wTotalLength`... equals the
//! byte size of the rendered structure, for every build-time choice of
//! feature flags").
//!
//! Construction is runtime (not `const`) because the CDC channel count is a
//! run-time-sizeable quantity bounded by a const-generic capacity (`§6`
//! expansion), not a single on/off switch; everything else about the layout
//! is fixed once a `UsbdConfig` is chosen and never mutates afterwards.

use crate::endpoint::{Direction, EndpointAddress};
use crate::error::ErrorCode;
use crate::fixed_vec::{FixedByteVec, FixedVec};

/// Upper bound on the assembled configuration descriptor's byte length.
/// Generous enough for MSC + 3 CDC channels + printer + HID.
pub const MAX_CONFIG_DESC_LEN: usize = 256;
/// Upper bound on the number of non-control endpoints a composite device
/// can declare (2 MSC + 3 * (1 notify + 2 data) CDC + 2 printer + 2 HID).
pub const MAX_ENDPOINTS: usize = 16;
/// Upper bound on the number of interfaces routed to a class engine.
pub const MAX_INTERFACES: usize = 12;
/// Upper bound on the number of string descriptors (lang id not counted).
pub const MAX_STRINGS: usize = 10;
/// Upper bound on CDC-ACM channels in one build (`§6`: `USBD_CDC_CHANNELS
/// in {0, 1, 2, 3}`).
pub const MAX_CDC_CHANNELS: usize = 3;

/// Endpoint transfer type, carried in the endpoint descriptor's
/// `bmAttributes` low bits.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum TransferType {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

impl TransferType {
    const fn bm_attributes(self) -> u8 {
        match self {
            Self::Control => 0b00,
            Self::Isochronous => 0b01,
            Self::Bulk => 0b10,
            Self::Interrupt => 0b11,
        }
    }
}

/// One endpoint belonging to some function, as declared in the
/// configuration descriptor. The HWIF's `set_cfg` iterates these to
/// allocate buffer space and program endpoint type/size (`§4.1`).
#[derive(Debug, Copy, Clone)]
pub struct EndpointDescriptor {
    pub address: EndpointAddress,
    pub transfer_type: TransferType,
    pub max_packet_size: u16,
    /// Polling interval in frames, meaningful for Interrupt endpoints.
    pub interval: u8,
}

/// Which class engine owns an interface, for the Core's dispatch table.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum ClassId {
    Cdc,
    Msc,
    Printer,
    Hid,
}

/// Maps an interface number to the class engine and function instance that
/// owns it, built once alongside the descriptor set so the two can never
/// disagree about interface numbering (`§4.2` expansion).
#[derive(Debug, Copy, Clone)]
pub struct InterfaceRoute {
    pub interface_number: u8,
    pub class_id: ClassId,
    pub function_index: u8,
}

/// Everything the Core and HWIF need to know about the assembled
/// descriptor set and the functions it describes.
pub struct DescriptorSet {
    device_descriptor: [u8; 18],
    config_descriptor: FixedByteVec<MAX_CONFIG_DESC_LEN>,
    endpoints: FixedVec<EndpointDescriptor, MAX_ENDPOINTS>,
    routes: FixedVec<InterfaceRoute, MAX_INTERFACES>,
    strings: FixedVec<&'static str, MAX_STRINGS>,
    hid_report_descriptor: Option<&'static [u8]>,
    hid_descriptor: Option<[u8; 9]>,
    ep0_max_packet_size: u8,
    cdc_channel_specs: FixedVec<CdcChannelSpec, MAX_CDC_CHANNELS>,
    msc_endpoints: Option<(u8, u8)>,
    printer_endpoints: Option<(u8, Option<u8>)>,
    hid_endpoints: Option<(u8, Option<u8>)>,
}

impl DescriptorSet {
    pub fn device_descriptor(&self) -> &[u8] {
        &self.device_descriptor
    }

    pub fn config_descriptor(&self) -> &[u8] {
        self.config_descriptor.as_slice()
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &EndpointDescriptor> {
        self.endpoints.iter()
    }

    pub fn routes(&self) -> impl Iterator<Item = &InterfaceRoute> {
        self.routes.iter()
    }

    pub fn route_for_interface(&self, interface_number: u8) -> Option<InterfaceRoute> {
        self.routes
            .iter()
            .find(|r| r.interface_number == interface_number)
            .copied()
    }

    pub fn string(&self, index: u8) -> Option<&'static str> {
        if index == 0 {
            None
        } else {
            self.strings.get((index - 1) as usize).copied()
        }
    }

    pub fn hid_report_descriptor(&self) -> Option<&'static [u8]> {
        self.hid_report_descriptor
    }

    /// The 9-byte HID class descriptor, for a standalone
    /// `GET_DESCRIPTOR(HID)` fetch (the usual path parses it back out of the
    /// configuration descriptor instead, but some hosts ask separately).
    pub fn hid_descriptor(&self) -> Option<[u8; 9]> {
        self.hid_descriptor
    }

    pub fn ep0_max_packet_size(&self) -> u8 {
        self.ep0_max_packet_size
    }

    /// Per-channel endpoint/interface assignment for every CDC-ACM function
    /// in this build, in channel order -- the same deterministic numbering
    /// `DescriptorBuilder::build` used to assemble the configuration
    /// descriptor, exposed so `usbd-classes` never has to re-derive it.
    pub fn cdc_channels(&self) -> impl Iterator<Item = &CdcChannelSpec> {
        self.cdc_channel_specs.iter()
    }

    /// `(out_ep, in_ep)` for the MSC bulk-only-transport pipe, if enabled.
    pub fn msc_endpoints(&self) -> Option<(u8, u8)> {
        self.msc_endpoints
    }

    /// `(out_ep, in_ep)` for the printer data pipe; `in_ep` is `None` unless
    /// the build is bidirectional.
    pub fn printer_endpoints(&self) -> Option<(u8, Option<u8>)> {
        self.printer_endpoints
    }

    /// `(in_ep, out_ep)` for the HID report pipe; `out_ep` is `None` unless
    /// the build declared an Output report endpoint.
    pub fn hid_endpoints(&self) -> Option<(u8, Option<u8>)> {
        self.hid_endpoints
    }
}

/// Per-CDC-channel static description needed while assembling descriptors.
#[derive(Debug, Copy, Clone)]
pub struct CdcChannelSpec {
    pub control_interface: u8,
    pub data_interface: u8,
    pub notify_ep: u8,
    pub data_out_ep: u8,
    pub data_in_ep: u8,
    /// Interface string index for this channel (0 = none).
    pub string_index: u8,
}

/// Build-time/construction-time feature selection, mirroring the original's
/// `USBD_*` preprocessor options (`§6`).
#[derive(Debug, Copy, Clone)]
pub struct FeatureSet<const MAX_CDC: usize> {
    pub msc_enabled: bool,
    pub printer_enabled: bool,
    pub printer_bidirectional: bool,
    pub hid_enabled: bool,
    pub cdc_channels: u8,
    pub common_cdc_notify_ep: bool,
}

/// Endpoint size configuration (`§6` "Endpoint sizes").
#[derive(Debug, Copy, Clone)]
pub struct EndpointSizes {
    pub ctrl: u8,
    pub msc_bot: u16,
    pub cdc_data: u16,
    pub cdc_int: u16,
    pub prn_data: u16,
    pub hid_in: u16,
}

impl Default for EndpointSizes {
    fn default() -> Self {
        Self {
            ctrl: 64,
            msc_bot: 64,
            cdc_data: 64,
            cdc_int: 10,
            prn_data: 64,
            hid_in: 8,
        }
    }
}

/// Assembles the composite descriptor set for a given feature selection.
///
/// Endpoint numbering: MSC (if enabled) takes endpoint 1 (IN/OUT); each CDC
/// channel takes the next notify endpoint then a data IN/OUT pair; printer
/// takes the next OUT (and IN if bidirectional); HID takes the next IN (and
/// OUT if configured). This fixed, deterministic order is what the
/// interface routing table is built against, so the two never drift apart.
pub struct DescriptorBuilder {
    vendor_id: u16,
    product_id: u16,
    ep_sizes: EndpointSizes,
    strings: FixedVec<&'static str, MAX_STRINGS>,
    msc_enabled: bool,
    cdc_channels: u8,
    common_cdc_notify_ep: bool,
    printer_enabled: bool,
    printer_bidirectional: bool,
    hid_enabled: bool,
    hid_report_descriptor: Option<&'static [u8]>,
    hid_out_report: bool,
}

impl DescriptorBuilder {
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
            ep_sizes: EndpointSizes::default(),
            strings: FixedVec::new(),
            msc_enabled: false,
            cdc_channels: 0,
            common_cdc_notify_ep: false,
            printer_enabled: false,
            printer_bidirectional: false,
            hid_enabled: false,
            hid_report_descriptor: None,
            hid_out_report: false,
        }
    }

    pub fn endpoint_sizes(mut self, sizes: EndpointSizes) -> Self {
        self.ep_sizes = sizes;
        self
    }

    pub fn strings(mut self, manufacturer: &'static str, product: &'static str, serial: &'static str) -> Result<Self, ErrorCode> {
        self.strings.push(manufacturer)?;
        self.strings.push(product)?;
        self.strings.push(serial)?;
        Ok(self)
    }

    pub fn with_msc(mut self) -> Self {
        self.msc_enabled = true;
        self
    }

    pub fn with_cdc_channels(mut self, channels: u8, common_notify_ep: bool) -> Self {
        self.cdc_channels = channels;
        self.common_cdc_notify_ep = common_notify_ep;
        self
    }

    pub fn with_printer(mut self, bidirectional: bool) -> Self {
        self.printer_enabled = true;
        self.printer_bidirectional = bidirectional;
        self
    }

    pub fn with_hid(mut self, report_descriptor: &'static [u8], out_report: bool) -> Self {
        self.hid_enabled = true;
        self.hid_report_descriptor = Some(report_descriptor);
        self.hid_out_report = out_report;
        self
    }

    /// Assemble the full descriptor set. Returns `Err(ErrorCode::NoMem)` if
    /// the configuration chosen would overflow the fixed-capacity buffers
    /// (e.g. too many CDC channels for `MAX_ENDPOINTS`) -- this is a
    /// construction-time-only failure the board's `main` is expected to
    /// treat as fatal, not a runtime fault the device can recover from.
    pub fn build(self) -> Result<DescriptorSet, ErrorCode> {
        let mut endpoints: FixedVec<EndpointDescriptor, MAX_ENDPOINTS> = FixedVec::new();
        let mut routes: FixedVec<InterfaceRoute, MAX_INTERFACES> = FixedVec::new();
        let mut config_descriptor: FixedByteVec<MAX_CONFIG_DESC_LEN> = FixedByteVec::new();
        let mut hid_descriptor: Option<[u8; 9]> = None;
        let mut cdc_channel_specs: FixedVec<CdcChannelSpec, MAX_CDC_CHANNELS> = FixedVec::new();
        let mut msc_endpoints: Option<(u8, u8)> = None;
        let mut printer_endpoints: Option<(u8, Option<u8>)> = None;
        let mut hid_endpoints: Option<(u8, Option<u8>)> = None;

        let mut next_ep: u8 = 1;
        let mut next_interface: u8 = 0;
        let mut num_functions: u8 = 0;

        let push_bytes = |acc: &mut FixedByteVec<MAX_CONFIG_DESC_LEN>, bytes: &[u8]| -> Result<(), ErrorCode> {
            acc.extend(bytes)
        };

        // Configuration descriptor header, patched with wTotalLength/
        // bNumInterfaces once the body is known.
        let config_header_index = 0usize;
        push_bytes(
            &mut config_descriptor,
            &[
                9,    // bLength
                0x02, // CONFIGURATION
                0, 0, // wTotalLength, patched below
                0,    // bNumInterfaces, patched below
                1,    // bConfigurationValue
                0,    // iConfiguration
                0x80, // bmAttributes: bus-powered
                50,   // bMaxPower (100 mA / 2)
            ],
        )?;

        if self.msc_enabled {
            let if_num = next_interface;
            next_interface += 1;
            let ep_out = next_ep;
            let ep_in = next_ep;
            next_ep += 1;
            push_bytes(
                &mut config_descriptor,
                &[
                    9, 0x04, if_num, 0, 2, 0x08, 0x06, 0x50, 0,
                ],
            )?;
            push_bytes(
                &mut config_descriptor,
                &endpoint_desc_bytes(
                    EndpointAddress::new(ep_out, Direction::Out),
                    TransferType::Bulk,
                    self.ep_sizes.msc_bot,
                    0,
                ),
            )?;
            push_bytes(
                &mut config_descriptor,
                &endpoint_desc_bytes(
                    EndpointAddress::new(ep_in, Direction::In),
                    TransferType::Bulk,
                    self.ep_sizes.msc_bot,
                    0,
                ),
            )?;
            endpoints.push(EndpointDescriptor {
                address: EndpointAddress::new(ep_out, Direction::Out),
                transfer_type: TransferType::Bulk,
                max_packet_size: self.ep_sizes.msc_bot,
                interval: 0,
            })?;
            endpoints.push(EndpointDescriptor {
                address: EndpointAddress::new(ep_in, Direction::In),
                transfer_type: TransferType::Bulk,
                max_packet_size: self.ep_sizes.msc_bot,
                interval: 0,
            })?;
            routes.push(InterfaceRoute {
                interface_number: if_num,
                class_id: ClassId::Msc,
                function_index: 0,
            })?;
            num_functions += 1;
            msc_endpoints = Some((ep_out, ep_in));
        }

        let mut shared_notify_ep: Option<u8> = None;
        for ch in 0..self.cdc_channels {
            let ctrl_if = next_interface;
            next_interface += 1;
            let data_if = next_interface;
            next_interface += 1;

            let notify_ep = if self.common_cdc_notify_ep {
                *shared_notify_ep.get_or_insert_with(|| {
                    let ep = next_ep;
                    next_ep += 1;
                    ep
                })
            } else {
                let ep = next_ep;
                next_ep += 1;
                ep
            };
            let data_out_ep = next_ep;
            let data_in_ep = next_ep;
            next_ep += 1;

            // IAD grouping control+data under one function.
            push_bytes(
                &mut config_descriptor,
                &[8, 0x0B, ctrl_if, 2, 0x02, 0x02, 0x00, 0],
            )?;
            // CDC control interface.
            push_bytes(
                &mut config_descriptor,
                &[9, 0x04, ctrl_if, 0, 1, 0x02, 0x02, 0x00, 0],
            )?;
            // Header functional descriptor.
            push_bytes(&mut config_descriptor, &[5, 0x24, 0x00, 0x10, 0x01])?;
            // Call management functional descriptor.
            push_bytes(&mut config_descriptor, &[5, 0x24, 0x01, 0x00, data_if])?;
            // ACM functional descriptor.
            push_bytes(&mut config_descriptor, &[4, 0x24, 0x02, 0x02])?;
            // Union functional descriptor.
            push_bytes(&mut config_descriptor, &[5, 0x24, 0x06, ctrl_if, data_if])?;
            // Notification endpoint.
            push_bytes(
                &mut config_descriptor,
                &endpoint_desc_bytes(
                    EndpointAddress::new(notify_ep, Direction::In),
                    TransferType::Interrupt,
                    self.ep_sizes.cdc_int,
                    8,
                ),
            )?;
            // CDC data interface.
            push_bytes(
                &mut config_descriptor,
                &[9, 0x04, data_if, 0, 2, 0x0A, 0x00, 0x00, 0],
            )?;
            push_bytes(
                &mut config_descriptor,
                &endpoint_desc_bytes(
                    EndpointAddress::new(data_out_ep, Direction::Out),
                    TransferType::Bulk,
                    self.ep_sizes.cdc_data,
                    0,
                ),
            )?;
            push_bytes(
                &mut config_descriptor,
                &endpoint_desc_bytes(
                    EndpointAddress::new(data_in_ep, Direction::In),
                    TransferType::Bulk,
                    self.ep_sizes.cdc_data,
                    0,
                ),
            )?;

            if !self.common_cdc_notify_ep || ch == 0 {
                endpoints.push(EndpointDescriptor {
                    address: EndpointAddress::new(notify_ep, Direction::In),
                    transfer_type: TransferType::Interrupt,
                    max_packet_size: self.ep_sizes.cdc_int,
                    interval: 8,
                })?;
            }
            endpoints.push(EndpointDescriptor {
                address: EndpointAddress::new(data_out_ep, Direction::Out),
                transfer_type: TransferType::Bulk,
                max_packet_size: self.ep_sizes.cdc_data,
                interval: 0,
            })?;
            endpoints.push(EndpointDescriptor {
                address: EndpointAddress::new(data_in_ep, Direction::In),
                transfer_type: TransferType::Bulk,
                max_packet_size: self.ep_sizes.cdc_data,
                interval: 0,
            })?;

            routes.push(InterfaceRoute {
                interface_number: ctrl_if,
                class_id: ClassId::Cdc,
                function_index: ch,
            })?;
            routes.push(InterfaceRoute {
                interface_number: data_if,
                class_id: ClassId::Cdc,
                function_index: ch,
            })?;
            num_functions += 1;
            cdc_channel_specs.push(CdcChannelSpec {
                control_interface: ctrl_if,
                data_interface: data_if,
                notify_ep,
                data_out_ep,
                data_in_ep,
                string_index: 0,
            })?;
        }

        if self.printer_enabled {
            let if_num = next_interface;
            next_interface += 1;
            let protocol = if self.printer_bidirectional { 2 } else { 1 };
            let num_eps = if self.printer_bidirectional { 2 } else { 1 };
            push_bytes(
                &mut config_descriptor,
                &[9, 0x04, if_num, 0, num_eps, 0x07, 0x01, protocol, 0],
            )?;
            let out_ep = next_ep;
            next_ep += 1;
            push_bytes(
                &mut config_descriptor,
                &endpoint_desc_bytes(
                    EndpointAddress::new(out_ep, Direction::Out),
                    TransferType::Bulk,
                    self.ep_sizes.prn_data,
                    0,
                ),
            )?;
            endpoints.push(EndpointDescriptor {
                address: EndpointAddress::new(out_ep, Direction::Out),
                transfer_type: TransferType::Bulk,
                max_packet_size: self.ep_sizes.prn_data,
                interval: 0,
            })?;
            let mut printer_in_ep = None;
            if self.printer_bidirectional {
                let in_ep = next_ep;
                next_ep += 1;
                push_bytes(
                    &mut config_descriptor,
                    &endpoint_desc_bytes(
                        EndpointAddress::new(in_ep, Direction::In),
                        TransferType::Bulk,
                        self.ep_sizes.prn_data,
                        0,
                    ),
                )?;
                endpoints.push(EndpointDescriptor {
                    address: EndpointAddress::new(in_ep, Direction::In),
                    transfer_type: TransferType::Bulk,
                    max_packet_size: self.ep_sizes.prn_data,
                    interval: 0,
                })?;
                printer_in_ep = Some(in_ep);
            }
            routes.push(InterfaceRoute {
                interface_number: if_num,
                class_id: ClassId::Printer,
                function_index: 0,
            })?;
            num_functions += 1;
            printer_endpoints = Some((out_ep, printer_in_ep));
        }

        if self.hid_enabled {
            let if_num = next_interface;
            next_interface += 1;
            let report_len = self.hid_report_descriptor.map(<[u8]>::len).unwrap_or(0) as u16;
            let num_eps: u8 = if self.hid_out_report { 2 } else { 1 };
            push_bytes(
                &mut config_descriptor,
                &[9, 0x04, if_num, 0, num_eps, 0x03, 0x00, 0x00, 0],
            )?;
            // HID descriptor.
            let rl = report_len.to_le_bytes();
            let hid_desc_bytes = [9, 0x21, 0x10, 0x01, 0x00, 0x01, 0x22, rl[0], rl[1]];
            push_bytes(&mut config_descriptor, &hid_desc_bytes)?;
            hid_descriptor = Some(hid_desc_bytes);
            let in_ep = next_ep;
            next_ep += 1;
            push_bytes(
                &mut config_descriptor,
                &endpoint_desc_bytes(
                    EndpointAddress::new(in_ep, Direction::In),
                    TransferType::Interrupt,
                    self.ep_sizes.hid_in,
                    10,
                ),
            )?;
            endpoints.push(EndpointDescriptor {
                address: EndpointAddress::new(in_ep, Direction::In),
                transfer_type: TransferType::Interrupt,
                max_packet_size: self.ep_sizes.hid_in,
                interval: 10,
            })?;
            let mut hid_out_ep = None;
            if self.hid_out_report {
                let out_ep = next_ep;
                next_ep += 1;
                push_bytes(
                    &mut config_descriptor,
                    &endpoint_desc_bytes(
                        EndpointAddress::new(out_ep, Direction::Out),
                        TransferType::Interrupt,
                        self.ep_sizes.hid_in,
                        10,
                    ),
                )?;
                endpoints.push(EndpointDescriptor {
                    address: EndpointAddress::new(out_ep, Direction::Out),
                    transfer_type: TransferType::Interrupt,
                    max_packet_size: self.ep_sizes.hid_in,
                    interval: 10,
                })?;
                hid_out_ep = Some(out_ep);
            }
            routes.push(InterfaceRoute {
                interface_number: if_num,
                class_id: ClassId::Hid,
                function_index: 0,
            })?;
            num_functions += 1;
            hid_endpoints = Some((in_ep, hid_out_ep));
        }

        // Patch wTotalLength and bNumInterfaces now that the body is known.
        let total_len = config_descriptor.len() as u16;
        config_descriptor.patch_u16(config_header_index + 2, total_len);
        config_descriptor.patch_u8(config_header_index + 4, next_interface);

        let class_triplet = if num_functions > 1 {
            (0xEFu8, 0x02u8, 0x01u8) // IAD composite
        } else if self.cdc_channels == 1 && num_functions == 1 {
            (0x02, 0x02, 0x00) // single-CDC variant
        } else {
            (0x00, 0x00, 0x00)
        };

        let vid = self.vendor_id.to_le_bytes();
        let pid = self.product_id.to_le_bytes();
        let device_descriptor = [
            18,   // bLength
            0x01, // DEVICE
            0x00, 0x02, // bcdUSB = 2.00
            class_triplet.0,
            class_triplet.1,
            class_triplet.2,
            self.ep_sizes.ctrl,
            vid[0],
            vid[1],
            pid[0],
            pid[1],
            0x01,
            0x00, // bcdDevice = 0x0001
            1,    // iManufacturer
            2,    // iProduct
            3,    // iSerialNumber
            1,    // bNumConfigurations
        ];

        Ok(DescriptorSet {
            device_descriptor,
            config_descriptor,
            endpoints,
            routes,
            strings: self.strings,
            hid_report_descriptor: self.hid_report_descriptor,
            hid_descriptor,
            ep0_max_packet_size: self.ep_sizes.ctrl,
            cdc_channel_specs,
            msc_endpoints,
            printer_endpoints,
            hid_endpoints,
        })
    }
}

fn endpoint_desc_bytes(
    address: EndpointAddress,
    transfer_type: TransferType,
    max_packet_size: u16,
    interval: u8,
) -> [u8; 7] {
    let mps = max_packet_size.to_le_bytes();
    [
        7,
        0x05,
        address.to_byte(),
        transfer_type.bm_attributes(),
        mps[0],
        mps[1],
        interval,
    ]
}

#[cfg(test)]
mod test {
    use super::*;

    fn minimal_builder() -> DescriptorBuilder {
        DescriptorBuilder::new(0x1209, 0xAB01)
            .strings("gbm", "USB Device Stack", "0001")
            .unwrap()
    }

    #[test]
    fn total_length_matches_rendered_bytes() {
        let set = minimal_builder()
            .with_msc()
            .with_cdc_channels(2, false)
            .build()
            .unwrap();
        let bytes = set.config_descriptor();
        let total_len = u16::from_le_bytes([bytes[2], bytes[3]]);
        assert_eq!(total_len as usize, bytes.len());
    }

    #[test]
    fn composite_device_uses_iad_class() {
        let set = minimal_builder()
            .with_msc()
            .with_cdc_channels(1, false)
            .build()
            .unwrap();
        assert_eq!(set.device_descriptor()[4], 0xEF);
        assert_eq!(set.device_descriptor()[5], 0x02);
        assert_eq!(set.device_descriptor()[6], 0x01);
    }

    #[test]
    fn single_cdc_device_uses_cdc_class() {
        let set = minimal_builder().with_cdc_channels(1, false).build().unwrap();
        assert_eq!(set.device_descriptor()[4], 0x02);
        assert_eq!(set.device_descriptor()[5], 0x02);
    }

    #[test]
    fn endpoint_addresses_are_unique() {
        let set = minimal_builder()
            .with_msc()
            .with_cdc_channels(2, false)
            .with_printer(true)
            .with_hid(&[0x05, 0x01], false)
            .build()
            .unwrap();
        let mut seen = std::collections::HashSet::new();
        for ep in set.endpoints() {
            assert!(seen.insert(ep.address.to_byte()), "duplicate endpoint address");
        }
    }

    #[test]
    fn hid_endpoints_are_populated_for_composite_dispatch() {
        let set = minimal_builder().with_hid(&[0x05, 0x01], true).build().unwrap();
        let (in_ep, out_ep) = set.hid_endpoints().expect("hid_endpoints must be Some when HID is enabled");
        assert!(out_ep.is_some());
        assert_ne!(in_ep, 0);
    }

    #[test]
    fn routes_cover_every_interface_in_config_descriptor() {
        let set = minimal_builder()
            .with_msc()
            .with_cdc_channels(1, false)
            .with_hid(&[0x05, 0x01], false)
            .build()
            .unwrap();
        // MSC(1) + CDC(2) + HID(1) = 4 interfaces, each routed.
        assert_eq!(set.routes().count(), 4);
    }
}
