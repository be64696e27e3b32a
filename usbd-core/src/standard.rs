// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Standard ( `bmRequestType` type == Standard) request handling (`§4.3`).

use crate::class::FunctionTable;
use crate::device::DeviceCore;
use crate::endpoint::EndpointAddress;
use crate::hwif::HwIf;
use crate::setup::{Recipient, SetupPacket, StandardRequest, FEATURE_ENDPOINT_HALT};
use crate::state::DeviceState;

/// Descriptor type selectors (`wValue` high byte of `GET_DESCRIPTOR`).
const DESC_DEVICE: u8 = 0x01;
const DESC_CONFIGURATION: u8 = 0x02;
const DESC_STRING: u8 = 0x03;
const DESC_HID: u8 = 0x21;
const DESC_HID_REPORT: u8 = 0x22;

impl<H: HwIf> DeviceCore<H> {
    pub(crate) fn handle_standard(&mut self, setup: SetupPacket, functions: &mut dyn FunctionTable) {
        use StandardRequest::*;
        match (setup.recipient, setup.standard_request()) {
            (Recipient::Device, GetStatus) => {
                // Bus-powered, no remote wakeup.
                self.ctrl_in_buf[0] = 0x00;
                self.ctrl_in_buf[1] = 0x00;
                self.send_status(2, true);
            }
            (Recipient::Interface, GetStatus) => {
                self.ctrl_in_buf[0] = 0x00;
                self.ctrl_in_buf[1] = 0x00;
                self.send_status(2, true);
            }
            (Recipient::Endpoint, GetStatus) => {
                let addr = EndpointAddress::from_byte(setup.index_low());
                let halted = self.hw.is_ep_stalled(addr);
                self.ctrl_in_buf[0] = u8::from(halted);
                self.ctrl_in_buf[1] = 0x00;
                self.send_status(2, true);
            }
            (Recipient::Endpoint, ClearFeature) if setup.value == FEATURE_ENDPOINT_HALT => {
                let addr = EndpointAddress::from_byte(setup.index_low());
                if addr.number != 0 {
                    let DeviceCore { hw, .. } = self;
                    let mut handle = crate::class::CoreHandle::new(hw);
                    functions.clear_ep_stall_hook(&mut handle, addr);
                }
                self.hw.clr_ep_stall(addr);
                self.send_status_ok();
            }
            (Recipient::Endpoint, SetFeature) if setup.value == FEATURE_ENDPOINT_HALT => {
                let addr = EndpointAddress::from_byte(setup.index_low());
                self.hw.set_ep_stall(addr);
                self.send_status_ok();
            }
            (Recipient::Device, SetAddress) => {
                let addr = setup.value_low();
                if self.hw.wants_address_before_status() {
                    self.hw.set_address(addr);
                }
                self.pending_address.set(Some(addr));
                self.send_status_ok();
            }
            (Recipient::Device, GetDescriptor) | (Recipient::Interface, GetDescriptor) => {
                self.handle_get_descriptor(setup);
            }
            (Recipient::Device, GetConfiguration) => {
                self.ctrl_in_buf[0] = self.config_value.get();
                self.send_status(1, true);
            }
            (Recipient::Device, SetConfiguration) => match setup.value_low() {
                0 => {
                    self.hw.reset_cfg();
                    self.config_value.set(0);
                    self.device_state.set(DeviceState::Addressed);
                    self.send_status_ok();
                }
                1 => {
                    self.hw.set_cfg(&self.descriptors);
                    self.config_value.set(1);
                    self.device_state.set(DeviceState::Configured);
                    self.send_status_ok();
                }
                _ => self.ctrl_error(),
            },
            (Recipient::Interface, GetInterface) => {
                // No alternate settings are declared anywhere in this
                // stack; interface 0 is always the answer.
                self.ctrl_in_buf[0] = 0;
                self.send_status(1, true);
            }
            (Recipient::Interface, SetInterface) => {
                if setup.value == 0 {
                    self.send_status_ok();
                } else {
                    self.ctrl_error();
                }
            }
            _ => self.ctrl_error(),
        }
    }

    fn handle_get_descriptor(&mut self, setup: SetupPacket) {
        let descriptor_type = setup.value_high();
        let descriptor_index = setup.value_low();
        match descriptor_type {
            DESC_DEVICE => {
                let device = self.descriptors.device_descriptor();
                let mut len = device.len().min(setup.length as usize);
                // The very first GET_DESCRIPTOR(DEVICE) of an enumeration
                // is capped to EP0's own max packet size regardless of
                // wLength, matching a quirk several real hosts rely on
                // during the initial 8-byte-EP0 probe (`§8` scenario 1).
                if self.first_device_fetch.get() {
                    len = len.min(self.hw.get_in_ep_size(0) as usize);
                    self.first_device_fetch.set(false);
                }
                self.ctrl_in_buf[..len].copy_from_slice(&device[..len]);
                self.send_status(len, true);
            }
            DESC_CONFIGURATION => {
                let config = self.descriptors.config_descriptor();
                let len = config.len().min(setup.length as usize);
                self.ctrl_in_buf[..len].copy_from_slice(&config[..len]);
                self.send_status(len, true);
            }
            DESC_STRING => {
                self.handle_get_string_descriptor(descriptor_index, setup.length);
            }
            DESC_HID if setup.recipient == Recipient::Interface => {
                if let Some(hid) = self.descriptors.hid_descriptor() {
                    let len = hid.len().min(setup.length as usize);
                    self.ctrl_in_buf[..len].copy_from_slice(&hid[..len]);
                    self.send_status(len, true);
                } else {
                    self.ctrl_error();
                }
            }
            DESC_HID_REPORT if setup.recipient == Recipient::Interface => {
                if let Some(report) = self.descriptors.hid_report_descriptor() {
                    let len = report.len().min(setup.length as usize).min(self.ctrl_in_buf.len());
                    self.ctrl_in_buf[..len].copy_from_slice(&report[..len]);
                    self.send_status(len, true);
                } else {
                    self.ctrl_error();
                }
            }
            _ => self.ctrl_error(),
        }
    }

    /// String descriptor index `0` is the language-ID list (fixed to
    /// English/US, `0x0409`, the only language this stack ever advertises);
    /// every other index is a UTF-16LE encoding of a `DescriptorSet` string.
    fn handle_get_string_descriptor(&mut self, index: u8, requested_len: u16) {
        if index == 0 {
            let lang_id: [u8; 4] = [4, DESC_STRING, 0x09, 0x04];
            let len = lang_id.len().min(requested_len as usize);
            self.ctrl_in_buf[..len].copy_from_slice(&lang_id[..len]);
            self.send_status(len, true);
            return;
        }

        let Some(text) = self.descriptors.string(index) else {
            self.ctrl_error();
            return;
        };

        let mut written = 2usize; // bLength/bDescriptorType, patched below.
        for unit in text.encode_utf16() {
            if written + 2 > self.ctrl_in_buf.len() {
                break;
            }
            let bytes = unit.to_le_bytes();
            self.ctrl_in_buf[written] = bytes[0];
            self.ctrl_in_buf[written + 1] = bytes[1];
            written += 2;
        }
        self.ctrl_in_buf[0] = written as u8;
        self.ctrl_in_buf[1] = DESC_STRING;
        let len = written.min(requested_len as usize);
        self.send_status(len, true);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::class::NoFunctions;
    use crate::descriptors::{DescriptorBuilder, DescriptorSet};
    use crate::endpoint::{Direction, EndpointState};

    struct FakeHw {
        mps: u16,
        rx_buf: [u8; 8],
    }

    impl HwIf for FakeHw {
        fn init(&mut self) {}
        fn deinit(&mut self) {}
        fn get_in_ep_size(&self, ep: u8) -> u16 {
            if ep == 0 {
                self.mps
            } else {
                64
            }
        }
        fn set_cfg(&mut self, _descriptors: &DescriptorSet) {}
        fn reset_cfg(&mut self) {}
        fn set_ep_stall(&mut self, _addr: EndpointAddress) {}
        fn clr_ep_stall(&mut self, _addr: EndpointAddress) {}
        fn is_ep_stalled(&self, _addr: EndpointAddress) -> bool {
            false
        }
        fn enable_rx(&mut self, _ep: u8) {}
        fn read_rx(&mut self, _ep: u8, dst: &mut [u8]) -> usize {
            let n = dst.len().min(self.rx_buf.len());
            dst[..n].copy_from_slice(&self.rx_buf[..n]);
            n
        }
        fn start_tx(&mut self, _ep: u8, state: &EndpointState, data: &[u8]) -> crate::error::UsbdResult<()> {
            state.advance(data.len());
            Ok(())
        }
        fn set_address(&mut self, _addr: u8) {}
        fn irq(&mut self, _events: &mut crate::hwif::EventQueue) {}
    }

    fn setup_bytes(bm_request_type: u8, request: u8, value: u16, index: u16, length: u16) -> [u8; 8] {
        let v = value.to_le_bytes();
        let i = index.to_le_bytes();
        let l = length.to_le_bytes();
        [bm_request_type, request, v[0], v[1], i[0], i[1], l[0], l[1]]
    }

    fn make_core() -> DeviceCore<FakeHw> {
        let descriptors = DescriptorBuilder::new(0x1209, 0x0001)
            .strings("gbm", "USB Device Stack", "0001")
            .unwrap()
            .with_cdc_channels(1, false)
            .build()
            .unwrap();
        DeviceCore::new(FakeHw { mps: 64, rx_buf: [0u8; 8] }, descriptors)
    }

    #[test]
    fn string_descriptor_zero_is_language_id() {
        let mut core = make_core();
        let mut fns = NoFunctions;
        core.hw.rx_buf = setup_bytes(0x80, 0x06, 0x0300, 0, 255);
        core.dispatch(&mut fns);
        assert_eq!(&core.ctrl_in_buf[..4], &[4, 0x03, 0x09, 0x04]);
    }

    #[test]
    fn manufacturer_string_descriptor_is_utf16le() {
        let mut core = make_core();
        let mut fns = NoFunctions;
        core.hw.rx_buf = setup_bytes(0x80, 0x06, 0x0301, 0x0409, 255);
        core.dispatch(&mut fns);
        // "gbm" -> bLength=2+3*2=8, type=3, then 'g','\0','b','\0','m','\0'.
        assert_eq!(core.ctrl_in_buf[0], 8);
        assert_eq!(core.ctrl_in_buf[1], 0x03);
        assert_eq!(&core.ctrl_in_buf[2..8], &[b'g', 0, b'b', 0, b'm', 0]);
    }

    #[test]
    fn unknown_string_index_stalls() {
        let mut core = make_core();
        let mut fns = NoFunctions;
        core.hw.rx_buf = setup_bytes(0x80, 0x06, 0x0309, 0, 255);
        core.dispatch(&mut fns);
        assert_eq!(core.ctrl_state.get(), crate::state::CtrlState::Stall);
    }

    #[test]
    fn configuration_descriptor_total_length_matches_assembled_bytes() {
        let mut core = make_core();
        let mut fns = NoFunctions;
        core.hw.rx_buf = setup_bytes(0x80, 0x06, 0x0200, 0, 255);
        core.dispatch(&mut fns);
        let expected = core.descriptors.config_descriptor().len();
        assert_eq!(core.ctrl_in_len.get(), expected);
    }
}
