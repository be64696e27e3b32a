// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! HID engine (`§4.7`): a single IN report, an optional OUT report, and the
//! idle-rate/protocol-selector class requests driven from the SOF tick.

use core::cell::Cell;

use usbd_core::class::{CoreHandle, CtrlResponse};
use usbd_core::endpoint::{Direction, EndpointAddress, EndpointState};
use usbd_core::setup::SetupPacket;

pub const GET_REPORT: u8 = 0x01;
pub const GET_IDLE: u8 = 0x02;
pub const GET_PROTOCOL: u8 = 0x03;
pub const SET_REPORT: u8 = 0x09;
pub const SET_IDLE: u8 = 0x0A;
pub const SET_PROTOCOL: u8 = 0x0B;

const HID_REPORTTYPE_OUT: u8 = 0x02;

pub const HID_POLLING_INTERVAL_MS: u32 = 10;
pub const INPUT_REPORT_SIZE: usize = 8;
pub const OUTPUT_REPORT_SIZE: usize = 1;

/// Boot-keyboard report descriptor (`§6`): modifier byte, reserved byte, six
/// key codes, one LED output byte.
pub const KEYBOARD_REPORT_DESCRIPTOR: &[u8] = &[
    0x05, 0x01, // Usage Page (Generic Desktop)
    0x09, 0x06, // Usage (Keyboard)
    0xA1, 0x01, // Collection (Application)
    0x05, 0x07, //   Usage Page (Key Codes)
    0x19, 0xE0, //   Usage Minimum (224)
    0x29, 0xE7, //   Usage Maximum (231)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x01, //   Logical Maximum (1)
    0x75, 0x01, //   Report Size (1)
    0x95, 0x08, //   Report Count (8)
    0x81, 0x02, //   Input (Data, Variable, Absolute): modifier byte
    0x95, 0x01, //   Report Count (1)
    0x75, 0x08, //   Report Size (8)
    0x81, 0x01, //   Input (Constant): reserved byte
    0x95, 0x06, //   Report Count (6)
    0x75, 0x08, //   Report Size (8)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x65, //   Logical Maximum (101)
    0x05, 0x07, //   Usage Page (Key Codes)
    0x19, 0x00, //   Usage Minimum (0)
    0x29, 0x65, //   Usage Maximum (101)
    0x81, 0x00, //   Input (Data, Array): key codes
    0x95, 0x05, //   Report Count (5)
    0x75, 0x01, //   Report Size (1)
    0x05, 0x08, //   Usage Page (LEDs)
    0x19, 0x01, //   Usage Minimum (1)
    0x29, 0x05, //   Usage Maximum (5)
    0x91, 0x02, //   Output (Data, Variable, Absolute): LED byte
    0x95, 0x01, //   Report Count (1)
    0x75, 0x03, //   Report Size (3)
    0x91, 0x01, //   Output (Constant): LED padding
    0xC0, // End Collection
];

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Protocol {
    Boot,
    Report,
}

/// Application-side hooks (`§6`).
pub trait HidHooks {
    /// Sample inputs into `report`; return `true` if it changed.
    fn update_in(&mut self, report: &mut [u8; INPUT_REPORT_SIZE]) -> bool {
        let _ = report;
        false
    }
    /// A new output report (e.g. keyboard LEDs) arrived.
    fn update_out(&mut self, report: &[u8; OUTPUT_REPORT_SIZE]) {
        let _ = report;
    }
}

impl HidHooks for () {}

pub struct HidEngine {
    in_ep: Cell<u8>,
    idle_rate_4ms: Cell<u8>,
    protocol: Cell<Protocol>,
    report_timer_ms: Cell<u32>,
    in_request: Cell<bool>,
    in_state: EndpointState,
    input_report: [Cell<u8>; INPUT_REPORT_SIZE],
    output_report: [Cell<u8>; OUTPUT_REPORT_SIZE],
}

impl HidEngine {
    pub const fn new() -> Self {
        Self {
            in_ep: Cell::new(0),
            idle_rate_4ms: Cell::new(0),
            protocol: Cell::new(Protocol::Report),
            report_timer_ms: Cell::new(HID_POLLING_INTERVAL_MS),
            in_request: Cell::new(false),
            in_state: EndpointState::new(),
            input_report: [const { Cell::new(0) }; INPUT_REPORT_SIZE],
            output_report: [const { Cell::new(0) }; OUTPUT_REPORT_SIZE],
        }
    }

    pub fn configure(&self, in_ep: u8) {
        self.in_ep.set(in_ep);
    }

    pub fn bus_reset(&self) {
        self.idle_rate_4ms.set(0);
        self.protocol.set(Protocol::Report);
        self.report_timer_ms.set(HID_POLLING_INTERVAL_MS);
        self.in_request.set(false);
        self.in_state.abort();
    }

    fn read_input_report(&self) -> [u8; INPUT_REPORT_SIZE] {
        let mut out = [0u8; INPUT_REPORT_SIZE];
        for (dst, cell) in out.iter_mut().zip(self.input_report.iter()) {
            *dst = cell.get();
        }
        out
    }

    fn write_input_report(&self, report: &[u8; INPUT_REPORT_SIZE]) {
        for (cell, byte) in self.input_report.iter().zip(report.iter()) {
            cell.set(*byte);
        }
    }

    pub fn class_request(&self, setup: &SetupPacket, out_data: &[u8], response_buf: &mut [u8]) -> CtrlResponse {
        match setup.request {
            GET_REPORT => {
                let report_type = setup.value_high();
                if report_type == HID_REPORTTYPE_OUT {
                    response_buf[0] = self.output_report[0].get();
                    CtrlResponse::Data { len: 1, auto_zlp: false }
                } else {
                    let report = self.read_input_report();
                    response_buf[..INPUT_REPORT_SIZE].copy_from_slice(&report);
                    CtrlResponse::Data {
                        len: INPUT_REPORT_SIZE,
                        auto_zlp: false,
                    }
                }
            }
            GET_IDLE => {
                response_buf[0] = self.idle_rate_4ms.get();
                CtrlResponse::Data { len: 1, auto_zlp: false }
            }
            SET_IDLE => {
                self.idle_rate_4ms.set(setup.value_high());
                CtrlResponse::Ok
            }
            GET_PROTOCOL => {
                response_buf[0] = match self.protocol.get() {
                    Protocol::Boot => 0,
                    Protocol::Report => 1,
                };
                CtrlResponse::Data { len: 1, auto_zlp: false }
            }
            SET_PROTOCOL => {
                self.protocol.set(if setup.value == 0 { Protocol::Boot } else { Protocol::Report });
                CtrlResponse::Ok
            }
            SET_REPORT => {
                if let Some(&byte) = out_data.first() {
                    self.output_report[0].set(byte);
                }
                CtrlResponse::Ok
            }
            _ => CtrlResponse::Stall,
        }
    }

    pub fn clear_ep_stall_hook(&self, _ep: EndpointAddress, _handle: &mut CoreHandle<'_>) {}

    pub fn out_ep_handler<H: HidHooks>(&self, hooks: &mut H, _handle: &mut CoreHandle<'_>) {
        let mut out = [0u8; OUTPUT_REPORT_SIZE];
        out[0] = self.output_report[0].get();
        hooks.update_out(&out);
    }

    pub fn in_ep_handler(&self, _handle: &mut CoreHandle<'_>) {
        self.in_request.set(false);
    }

    /// 1 ms tick (`§4.7`): sample inputs, decrement the report timer, and
    /// transmit the Input report once it expires or a sampled change is
    /// pending and the IN pipe is idle.
    pub fn sof<H: HidHooks>(&self, hooks: &mut H, handle: &mut CoreHandle<'_>) {
        let mut report = self.read_input_report();
        if hooks.update_in(&mut report) {
            self.write_input_report(&report);
            self.in_request.set(true);
        }

        if self.report_timer_ms.get() > 0 {
            self.report_timer_ms.set(self.report_timer_ms.get() - 1);
        }

        let due = self.report_timer_ms.get() == 0 || self.in_request.get();
        if due && !self.in_state.is_busy() {
            let addr = EndpointAddress::new(self.in_ep.get(), Direction::In);
            let current = self.read_input_report();
            let _ = handle.send_data(addr, &self.in_state, &current, false);
            self.in_request.set(false);
            let period = u32::from(self.idle_rate_4ms.get()) * 4;
            self.report_timer_ms.set(period.max(HID_POLLING_INTERVAL_MS));
        }
    }
}

impl Default for HidEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use usbd_core::hwif::{EventQueue, HwIf};
    use usbd_core::setup::{Recipient, RequestDirection, RequestKind};

    fn setup(request: u8, value: u16) -> SetupPacket {
        SetupPacket {
            direction: RequestDirection::DeviceToHost,
            kind: RequestKind::Class,
            recipient: Recipient::Interface,
            request,
            value,
            index: 0,
            length: 8,
        }
    }

    struct FakeHw {
        sent: std::vec::Vec<u8>,
    }

    impl HwIf for FakeHw {
        fn init(&mut self) {}
        fn deinit(&mut self) {}
        fn get_in_ep_size(&self, _ep: u8) -> u16 {
            8
        }
        fn set_cfg(&mut self, _descriptors: &usbd_core::descriptors::DescriptorSet) {}
        fn reset_cfg(&mut self) {}
        fn set_ep_stall(&mut self, _addr: EndpointAddress) {}
        fn clr_ep_stall(&mut self, _addr: EndpointAddress) {}
        fn is_ep_stalled(&self, _addr: EndpointAddress) -> bool {
            false
        }
        fn enable_rx(&mut self, _ep: u8) {}
        fn read_rx(&mut self, _ep: u8, _dst: &mut [u8]) -> usize {
            0
        }
        fn start_tx(&mut self, _ep: u8, state: &EndpointState, data: &[u8]) -> usbd_core::error::UsbdResult<()> {
            self.sent.extend_from_slice(data);
            state.advance(data.len());
            Ok(())
        }
        fn set_address(&mut self, _addr: u8) {}
        fn irq(&mut self, _events: &mut EventQueue) {}
    }

    #[test]
    fn set_idle_and_get_idle_round_trip() {
        let engine = HidEngine::new();
        let mut buf = [0u8; 8];
        let resp = engine.class_request(&setup(SET_IDLE, 125 << 8), &[], &mut buf);
        assert!(matches!(resp, CtrlResponse::Ok));
        let resp = engine.class_request(&setup(GET_IDLE, 0), &[], &mut buf);
        assert!(matches!(resp, CtrlResponse::Data { len: 1, .. }));
        assert_eq!(buf[0], 125);
    }

    #[test]
    fn report_sent_every_idle_period_with_no_change() {
        struct NoChange;
        impl HidHooks for NoChange {
            fn update_in(&mut self, _report: &mut [u8; INPUT_REPORT_SIZE]) -> bool {
                false
            }
        }
        let engine = HidEngine::new();
        engine.configure(1);
        let mut hooks = NoChange;
        let mut hw = FakeHw { sent: std::vec::Vec::new() };
        let mut handle = CoreHandle::new(&mut hw);
        for _ in 0..HID_POLLING_INTERVAL_MS {
            engine.sof(&mut hooks, &mut handle);
        }
        assert_eq!(hw.sent.len(), INPUT_REPORT_SIZE);
    }

    #[test]
    fn input_change_requests_report_within_one_tick() {
        struct Changed;
        impl HidHooks for Changed {
            fn update_in(&mut self, report: &mut [u8; INPUT_REPORT_SIZE]) -> bool {
                report[2] = 0x04; // key code
                true
            }
        }
        let engine = HidEngine::new();
        engine.configure(1);
        let mut hooks = Changed;
        let mut hw = FakeHw { sent: std::vec::Vec::new() };
        let mut handle = CoreHandle::new(&mut hw);
        engine.sof(&mut hooks, &mut handle);
        assert_eq!(hw.sent[2], 0x04);
    }
}
