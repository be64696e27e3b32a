// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Printer class engine (`§4.6`): `GET_DEVICE_ID`/`GET_PORT_STATUS`/
//! `SOFT_RESET`, plus the unidirectional or bidirectional bulk data path.

use core::cell::Cell;

use usbd_core::class::{CoreHandle, CtrlResponse};
use usbd_core::endpoint::EndpointAddress;
use usbd_core::setup::SetupPacket;

pub const GET_DEVICE_ID: u8 = 0x00;
pub const GET_PORT_STATUS: u8 = 0x01;
pub const SOFT_RESET: u8 = 0x02;

/// Default status byte: not-error, selected, no paper-out (`§4.6`).
pub const DEFAULT_PORT_STATUS: u8 = 0x18;

const MAX_RX: usize = 64;

/// Application-side hooks, all optional (`§6`).
pub trait PrinterHooks {
    fn device_id(&mut self) -> Option<&'static [u8]> {
        None
    }
    fn port_status(&mut self, current: u8) -> u8 {
        current
    }
    fn soft_reset(&mut self) {}
    fn data_received(&mut self, data: &[u8]) {
        let _ = data;
    }
}

/// Default no-op implementation for `()`.
impl PrinterHooks for () {}

const DEFAULT_DEVICE_ID: &[u8] =
    b"MFG:gbm;MDL:USB Device Stack;CLS:PRINTER;DES:Generic/Text;CMD:NONE;";

pub struct PrinterEngine {
    out_ep: Cell<u8>,
    in_ep: Cell<Option<u8>>,
    port_status: Cell<u8>,
    rx_buf: [Cell<u8>; MAX_RX],
    rx_len: Cell<usize>,
}

impl PrinterEngine {
    pub const fn new() -> Self {
        Self {
            out_ep: Cell::new(0),
            in_ep: Cell::new(None),
            port_status: Cell::new(DEFAULT_PORT_STATUS),
            rx_buf: [const { Cell::new(0) }; MAX_RX],
            rx_len: Cell::new(0),
        }
    }

    pub fn configure(&self, out_ep: u8, in_ep: Option<u8>) {
        self.out_ep.set(out_ep);
        self.in_ep.set(in_ep);
    }

    pub fn bus_reset(&self) {
        self.rx_len.set(0);
        self.port_status.set(DEFAULT_PORT_STATUS);
    }

    /// Bytes currently buffered from the last bulk OUT packet.
    pub fn received(&self) -> (usize, [u8; MAX_RX]) {
        let len = self.rx_len.get();
        let mut out = [0u8; MAX_RX];
        for (dst, cell) in out.iter_mut().zip(self.rx_buf.iter()) {
            *dst = cell.get();
        }
        (len, out)
    }

    pub fn class_request<H: PrinterHooks>(
        &self,
        hooks: &mut H,
        setup: &SetupPacket,
        response_buf: &mut [u8],
    ) -> CtrlResponse {
        match setup.request {
            GET_DEVICE_ID if setup.value == 0 => {
                let id = hooks.device_id().unwrap_or(DEFAULT_DEVICE_ID);
                let len_prefix_and_id_len = id.len() + 2;
                let mut buf = [0u8; 2];
                buf[0] = (len_prefix_and_id_len >> 8) as u8;
                buf[1] = len_prefix_and_id_len as u8;
                let total = len_prefix_and_id_len.min(response_buf.len());
                response_buf[0..2.min(total)].copy_from_slice(&buf[..2.min(total)]);
                if total > 2 {
                    let copy_len = (total - 2).min(id.len());
                    response_buf[2..2 + copy_len].copy_from_slice(&id[..copy_len]);
                }
                CtrlResponse::Data {
                    len: total.min(setup.length as usize),
                    auto_zlp: false,
                }
            }
            GET_PORT_STATUS => {
                let status = hooks.port_status(self.port_status.get());
                self.port_status.set(status);
                response_buf[0] = status;
                CtrlResponse::Data { len: 1, auto_zlp: false }
            }
            SOFT_RESET => {
                hooks.soft_reset();
                self.bus_reset();
                CtrlResponse::Ok
            }
            _ => CtrlResponse::Stall,
        }
    }

    pub fn clear_ep_stall_hook(&self, _ep: EndpointAddress, _handle: &mut CoreHandle<'_>) {}

    pub fn out_ep_handler<H: PrinterHooks>(&self, hooks: &mut H, data: &[u8], handle: &mut CoreHandle<'_>) {
        let len = data.len().min(MAX_RX);
        for (cell, byte) in self.rx_buf.iter().zip(data[..len].iter()) {
            cell.set(*byte);
        }
        self.rx_len.set(len);
        hooks.data_received(&data[..len]);
        handle.enable_rx(self.out_ep.get());
    }

    pub fn in_ep_handler(&self, _handle: &mut CoreHandle<'_>) {}
}

impl Default for PrinterEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use usbd_core::setup::{Recipient, RequestDirection, RequestKind};

    fn setup(request: u8, value: u16, length: u16) -> SetupPacket {
        SetupPacket {
            direction: RequestDirection::DeviceToHost,
            kind: RequestKind::Class,
            recipient: Recipient::Interface,
            request,
            value,
            index: 0,
            length,
        }
    }

    #[test]
    fn get_device_id_returns_length_prefixed_string() {
        let engine = PrinterEngine::new();
        let mut buf = [0u8; 128];
        let resp = engine.class_request(&mut (), &setup(GET_DEVICE_ID, 0, 127), &mut buf);
        match resp {
            CtrlResponse::Data { len, .. } => {
                let total_len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
                assert_eq!(total_len, DEFAULT_DEVICE_ID.len() + 2);
                assert_eq!(len, total_len);
                assert_eq!(&buf[2..2 + DEFAULT_DEVICE_ID.len()], DEFAULT_DEVICE_ID);
            }
            _ => panic!("unexpected response"),
        }
    }

    #[test]
    fn get_port_status_defaults_to_selected_no_error() {
        let engine = PrinterEngine::new();
        let mut buf = [0u8; 8];
        let resp = engine.class_request(&mut (), &setup(GET_PORT_STATUS, 0, 1), &mut buf);
        assert!(matches!(resp, CtrlResponse::Data { len: 1, auto_zlp: false }));
        assert_eq!(buf[0], DEFAULT_PORT_STATUS);
    }

    #[test]
    fn unknown_class_request_stalls() {
        let engine = PrinterEngine::new();
        let mut buf = [0u8; 8];
        let resp = engine.class_request(&mut (), &setup(0x7F, 0, 0), &mut buf);
        assert!(matches!(resp, CtrlResponse::Stall));
    }
}
