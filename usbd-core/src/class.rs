// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The Core-facing handle and class-engine dispatch vtable (`§9` "Cyclic
//! reference core <-> class").
//!
//! The original source has class engines call back into the Core through a
//! stored `usbdevice_` pointer while the Core also holds a pointer to each
//! class's service table -- a reference cycle. This rewrite collapses it:
//! class engines never retain a reference to the Core. Instead, the Core
//! hands each class operation a short-lived [`CoreHandle`] borrowing only
//! the hardware, and the Core holds the classes through a single
//! [`FunctionTable`] object (the "service vtable" `§2` describes), addressed
//! by `(ClassId, function_index)` rather than by pointer.

use crate::descriptors::ClassId;
use crate::endpoint::{EndpointAddress, EndpointState};
use crate::error::UsbdResult;
use crate::hwif::HwIf;
use crate::setup::SetupPacket;

/// The facade a class engine is given to act on the hardware through,
/// instead of holding its own reference back to the `DeviceCore`.
pub struct CoreHandle<'a> {
    hw: &'a mut dyn HwIf,
}

impl<'a> CoreHandle<'a> {
    pub fn new(hw: &'a mut dyn HwIf) -> Self {
        Self { hw }
    }

    /// Send (or continue sending) `data` on `ep`. `data` must be the
    /// remaining slice of the transfer -- see [`HwIf::start_tx`]. Arms
    /// `state` for a fresh transfer the first time it is called (`state`
    /// not already busy); subsequent calls for the same transfer just pass
    /// the same `state` and the slice still left to send.
    pub fn send_data(
        &mut self,
        ep: EndpointAddress,
        state: &EndpointState,
        data: &[u8],
        auto_zlp: bool,
    ) -> UsbdResult<()> {
        if !state.is_busy() {
            let mps = self.hw.get_in_ep_size(ep.number) as usize;
            let zlp = auto_zlp && mps > 0 && !data.is_empty() && data.len() % mps == 0;
            state.arm(data.len(), zlp);
        }
        self.hw.start_tx(ep.number, state, data)
    }

    pub fn enable_rx(&mut self, ep: u8) {
        self.hw.enable_rx(ep);
    }

    pub fn read_rx(&mut self, ep: u8, dst: &mut [u8]) -> usize {
        self.hw.read_rx(ep, dst)
    }

    pub fn set_ep_stall(&mut self, addr: EndpointAddress) {
        self.hw.set_ep_stall(addr);
    }

    pub fn clr_ep_stall(&mut self, addr: EndpointAddress) {
        self.hw.clr_ep_stall(addr);
    }

    pub fn is_ep_stalled(&self, addr: EndpointAddress) -> bool {
        self.hw.is_ep_stalled(addr)
    }

    pub fn in_ep_size(&self, ep: u8) -> u16 {
        self.hw.get_in_ep_size(ep)
    }
}

/// What a class-request handler hands back to the Core's dispatcher, the
/// same three response shapes `§4.2` gives the standard-request dispatcher.
pub enum CtrlResponse {
    /// Zero-length status (`send_status_ok`).
    Ok,
    /// `len` bytes already written into the response buffer the Core
    /// passed in; the Core forwards them via `send_status`.
    Data { len: usize, auto_zlp: bool },
    /// Unsupported/invalid request (`ctrl_error`).
    Stall,
}

/// The single dispatch point the Core holds for every class engine
/// registered with it -- the "service vtable" of `§2`. A composite-device
/// assembly (see `usbd-classes`) implements this once, matching
/// `(ClassId, function_index)` pairs to its own owned engines internally,
/// so the Core never needs to know how many CDC channels or which classes
/// are compiled in.
pub trait FunctionTable {
    /// A class-specific control request addressed (via the descriptor
    /// set's interface routing table) to `(class_id, function_index)`.
    /// `out_data` is the accumulated OUT data stage, if any.
    /// `response_buf` is scratch the implementation may fill for
    /// `CtrlResponse::Data`.
    fn class_request(
        &mut self,
        handle: &mut CoreHandle<'_>,
        class_id: ClassId,
        function_index: u8,
        setup: &SetupPacket,
        out_data: &[u8],
        response_buf: &mut [u8],
    ) -> CtrlResponse;

    /// `CLEAR_FEATURE(ENDPOINT_HALT)` landed on `ep`; reset whichever
    /// function owns it, per `§4.3`.
    fn clear_ep_stall_hook(&mut self, handle: &mut CoreHandle<'_>, ep: EndpointAddress);

    /// Bus reset or suspend: clear every function's transient session
    /// state (`§5` "Cancellation").
    fn bus_reset(&mut self, handle: &mut CoreHandle<'_>);

    fn suspend(&mut self);

    fn resume(&mut self, handle: &mut CoreHandle<'_>);

    /// 1 ms SOF tick (`§4.4` flush timer, `§4.7` HID polling).
    fn sof(&mut self, handle: &mut CoreHandle<'_>);

    /// A packet arrived on one of the functions' non-control OUT endpoints.
    fn out_ep_handler(&mut self, handle: &mut CoreHandle<'_>, ep: EndpointAddress, data: &[u8]);

    /// An IN transfer completed on one of the functions' non-control
    /// endpoints.
    fn in_ep_handler(&mut self, handle: &mut CoreHandle<'_>, ep: EndpointAddress);
}

/// A [`FunctionTable`] with nothing registered, for builds/tests that only
/// exercise the Core's enumeration and standard-request behaviour.
pub struct NoFunctions;

impl FunctionTable for NoFunctions {
    fn class_request(
        &mut self,
        _handle: &mut CoreHandle<'_>,
        _class_id: ClassId,
        _function_index: u8,
        _setup: &SetupPacket,
        _out_data: &[u8],
        _response_buf: &mut [u8],
    ) -> CtrlResponse {
        CtrlResponse::Stall
    }

    fn clear_ep_stall_hook(&mut self, _handle: &mut CoreHandle<'_>, _ep: EndpointAddress) {}

    fn bus_reset(&mut self, _handle: &mut CoreHandle<'_>) {}

    fn suspend(&mut self) {}

    fn resume(&mut self, _handle: &mut CoreHandle<'_>) {}

    fn sof(&mut self, _handle: &mut CoreHandle<'_>) {}

    fn out_ep_handler(&mut self, _handle: &mut CoreHandle<'_>, _ep: EndpointAddress, _data: &[u8]) {}

    fn in_ep_handler(&mut self, _handle: &mut CoreHandle<'_>, _ep: EndpointAddress) {}
}
