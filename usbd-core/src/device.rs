// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The control-transfer state machine and enumeration driver (`§4.2`).
//!
//! `DeviceCore` owns exactly the state a single logical device needs that no
//! class engine or HWIF back-end should duplicate: the EP0 state machine,
//! the device lifecycle state, and the assembled descriptor set. Everything
//! else is delegated: hardware access through `&mut dyn HwIf`, class-specific
//! behaviour through `&mut dyn FunctionTable`.

use core::cell::Cell;

use crate::class::{CoreHandle, CtrlResponse, FunctionTable};
use crate::descriptors::DescriptorSet;
use crate::endpoint::{Direction, EndpointAddress, EndpointState};
use crate::hwif::{HwEvent, HwIf};
use crate::setup::{RequestKind, SetupPacket};
use crate::state::{CtrlState, DeviceState, PreSuspendState};

/// Scratch buffer for the control pipe's data stage, sized to the largest
/// possible response (a full configuration descriptor).
const MAX_CTRL_BUF: usize = crate::descriptors::MAX_CONFIG_DESC_LEN;

/// Drives a single logical USB device: the EP0 control-transfer engine,
/// standard-request handling, and dispatch of bus events and class/vendor
/// requests out to a [`FunctionTable`].
///
/// Generic over the HWIF back-end rather than holding `&mut dyn HwIf`
/// itself, so a board only monomorphizes the one controller family it
/// actually links against.
pub struct DeviceCore<H: HwIf> {
    pub(crate) hw: H,
    pub(crate) descriptors: DescriptorSet,

    pub(crate) device_state: Cell<DeviceState>,
    pre_suspend: Cell<PreSuspendState>,

    pub(crate) ctrl_state: Cell<CtrlState>,
    pub(crate) setup: Cell<Option<SetupPacket>>,
    pub(crate) ep0_in: EndpointState,

    ctrl_out_buf: [u8; MAX_CTRL_BUF],
    ctrl_out_received: Cell<usize>,
    pub(crate) ctrl_in_buf: [u8; MAX_CTRL_BUF],
    pub(crate) ctrl_in_len: Cell<usize>,

    pub(crate) config_value: Cell<u8>,
    device_address: Cell<u8>,
    pub(crate) pending_address: Cell<Option<u8>>,

    /// Cleared after the very first `GET_DESCRIPTOR(DEVICE)` fetch
    /// completes; see `standard::handle_get_descriptor` for why that one
    /// fetch is special (`§4.3`/`§8` scenario 1).
    pub(crate) first_device_fetch: Cell<bool>,
}

impl<H: HwIf> DeviceCore<H> {
    pub fn new(mut hw: H, descriptors: DescriptorSet) -> Self {
        hw.init();
        Self {
            hw,
            descriptors,
            device_state: Cell::new(DeviceState::Default),
            pre_suspend: Cell::new(PreSuspendState::Default),
            ctrl_state: Cell::new(CtrlState::Idle),
            setup: Cell::new(None),
            ep0_in: EndpointState::new(),
            ctrl_out_buf: [0u8; MAX_CTRL_BUF],
            ctrl_out_received: Cell::new(0),
            ctrl_in_buf: [0u8; MAX_CTRL_BUF],
            ctrl_in_len: Cell::new(0),
            config_value: Cell::new(0),
            device_address: Cell::new(0),
            pending_address: Cell::new(None),
            first_device_fetch: Cell::new(true),
        }
    }

    pub fn device_state(&self) -> DeviceState {
        self.device_state.get()
    }

    pub fn descriptors(&self) -> &DescriptorSet {
        &self.descriptors
    }

    /// Borrow a [`CoreHandle`] onto the HWIF, for application code driving a
    /// class engine's own public methods (e.g. `CdcEngine::write`) outside of
    /// an event callback (`§6` app contract: `vcom_write`/`vcom_putchar`).
    pub fn handle(&mut self) -> CoreHandle<'_> {
        CoreHandle::new(&mut self.hw)
    }

    /// Detach, mask interrupts, power the controller down.
    pub fn deinit(&mut self) {
        self.hw.deinit();
    }

    /// Drain every event the controller surfaced since the last call and
    /// dispatch each in order. The application's poll loop (or an interrupt
    /// handler that defers to it) calls this once per iteration (`§2`).
    pub fn poll(&mut self, functions: &mut dyn FunctionTable) {
        let mut events = crate::hwif::EventQueue::new();
        self.hw.irq(&mut events);
        for event in events.iter() {
            self.handle_event(*event, functions);
        }
    }

    fn handle_event(&mut self, event: HwEvent, functions: &mut dyn FunctionTable) {
        match event {
            HwEvent::Reset => self.on_bus_reset(functions),
            HwEvent::Suspend => self.on_suspend(functions),
            HwEvent::Resume => self.on_resume(functions),
            HwEvent::Sof => {
                let DeviceCore { hw, .. } = self;
                let mut handle = CoreHandle::new(hw);
                functions.sof(&mut handle);
            }
            HwEvent::OutReceived { ep, is_setup, len } => self.on_out(ep, is_setup, len, functions),
            HwEvent::InSent { ep } => self.on_in(ep, functions),
        }
    }

    /// Bus reset clears every bit of session state back to the `Default`
    /// device state and invokes the function table's own session-reset hook
    /// (`§5` "Cancellation": "USB reset... invoke[s] the core's
    /// session-reset routine, which clears per-channel session state and
    /// aborts any in-flight IN transfers").
    fn on_bus_reset(&mut self, functions: &mut dyn FunctionTable) {
        self.ep0_in.abort();
        self.ctrl_state.set(CtrlState::Idle);
        self.setup.set(None);
        self.ctrl_out_received.set(0);
        self.ctrl_in_len.set(0);
        self.config_value.set(0);
        self.device_address.set(0);
        self.pending_address.set(None);
        self.first_device_fetch.set(true);
        self.device_state.set(DeviceState::Default);
        self.hw.reset_cfg();

        let DeviceCore { hw, .. } = self;
        let mut handle = CoreHandle::new(hw);
        functions.bus_reset(&mut handle);
    }

    /// Suspend shares the function table's session-reset hook with bus
    /// reset: a suspended CDC channel's volatile session (connection state,
    /// in-flight data) is torn down exactly as on reset, while the
    /// persistent record (line coding, control line state) a function keeps
    /// outside that hook survives untouched (`§8` scenario 6).
    fn on_suspend(&mut self, functions: &mut dyn FunctionTable) {
        self.pre_suspend.set(match self.device_state.get() {
            DeviceState::Configured => PreSuspendState::Configured,
            DeviceState::Addressed => PreSuspendState::Addressed,
            _ => PreSuspendState::Default,
        });
        self.ep0_in.abort();
        self.ctrl_state.set(CtrlState::Idle);
        self.setup.set(None);
        self.device_state.set(DeviceState::Suspended);

        functions.suspend();
        let DeviceCore { hw, .. } = self;
        let mut handle = CoreHandle::new(hw);
        functions.bus_reset(&mut handle);
    }

    fn on_resume(&mut self, functions: &mut dyn FunctionTable) {
        self.device_state.set(self.pre_suspend.get().into());
        let DeviceCore { hw, .. } = self;
        let mut handle = CoreHandle::new(hw);
        functions.resume(&mut handle);
    }

    fn on_out(&mut self, ep: u8, is_setup: bool, len: usize, functions: &mut dyn FunctionTable) {
        if ep != 0 {
            let mut tmp = [0u8; 64];
            let n = self.hw.read_rx(ep, &mut tmp[..len.min(64)]);
            let addr = EndpointAddress::new(ep, Direction::Out);
            let DeviceCore { hw, .. } = self;
            let mut handle = CoreHandle::new(hw);
            functions.out_ep_handler(&mut handle, addr, &tmp[..n]);
            return;
        }

        if is_setup {
            self.on_setup(functions);
            return;
        }

        match self.ctrl_state.get() {
            CtrlState::DataOut => {
                let Some(setup) = self.setup.get() else {
                    return;
                };
                let received = self.ctrl_out_received.get();
                let room = self.ctrl_out_buf.len().saturating_sub(received);
                let n = self
                    .hw
                    .read_rx(0, &mut self.ctrl_out_buf[received..received + room.min(len)]);
                let total = received + n;
                self.ctrl_out_received.set(total);
                if total >= setup.length as usize {
                    self.ctrl_state.set(CtrlState::Setup);
                    self.dispatch(functions);
                } else {
                    self.hw.enable_rx(0);
                }
            }
            CtrlState::StatusOut => {
                // Closing ZLP after a device-to-host data stage.
                self.finish_control_transfer();
            }
            _ => {
                // Phase error: a stray OUT outside DataOut/StatusOut.
                self.ctrl_error();
            }
        }
    }

    fn on_setup(&mut self, functions: &mut dyn FunctionTable) {
        let mut buf = [0u8; SetupPacket::SIZE];
        self.hw.read_rx(0, &mut buf);
        let setup = SetupPacket::from_bytes(&buf);

        // Every SETUP clears any prior EP0 stall before processing (`§8`:
        // "the next SETUP clears the stall automatically").
        self.hw.clr_ep_stall(EndpointAddress::new(0, Direction::Out));
        self.hw.clr_ep_stall(EndpointAddress::new(0, Direction::In));
        self.ep0_in.abort();

        self.setup.set(Some(setup));
        self.ctrl_out_received.set(0);
        self.ctrl_in_len.set(0);

        if setup.has_out_data_stage() {
            self.ctrl_state.set(CtrlState::DataOut);
            self.hw.enable_rx(0);
        } else {
            self.ctrl_state.set(CtrlState::Setup);
            self.dispatch(functions);
        }
    }

    fn on_in(&mut self, ep: u8, functions: &mut dyn FunctionTable) {
        if ep != 0 {
            let DeviceCore { hw, .. } = self;
            let mut handle = CoreHandle::new(hw);
            functions.in_ep_handler(&mut handle, EndpointAddress::new(ep, Direction::In));
            return;
        }

        if self.ctrl_state.get() != CtrlState::StatusIn {
            return;
        }

        if self.ep0_in.is_busy() {
            let total = self.ctrl_in_len.get();
            let offset = total - self.ep0_in.remaining();
            let DeviceCore {
                hw,
                ctrl_in_buf,
                ep0_in,
                ..
            } = self;
            let _ = hw.start_tx(0, ep0_in, &ctrl_in_buf[offset..total]);
        }

        if !self.ep0_in.is_busy() {
            if self.ctrl_in_len.get() > 0 {
                self.ctrl_state.set(CtrlState::StatusOut);
                self.hw.enable_rx(0);
            } else {
                self.finish_control_transfer();
            }
        }
    }

    pub(crate) fn dispatch(&mut self, functions: &mut dyn FunctionTable) {
        let Some(setup) = self.setup.get() else {
            return;
        };
        match setup.kind {
            RequestKind::Standard => self.handle_standard(setup, functions),
            RequestKind::Class => {
                let route = self.descriptors.route_for_interface(setup.index_low());
                match route {
                    Some(route) => {
                        let out_len = self.ctrl_out_received.get();
                        let DeviceCore {
                            hw,
                            ctrl_out_buf,
                            ctrl_in_buf,
                            ..
                        } = self;
                        let mut handle = CoreHandle::new(hw);
                        let response = functions.class_request(
                            &mut handle,
                            route.class_id,
                            route.function_index,
                            &setup,
                            &ctrl_out_buf[..out_len],
                            ctrl_in_buf,
                        );
                        self.finish_ctrl_response(response);
                    }
                    None => self.ctrl_error(),
                }
            }
            RequestKind::Vendor | RequestKind::Reserved => self.ctrl_error(),
        }
    }

    fn finish_ctrl_response(&mut self, response: CtrlResponse) {
        match response {
            CtrlResponse::Ok => self.send_status_ok(),
            CtrlResponse::Data { len, auto_zlp } => self.send_status(len, auto_zlp),
            CtrlResponse::Stall => self.ctrl_error(),
        }
    }

    /// Send `len` bytes already written into `ctrl_in_buf` as the device-to-
    /// host data stage, then await the host's closing ZLP. `auto_zlp`
    /// mirrors `§4.2`: append a trailing zero-length packet if `len` is a
    /// nonzero exact multiple of the endpoint's max packet size.
    pub(crate) fn send_status(&mut self, len: usize, auto_zlp: bool) {
        self.ctrl_in_len.set(len);
        self.ctrl_state.set(CtrlState::StatusIn);
        let DeviceCore {
            hw,
            ctrl_in_buf,
            ep0_in,
            ..
        } = self;
        let mut handle = CoreHandle::new(hw);
        let _ = handle.send_data(
            EndpointAddress::new(0, Direction::In),
            ep0_in,
            &ctrl_in_buf[..len],
            auto_zlp,
        );
    }

    /// Zero-length status stage: `send_status(0, false)`, the same
    /// single-ZLP-and-done shape the original gives every request with
    /// nothing to report back.
    pub(crate) fn send_status_ok(&mut self) {
        self.send_status(0, false);
    }

    /// Enter the `Stall` control state and stall both EP0 directions. The
    /// next SETUP clears it automatically (`§8`).
    pub(crate) fn ctrl_error(&mut self) {
        self.ctrl_state.set(CtrlState::Stall);
        self.hw.set_ep_stall(EndpointAddress::new(0, Direction::Out));
        self.hw.set_ep_stall(EndpointAddress::new(0, Direction::In));
        self.setup.set(None);
    }

    fn finish_control_transfer(&mut self) {
        if let Some(addr) = self.pending_address.take() {
            if !self.hw.wants_address_before_status() {
                self.hw.set_address(addr);
            }
            self.device_address.set(addr);
            self.device_state.set(DeviceState::Addressed);
        }
        self.ctrl_state.set(CtrlState::Idle);
        self.setup.set(None);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::class::NoFunctions;
    use crate::descriptors::DescriptorBuilder;

    /// A trivial in-memory `HwIf` that just records what the Core told it to
    /// do, enough to drive enumeration through its paces without real
    /// silicon.
    struct FakeHw {
        mps: [u16; 2],
        stalled: [bool; 2],
        address: u8,
        rx_buf: [u8; 8],
    }

    impl FakeHw {
        fn new(ep0_mps: u16) -> Self {
            Self {
                mps: [ep0_mps, 0],
                stalled: [false, false],
                address: 0,
                rx_buf: [0u8; 8],
            }
        }

        fn idx(addr: EndpointAddress) -> usize {
            if addr.direction == Direction::In {
                1
            } else {
                0
            }
        }
    }

    impl HwIf for FakeHw {
        fn init(&mut self) {}
        fn deinit(&mut self) {}
        fn get_in_ep_size(&self, ep: u8) -> u16 {
            if ep == 0 {
                self.mps[0]
            } else {
                64
            }
        }
        fn set_cfg(&mut self, _descriptors: &DescriptorSet) {}
        fn reset_cfg(&mut self) {}
        fn set_ep_stall(&mut self, addr: EndpointAddress) {
            self.stalled[Self::idx(addr)] = true;
        }
        fn clr_ep_stall(&mut self, addr: EndpointAddress) {
            self.stalled[Self::idx(addr)] = false;
        }
        fn is_ep_stalled(&self, addr: EndpointAddress) -> bool {
            self.stalled[Self::idx(addr)]
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
        fn set_address(&mut self, addr: u8) {
            self.address = addr;
        }
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
        DeviceCore::new(FakeHw::new(8), descriptors)
    }

    #[test]
    fn first_device_descriptor_fetch_is_capped_to_ep0_mps() {
        let mut core = make_core();
        let mut fns = NoFunctions;
        core.hw.rx_buf = setup_bytes(0x80, 0x06, 0x0100, 0, 64);
        core.on_setup(&mut fns);
        assert_eq!(core.ctrl_in_len.get(), 8);
        assert!(!core.first_device_fetch.get());
    }

    #[test]
    fn second_device_descriptor_fetch_is_not_capped() {
        let mut core = make_core();
        let mut fns = NoFunctions;
        core.hw.rx_buf = setup_bytes(0x80, 0x06, 0x0100, 0, 64);
        core.on_setup(&mut fns);
        core.finish_control_transfer();
        core.on_setup(&mut fns);
        assert_eq!(core.ctrl_in_len.get(), 18);
    }

    #[test]
    fn set_address_defers_until_status_stage_completes() {
        let mut core = make_core();
        let mut fns = NoFunctions;
        core.hw.rx_buf = setup_bytes(0x00, 0x05, 5, 0, 0);
        core.on_setup(&mut fns);
        // Address not yet applied: still pending the status-in ZLP.
        assert_eq!(core.hw.address, 0);
        assert_eq!(core.device_state.get(), DeviceState::Default);
        core.on_in(0, &mut fns);
        assert_eq!(core.hw.address, 5);
        assert_eq!(core.device_state.get(), DeviceState::Addressed);
    }

    #[test]
    fn set_configuration_moves_to_configured_state() {
        let mut core = make_core();
        let mut fns = NoFunctions;
        core.hw.rx_buf = setup_bytes(0x00, 0x09, 1, 0, 0);
        core.on_setup(&mut fns);
        core.on_in(0, &mut fns);
        assert_eq!(core.device_state.get(), DeviceState::Configured);
        assert_eq!(core.config_value.get(), 1);
    }

    #[test]
    fn unsupported_standard_request_stalls_and_next_setup_clears_it() {
        let mut core = make_core();
        let mut fns = NoFunctions;
        core.hw.rx_buf = setup_bytes(0x00, 0x07, 0, 0, 0); // SET_DESCRIPTOR, unsupported
        core.on_setup(&mut fns);
        assert!(core.hw.stalled[0]);
        assert!(core.hw.stalled[1]);
        core.hw.rx_buf = setup_bytes(0x80, 0x06, 0x0100, 0, 64);
        core.on_setup(&mut fns);
        assert!(!core.hw.stalled[0]);
        assert!(!core.hw.stalled[1]);
    }

    #[test]
    fn suspend_clears_session_without_resetting_address() {
        let mut core = make_core();
        let mut fns = NoFunctions;
        core.hw.rx_buf = setup_bytes(0x00, 0x05, 9, 0, 0);
        core.on_setup(&mut fns);
        core.on_in(0, &mut fns);
        assert_eq!(core.device_state.get(), DeviceState::Addressed);

        core.handle_event(HwEvent::Suspend, &mut fns);
        assert_eq!(core.device_state.get(), DeviceState::Suspended);

        core.handle_event(HwEvent::Resume, &mut fns);
        assert_eq!(core.device_state.get(), DeviceState::Addressed);
    }
}
