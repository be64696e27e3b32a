// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! CDC-ACM line control and byte pipes (`§4.4`).
//!
//! Each channel is two interfaces (control + data) wrapped in an IAD. The
//! control interface carries `SET_LINE_CODING`/`GET_LINE_CODING`/
//! `SET_CONTROL_LINE_STATE`/`SEND_BREAK` and emits `SERIAL_STATE`
//! notifications; the data interface is a plain bulk IN/OUT byte pipe one
//! endpoint-size deep in each direction, matching the original's
//! interrupt-driven VCOM channel rather than a ring buffer.

use core::cell::Cell;

use usbd_core::class::{CoreHandle, CtrlResponse};
use usbd_core::descriptors::CdcChannelSpec;
use usbd_core::endpoint::{Buffer64, Direction, EndpointAddress, EndpointState};
use usbd_core::setup::SetupPacket;
use usbd_core::{usbd_debug, usbd_trace};

pub const MAX_CDC_CHANNELS: usize = usbd_core::descriptors::MAX_CDC_CHANNELS;

/// CDC class request codes (`§6`).
const SET_LINE_CODING: u8 = 0x20;
const GET_LINE_CODING: u8 = 0x21;
const SET_CONTROL_LINE_STATE: u8 = 0x22;
const SEND_BREAK: u8 = 0x23;
const SERIAL_STATE_NOTIFICATION: u8 = 0x20;

/// Milliseconds the host's DTR|RTS assertion must hold before a channel is
/// declared connected (`§4.4` step 2).
const CONNSTART_MS: u32 = 50;
/// Flush timer armed whenever the TX buffer is non-empty and non-full, so a
/// short packet still goes out if the application stops feeding bytes.
const TX_FLUSH_MS: u32 = 2;

pub const DTR: u8 = 0x01;
pub const RTS: u8 = 0x02;

pub const SERIAL_STATE_DCD: u8 = 1 << 0;
pub const SERIAL_STATE_DSR: u8 = 1 << 1;
pub const SERIAL_STATE_BREAK: u8 = 1 << 2;
pub const SERIAL_STATE_RING: u8 = 1 << 3;
pub const SERIAL_STATE_FRAMING: u8 = 1 << 4;
pub const SERIAL_STATE_PARITY: u8 = 1 << 5;
pub const SERIAL_STATE_OVERRUN: u8 = 1 << 6;
/// Device-local extension beyond the CDC wire bitmap's 7 standard bits --
/// carried in app-visible state but masked out of the actual notification
/// (`§3`: CTS is listed alongside the wire bits, but CDC1.2 doesn't define
/// a wire position for it).
pub const SERIAL_STATE_CTS: u8 = 1 << 7;

const SERIAL_STATE_TRANSIENT: u8 =
    SERIAL_STATE_OVERRUN | SERIAL_STATE_PARITY | SERIAL_STATE_FRAMING | SERIAL_STATE_BREAK | SERIAL_STATE_RING;
const SERIAL_STATE_WIRE_MASK: u8 = 0x7F;

/// Flags `process_input` can hand back (`§6` app contract).
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct InputFlags {
    pub prompt_requested: bool,
    pub auto_nul: bool,
}

/// The `9600 8N1` line-coding wire record (`§3`).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LineCoding {
    pub dte_rate: u32,
    pub char_format: u8,
    pub parity_type: u8,
    pub data_bits: u8,
}

impl Default for LineCoding {
    fn default() -> Self {
        Self {
            dte_rate: 9600,
            char_format: 0,
            parity_type: 0,
            data_bits: 8,
        }
    }
}

impl LineCoding {
    fn from_bytes(b: &[u8]) -> Self {
        Self {
            dte_rate: u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            char_format: b[4],
            parity_type: b[5],
            data_bits: b[6],
        }
    }

    fn to_bytes(self) -> [u8; 7] {
        let r = self.dte_rate.to_le_bytes();
        [r[0], r[1], r[2], r[3], self.char_format, self.parity_type, self.data_bits]
    }
}

/// Application hooks for a CDC channel, invoked from the VCOM level
/// (`§4.4`, `§6`). Default no-ops so a build can mix unused channels in.
pub trait CdcHooks {
    fn set_line_coding(&mut self, _channel: u8, _coding: LineCoding) {}
    fn set_control_line_state(&mut self, _channel: u8, _dtr: bool, _rts: bool) {}
    /// A byte arrived on a channel's data-OUT pipe; return the flags the
    /// VCOM-RX level should act on.
    fn process_input(&mut self, _channel: u8, _byte: u8) -> InputFlags {
        InputFlags::default()
    }
    fn signon_text(&self, _channel: u8) -> &'static str {
        ""
    }
    fn prompt_text(&self, _channel: u8) -> &'static str {
        "> "
    }
}

/// Persistent + per-session state for one CDC-ACM channel.
pub struct CdcChannel {
    spec: Cell<Option<CdcChannelSpec>>,

    line_coding: Cell<LineCoding>,
    control_line_state: Cell<u8>,
    serial_state: Cell<u8>,
    last_sent_serial_state: Cell<u8>,
    line_coding_changed: Cell<bool>,
    control_line_state_changed: Cell<bool>,

    rx_buf: Buffer64,
    rx_len: Cell<usize>,
    tx_buf: Buffer64,
    tx_len: Cell<usize>,

    connected: Cell<bool>,
    signon_rq: Cell<bool>,
    prompt_rq: Cell<bool>,
    connstart_timer: Cell<Option<u32>>,
    tx_flush_timer: Cell<Option<u32>>,

    notify_state: EndpointState,
    tx_state: EndpointState,
    notify_pending: Cell<[u8; 10]>,
    notify_pending_len: Cell<usize>,
}

impl CdcChannel {
    const fn new() -> Self {
        Self {
            spec: Cell::new(None),
            line_coding: Cell::new(LineCoding {
                dte_rate: 9600,
                char_format: 0,
                parity_type: 0,
                data_bits: 8,
            }),
            control_line_state: Cell::new(0),
            serial_state: Cell::new(0),
            last_sent_serial_state: Cell::new(0xFF), // force first notification to differ
            line_coding_changed: Cell::new(false),
            control_line_state_changed: Cell::new(false),
            rx_buf: Buffer64::new(),
            rx_len: Cell::new(0),
            tx_buf: Buffer64::new(),
            tx_len: Cell::new(0),
            connected: Cell::new(false),
            signon_rq: Cell::new(false),
            prompt_rq: Cell::new(false),
            connstart_timer: Cell::new(None),
            tx_flush_timer: Cell::new(None),
            notify_state: EndpointState::new(),
            tx_state: EndpointState::new(),
            notify_pending: Cell::new([0u8; 10]),
            notify_pending_len: Cell::new(0),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.get()
    }

    pub fn line_coding(&self) -> LineCoding {
        self.line_coding.get()
    }

    /// Clear session state on bus reset/suspend; the persistent record
    /// (line coding, control-line state) survives (`§3`/`§5`).
    fn session_reset(&self) {
        self.rx_len.set(0);
        self.tx_len.set(0);
        self.connected.set(false);
        self.signon_rq.set(false);
        self.prompt_rq.set(false);
        self.connstart_timer.set(None);
        self.tx_flush_timer.set(None);
        self.notify_state.abort();
        self.tx_state.abort();
        self.notify_pending_len.set(0);
    }
}

impl Default for CdcChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives every configured CDC-ACM channel against the descriptor set's
/// endpoint assignment.
pub struct CdcEngine {
    channels: [CdcChannel; MAX_CDC_CHANNELS],
    count: u8,
}

impl CdcEngine {
    pub const fn new() -> Self {
        Self {
            channels: [CdcChannel::new(), CdcChannel::new(), CdcChannel::new()],
            count: 0,
        }
    }

    /// Bind each channel to the endpoint/interface numbers the descriptor
    /// builder assigned it, called once after `DescriptorBuilder::build`.
    pub fn configure<'a>(&mut self, specs: impl Iterator<Item = &'a CdcChannelSpec>) {
        let mut n = 0u8;
        for spec in specs {
            if (n as usize) >= MAX_CDC_CHANNELS {
                break;
            }
            self.channels[n as usize].spec.set(Some(*spec));
            n += 1;
        }
        self.count = n;
    }

    pub fn channel(&self, index: u8) -> Option<&CdcChannel> {
        self.channels.get(index as usize)
    }

    /// Queue a prompt re-send on `channel`, as the application does after
    /// it finishes handling an input line (`§6` app contract
    /// `vcom_prompt_request`).
    pub fn request_prompt(&self, channel: u8) {
        if let Some(ch) = self.channels.get(channel as usize) {
            ch.prompt_rq.set(true);
        }
    }

    fn spec(&self, index: u8) -> Option<CdcChannelSpec> {
        self.channels.get(index as usize).and_then(|c| c.spec.get())
    }

    /// `§4.4` class requests, dispatched by the composite device on the
    /// matching control interface.
    pub fn class_request<H: CdcHooks>(
        &self,
        hooks: &mut H,
        channel: u8,
        setup: &SetupPacket,
        out_data: &[u8],
        response_buf: &mut [u8],
    ) -> CtrlResponse {
        let Some(ch) = self.channels.get(channel as usize) else {
            return CtrlResponse::Stall;
        };
        match setup.request {
            SET_LINE_CODING => {
                if out_data.len() < 7 {
                    return CtrlResponse::Stall;
                }
                let coding = LineCoding::from_bytes(out_data);
                if coding != ch.line_coding.get() {
                    ch.line_coding.set(coding);
                    ch.line_coding_changed.set(true);
                    hooks.set_line_coding(channel, coding);
                }
                CtrlResponse::Ok
            }
            GET_LINE_CODING => {
                let bytes = ch.line_coding.get().to_bytes();
                response_buf[..7].copy_from_slice(&bytes);
                CtrlResponse::Data { len: 7, auto_zlp: true }
            }
            SET_CONTROL_LINE_STATE => {
                let bits = setup.value_low() & (DTR | RTS);
                if bits != ch.control_line_state.get() {
                    ch.control_line_state.set(bits);
                    ch.control_line_state_changed.set(true);
                    hooks.set_control_line_state(channel, bits & DTR != 0, bits & RTS != 0);
                    if bits & (DTR | RTS) == (DTR | RTS) {
                        ch.connstart_timer.set(Some(CONNSTART_MS));
                    } else {
                        ch.connstart_timer.set(None);
                        ch.connected.set(false);
                    }
                }
                CtrlResponse::Ok
            }
            SEND_BREAK => CtrlResponse::Ok,
            _ => {
                usbd_debug!("cdc: unsupported class request {=u8}", setup.request);
                CtrlResponse::Stall
            }
        }
    }

    pub fn clear_ep_stall_hook(&self, handle: &mut CoreHandle<'_>, ep: EndpointAddress) {
        for ch in &self.channels {
            let Some(spec) = ch.spec.get() else { continue };
            if ep.number == spec.data_in_ep && ep.direction == Direction::In {
                ch.tx_state.abort();
            }
            if ep.number == spec.notify_ep && ep.direction == Direction::In {
                ch.notify_state.abort();
            }
        }
        let _ = handle;
    }

    pub fn bus_reset(&self) {
        for ch in &self.channels {
            ch.session_reset();
        }
    }

    /// 1 ms SOF tick: advances the connect timer, the TX flush timer, and
    /// flushes any queued `SERIAL_STATE` notification (`§4.4`).
    pub fn sof<H: CdcHooks>(&self, hooks: &mut H, handle: &mut CoreHandle<'_>) {
        for (idx, ch) in self.channels.iter().enumerate() {
            let Some(spec) = ch.spec.get() else { continue };
            let channel = idx as u8;

            if let Some(t) = ch.connstart_timer.get() {
                if t <= 1 {
                    ch.connstart_timer.set(None);
                    ch.connected.set(true);
                    ch.signon_rq.set(true);
                    ch.prompt_rq.set(true);
                    usbd_trace!("cdc: channel {=u8} connected", channel);
                } else {
                    ch.connstart_timer.set(Some(t - 1));
                }
            }

            if let Some(t) = ch.tx_flush_timer.get() {
                if t <= 1 {
                    ch.tx_flush_timer.set(None);
                    self.flush_tx(ch, spec, handle);
                } else {
                    ch.tx_flush_timer.set(Some(t - 1));
                }
            }

            self.send_serial_state_if_changed(ch, spec, handle);
            let _ = hooks;
        }
    }

    fn send_serial_state_if_changed(&self, ch: &CdcChannel, spec: CdcChannelSpec, handle: &mut CoreHandle<'_>) {
        let current = ch.serial_state.get() & SERIAL_STATE_WIRE_MASK;
        if current == ch.last_sent_serial_state.get() || ch.notify_state.is_busy() {
            return;
        }
        let mut pkt = [0u8; 10];
        pkt[0] = 0xA1;
        pkt[1] = SERIAL_STATE_NOTIFICATION;
        pkt[2] = 0;
        pkt[3] = 0;
        let idx = spec.control_interface.to_le_bytes();
        pkt[4] = idx[0];
        pkt[5] = idx[1];
        pkt[6] = 2;
        pkt[7] = 0;
        pkt[8] = current;
        pkt[9] = 0;
        ch.notify_pending.set(pkt);
        ch.notify_pending_len.set(10);
        let buf = ch.notify_pending.get();
        let addr = EndpointAddress::new(spec.notify_ep, Direction::In);
        let _ = handle.send_data(addr, &ch.notify_state, &buf, false);
        ch.last_sent_serial_state.set(current);
        ch.serial_state.set(current & !SERIAL_STATE_TRANSIENT);
    }

    /// Feed `data` into a channel's TX buffer, starting a transfer as soon
    /// as it fills (`§4.4` "Data pipe behaviour"). Returns the number of
    /// bytes actually queued; the caller is expected to retry with the rest
    /// (`§5` "the busy-wait while filling the TX buffer in vcom_write").
    pub fn write(&self, channel: u8, data: &[u8], handle: &mut CoreHandle<'_>) -> usize {
        let Some(ch) = self.channels.get(channel as usize) else {
            return 0;
        };
        let Some(spec) = ch.spec.get() else { return 0 };
        if ch.tx_state.is_busy() {
            return 0;
        }
        let cap = ch.tx_buf.len();
        let room = cap - ch.tx_len.get();
        let n = data.len().min(room);
        if n == 0 {
            return 0;
        }
        for (i, byte) in data[..n].iter().enumerate() {
            ch.tx_buf.buf[ch.tx_len.get() + i].set(*byte);
        }
        ch.tx_len.set(ch.tx_len.get() + n);
        if ch.tx_len.get() >= cap {
            self.flush_tx(ch, spec, handle);
        } else {
            ch.tx_flush_timer.set(Some(TX_FLUSH_MS));
        }
        n
    }

    fn flush_tx(&self, ch: &CdcChannel, spec: CdcChannelSpec, handle: &mut CoreHandle<'_>) {
        let len = ch.tx_len.get();
        if len == 0 || ch.tx_state.is_busy() {
            return;
        }
        let mut tmp = [0u8; 64];
        let n = ch.tx_buf.drain_into(&mut tmp, len);
        let addr = EndpointAddress::new(spec.data_in_ep, Direction::In);
        if handle.send_data(addr, &ch.tx_state, &tmp[..n], true).is_ok() {
            ch.tx_len.set(0);
        }
    }

    /// A packet arrived on a channel's data-OUT pipe.
    pub fn out_ep_handler<H: CdcHooks>(
        &self,
        hooks: &mut H,
        ep: EndpointAddress,
        data: &[u8],
        handle: &mut CoreHandle<'_>,
    ) {
        for (idx, ch) in self.channels.iter().enumerate() {
            let Some(spec) = ch.spec.get() else { continue };
            if spec.data_out_ep != ep.number {
                continue;
            }
            let channel = idx as u8;
            let n = ch.rx_buf.fill_from(data);
            ch.rx_len.set(n);
            for byte in &data[..n] {
                let flags = hooks.process_input(channel, *byte);
                if flags.prompt_requested {
                    ch.prompt_rq.set(true);
                }
                if flags.auto_nul {
                    let _ = self.write(channel, &[0], handle);
                }
            }
            handle.enable_rx(spec.data_out_ep);
            return;
        }
    }

    /// An IN transfer completed; re-arm the TX notify/data pipe continuation
    /// or service a pending sign-on/prompt.
    pub fn in_ep_handler<H: CdcHooks>(&self, hooks: &mut H, ep: EndpointAddress, handle: &mut CoreHandle<'_>) {
        for (idx, ch) in self.channels.iter().enumerate() {
            let Some(spec) = ch.spec.get() else { continue };
            let channel = idx as u8;
            if spec.data_in_ep == ep.number {
                if ch.signon_rq.get() {
                    ch.signon_rq.set(false);
                    let text = hooks.signon_text(channel);
                    if !text.is_empty() {
                        let _ = self.write(channel, text.as_bytes(), handle);
                    }
                } else if ch.prompt_rq.get() && !ch.tx_state.is_busy() {
                    ch.prompt_rq.set(false);
                    let text = hooks.prompt_text(channel);
                    let _ = self.write(channel, text.as_bytes(), handle);
                }
                return;
            }
        }
    }
}

impl Default for CdcEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct NoopHooks;
    impl CdcHooks for NoopHooks {}

    fn spec() -> CdcChannelSpec {
        CdcChannelSpec {
            control_interface: 0,
            data_interface: 1,
            notify_ep: 2,
            data_out_ep: 3,
            data_in_ep: 3,
            string_index: 0,
        }
    }

    #[test]
    fn line_coding_round_trips() {
        let engine = CdcEngine::new();
        engine.channels[0].spec.set(Some(spec()));
        let mut hooks = NoopHooks;
        let set = SetupPacket {
            direction: usbd_core::setup::RequestDirection::HostToDevice,
            kind: usbd_core::setup::RequestKind::Class,
            recipient: usbd_core::setup::Recipient::Interface,
            request: SET_LINE_CODING,
            value: 0,
            index: 0,
            length: 7,
        };
        let payload = [0x80, 0x25, 0, 0, 0, 0, 8]; // 9600 8N1
        let mut scratch = [0u8; 8];
        let resp = engine.class_request(&mut hooks, 0, &set, &payload, &mut scratch);
        assert!(matches!(resp, CtrlResponse::Ok));

        let get = SetupPacket {
            request: GET_LINE_CODING,
            ..set
        };
        let resp = engine.class_request(&mut hooks, 0, &get, &[], &mut scratch);
        assert!(matches!(resp, CtrlResponse::Data { len: 7, .. }));
        assert_eq!(&scratch[..7], &payload);
    }

    #[test]
    fn control_line_state_change_arms_connect_timer() {
        let engine = CdcEngine::new();
        engine.channels[0].spec.set(Some(spec()));
        let mut hooks = NoopHooks;
        let set = SetupPacket {
            direction: usbd_core::setup::RequestDirection::HostToDevice,
            kind: usbd_core::setup::RequestKind::Class,
            recipient: usbd_core::setup::Recipient::Interface,
            request: SET_CONTROL_LINE_STATE,
            value: (DTR | RTS) as u16,
            index: 0,
            length: 0,
        };
        let mut scratch = [0u8; 8];
        engine.class_request(&mut hooks, 0, &set, &[], &mut scratch);
        assert_eq!(engine.channels[0].connstart_timer.get(), Some(CONNSTART_MS));
        assert!(!engine.channels[0].is_connected());
    }

    #[test]
    fn connects_after_50ms_of_sof_ticks() {
        struct FakeHw(usbd_core::endpoint::EndpointState);
        impl usbd_core::hwif::HwIf for FakeHw {
            fn init(&mut self) {}
            fn deinit(&mut self) {}
            fn get_in_ep_size(&self, _ep: u8) -> u16 {
                64
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
                state.advance(data.len());
                Ok(())
            }
            fn set_address(&mut self, _addr: u8) {}
            fn irq(&mut self, _events: &mut usbd_core::hwif::EventQueue) {}
        }

        let engine = CdcEngine::new();
        engine.channels[0].spec.set(Some(spec()));
        engine.channels[0].connstart_timer.set(Some(CONNSTART_MS));
        let mut hooks = NoopHooks;
        let mut hw = FakeHw(EndpointState::new());
        for _ in 0..CONNSTART_MS {
            let mut handle = CoreHandle::new(&mut hw);
            engine.sof(&mut hooks, &mut handle);
        }
        assert!(engine.channels[0].is_connected());
        assert!(engine.channels[0].signon_rq.get());
    }
}
