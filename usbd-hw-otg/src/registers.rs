// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Register layout for the Synopsys DWC2-derived FIFO/OTG USB FS peripheral,
//! as found on STM32 F4/L4/U5 parts in device mode (`§4.1` family 3;
//! struct layout grounded on `usb_hw_l4.c`'s `USB_OTG_TypeDef`).
//!
//! Unlike the dual-port-RAM families, there is no packet-memory window to
//! address directly: packet data moves through per-endpoint push/pop FIFO
//! registers (`fifo.rs`), and the controller itself tracks transfer byte
//! counts and packet counts rather than a buffer-descriptor table.

use tock_registers::interfaces::Writeable;
use tock_registers::registers::ReadWrite;
use tock_registers::register_bitfields;

/// Endpoint pairs modelled (EP0 plus three more IN/OUT pairs); OTG-FS cores
/// on parts this family targets wire up 4 endpoints in hardware.
pub const MAX_EP_PAIRS: usize = 4;

/// Total device FIFO RAM, in 32-bit words (`usb_hw_l4.c`: `FIFO_WORDS`).
pub const FIFO_WORDS: usize = 320;

/// Byte offset from the peripheral base to endpoint `n`'s push/pop FIFO
/// access window.
pub const fn fifo_offset(ep: usize) -> usize {
    0x1000 + ep * 0x1000
}

register_bitfields![u32,
    pub Gahbcfg [
        GINTMSK 0,
        TXFELVL 7
    ],
    pub Gusbcfg [
        TOCAL OFFSET(0) NUMBITS(3) [],
        PHYSEL 6,
        FDMOD OFFSET(30) NUMBITS(1) []
    ],
    pub Grstctl [
        CSRST 0,
        RXFFLSH 4,
        TXFFLSH 5,
        TXFNUM OFFSET(6) NUMBITS(5) [],
        AHBIDL 31
    ],
    pub Gintsts [
        CMOD 0,
        SOF 3,
        RXFLVL 4,
        ENUMDNE 13,
        USBRST 12,
        USBSUSP 11,
        WKUPINT 31
    ],
    pub Gintmsk [
        SOFM 3,
        RXFLVLM 4,
        USBSUSPM 11,
        USBRST 12,
        ENUMDNEM 13,
        IEPINT 18,
        OEPINT 19,
        WUIM 31
    ],
    pub Grxfsiz [
        RXFD OFFSET(0) NUMBITS(16) []
    ],
    pub Dieptxf0 [
        TX0FSA OFFSET(0) NUMBITS(16) [],
        TX0FD OFFSET(16) NUMBITS(16) []
    ],
    pub Dieptxf [
        INEPTXSA OFFSET(0) NUMBITS(16) [],
        INEPTXFD OFFSET(16) NUMBITS(16) []
    ],
    pub Dcfg [
        DSPD OFFSET(0) NUMBITS(2) [],
        DAD OFFSET(4) NUMBITS(7) []
    ],
    pub Dctl [
        RWUSIG 0,
        SDIS 1,
        GINSTS 3
    ],
    pub Daint [
        IEPINT OFFSET(0) NUMBITS(16) [],
        OEPINT OFFSET(16) NUMBITS(16) []
    ],
    pub DiepctlX [
        MPSIZ OFFSET(0) NUMBITS(11) [],
        USBAEP 15,
        EPTYP OFFSET(18) NUMBITS(2) [],
        STALL 21,
        TXFNUM OFFSET(22) NUMBITS(4) [],
        CNAK 26,
        SNAK 27,
        EPDIS 30,
        EPENA 31
    ],
    pub DoepctlX [
        MPSIZ OFFSET(0) NUMBITS(11) [],
        USBAEP 15,
        EPTYP OFFSET(18) NUMBITS(2) [],
        STALL 21,
        CNAK 26,
        SNAK 27,
        EPDIS 30,
        EPENA 31
    ],
    pub Dieptsiz [
        XFRSIZ OFFSET(0) NUMBITS(19) [],
        PKTCNT OFFSET(19) NUMBITS(10) []
    ],
    pub Doeptsiz [
        XFRSIZ OFFSET(0) NUMBITS(7) [],
        PKTCNT OFFSET(19) NUMBITS(10) [],
        STUPCNT OFFSET(29) NUMBITS(2) []
    ],
    pub DiepintX [
        XFRC 0,
        EPDISD 1,
        TOC 3,
        ITTXFE 4,
        INEPNE 6,
        TXFE 7
    ],
    pub DoepintX [
        XFRC 0,
        EPDISD 1,
        STUP 3,
        OTEPDIS 4,
        B2BSTUP 6
    ]
];

#[repr(C)]
pub struct InEndpoint {
    pub diepctl: ReadWrite<u32, DiepctlX::Register>,
    _reserved0: u32,
    pub diepint: ReadWrite<u32, DiepintX::Register>,
    _reserved1: u32,
    pub dieptsiz: ReadWrite<u32, Dieptsiz::Register>,
    _reserved2: u32,
    _diepdma: u32,
    pub dtxfsts: ReadWrite<u32>,
    _reserved3: u32,
}

#[repr(C)]
pub struct OutEndpoint {
    pub doepctl: ReadWrite<u32, DoepctlX::Register>,
    _reserved0: u32,
    pub doepint: ReadWrite<u32, DoepintX::Register>,
    _reserved1: u32,
    pub doeptsiz: ReadWrite<u32, Doeptsiz::Register>,
    _reserved2: [u32; 3],
}

#[repr(C)]
pub struct GlobalRegisters {
    pub gotgctl: ReadWrite<u32>,
    pub gotgint: ReadWrite<u32>,
    pub gahbcfg: ReadWrite<u32, Gahbcfg::Register>,
    pub gusbcfg: ReadWrite<u32, Gusbcfg::Register>,
    pub grstctl: ReadWrite<u32, Grstctl::Register>,
    pub gintsts: ReadWrite<u32, Gintsts::Register>,
    pub gintmsk: ReadWrite<u32, Gintmsk::Register>,
    pub grxstsr: ReadWrite<u32>,
    pub grxstsp: ReadWrite<u32>,
    pub grxfsiz: ReadWrite<u32, Grxfsiz::Register>,
    pub dieptxf0: ReadWrite<u32, Dieptxf0::Register>,
    _reserved0: [u32; 7],
    pub gccfg: ReadWrite<u32>,
    pub cid: ReadWrite<u32>,
    _reserved1: [u32; 48],
    pub dieptxf: [ReadWrite<u32, Dieptxf::Register>; 3],
}

#[repr(C)]
pub struct DeviceRegisters {
    pub dcfg: ReadWrite<u32, Dcfg::Register>,
    pub dctl: ReadWrite<u32, Dctl::Register>,
    pub dsts: ReadWrite<u32>,
    _reserved0: u32,
    pub diepmsk: ReadWrite<u32>,
    pub doepmsk: ReadWrite<u32>,
    pub daint: ReadWrite<u32, Daint::Register>,
    pub daintmsk: ReadWrite<u32>,
    _reserved1: [u32; 2],
    pub dvbusdis: ReadWrite<u32>,
    pub dvbuspulse: ReadWrite<u32>,
    _reserved2: u32,
    pub diepempmsk: ReadWrite<u32>,
}

pub fn activate_in_ep(ep: &InEndpoint, mps: u16, eptype: u32, fifo_num: u32) {
    ep.diepctl.write(
        DiepctlX::MPSIZ.val(mps as u32)
            + DiepctlX::EPTYP.val(eptype)
            + DiepctlX::TXFNUM.val(fifo_num)
            + DiepctlX::USBAEP::SET,
    );
}

pub fn activate_out_ep(ep: &OutEndpoint, mps: u16, eptype: u32) {
    ep.doepctl.write(
        DoepctlX::MPSIZ.val(mps as u32) + DoepctlX::EPTYP.val(eptype) + DoepctlX::USBAEP::SET,
    );
}

pub fn deactivate_in_ep(ep: &InEndpoint) {
    ep.diepctl.modify(DiepctlX::USBAEP::CLEAR);
}

pub fn deactivate_out_ep(ep: &OutEndpoint) {
    ep.doepctl.modify(DoepctlX::USBAEP::CLEAR);
}

/// `GRXSTSP` field decode. Read as a plain 32-bit value rather than through
/// `register_bitfields!` since it is popped once per status word and never
/// written back.
pub mod grxstsp {
    pub const PKTSTS_GLOBAL_OUT_NAK: u32 = 1;
    pub const PKTSTS_OUT_DATA_RECEIVED: u32 = 2;
    pub const PKTSTS_OUT_TRANSFER_COMPLETE: u32 = 3;
    pub const PKTSTS_SETUP_COMPLETE: u32 = 4;
    pub const PKTSTS_SETUP_RECEIVED: u32 = 6;

    pub const fn epnum(status: u32) -> u32 {
        status & 0xF
    }

    pub const fn bcnt(status: u32) -> u32 {
        (status >> 4) & 0x7FF
    }

    pub const fn pktsts(status: u32) -> u32 {
        (status >> 17) & 0xF
    }
}
