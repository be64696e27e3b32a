// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Register and packet-memory layout for the dual-port-RAM USB FS
//! peripheral as it appears on the STM32 F0/F1/G4/L0/L4/L5 family: eight
//! endpoint control/status registers, a handful of device-level control
//! registers, then a packet-memory window addressed as 16-bit half-words
//! (`usb_hw_l0.c`).

use tock_registers::interfaces::Readable;
use tock_registers::registers::ReadWrite;
use tock_registers::register_bitfields;

/// Offset from the peripheral base to the start of packet memory. Fixed by
/// the silicon regardless of how much of it a given part actually wires up.
pub const PMA_OFFSET: usize = 0x400;

/// Packet memory capacity modelled here; generous for every part in this
/// family (the smallest, F1, wires up 512 bytes; this stack's endpoint
/// sizes never approach the 2048 L0 provides).
pub const PMA_WORDS: usize = 1024;

/// Sentinel `RxCount.count` value hardware leaves in place while a receive
/// descriptor update is still in flight; software must not read stale
/// counts (`§4.1` dual-port-RAM family).
pub const CNT_INVALID: u16 = 1023;

register_bitfields![u32,
    pub Cntr [
        FRES 0,
        PDWN 1,
        LPMODE 2,
        FSUSP 3,
        RESUME 4,
        ESOFM 8,
        SOFM 9,
        RESETM 10,
        SUSPM 11,
        WKUPM 12,
        ERRM 13,
        PMAOVRM 14,
        CTRM 15
    ],
    pub Istr [
        EP_ID OFFSET(0) NUMBITS(4) [],
        DIR 4,
        ESOF 8,
        SOF 9,
        RESET 10,
        SUSP 11,
        WKUP 12,
        ERR 13,
        PMAOVR 14,
        CTR 15
    ],
    pub Fnr [
        FN OFFSET(0) NUMBITS(11) [],
        LSOF OFFSET(11) NUMBITS(2) [],
        LCK 13,
        RXDP 14,
        RXDM 15
    ],
    pub Daddr [
        ADD OFFSET(0) NUMBITS(7) [],
        EF 7
    ],
    pub Bcdr [
        DPPU 15
    ]
];

/// The eight `EPnR` registers use toggle-on-write-1 semantics for their
/// status bits (`STAT_TX`/`STAT_RX`/`DTOG_TX`/`DTOG_RX`) and write-0-to-clear
/// for the two `CTR` flags, a scheme `register_bitfields!`'s set/clear model
/// does not express; they are accessed as plain 32-bit words with the bit
/// layout given as free constants instead (mirrors the original's
/// `SetEPRState`).
pub mod epr {
    pub const EA: u32 = 0x0000_000F;
    pub const STAT_TX: u32 = 0x0000_0030;
    pub const DTOG_TX: u32 = 0x0000_0040;
    pub const CTR_TX: u32 = 0x0000_0080;
    pub const EP_KIND: u32 = 0x0000_0100;
    pub const EP_TYPE: u32 = 0x0000_0600;
    pub const SETUP: u32 = 0x0000_0800;
    pub const STAT_RX: u32 = 0x0000_3000;
    pub const DTOG_RX: u32 = 0x0000_4000;
    pub const CTR_RX: u32 = 0x0000_8000;

    pub const CFG: u32 = EA | EP_KIND | EP_TYPE;
    pub const TOGGLE_FLAGS: u32 = CTR_TX | CTR_RX;

    pub const STATE_DISABLED: u32 = 0b00;
    pub const STATE_STALL: u32 = 0b01;
    pub const STATE_NAK: u32 = 0b10;
    pub const STATE_VALID: u32 = 0b11;

    pub const fn stat_tx(state: u32) -> u32 {
        state << 4
    }

    pub const fn stat_rx(state: u32) -> u32 {
        state << 12
    }

    /// Hardware endpoint-type encoding, ordered by the USB standard's
    /// `bmAttributes` transfer-type encoding (control, iso, bulk,
    /// interrupt) -- not the same order, hence the lookup table rather
    /// than a shift.
    pub const HW_EPTYPE: [u32; 4] = [0b01, 0b10, 0b00, 0b11];

    pub const fn eptype(std_transfer_type: usize) -> u32 {
        HW_EPTYPE[std_transfer_type] << 9
    }
}

#[repr(C)]
pub struct RegisterBlock {
    pub epr: [ReadWrite<u32>; 8],
    _reserved0: [u32; 8],
    pub cntr: ReadWrite<u32, Cntr::Register>,
    pub istr: ReadWrite<u32, Istr::Register>,
    pub fnr: ReadWrite<u32, Fnr::Register>,
    pub daddr: ReadWrite<u32, Daddr::Register>,
    pub btable: ReadWrite<u32>,
    pub lpmcsr: ReadWrite<u32>,
    pub bcdr: ReadWrite<u32, Bcdr::Register>,
}

/// Set `epr[num]`'s status/toggle bits while preserving the configuration
/// bits and leaving the write-0-to-clear `CTR` flags untouched, exactly the
/// original's `SetEPRState`: `(*epr & (CFG | mask)) ^ new | TOGGLE_FLAGS`.
pub fn set_epr_state(regs: &RegisterBlock, num: usize, mask: u32, new: u32) {
    let reg = &regs.epr[num];
    let v = reg.get();
    reg.set(((v & (epr::CFG | mask)) ^ new) | epr::TOGGLE_FLAGS);
}

pub fn is_epr_stalled(regs: &RegisterBlock, num: usize, is_in: bool) -> bool {
    let v = regs.epr[num].get();
    if is_in {
        v & epr::STAT_TX == epr::stat_tx(epr::STATE_STALL)
    } else {
        v & epr::STAT_RX == epr::stat_rx(epr::STATE_STALL)
    }
}
