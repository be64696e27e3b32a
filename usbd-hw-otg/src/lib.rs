// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! HWIF back-end for the Synopsys DWC2-derived FIFO/OTG USB FS peripheral,
//! as found on STM32 F4/L4/U5 parts in device mode (`§4.1` family 3;
//! grounded on `usb_hw_l4.c`).
//!
//! This family has no packet-memory window to lay buffer descriptors in:
//! each IN endpoint gets a slice of device TX FIFO RAM it pushes whole
//! words into, and a single shared RX FIFO delivers a status word per
//! received packet (`GRXSTSP`) ahead of the packet's data words. The Core
//! doesn't need to know any of this -- `HwEvent::OutReceived` fires exactly
//! as it does for the dual-port-RAM families, and `read_rx` drains whatever
//! the status word announced.
#![cfg_attr(not(test), no_std)]

mod fifo;
mod registers;

use core::cell::Cell;

use tock_registers::interfaces::{Readable, Writeable};

use usbd_core::descriptors::DescriptorSet;
use usbd_core::endpoint::{Direction, EndpointAddress, EndpointState};
use usbd_core::error::UsbdResult;
use usbd_core::hwif::{EventQueue, HwEvent, HwIf};
use usbd_core::{usbd_debug, usbd_trace};

use fifo::Fifo;
use registers::{DeviceRegisters, GlobalRegisters, InEndpoint, OutEndpoint, MAX_EP_PAIRS};

const DEVICE_OFFSET: usize = 0x800;
const IN_ENDPOINT_OFFSET: usize = 0x900;
const OUT_ENDPOINT_OFFSET: usize = 0xB00;
const ENDPOINT_STRIDE: usize = 0x20;

/// Bounded spin count for the "core soft reset complete" and "AHB master
/// idle" handshakes `init` waits on; real silicon clears both within a few
/// AHB clocks.
const RESET_POLL_ATTEMPTS: u32 = 10_000;

pub struct UsbFsDevice {
    global: *const GlobalRegisters,
    device: *const DeviceRegisters,
    base: *mut u8,
    fifo: Fifo,
    ep0_size: u16,
    num_ep_pairs: Cell<u8>,
    in_ep_size: [Cell<u16>; MAX_EP_PAIRS],
    pending_rx_len: [Cell<u16>; MAX_EP_PAIRS],
    pending_rx_setup: [Cell<bool>; MAX_EP_PAIRS],
}

impl UsbFsDevice {
    /// # Safety
    /// `base` must be the base address of a real OTG-FS peripheral of this
    /// family, mapped and clocked, with nothing else concurrently accessing
    /// it for the lifetime of the returned value.
    pub const unsafe fn new(base: *mut u8, ep0_size: u16) -> Self {
        Self {
            global: base as *const GlobalRegisters,
            device: unsafe { base.add(DEVICE_OFFSET) as *const DeviceRegisters },
            base,
            fifo: unsafe { Fifo::new(base) },
            ep0_size,
            num_ep_pairs: Cell::new(1),
            in_ep_size: [const { Cell::new(0) }; MAX_EP_PAIRS],
            pending_rx_len: [const { Cell::new(0) }; MAX_EP_PAIRS],
            pending_rx_setup: [const { Cell::new(false) }; MAX_EP_PAIRS],
        }
    }

    fn global(&self) -> &GlobalRegisters {
        unsafe { &*self.global }
    }

    fn device(&self) -> &DeviceRegisters {
        unsafe { &*self.device }
    }

    fn in_ep(&self, ep: usize) -> &InEndpoint {
        unsafe { &*(self.base.add(IN_ENDPOINT_OFFSET + ep * ENDPOINT_STRIDE) as *const InEndpoint) }
    }

    fn out_ep(&self, ep: usize) -> &OutEndpoint {
        unsafe { &*(self.base.add(OUT_ENDPOINT_OFFSET + ep * ENDPOINT_STRIDE) as *const OutEndpoint) }
    }

    /// Flush both FIFOs and wait for the AHB master idle handshake, as the
    /// original does on every core reset and bus reset alike.
    fn flush_fifos(&self) {
        let g = self.global();
        g.grstctl.write(
            registers::Grstctl::RXFFLSH::SET
                + registers::Grstctl::TXFFLSH::SET
                + registers::Grstctl::TXFNUM.val(0x10),
        );
        for _ in 0..RESET_POLL_ATTEMPTS {
            if g.grstctl.get() & (registers::Grstctl::RXFFLSH::SET.value | registers::Grstctl::TXFFLSH::SET.value) == 0 {
                break;
            }
        }
    }

    /// Reprogram FIFO sizing and reactivate EP0, as the original's
    /// `USBhw_Reset` does on the USBRST interrupt.
    fn reset_controller(&self) {
        let g = self.global();
        self.flush_fifos();

        g.grxfsiz.write(registers::Grxfsiz::RXFD.val(64));
        g.dieptxf0
            .write(registers::Dieptxf0::TX0FSA.val(64) + registers::Dieptxf0::TX0FD.val(16));

        self.device().dcfg.modify(registers::Dcfg::DAD.val(0));
        self.device().daint.set(0xFFFF_FFFF);

        registers::activate_in_ep(self.in_ep(0), self.ep0_size, 0, 0);
        registers::activate_out_ep(self.out_ep(0), self.ep0_size, 0);
        self.in_ep_size[0].set(self.ep0_size);
    }
}

impl HwIf for UsbFsDevice {
    fn init(&mut self) {
        let g = self.global();
        g.grstctl.modify(registers::Grstctl::CSRST::SET);
        for _ in 0..RESET_POLL_ATTEMPTS {
            if g.grstctl.get() & registers::Grstctl::CSRST::SET.value == 0 {
                break;
            }
        }
        for _ in 0..RESET_POLL_ATTEMPTS {
            if g.grstctl.get() & registers::Grstctl::AHBIDL::SET.value != 0 {
                break;
            }
        }

        g.gusbcfg.write(registers::Gusbcfg::FDMOD::SET + registers::Gusbcfg::TOCAL.val(0));
        g.gahbcfg.modify(registers::Gahbcfg::GINTMSK::SET);
        g.gintmsk.write(
            registers::Gintmsk::USBRST::SET
                + registers::Gintmsk::ENUMDNEM::SET
                + registers::Gintmsk::USBSUSPM::SET
                + registers::Gintmsk::WUIM::SET
                + registers::Gintmsk::SOFM::SET
                + registers::Gintmsk::RXFLVLM::SET
                + registers::Gintmsk::IEPINT::SET
                + registers::Gintmsk::OEPINT::SET,
        );

        self.reset_controller();
        self.device().dctl.modify(registers::Dctl::SDIS::CLEAR);
    }

    fn deinit(&mut self) {
        self.device().dctl.modify(registers::Dctl::SDIS::SET);
        self.global().gintmsk.set(0);
    }

    fn get_in_ep_size(&self, ep: u8) -> u16 {
        self.in_ep_size[ep as usize].get()
    }

    fn set_cfg(&mut self, descriptors: &DescriptorSet) {
        let max_ep = descriptors
            .endpoints()
            .map(|e| e.address.number)
            .max()
            .unwrap_or(0);
        let num_ep_pairs = (max_ep as usize + 1).min(MAX_EP_PAIRS).max(1);
        self.num_ep_pairs.set(num_ep_pairs as u8);

        let mut fifo_word = 64 + 16;
        for ep in 1..num_ep_pairs {
            let in_ep = descriptors
                .endpoints()
                .find(|e| e.address.number == ep as u8 && e.address.direction == Direction::In);
            let out_ep = descriptors
                .endpoints()
                .find(|e| e.address.number == ep as u8 && e.address.direction == Direction::Out);

            let transfer_type = in_ep.or(out_ep).map_or(0, |e| match e.transfer_type {
                usbd_core::descriptors::TransferType::Control => 0,
                usbd_core::descriptors::TransferType::Isochronous => 1,
                usbd_core::descriptors::TransferType::Bulk => 2,
                usbd_core::descriptors::TransferType::Interrupt => 3,
            });

            if let Some(e) = in_ep {
                let words = (e.max_packet_size as u32).div_ceil(4).max(16);
                self.global().dieptxf[ep - 1].write(
                    registers::Dieptxf::INEPTXSA.val(fifo_word) + registers::Dieptxf::INEPTXFD.val(words),
                );
                registers::activate_in_ep(self.in_ep(ep), e.max_packet_size, transfer_type, ep as u32);
                self.in_ep_size[ep].set(e.max_packet_size);
                fifo_word += words;
            }
            if let Some(e) = out_ep {
                registers::activate_out_ep(self.out_ep(ep), e.max_packet_size, transfer_type);
            }
        }
    }

    fn reset_cfg(&mut self) {
        for ep in 1..self.num_ep_pairs.get() as usize {
            registers::deactivate_in_ep(self.in_ep(ep));
            registers::deactivate_out_ep(self.out_ep(ep));
        }
    }

    fn set_ep_stall(&mut self, addr: EndpointAddress) {
        let ep = addr.number as usize;
        match addr.direction {
            Direction::In => self.in_ep(ep).diepctl.modify(registers::DiepctlX::STALL::SET),
            Direction::Out => self.out_ep(ep).doepctl.modify(registers::DoepctlX::STALL::SET),
        }
    }

    fn clr_ep_stall(&mut self, addr: EndpointAddress) {
        let ep = addr.number as usize;
        match addr.direction {
            Direction::In => self.in_ep(ep).diepctl.modify(registers::DiepctlX::STALL::CLEAR),
            Direction::Out => self.out_ep(ep).doepctl.modify(registers::DoepctlX::STALL::CLEAR),
        }
    }

    fn is_ep_stalled(&self, addr: EndpointAddress) -> bool {
        let ep = addr.number as usize;
        match addr.direction {
            Direction::In => self.in_ep(ep).diepctl.get() & registers::DiepctlX::STALL::SET.value != 0,
            Direction::Out => self.out_ep(ep).doepctl.get() & registers::DoepctlX::STALL::SET.value != 0,
        }
    }

    fn enable_rx(&mut self, ep: u8) {
        let ep = ep as usize;
        let mps = if ep == 0 { self.ep0_size } else { self.in_ep_size[ep].get() };
        self.out_ep(ep).doeptsiz.write(
            registers::Doeptsiz::PKTCNT.val(1) + registers::Doeptsiz::XFRSIZ.val(mps as u32),
        );
        self.out_ep(ep)
            .doepctl
            .modify(registers::DoepctlX::CNAK::SET + registers::DoepctlX::EPENA::SET);
    }

    fn read_rx(&mut self, ep: u8, dst: &mut [u8]) -> usize {
        let ep = ep as usize;
        let len = self.pending_rx_len[ep].get() as usize;
        self.fifo.pop(ep, dst, len)
    }

    fn start_tx(&mut self, ep: u8, state: &EndpointState, data: &[u8]) -> UsbdResult<()> {
        let ep_usize = ep as usize;
        let ep_size = self.get_in_ep_size(ep) as usize;
        let bcount = data.len().min(ep_size);
        self.in_ep(ep_usize).dieptsiz.write(
            registers::Dieptsiz::PKTCNT.val(1) + registers::Dieptsiz::XFRSIZ.val(bcount as u32),
        );
        self.in_ep(ep_usize)
            .diepctl
            .modify(registers::DiepctlX::CNAK::SET + registers::DiepctlX::EPENA::SET);
        self.fifo.push(ep_usize, &data[..bcount]);
        state.advance(bcount);
        Ok(())
    }

    /// This family requires the device address to be programmed before the
    /// status-in stage of `SET_ADDRESS` completes (`§6` post-status-in
    /// bookkeeping note).
    fn wants_address_before_status(&self) -> bool {
        true
    }

    fn set_address(&mut self, addr: u8) {
        self.device().dcfg.modify(registers::Dcfg::DAD.val(addr as u32));
    }

    fn irq(&mut self, events: &mut EventQueue) {
        let g = self.global();
        let gintsts = g.gintsts.get();

        if gintsts & registers::Gintsts::USBRST::SET.value != 0 {
            g.gintsts.set(registers::Gintsts::USBRST::SET.value);
            self.reset_controller();
            let _ = events.push(HwEvent::Reset);
            return;
        }

        if gintsts & registers::Gintsts::ENUMDNE::SET.value != 0 {
            g.gintsts.set(registers::Gintsts::ENUMDNE::SET.value);
        }

        if gintsts & registers::Gintsts::WKUPINT::SET.value != 0 {
            g.gintsts.set(registers::Gintsts::WKUPINT::SET.value);
            let _ = events.push(HwEvent::Resume);
        }

        if gintsts & registers::Gintsts::USBSUSP::SET.value != 0 {
            g.gintsts.set(registers::Gintsts::USBSUSP::SET.value);
            let _ = events.push(HwEvent::Suspend);
        }

        if gintsts & registers::Gintsts::SOF::SET.value != 0 {
            g.gintsts.set(registers::Gintsts::SOF::SET.value);
            let _ = events.push(HwEvent::Sof);
        }

        if gintsts & registers::Gintsts::RXFLVL::SET.value != 0 {
            let status = g.grxstsp.get();
            let epn = registers::grxstsp::epnum(status) as usize;
            let bcnt = registers::grxstsp::bcnt(status) as u16;
            let pktsts = registers::grxstsp::pktsts(status);

            match pktsts {
                registers::grxstsp::PKTSTS_OUT_DATA_RECEIVED => {
                    self.pending_rx_len[epn].set(bcnt);
                    self.pending_rx_setup[epn].set(false);
                    usbd_trace!("otg: OUT ep={} len={}", epn as u8, bcnt);
                    let _ = events.push(HwEvent::OutReceived { ep: epn as u8, is_setup: false, len: bcnt as usize });
                }
                registers::grxstsp::PKTSTS_SETUP_RECEIVED => {
                    self.pending_rx_len[epn].set(bcnt);
                    self.pending_rx_setup[epn].set(true);
                    let _ = events.push(HwEvent::OutReceived { ep: epn as u8, is_setup: true, len: bcnt as usize });
                }
                registers::grxstsp::PKTSTS_GLOBAL_OUT_NAK
                | registers::grxstsp::PKTSTS_OUT_TRANSFER_COMPLETE
                | registers::grxstsp::PKTSTS_SETUP_COMPLETE => {}
                other => usbd_debug!("otg: unexpected RXFLVL PKTSTS={}", other as u8),
            }
        }

        let daint = self.device().daint.get();
        if daint & 0xFFFF != 0 {
            for ep in 0..self.num_ep_pairs.get() as usize {
                if daint & (1 << ep) == 0 {
                    continue;
                }
                let diepint = self.in_ep(ep).diepint.get();
                if diepint & registers::DiepintX::XFRC::SET.value != 0 {
                    self.in_ep(ep).diepint.set(registers::DiepintX::XFRC::SET.value);
                    let _ = events.push(HwEvent::InSent { ep: ep as u8 });
                }
            }
        }
        if daint & 0xFFFF_0000 != 0 {
            for ep in 0..self.num_ep_pairs.get() as usize {
                if daint & (1 << (16 + ep)) == 0 {
                    continue;
                }
                let doepint = self.out_ep(ep).doepint.get();
                if doepint & registers::DoepintX::STUP::SET.value != 0 {
                    self.out_ep(ep).doepint.set(registers::DoepintX::STUP::SET.value);
                }
                if doepint & registers::DoepintX::XFRC::SET.value != 0 {
                    self.out_ep(ep).doepint.set(registers::DoepintX::XFRC::SET.value);
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::registers::fifo_offset;

    #[test]
    fn fifo_windows_are_4k_apart() {
        assert_eq!(fifo_offset(0), 0x1000);
        assert_eq!(fifo_offset(1), 0x2000);
    }
}
