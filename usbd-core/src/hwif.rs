// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The hardware-interface contract (`§4.1`).
//!
//! `HwIf` is the polymorphic operation set the Core drives any of the three
//! controller families through. It is written in terms of behaviour, not
//! register encodings, and is object-safe so the Core can hold it as
//! `&mut dyn HwIf` without becoming generic over every backend that ever
//! gets linked in.

use crate::endpoint::{EndpointAddress, EndpointState};
use crate::error::UsbdResult;
use crate::fixed_vec::FixedVec;

/// One event surfaced by a controller's `irq` entry point. A single poll can
/// surface more than one (e.g. a SETUP and a prior IN-complete coalesced by
/// the time software gets around to draining the controller), so `irq`
/// fills a caller-supplied queue rather than returning a single event.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum HwEvent {
    Reset,
    Suspend,
    Resume,
    Sof,
    /// A packet was received on OUT endpoint `ep` (or SETUP if
    /// `is_setup`), of `len` bytes, still sitting in the controller's
    /// packet memory/FIFO waiting to be drained with `read_rx`.
    OutReceived { ep: u8, is_setup: bool, len: usize },
    /// A previously-started IN transfer (including any trailing ZLP)
    /// finished transmitting on endpoint `ep`.
    InSent { ep: u8 },
}

/// Upper bound on events a single `irq` call may surface. Generous for a
/// full-speed bus: at most one SETUP/OUT and one IN-complete per endpoint
/// pair plus one bus event, coalesced between polls.
pub const MAX_EVENTS_PER_POLL: usize = 16;

pub type EventQueue = FixedVec<HwEvent, MAX_EVENTS_PER_POLL>;

/// Polymorphic operation set a controller family implements (`§4.1`).
///
/// Every backend must preserve: exactly one `out_ep_handler`-shaped event
/// per received packet and one `in_ep_handler`-shaped event per completed
/// IN transfer; SETUP packets delivered as a single 8-byte burst with
/// `is_setup = true`; `start_tx` re-entrant across endpoints but not across
/// calls on the same endpoint while its `EndpointState` is busy.
pub trait HwIf {
    /// Reset the controller, clear all endpoints, enable device-level
    /// interrupts, arm the pull-up (attach).
    fn init(&mut self);

    /// Remove the pull-up (detach), mask all interrupts, power down.
    fn deinit(&mut self);

    /// Configured max-packet size for IN endpoint `ep`. `0` for an endpoint
    /// this backend has not configured (e.g. before `set_cfg`).
    fn get_in_ep_size(&self, ep: u8) -> u16;

    /// For every non-control endpoint pair the descriptor set declares,
    /// allocate buffer space, program endpoint type/size, prime OUT
    /// endpoints with a receive buffer, set IN endpoints to NAK. Idempotent.
    fn set_cfg(&mut self, descriptors: &crate::descriptors::DescriptorSet);

    /// Place every non-control endpoint back into a NAK/disabled state;
    /// discard in-flight IN transfers.
    fn reset_cfg(&mut self);

    fn set_ep_stall(&mut self, addr: EndpointAddress);

    /// Also clears the data-toggle, per `§4.1`.
    fn clr_ep_stall(&mut self, addr: EndpointAddress);

    fn is_ep_stalled(&self, addr: EndpointAddress) -> bool;

    /// Arm OUT endpoint `ep` to accept the next packet into the currently
    /// configured receive buffer.
    fn enable_rx(&mut self, ep: u8);

    /// Drain up to `dst.len()` bytes of the packet most recently reported
    /// by an `OutReceived` event on `ep` into `dst`. Returns the number of
    /// bytes copied.
    fn read_rx(&mut self, ep: u8, dst: &mut [u8]) -> usize;

    /// Begin or continue an IN transfer on `ep`. `data` must be the full
    /// *remaining* slice of the transfer (i.e. already advanced past
    /// whatever `state.remaining()` has already accounted for) -- the
    /// implementation sends one packet of up to `get_in_ep_size(ep)` bytes
    /// (a full packet, a short packet, or a ZLP when `data` is empty and
    /// `state.needs_zlp()`), then calls `state.advance(..)` itself. Callers
    /// must not invoke this again on the same endpoint while `state.is_busy()`
    /// except from the `InSent` event this call's previous invocation
    /// produced.
    fn start_tx(&mut self, ep: u8, state: &EndpointState, data: &[u8]) -> UsbdResult<()>;

    /// Whether `SET_ADDRESS` must be programmed into the controller before
    /// the status-in ZLP is sent (true for FIFO/OTG controllers) rather
    /// than after it completes (dual-port-RAM controllers).
    fn wants_address_before_status(&self) -> bool {
        false
    }

    fn set_address(&mut self, addr: u8);

    /// Entry point from the controller's interrupt (or polling) path.
    /// Reads hardware status and appends any events since the last call.
    fn irq(&mut self, events: &mut EventQueue);
}
