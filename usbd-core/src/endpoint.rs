// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Endpoint addressing and per-direction transfer bookkeeping.

use core::cell::Cell;

/// Transfer direction of a single endpoint pipe.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum Direction {
    Out,
    In,
}

/// A 7-bit endpoint number plus direction, as carried on the wire (bit 7 of
/// the address byte encodes direction).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub struct EndpointAddress {
    pub number: u8,
    pub direction: Direction,
}

impl EndpointAddress {
    pub const CONTROL: EndpointAddress = EndpointAddress {
        number: 0,
        direction: Direction::Out,
    };

    pub const fn new(number: u8, direction: Direction) -> Self {
        Self { number, direction }
    }

    pub const fn from_byte(byte: u8) -> Self {
        Self {
            number: byte & 0x7F,
            direction: if byte & 0x80 != 0 {
                Direction::In
            } else {
                Direction::Out
            },
        }
    }

    pub const fn to_byte(self) -> u8 {
        self.number
            | match self.direction {
                Direction::Out => 0x00,
                Direction::In => 0x80,
            }
    }
}

/// Per-direction, per-endpoint transfer state.
///
/// The Core owns one of these per direction of every endpoint; it tracks an
/// in-flight transfer's remaining data without owning the buffer itself (the
/// buffer lives in whichever layer queued the transfer: the Core's own
/// request buffer for EP0, or a class engine's buffer for everything else).
pub struct EndpointState {
    /// Bytes remaining to send/receive in the current transfer.
    remaining: Cell<usize>,
    /// Whether a zero-length packet must follow once `remaining` reaches 0.
    send_zlp: Cell<bool>,
    /// Whether a transfer is currently in flight on this direction.
    busy: Cell<bool>,
}

impl EndpointState {
    pub const fn new() -> Self {
        Self {
            remaining: Cell::new(0),
            send_zlp: Cell::new(false),
            busy: Cell::new(false),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.get()
    }

    pub fn remaining(&self) -> usize {
        self.remaining.get()
    }

    pub fn needs_zlp(&self) -> bool {
        self.send_zlp.get()
    }

    /// Arm a new transfer of `len` bytes, optionally followed by a ZLP.
    pub fn arm(&self, len: usize, send_zlp: bool) {
        self.remaining.set(len);
        self.send_zlp.set(send_zlp);
        self.busy.set(true);
    }

    /// Record that `sent` bytes were consumed by one packet; clears the busy
    /// flag once both the data and any trailing ZLP have gone out.
    pub fn advance(&self, sent: usize) {
        let left = self.remaining.get().saturating_sub(sent);
        self.remaining.set(left);
        if left == 0 {
            if self.send_zlp.get() {
                self.send_zlp.set(false);
            } else {
                self.busy.set(false);
            }
        }
    }

    /// Mark the trailing ZLP (if any) as sent, completing the transfer.
    pub fn complete_zlp(&self) {
        self.send_zlp.set(false);
        self.busy.set(false);
    }

    /// Abort any in-flight transfer, as happens on bus reset/suspend or a
    /// `CLEAR_FEATURE(ENDPOINT_HALT)`.
    pub fn abort(&self) {
        self.remaining.set(0);
        self.send_zlp.set(false);
        self.busy.set(false);
    }
}

impl Default for EndpointState {
    fn default() -> Self {
        Self::new()
    }
}

/// A packet-memory mirror shared between a HWIF back-end and whichever
/// layer owns the endpoint (the Core for EP0, a class engine for everything
/// else): a fixed-size array of byte cells the HWIF copies hardware bytes
/// into/out of, mirroring the teacher's `Buffer64` shared-cell pattern.
pub struct EndpointBuffer<const N: usize> {
    pub buf: [Cell<u8>; N],
}

impl<const N: usize> EndpointBuffer<N> {
    pub fn new() -> Self {
        Self {
            buf: core::array::from_fn(|_| Cell::new(0)),
        }
    }

    pub fn len(&self) -> usize {
        N
    }

    pub fn is_empty(&self) -> bool {
        N == 0
    }

    /// Copy `src` into the shared buffer, up to its capacity.
    pub fn fill_from(&self, src: &[u8]) -> usize {
        let n = src.len().min(N);
        for (cell, byte) in self.buf.iter().zip(src.iter()).take(n) {
            cell.set(*byte);
        }
        n
    }

    /// Copy up to `len` bytes out of the shared buffer into `dst`.
    pub fn drain_into(&self, dst: &mut [u8], len: usize) -> usize {
        let n = len.min(N).min(dst.len());
        for (byte, cell) in dst.iter_mut().zip(self.buf.iter()).take(n) {
            *byte = cell.get();
        }
        n
    }
}

impl<const N: usize> Default for EndpointBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

pub type Buffer8 = EndpointBuffer<8>;
pub type Buffer10 = EndpointBuffer<10>;
pub type Buffer64 = EndpointBuffer<64>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn address_round_trips() {
        let addr = EndpointAddress::new(3, Direction::In);
        assert_eq!(addr.to_byte(), 0x83);
        assert_eq!(EndpointAddress::from_byte(0x83), addr);
    }

    #[test]
    fn arm_and_drain_without_zlp() {
        let ep = EndpointState::new();
        ep.arm(18, false);
        assert!(ep.is_busy());
        ep.advance(18);
        assert!(!ep.is_busy());
        assert_eq!(ep.remaining(), 0);
    }

    #[test]
    fn arm_and_drain_with_trailing_zlp() {
        let ep = EndpointState::new();
        ep.arm(64, true);
        ep.advance(64);
        // data exhausted, but ZLP still pending: stays busy.
        assert!(ep.is_busy());
        assert!(ep.needs_zlp());
        ep.advance(0);
        assert!(!ep.is_busy());
        assert!(!ep.needs_zlp());
    }

    #[test]
    fn endpoint_buffer_fill_and_drain() {
        let buf: Buffer64 = Buffer64::new();
        let n = buf.fill_from(&[1, 2, 3]);
        assert_eq!(n, 3);
        let mut out = [0u8; 3];
        let drained = buf.drain_into(&mut out, 3);
        assert_eq!(drained, 3);
        assert_eq!(out, [1, 2, 3]);
    }

    #[test]
    fn abort_clears_everything() {
        let ep = EndpointState::new();
        ep.arm(64, true);
        ep.abort();
        assert!(!ep.is_busy());
        assert_eq!(ep.remaining(), 0);
        assert!(!ep.needs_zlp());
    }
}
