// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Push/pop access to the per-endpoint FIFO windows. Unlike the dual-port-RAM
//! families there is no addressable packet buffer: every word written to an
//! IN endpoint's FIFO register is queued by hardware for the next IN token,
//! and every word read from the RX FIFO pop register drains the queue
//! `GRXSTSP` just reported a status word for.

use core::ptr;

pub struct Fifo {
    base: *mut u8,
}

impl Fifo {
    /// # Safety
    /// `base` must be the peripheral base address this FIFO region is
    /// offset from, mapped and clocked for the driver's lifetime.
    pub const unsafe fn new(base: *mut u8) -> Self {
        Self { base }
    }

    fn window(&self, ep: usize) -> *mut u32 {
        unsafe { self.base.add(crate::registers::fifo_offset(ep)) as *mut u32 }
    }

    /// Write `data` to endpoint `ep`'s TX FIFO, padding the final word with
    /// zero bytes; the controller only DMAs out `xfrsiz` bytes as programmed
    /// in `DIEPTSIZn`, so the padding is never observed on the wire.
    pub fn push(&self, ep: usize, data: &[u8]) {
        let fifo = self.window(ep);
        for chunk in data.chunks(4) {
            let mut word = 0u32;
            for (i, byte) in chunk.iter().enumerate() {
                word |= (*byte as u32) << (i * 8);
            }
            unsafe { ptr::write_volatile(fifo, word) };
        }
    }

    /// Pop `len` bytes from the global RX FIFO into `dst`, returning the
    /// number of bytes copied. Must be called promptly after a `PKTSTS ==
    /// OutDataReceived` status word, before the next status word is popped.
    pub fn pop(&self, ep: usize, dst: &mut [u8], len: usize) -> usize {
        let fifo = self.window(ep);
        let n = len.min(dst.len());
        let mut i = 0;
        while i < n {
            let word = unsafe { ptr::read_volatile(fifo) };
            for b in 0..4 {
                if i + b < n {
                    dst[i + b] = (word >> (b * 8)) as u8;
                }
            }
            i += 4;
        }
        n
    }

    /// Discard `len` bytes from the global RX FIFO without copying them
    /// anywhere, for status words the Core has no buffer space for.
    pub fn discard(&self, ep: usize, len: usize) {
        let fifo = self.window(ep);
        let words = len.div_ceil(4);
        for _ in 0..words {
            unsafe { ptr::read_volatile(fifo) };
        }
    }
}
