// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Crate-wide error taxonomy.
//!
//! Every fallible HWIF and Core primitive returns `Result<T, ErrorCode>`.
//! Class engines reuse this same enum rather than inventing their own, so a
//! `ClassEngine::class_request` can propagate a HWIF failure without a
//! translation layer.

/// Local fault codes returned by HWIF and Core primitives.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum ErrorCode {
    /// The operation cannot complete right now (e.g. a transfer already in
    /// flight on this endpoint, or a FIFO is full); retry later.
    Busy,
    /// Generic failure with no more specific code.
    Fail,
    /// An argument was out of range or otherwise invalid.
    Inval,
    /// The request is recognised but not supported by this build.
    NoSupport,
    /// A buffer or transfer length did not match what was expected.
    Size,
    /// The requested resource is already reserved by something else.
    Reserve,
    /// The requested state is already in effect.
    Already,
    /// The controller is powered down or not yet initialised.
    Off,
    /// No such device/endpoint/function exists.
    NoDevice,
    /// Out of buffer space.
    NoMem,
    /// The operation was cancelled (bus reset/suspend tore down state).
    Cancel,
    /// The peer did not acknowledge in time.
    NoAck,
}

pub type UsbdResult<T> = Result<T, ErrorCode>;
