// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Class protocol engines for the gbm USB device stack.
//!
//! Each module implements one class's control-request and bulk/interrupt
//! data-path behaviour (`§4.4`-`§4.7`) against `usbd-core`'s [`CoreHandle`]
//! abstraction, independent of which HWIF back-end is in use. [`composite`]
//! assembles however many of these a board compiles in behind a single
//! [`usbd_core::class::FunctionTable`].
// Unit tests below run on the host; real target builds stay `no_std`.
#![cfg_attr(not(test), no_std)]

pub mod cdc;
pub mod composite;
pub mod hid;
pub mod msc;
pub mod printer;

pub use cdc::{CdcChannel, CdcEngine, CdcHooks, LineCoding};
pub use composite::{Application, Composite};
pub use hid::{HidEngine, HidHooks};
pub use msc::{MscEngine, ScsiMedia};
pub use printer::{PrinterEngine, PrinterHooks};
