// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Controller-agnostic USB 2.0 full-speed device-side engine.
//!
//! [`device::DeviceCore`] implements the control-transfer state machine and
//! standard-request dispatch (`§3`/`§4.2`/`§4.3`) against any back-end that
//! implements [`hwif::HwIf`], and hands class/vendor requests and endpoint
//! events out to a [`class::FunctionTable`] -- the composite CDC/MSC/
//! Printer/HID assembly that `usbd-classes` builds. This crate carries no
//! controller-specific code and no class-specific code; it is the part of
//! the original's monolith that is neither.
// Unit tests below run on the host and reach for `std::vec` for assertion
// convenience; real target builds stay `no_std`.
#![cfg_attr(not(test), no_std)]

pub mod cells;
pub mod class;
pub mod config;
pub mod descriptors;
pub mod device;
pub mod endpoint;
pub mod error;
pub mod fixed_vec;
pub mod hwif;
pub mod log;
pub mod setup;
mod standard;
pub mod state;

pub use class::{CoreHandle, CtrlResponse, FunctionTable, NoFunctions};
pub use config::UsbdConfig;
pub use descriptors::{
    ClassId, DescriptorBuilder, DescriptorSet, EndpointSizes, FeatureSet, InterfaceRoute,
};
pub use device::DeviceCore;
pub use endpoint::{Direction, EndpointAddress, EndpointState};
pub use error::{ErrorCode, UsbdResult};
pub use hwif::{EventQueue, HwEvent, HwIf, MAX_EVENTS_PER_POLL};
pub use setup::{Recipient, RequestDirection, RequestKind, SetupPacket, StandardRequest};
pub use state::{CtrlState, DeviceState, PreSuspendState};
