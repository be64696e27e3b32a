// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Structured logging shims.
//!
//! The core and class engines log through these macros rather than calling
//! `defmt` directly, so that a host-side (`std`, `#[cfg(test)]`) build
//! compiles every call site out to nothing instead of dragging in `defmt`'s
//! global logger machinery. Enable the `defmt-log` feature on a target build
//! to wire these through to `defmt::{error,warn,info,debug,trace}!`.

#[macro_export]
macro_rules! usbd_error {
    ($($arg:tt)*) => {
        #[cfg(feature = "defmt-log")]
        defmt::error!($($arg)*);
    };
}

#[macro_export]
macro_rules! usbd_warn {
    ($($arg:tt)*) => {
        #[cfg(feature = "defmt-log")]
        defmt::warn!($($arg)*);
    };
}

#[macro_export]
macro_rules! usbd_info {
    ($($arg:tt)*) => {
        #[cfg(feature = "defmt-log")]
        defmt::info!($($arg)*);
    };
}

#[macro_export]
macro_rules! usbd_debug {
    ($($arg:tt)*) => {
        #[cfg(feature = "defmt-log")]
        defmt::debug!($($arg)*);
    };
}

#[macro_export]
macro_rules! usbd_trace {
    ($($arg:tt)*) => {
        #[cfg(feature = "defmt-log")]
        defmt::trace!($($arg)*);
    };
}
