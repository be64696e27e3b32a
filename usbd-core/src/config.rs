// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Run-time-configurable pieces of a device build (`§1a` Configuration).
//!
//! The feature-flag-shaped choices (which classes are compiled in, how many
//! CDC channels, endpoint numbering) are resolved once, at
//! [`crate::descriptors::DescriptorBuilder::build`] time, and are baked
//! into the `DescriptorSet`/routing table. `UsbdConfig` only centralizes the
//! handful of values that stay variable without affecting that layout: the
//! USB IDs and the strings a board wants to advertise.

/// VID/PID/string identity of a device build. Doesn't affect endpoint
/// layout or interface numbering, only the bytes the device and string
/// descriptors report.
#[derive(Debug, Copy, Clone)]
pub struct UsbdConfig {
    pub vendor_id: u16,
    pub product_id: u16,
    pub manufacturer: &'static str,
    pub product: &'static str,
    pub serial_number: &'static str,
}

impl Default for UsbdConfig {
    fn default() -> Self {
        Self {
            vendor_id: 0x1209, // pid.codes test VID
            product_id: 0x0001,
            manufacturer: "gbm",
            product: "USB Device Stack",
            serial_number: "0001",
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_config_is_well_formed() {
        let cfg = UsbdConfig::default();
        assert!(!cfg.manufacturer.is_empty());
        assert!(!cfg.product.is_empty());
    }
}
