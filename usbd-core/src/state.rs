// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Device and control-transfer (EP0) state registers.

/// Overall device lifecycle state (`§3` Device state).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum DeviceState {
    Default,
    Addressed,
    Configured,
    Suspended,
}

/// The state the device was in before a bus-idle suspend, so resume can
/// restore it exactly (`§8` scenario 6: Suspended -> resume must return to
/// the prior Addressed/Configured state).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum PreSuspendState {
    Default,
    Addressed,
    Configured,
}

impl From<PreSuspendState> for DeviceState {
    fn from(s: PreSuspendState) -> Self {
        match s {
            PreSuspendState::Default => DeviceState::Default,
            PreSuspendState::Addressed => DeviceState::Addressed,
            PreSuspendState::Configured => DeviceState::Configured,
        }
    }
}

/// EP0 control-transfer state machine (`§3` Control-transfer state).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub enum CtrlState {
    Idle,
    Setup,
    DataIn,
    DataOut,
    StatusIn,
    StatusOut,
    Stall,
}
