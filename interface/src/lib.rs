// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![deny(unsafe_code, clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![deny(clippy::all)]

//! The interface abstraction layer.
//!
//! Two layered entities: `hw_interface` (a device instance, with a device
//! class and a hardware class) and `sw_interface` (the logical interface the
//! forwarding plane addresses, either the hardware default or a
//! sub-interface keyed by an id, typically a VLAN). Device classes and
//! hardware classes are open sets of vtable implementations registered at
//! startup.

mod classes;
mod counters;
mod ethernet;
mod interface;
mod main;
mod output;

pub use classes::{
    DeviceClass, DeviceClassIndex, DeviceClassSlot, HwClassIndex, HwClassSlot, HwInterfaceClass,
};
pub use counters::InterfaceCounters;
pub use ethernet::{EthernetHwClass, ETHERNET_HW_CLASS_NAME};
pub use interface::{
    HwFlags, HwIfIndex, HwInterface, SwFlags, SwIfIndex, SwInterface, SwInterfaceKind,
};
pub use main::{
    HwInterfaceHook, InterfaceError, InterfaceMain, SwInterfaceHook, SwInterfaceTemplate,
};
pub use output::InterfaceOutput;
