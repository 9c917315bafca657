// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Device-class and hw-interface-class vtables.
//!
//! The original system discovered these through linker sections; here each
//! driver module registers its implementation with the interface layer at
//! startup. The set is open, the vtable is fixed.

use crate::interface::{HwIfIndex, HwInterface, SwIfIndex};
use crate::main::{InterfaceError, InterfaceMain};
use graph::NodeFunction;
use id::Idx;
use net::eth::EthType;

/// Registry slot tag for device classes.
pub struct DeviceClassSlot;
/// Registry index of a device class.
pub type DeviceClassIndex = Idx<DeviceClassSlot>;

/// Registry slot tag for hardware interface classes.
pub struct HwClassSlot;
/// Registry index of a hardware interface class.
pub type HwClassIndex = Idx<HwClassSlot>;

/// How packets leave (and devices are managed for) one kind of device.
pub trait DeviceClass {
    /// Class name; interface names are `<name><instance>`.
    fn name(&self) -> &'static str;

    /// Build the tx-node function for one hardware interface instance.
    fn make_tx_function(&self, hw_if_index: HwIfIndex) -> Box<dyn NodeFunction>;

    /// Admin state is changing for an interface of this class.
    ///
    /// # Errors
    ///
    /// Implementations may refuse with an [`InterfaceError`].
    fn admin_up_down(&self, _hw_if_index: HwIfIndex, _up: bool) -> Result<(), InterfaceError> {
        Ok(())
    }

    /// Device-level counters should be reset.
    fn clear_counters(&self, _hw_if_index: HwIfIndex) {}

    /// Name for instance `device_instance` of this class.
    fn format_device_name(&self, device_instance: u32) -> String {
        format!("{}{}", self.name(), device_instance)
    }

    /// Human-readable device state.
    fn format_device(&self, hw: &HwInterface) -> String {
        format!("{} instance {}", self.name(), hw.device_instance)
    }

    /// An interface of this class is being created or deleted.
    ///
    /// # Errors
    ///
    /// Implementations may refuse creation with an [`InterfaceError`].
    fn interface_add_del(&self, _hw_if_index: HwIfIndex, _is_add: bool) -> Result<(), InterfaceError> {
        Ok(())
    }
}

/// What one kind of hardware interface's headers look like, and how to
/// build the L2 rewrite that reaches a neighbor through it.
pub trait HwInterfaceClass {
    /// Class name.
    fn name(&self) -> &'static str;

    /// Render a link-layer address.
    fn format_address(&self, address: &[u8]) -> String;

    /// Render a header previously produced by
    /// [`HwInterfaceClass::rewrite_for_sw_interface`].
    fn format_header(&self, header: &[u8]) -> String;

    /// Parse a link-layer address from its canonical rendering.
    ///
    /// # Errors
    ///
    /// Returns [`InterfaceError::InvalidArgument`] for malformed input.
    fn unformat_hw_address(&self, input: &str) -> Result<Vec<u8>, InterfaceError>;

    /// Parse a header from its canonical rendering; the inverse of
    /// [`HwInterfaceClass::format_header`].
    ///
    /// # Errors
    ///
    /// Returns [`InterfaceError::InvalidArgument`] for malformed input.
    fn unformat_header(&self, input: &str) -> Result<Vec<u8>, InterfaceError>;

    /// Build the L2 header bytes for L3 traffic of `l3_type` leaving
    /// `sw_if_index` toward `dst_address`.
    ///
    /// # Errors
    ///
    /// Returns [`InterfaceError`] when the interface is unknown or the
    /// result would exceed `max_bytes`.
    fn rewrite_for_sw_interface(
        &self,
        im: &InterfaceMain,
        sw_if_index: SwIfIndex,
        l3_type: EthType,
        dst_address: &[u8],
        max_bytes: usize,
    ) -> Result<Vec<u8>, InterfaceError>;

    /// As [`HwInterfaceClass::rewrite_for_sw_interface`], for the hardware
    /// interface itself.
    ///
    /// # Errors
    ///
    /// Returns [`InterfaceError`] as for the sw-interface variant.
    fn rewrite_for_hw_interface(
        &self,
        im: &InterfaceMain,
        hw_if_index: HwIfIndex,
        l3_type: EthType,
        dst_address: &[u8],
        max_bytes: usize,
    ) -> Result<Vec<u8>, InterfaceError>;

    /// Whether an interface may be moved to this class.
    fn is_valid_class_for_interface(&self, _im: &InterfaceMain, _hw_if_index: HwIfIndex) -> bool {
        true
    }

    /// The interface `hw_if_index` is moving between classes; migrate any
    /// per-instance state.
    fn hw_class_change(
        &self,
        _hw_if_index: HwIfIndex,
        _old_class: HwClassIndex,
        _new_class: HwClassIndex,
    ) {
    }

    /// An interface of this class is being created or deleted.
    ///
    /// # Errors
    ///
    /// Implementations may refuse creation with an [`InterfaceError`].
    fn interface_add_del(&self, _hw_if_index: HwIfIndex, _is_add: bool) -> Result<(), InterfaceError> {
        Ok(())
    }
}
