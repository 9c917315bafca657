// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Hw and sw interface records.

use crate::classes::{DeviceClassIndex, HwClassIndex};
use ahash::RandomState;
use bitflags::bitflags;
use graph::NodeIndex;
use id::Idx;
use std::collections::HashMap;
use std::fmt::Display;

/// Pool index of a hardware interface.
pub type HwIfIndex = Idx<HwInterface>;
/// Pool index of a software interface.
pub type SwIfIndex = Idx<SwInterface>;

bitflags! {
    /// Hardware interface flags.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct HwFlags: u32 {
        /// Carrier is up.
        const LINK_UP = 1 << 0;
    }
}

bitflags! {
    /// Software interface flags.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct SwFlags: u32 {
        /// Administratively enabled.
        const ADMIN_UP = 1 << 0;
        /// Packets received here go to the host stack instead of the fast
        /// path.
        const PUNT = 1 << 1;
    }
}

/// A hardware interface: one device instance bound to a device class (how
/// packets are transmitted) and a hardware class (what its headers look
/// like).
pub struct HwInterface {
    /// This interface's index.
    pub hw_if_index: HwIfIndex,
    /// Interface name, `<device-class><instance>` by convention.
    pub name: String,
    /// Transmit vtable.
    pub device_class: DeviceClassIndex,
    /// Instance among interfaces of this device class.
    pub device_instance: u32,
    /// Header vtable.
    pub hw_class: HwClassIndex,
    /// Instance data handle for the hardware class.
    pub hw_class_instance: u32,
    /// The default sw-interface created with this hw-interface.
    pub sw_if_index: SwIfIndex,
    /// Link-layer address.
    pub hw_address: Vec<u8>,
    /// Output node (counters, then tx).
    pub output_node: NodeIndex,
    /// Transmit node owned by the device class.
    pub tx_node: NodeIndex,
    /// Flags.
    pub flags: HwFlags,
    /// Smallest frame the device will emit without padding.
    pub min_packet_bytes: u32,
    /// Octets of per-packet overhead the device adds on the wire.
    pub per_packet_overhead_bytes: u32,
    /// Largest L3 payload per direction, indexed by `buffer::RX`/`TX`.
    pub max_l3_packet_bytes: [u32; 2],
    /// Sub-interfaces by their id.
    pub sub_interface_by_id: HashMap<u32, SwIfIndex, RandomState>,
}

impl Display for HwInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let link = if self.flags.contains(HwFlags::LINK_UP) {
            "up"
        } else {
            "down"
        };
        write!(f, "{} (hw {}, link {link})", self.name, self.hw_if_index)
    }
}

/// What a software interface is layered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwInterfaceKind {
    /// The default interface of a hardware interface.
    Hardware {
        /// Owning hardware interface.
        hw_if_index: HwIfIndex,
    },
    /// A logical interface keyed by `(parent, id)`.
    Sub {
        /// Sub-interface id (typically the VLAN id).
        id: u32,
    },
}

/// A software interface.
pub struct SwInterface {
    /// This interface's index.
    pub sw_if_index: SwIfIndex,
    /// Hardware or sub.
    pub kind: SwInterfaceKind,
    /// The supporting interface; a hardware-kind interface supports itself.
    /// Walking this reaches a hardware-kind interface in at most two hops.
    pub sup_sw_if_index: SwIfIndex,
    /// Flags.
    pub flags: SwFlags,
}

impl SwInterface {
    /// True iff administratively up.
    #[must_use]
    pub fn is_admin_up(&self) -> bool {
        self.flags.contains(SwFlags::ADMIN_UP)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn flags_default_down() {
        assert!(!SwFlags::default().contains(SwFlags::ADMIN_UP));
        assert!(!HwFlags::default().contains(HwFlags::LINK_UP));
    }
}
