// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The interface layer's pools, registries, and control operations.

use crate::classes::{DeviceClass, DeviceClassIndex, HwClassIndex, HwInterfaceClass};
use crate::counters::InterfaceCounters;
use crate::interface::{
    HwFlags, HwIfIndex, HwInterface, SwFlags, SwIfIndex, SwInterface, SwInterfaceKind,
};
use crate::output::InterfaceOutput;
use ahash::RandomState;
use graph::{GraphError, NodeDesc, Runtime};
use net::eth::EthType;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::debug;

/// Interface control-path failures, in the four canonical flavors.
#[derive(Debug, thiserror::Error)]
pub enum InterfaceError {
    /// The index does not name a live object.
    #[error("not found")]
    NotFound,
    /// The operation conflicts with live state.
    #[error("in use: {0}")]
    InUse(&'static str),
    /// The request itself is malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// Graph-level failure while wiring nodes.
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Template for creating a sub-interface.
#[derive(Debug, Clone, Copy)]
pub struct SwInterfaceTemplate {
    /// Parent; must be a hardware-kind sw-interface.
    pub sup_sw_if_index: SwIfIndex,
    /// Sub-interface id, typically the VLAN id.
    pub sub_id: u32,
}

/// A hook invoked when a hw-interface is created or deleted, or when its
/// link state changes.
pub type HwInterfaceHook = Box<dyn FnMut(&mut InterfaceMain, HwIfIndex, bool)>;
/// A hook invoked when a sw-interface is created or deleted, or when its
/// admin state changes.
pub type SwInterfaceHook = Box<dyn FnMut(&mut InterfaceMain, SwIfIndex, bool)>;

#[derive(Default)]
struct Hooks {
    hw_add_del: Vec<HwInterfaceHook>,
    hw_link_up_down: Vec<HwInterfaceHook>,
    sw_add_del: Vec<SwInterfaceHook>,
    sw_admin_up_down: Vec<SwInterfaceHook>,
}

/// The interface layer.
pub struct InterfaceMain {
    device_classes: Vec<Rc<dyn DeviceClass>>,
    hw_classes: Vec<Rc<dyn HwInterfaceClass>>,
    hw_interfaces: Vec<Option<HwInterface>>,
    sw_interfaces: Vec<Option<SwInterface>>,
    /// Per-interface counters; shared with output and input nodes.
    pub counters: Rc<RefCell<InterfaceCounters>>,
    hooks: Hooks,
}

macro_rules! fire_hooks {
    ($self:ident, $list:ident, $index:expr, $flag:expr) => {{
        let mut taken = std::mem::take(&mut $self.hooks.$list);
        for hook in &mut taken {
            hook($self, $index, $flag);
        }
        let added = std::mem::replace(&mut $self.hooks.$list, taken);
        $self.hooks.$list.extend(added);
    }};
}

impl InterfaceMain {
    /// An empty interface layer with counters sharded for `n_workers`.
    #[must_use]
    pub fn new(n_workers: usize) -> Self {
        Self {
            device_classes: Vec::new(),
            hw_classes: Vec::new(),
            hw_interfaces: Vec::new(),
            sw_interfaces: Vec::new(),
            counters: Rc::new(RefCell::new(InterfaceCounters::new(n_workers))),
            hooks: Hooks::default(),
        }
    }

    /// Register a device class implementation.
    pub fn register_device_class(&mut self, class: Rc<dyn DeviceClass>) -> DeviceClassIndex {
        let index = DeviceClassIndex::new(self.device_classes.len() as u32);
        debug!(%index, name = class.name(), "register device class");
        self.device_classes.push(class);
        index
    }

    /// Register a hardware interface class implementation.
    pub fn register_hw_class(&mut self, class: Rc<dyn HwInterfaceClass>) -> HwClassIndex {
        let index = HwClassIndex::new(self.hw_classes.len() as u32);
        debug!(%index, name = class.name(), "register hw class");
        self.hw_classes.push(class);
        index
    }

    /// The device class at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`InterfaceError::NotFound`] for a stale index.
    pub fn device_class(&self, index: DeviceClassIndex) -> Result<Rc<dyn DeviceClass>, InterfaceError> {
        self.device_classes
            .get(index.as_usize())
            .cloned()
            .ok_or(InterfaceError::NotFound)
    }

    /// The hardware class at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`InterfaceError::NotFound`] for a stale index.
    pub fn hw_class(&self, index: HwClassIndex) -> Result<Rc<dyn HwInterfaceClass>, InterfaceError> {
        self.hw_classes
            .get(index.as_usize())
            .cloned()
            .ok_or(InterfaceError::NotFound)
    }

    fn alloc_hw_slot(&mut self) -> HwIfIndex {
        match self.hw_interfaces.iter().position(Option::is_none) {
            Some(i) => HwIfIndex::new(i as u32),
            None => {
                self.hw_interfaces.push(None);
                HwIfIndex::new((self.hw_interfaces.len() - 1) as u32)
            }
        }
    }

    fn alloc_sw_slot(&mut self) -> SwIfIndex {
        match self.sw_interfaces.iter().position(Option::is_none) {
            Some(i) => SwIfIndex::new(i as u32),
            None => {
                self.sw_interfaces.push(None);
                SwIfIndex::new((self.sw_interfaces.len() - 1) as u32)
            }
        }
    }

    /// Borrow a hardware interface.
    ///
    /// # Errors
    ///
    /// Returns [`InterfaceError::NotFound`] for a stale index.
    pub fn hw(&self, index: HwIfIndex) -> Result<&HwInterface, InterfaceError> {
        self.hw_interfaces
            .get(index.as_usize())
            .and_then(Option::as_ref)
            .ok_or(InterfaceError::NotFound)
    }

    /// Borrow a hardware interface mutably.
    ///
    /// # Errors
    ///
    /// Returns [`InterfaceError::NotFound`] for a stale index.
    pub fn hw_mut(&mut self, index: HwIfIndex) -> Result<&mut HwInterface, InterfaceError> {
        self.hw_interfaces
            .get_mut(index.as_usize())
            .and_then(Option::as_mut)
            .ok_or(InterfaceError::NotFound)
    }

    /// Borrow a software interface.
    ///
    /// # Errors
    ///
    /// Returns [`InterfaceError::NotFound`] for a stale index.
    pub fn sw(&self, index: SwIfIndex) -> Result<&SwInterface, InterfaceError> {
        self.sw_interfaces
            .get(index.as_usize())
            .and_then(Option::as_ref)
            .ok_or(InterfaceError::NotFound)
    }

    /// Borrow a software interface mutably.
    ///
    /// # Errors
    ///
    /// Returns [`InterfaceError::NotFound`] for a stale index.
    pub fn sw_mut(&mut self, index: SwIfIndex) -> Result<&mut SwInterface, InterfaceError> {
        self.sw_interfaces
            .get_mut(index.as_usize())
            .and_then(Option::as_mut)
            .ok_or(InterfaceError::NotFound)
    }

    /// All live sw-interfaces.
    pub fn sw_interfaces(&self) -> impl Iterator<Item = &SwInterface> {
        self.sw_interfaces.iter().filter_map(Option::as_ref)
    }

    /// Resolve the supporting hardware interface of `sw`, in at most two
    /// hops.
    ///
    /// # Errors
    ///
    /// Returns [`InterfaceError::NotFound`] for a stale index.
    pub fn sup_hw(&self, sw: SwIfIndex) -> Result<HwIfIndex, InterfaceError> {
        let mut cur = self.sw(sw)?;
        for _ in 0..2 {
            if let SwInterfaceKind::Hardware { hw_if_index } = cur.kind {
                return Ok(hw_if_index);
            }
            cur = self.sw(cur.sup_sw_if_index)?;
        }
        Err(InterfaceError::InvalidArgument("sup chain too deep"))
    }

    /// Create a hardware interface and its default sw-interface, wiring its
    /// output and tx nodes into the graph.
    ///
    /// # Errors
    ///
    /// Returns [`InterfaceError`] for unknown classes, or propagates a
    /// class callback's refusal.
    pub fn register_interface(
        &mut self,
        rt: &mut Runtime,
        device_class: DeviceClassIndex,
        device_instance: u32,
        hw_class: HwClassIndex,
        hw_class_instance: u32,
        hw_address: Vec<u8>,
    ) -> Result<HwIfIndex, InterfaceError> {
        let dc = self.device_class(device_class)?;
        let hc = self.hw_class(hw_class)?;
        let name = dc.format_device_name(device_instance);

        let hw_if_index = self.alloc_hw_slot();
        let sw_if_index = self.alloc_sw_slot();

        let tx_node = rt.register_node(
            NodeDesc::internal(&format!("{name}-tx")),
            dc.make_tx_function(hw_if_index),
        )?;
        let output_node = rt.register_node(
            NodeDesc::internal(&format!("{name}-output")),
            Box::new(InterfaceOutput::new(self.counters.clone(), sw_if_index)),
        )?;
        rt.add_next(output_node, tx_node)?;

        self.sw_interfaces[sw_if_index.as_usize()] = Some(SwInterface {
            sw_if_index,
            kind: SwInterfaceKind::Hardware { hw_if_index },
            sup_sw_if_index: sw_if_index,
            flags: SwFlags::default(),
        });
        self.hw_interfaces[hw_if_index.as_usize()] = Some(HwInterface {
            hw_if_index,
            name: name.clone(),
            device_class,
            device_instance,
            hw_class,
            hw_class_instance,
            sw_if_index,
            hw_address,
            output_node,
            tx_node,
            flags: HwFlags::default(),
            min_packet_bytes: 0,
            per_packet_overhead_bytes: 0,
            max_l3_packet_bytes: [1500, 1500],
            sub_interface_by_id: HashMap::with_hasher(RandomState::with_seed(0)),
        });
        self.counters.borrow_mut().validate(sw_if_index);

        debug!(%hw_if_index, %sw_if_index, %name, "register interface");
        dc.interface_add_del(hw_if_index, true)?;
        hc.interface_add_del(hw_if_index, true)?;
        fire_hooks!(self, hw_add_del, hw_if_index, true);
        fire_hooks!(self, sw_add_del, sw_if_index, true);
        Ok(hw_if_index)
    }

    /// Delete a hardware interface, its sub-interfaces, and its nodes.
    /// The tx-node's name is reserved for reuse by a later registration.
    ///
    /// # Errors
    ///
    /// Returns [`InterfaceError::NotFound`] for a stale index.
    pub fn delete_hw_interface(
        &mut self,
        rt: &mut Runtime,
        hw_if_index: HwIfIndex,
    ) -> Result<(), InterfaceError> {
        let hw = self.hw(hw_if_index)?;
        let dc = self.device_class(hw.device_class)?;
        let hc = self.hw_class(hw.hw_class)?;
        let default_sw = hw.sw_if_index;
        let output_node = hw.output_node;
        let tx_node = hw.tx_node;
        let subs: Vec<SwIfIndex> = hw.sub_interface_by_id.values().copied().collect();

        for sub in subs {
            fire_hooks!(self, sw_add_del, sub, false);
            self.sw_interfaces[sub.as_usize()] = None;
        }
        fire_hooks!(self, sw_add_del, default_sw, false);
        dc.interface_add_del(hw_if_index, false)?;
        hc.interface_add_del(hw_if_index, false)?;
        fire_hooks!(self, hw_add_del, hw_if_index, false);

        rt.retire_node(output_node);
        rt.retire_node(tx_node);
        self.sw_interfaces[default_sw.as_usize()] = None;
        self.hw_interfaces[hw_if_index.as_usize()] = None;
        debug!(%hw_if_index, "delete interface");
        Ok(())
    }

    /// Create a sub-interface under a hardware-kind parent.
    ///
    /// # Errors
    ///
    /// Returns [`InterfaceError::InUse`] when the id is taken, or
    /// [`InterfaceError::InvalidArgument`] when the parent is not a
    /// hardware-kind interface.
    pub fn create_sw_interface(
        &mut self,
        template: SwInterfaceTemplate,
    ) -> Result<SwIfIndex, InterfaceError> {
        let sup = self.sw(template.sup_sw_if_index)?;
        let SwInterfaceKind::Hardware { hw_if_index } = sup.kind else {
            return Err(InterfaceError::InvalidArgument(
                "sub-interface parent must be a hardware interface",
            ));
        };
        if self
            .hw(hw_if_index)?
            .sub_interface_by_id
            .contains_key(&template.sub_id)
        {
            return Err(InterfaceError::InUse("sub-interface id"));
        }
        let sw_if_index = self.alloc_sw_slot();
        self.sw_interfaces[sw_if_index.as_usize()] = Some(SwInterface {
            sw_if_index,
            kind: SwInterfaceKind::Sub {
                id: template.sub_id,
            },
            sup_sw_if_index: template.sup_sw_if_index,
            flags: SwFlags::default(),
        });
        self.hw_mut(hw_if_index)?
            .sub_interface_by_id
            .insert(template.sub_id, sw_if_index);
        self.counters.borrow_mut().validate(sw_if_index);
        debug!(%sw_if_index, sub_id = template.sub_id, "create sub-interface");
        fire_hooks!(self, sw_add_del, sw_if_index, true);
        Ok(sw_if_index)
    }

    /// Set a hardware interface's flags, firing link hooks on change.
    ///
    /// # Errors
    ///
    /// Returns [`InterfaceError::NotFound`] for a stale index.
    pub fn set_hw_interface_flags(
        &mut self,
        hw_if_index: HwIfIndex,
        flags: HwFlags,
    ) -> Result<(), InterfaceError> {
        let hw = self.hw_mut(hw_if_index)?;
        let was_up = hw.flags.contains(HwFlags::LINK_UP);
        hw.flags = flags;
        let is_up = flags.contains(HwFlags::LINK_UP);
        if was_up != is_up {
            debug!(%hw_if_index, link_up = is_up, "link change");
            fire_hooks!(self, hw_link_up_down, hw_if_index, is_up);
        }
        Ok(())
    }

    /// Set a software interface's flags, firing admin hooks on change and
    /// propagating to the device class for hardware-kind interfaces.
    ///
    /// # Errors
    ///
    /// Returns [`InterfaceError::NotFound`] for a stale index, or a device
    /// class refusal.
    pub fn set_sw_interface_flags(
        &mut self,
        sw_if_index: SwIfIndex,
        flags: SwFlags,
    ) -> Result<(), InterfaceError> {
        let sw = self.sw_mut(sw_if_index)?;
        let was_up = sw.flags.contains(SwFlags::ADMIN_UP);
        let kind = sw.kind;
        sw.flags = flags;
        let is_up = flags.contains(SwFlags::ADMIN_UP);
        if was_up != is_up {
            if let SwInterfaceKind::Hardware { hw_if_index } = kind {
                let dc = self.device_class(self.hw(hw_if_index)?.device_class)?;
                dc.admin_up_down(hw_if_index, is_up)?;
            }
            debug!(%sw_if_index, admin_up = is_up, "admin change");
            fire_hooks!(self, sw_admin_up_down, sw_if_index, is_up);
        }
        Ok(())
    }

    /// Move a hardware interface to a new hardware class. Refused while
    /// any of its sub-interfaces is admin-up.
    ///
    /// # Errors
    ///
    /// Returns [`InterfaceError::InUse`] when a sub-interface is admin-up,
    /// or [`InterfaceError::InvalidArgument`] when the class refuses the
    /// interface.
    pub fn set_hw_interface_class(
        &mut self,
        hw_if_index: HwIfIndex,
        new_class: HwClassIndex,
    ) -> Result<(), InterfaceError> {
        let nc = self.hw_class(new_class)?;
        let hw = self.hw(hw_if_index)?;
        let old_class = hw.hw_class;
        for sub in hw.sub_interface_by_id.values() {
            if self.sw(*sub)?.is_admin_up() {
                return Err(InterfaceError::InUse("sub-interface is admin-up"));
            }
        }
        if !nc.is_valid_class_for_interface(self, hw_if_index) {
            return Err(InterfaceError::InvalidArgument(
                "class rejects this interface",
            ));
        }
        let oc = self.hw_class(old_class)?;
        oc.hw_class_change(hw_if_index, old_class, new_class);
        nc.hw_class_change(hw_if_index, old_class, new_class);
        self.hw_mut(hw_if_index)?.hw_class = new_class;
        debug!(%hw_if_index, "hw class change");
        Ok(())
    }

    /// Build the L2 rewrite bytes for `l3_type` traffic leaving
    /// `sw_if_index` toward `dst_address`, through the supporting
    /// hardware interface's class.
    ///
    /// # Errors
    ///
    /// Propagates class failures and stale indices.
    pub fn rewrite_for_sw_interface(
        &self,
        sw_if_index: SwIfIndex,
        l3_type: EthType,
        dst_address: &[u8],
        max_bytes: usize,
    ) -> Result<Vec<u8>, InterfaceError> {
        let hw = self.hw(self.sup_hw(sw_if_index)?)?;
        let class = self.hw_class(hw.hw_class)?;
        class.rewrite_for_sw_interface(self, sw_if_index, l3_type, dst_address, max_bytes)
    }

    /// Register an interface add/del hook.
    pub fn add_hw_add_del_hook(&mut self, hook: HwInterfaceHook) {
        self.hooks.hw_add_del.push(hook);
    }

    /// Register a link up/down hook.
    pub fn add_hw_link_up_down_hook(&mut self, hook: HwInterfaceHook) {
        self.hooks.hw_link_up_down.push(hook);
    }

    /// Register a sw-interface add/del hook.
    pub fn add_sw_add_del_hook(&mut self, hook: SwInterfaceHook) {
        self.hooks.sw_add_del.push(hook);
    }

    /// Register an admin up/down hook.
    pub fn add_sw_admin_up_down_hook(&mut self, hook: SwInterfaceHook) {
        self.hooks.sw_admin_up_down.push(hook);
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod test {
    use super::*;
    use crate::ethernet::EthernetHwClass;
    use buffer::{BufferConfig, BufferPool};
    use graph::{DispatchCtx, Frame, NodeFunction};

    /// Device class whose tx node just frees everything it is given.
    struct NullDevice;

    struct NullTx;
    impl NodeFunction for NullTx {
        fn run(&mut self, ctx: &mut DispatchCtx<'_>, frame: &Frame) -> u32 {
            ctx.pool().free(&frame.buffers, true);
            frame.n_vectors() as u32
        }
    }

    impl DeviceClass for NullDevice {
        fn name(&self) -> &'static str {
            "null"
        }
        fn make_tx_function(&self, _hw: HwIfIndex) -> Box<dyn graph::NodeFunction> {
            Box::new(NullTx)
        }
    }

    fn setup() -> (Runtime, InterfaceMain, HwIfIndex) {
        let rt = BufferPool::new(BufferConfig::default());
        let mut rt = Runtime::new_with_manual_clock(rt);
        let mut im = InterfaceMain::new(1);
        let dc = im.register_device_class(Rc::new(NullDevice));
        let hc = im.register_hw_class(Rc::new(EthernetHwClass));
        let hw = im
            .register_interface(&mut rt, dc, 0, hc, 0, vec![0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff])
            .unwrap();
        (rt, im, hw)
    }

    #[test]
    fn register_creates_default_sw_and_nodes() {
        let (rt, im, hw) = setup();
        let hwi = im.hw(hw).unwrap();
        assert_eq!(hwi.name, "null0");
        assert!(rt.node_by_name("null0-tx").is_some());
        assert!(rt.node_by_name("null0-output").is_some());
        let sw = im.sw(hwi.sw_if_index).unwrap();
        assert!(matches!(sw.kind, SwInterfaceKind::Hardware { hw_if_index } if hw_if_index == hw));
        assert_eq!(im.sup_hw(sw.sw_if_index).unwrap(), hw);
    }

    #[test]
    fn sub_interfaces_register_and_resolve() {
        let (_rt, mut im, hw) = setup();
        let parent = im.hw(hw).unwrap().sw_if_index;
        let sub = im
            .create_sw_interface(SwInterfaceTemplate {
                sup_sw_if_index: parent,
                sub_id: 200,
            })
            .unwrap();
        assert_eq!(im.sup_hw(sub).unwrap(), hw);
        assert_eq!(im.hw(hw).unwrap().sub_interface_by_id.get(&200), Some(&sub));
        // duplicate id refused
        assert!(matches!(
            im.create_sw_interface(SwInterfaceTemplate {
                sup_sw_if_index: parent,
                sub_id: 200,
            }),
            Err(InterfaceError::InUse(_))
        ));
        // sub of a sub refused
        assert!(matches!(
            im.create_sw_interface(SwInterfaceTemplate {
                sup_sw_if_index: sub,
                sub_id: 1,
            }),
            Err(InterfaceError::InvalidArgument(_))
        ));
    }

    #[test]
    fn link_flags_fire_each_hook_exactly_once_per_transition() {
        let (_rt, mut im, hw) = setup();
        let log: Rc<RefCell<Vec<bool>>> = Rc::new(RefCell::new(Vec::new()));
        for _ in 0..2 {
            let log = log.clone();
            im.add_hw_link_up_down_hook(Box::new(move |_im, _hw, up| {
                log.borrow_mut().push(up);
            }));
        }
        im.set_hw_interface_flags(hw, HwFlags::LINK_UP).unwrap();
        // no transition, no callbacks
        im.set_hw_interface_flags(hw, HwFlags::LINK_UP).unwrap();
        im.set_hw_interface_flags(hw, HwFlags::empty()).unwrap();
        assert_eq!(*log.borrow(), vec![true, true, false, false]);
    }

    #[test]
    fn admin_flags_fire_admin_hooks() {
        let (_rt, mut im, hw) = setup();
        let sw = im.hw(hw).unwrap().sw_if_index;
        let log: Rc<RefCell<Vec<bool>>> = Rc::new(RefCell::new(Vec::new()));
        {
            let log = log.clone();
            im.add_sw_admin_up_down_hook(Box::new(move |_im, _sw, up| {
                log.borrow_mut().push(up);
            }));
        }
        im.set_sw_interface_flags(sw, SwFlags::ADMIN_UP).unwrap();
        im.set_sw_interface_flags(sw, SwFlags::empty()).unwrap();
        assert_eq!(*log.borrow(), vec![true, false]);
    }

    #[test]
    fn hw_class_change_requires_subs_admin_down() {
        let (_rt, mut im, hw) = setup();
        let parent = im.hw(hw).unwrap().sw_if_index;
        let other = im.register_hw_class(Rc::new(EthernetHwClass));
        let sub = im
            .create_sw_interface(SwInterfaceTemplate {
                sup_sw_if_index: parent,
                sub_id: 7,
            })
            .unwrap();
        im.set_sw_interface_flags(sub, SwFlags::ADMIN_UP).unwrap();
        assert!(matches!(
            im.set_hw_interface_class(hw, other),
            Err(InterfaceError::InUse(_))
        ));
        im.set_sw_interface_flags(sub, SwFlags::empty()).unwrap();
        im.set_hw_interface_class(hw, other).unwrap();
        assert_eq!(im.hw(hw).unwrap().hw_class, other);
    }

    #[test]
    fn delete_reserves_tx_node_name_for_reuse() {
        let (mut rt, mut im, hw) = setup();
        im.delete_hw_interface(&mut rt, hw).unwrap();
        assert!(rt.node_by_name("null0-tx").is_none());
        assert!(im.hw(hw).is_err());
        // the name is free again for a new registration
        let dc = im.register_device_class(Rc::new(NullDevice));
        let hc = im.register_hw_class(Rc::new(EthernetHwClass));
        let hw2 = im
            .register_interface(&mut rt, dc, 0, hc, 0, vec![0; 6])
            .unwrap();
        assert_eq!(im.hw(hw2).unwrap().name, "null0");
        assert!(rt.node_by_name("null0-tx").is_some());
    }

    #[test]
    fn rewrite_via_sup_class() {
        let (_rt, im, hw) = setup();
        let sw = im.hw(hw).unwrap().sw_if_index;
        let rw = im
            .rewrite_for_sw_interface(sw, EthType::IP4, &[0, 1, 2, 3, 4, 5], 32)
            .unwrap();
        assert_eq!(rw.len(), 14);
        assert_eq!(&rw[0..6], &[0, 1, 2, 3, 4, 5]);
        assert_eq!(&rw[6..12], &[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        assert_eq!(&rw[12..14], &[0x08, 0x00]);
    }
}
