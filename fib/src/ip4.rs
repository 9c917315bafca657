// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! IPv4 forwarding: per-prefix-length hash store (authoritative) plus the
//! mtrie (canonical lookup), multiple tables, and interface addresses.

use crate::adjacency::{AdjIndex, AdjacencyKind, AdjacencyTable, FibError, MISS_ADJ_INDEX};
use crate::mtrie::Mtrie;
use crate::multipath::MultipathMain;
use crate::RouteFlags;
use ahash::RandomState;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use tracing::debug;

fn mask(len: u8) -> u32 {
    if len == 0 {
        0
    } else {
        u32::MAX << (32 - len)
    }
}

/// A route change announced to registered hooks.
#[derive(Debug, Clone, Copy)]
pub struct RouteEvent {
    /// FIB the change applies to.
    pub fib_index: u32,
    /// Destination prefix.
    pub dst: Ipv4Addr,
    /// Prefix length.
    pub dst_len: u8,
    /// Adjacency the prefix resolves (resolved) to.
    pub adj: AdjIndex,
    /// True for deletion.
    pub is_del: bool,
}

/// An interface address change announced to registered hooks.
#[derive(Debug, Clone, Copy)]
pub struct AddressEvent {
    /// Interface the address was bound to or removed from.
    pub sw_if_index: u32,
    /// The address.
    pub address: Ipv4Addr,
    /// Its prefix length.
    pub len: u8,
    /// True for deletion.
    pub is_del: bool,
}

/// One IPv4 table.
pub struct Ip4Fib {
    /// Opaque table id chosen by the control plane.
    pub table_id: u32,
    /// Dense index of this table.
    pub index: u32,
    /// Authoritative store: per-prefix-length maps of masked dst -> adj.
    maps: Vec<HashMap<u32, AdjIndex, RandomState>>,
    /// Canonical lookup structure, rebuilt incrementally from the store.
    mtrie: Mtrie,
}

impl Ip4Fib {
    fn new(table_id: u32, index: u32) -> Self {
        Self {
            table_id,
            index,
            maps: (0..=32)
                .map(|_| HashMap::with_hasher(RandomState::with_seed(0)))
                .collect(),
            mtrie: Mtrie::new(),
        }
    }

    /// Longest-prefix match through the mtrie.
    #[must_use]
    pub fn lookup(&self, dst: Ipv4Addr) -> AdjIndex {
        self.mtrie.lookup(dst)
    }

    /// Longest-prefix match through the hash store; the simple variant of
    /// the same law, used to cross-check the mtrie.
    #[must_use]
    pub fn lookup_hash(&self, dst: Ipv4Addr) -> AdjIndex {
        let dst = u32::from(dst);
        for len in (0..=32u8).rev() {
            if self.maps[len as usize].is_empty() {
                continue;
            }
            if let Some(adj) = self.maps[len as usize].get(&(dst & mask(len))) {
                return *adj;
            }
        }
        MISS_ADJ_INDEX
    }

    /// The stored adjacency for an exact prefix.
    #[must_use]
    pub fn get(&self, dst: Ipv4Addr, len: u8) -> Option<AdjIndex> {
        self.maps[len as usize]
            .get(&(u32::from(dst) & mask(len)))
            .copied()
    }

    /// Stored `(prefix, len, adj)` entries, longest first.
    pub fn entries(&self) -> impl Iterator<Item = (Ipv4Addr, u8, AdjIndex)> + '_ {
        (0..=32u8).rev().flat_map(move |len| {
            self.maps[len as usize]
                .iter()
                .map(move |(dst, adj)| (Ipv4Addr::from(*dst), len, *adj))
        })
    }

    /// The covering route of `dst/len`, if any (the longest strictly
    /// shorter match).
    fn cover(&self, dst: u32, len: u8) -> Option<(u8, AdjIndex)> {
        for l in (0..len).rev() {
            if let Some(adj) = self.maps[l as usize].get(&(dst & mask(l))) {
                return Some((l, *adj));
            }
        }
        None
    }

    fn insert(&mut self, dst: Ipv4Addr, len: u8, adj: AdjIndex) {
        let masked = u32::from(dst) & mask(len);
        self.maps[len as usize].insert(masked, adj);
        self.mtrie.set(Ipv4Addr::from(masked), len, adj);
    }

    fn remove(&mut self, dst: Ipv4Addr, len: u8) -> Option<AdjIndex> {
        let masked = u32::from(dst) & mask(len);
        let old = self.maps[len as usize].remove(&masked)?;
        match self.cover(masked, len) {
            Some((cover_len, cover_adj)) => {
                self.mtrie
                    .unset(Ipv4Addr::from(masked), len, cover_adj, cover_len);
            }
            None => {
                self.mtrie
                    .unset(Ipv4Addr::from(masked), len, MISS_ADJ_INDEX, 0);
            }
        }
        Some(old)
    }
}

struct InterfaceAddress {
    sw_if_index: u32,
    address: Ipv4Addr,
    len: u8,
    arp_adj: AdjIndex,
    local_adj: AdjIndex,
}

/// The IPv4 side of the forwarding base.
pub struct Ip4Main {
    /// Shared adjacency heap and counters.
    pub adjacencies: AdjacencyTable,
    /// Multipath group state.
    pub multipath: MultipathMain,
    fibs: Vec<Ip4Fib>,
    fib_index_by_table_id: HashMap<u32, u32, RandomState>,
    fib_index_by_sw_if_index: HashMap<u32, u32, RandomState>,
    addresses: Vec<InterfaceAddress>,
    route_hooks: Vec<Box<dyn FnMut(&RouteEvent)>>,
    address_hooks: Vec<Box<dyn FnMut(&AddressEvent)>>,
}

impl Ip4Main {
    /// Fresh state with counters sharded for `n_workers`.
    #[must_use]
    pub fn new(n_workers: usize) -> Self {
        let mut main = Self {
            adjacencies: AdjacencyTable::new(n_workers),
            multipath: MultipathMain::default(),
            fibs: Vec::new(),
            fib_index_by_table_id: HashMap::with_hasher(RandomState::with_seed(0)),
            fib_index_by_sw_if_index: HashMap::with_hasher(RandomState::with_seed(0)),
            addresses: Vec::new(),
            route_hooks: Vec::new(),
            address_hooks: Vec::new(),
        };
        // table 0 always exists
        let _ = main.find_or_create_fib(0);
        main
    }

    /// Dense index of `table_id`, creating the table on first use.
    pub fn find_or_create_fib(&mut self, table_id: u32) -> u32 {
        if let Some(index) = self.fib_index_by_table_id.get(&table_id) {
            return *index;
        }
        let index = self.fibs.len() as u32;
        debug!(table_id, index, "create ip4 fib");
        self.fibs.push(Ip4Fib::new(table_id, index));
        self.fib_index_by_table_id.insert(table_id, index);
        index
    }

    /// Borrow a table by dense index.
    ///
    /// # Errors
    ///
    /// Returns [`FibError::NotFound`] for a stale index.
    pub fn fib(&self, fib_index: u32) -> Result<&Ip4Fib, FibError> {
        self.fibs.get(fib_index as usize).ok_or(FibError::NotFound)
    }

    /// Bind a sw-interface to a table.
    pub fn set_interface_fib(&mut self, sw_if_index: u32, table_id: u32) {
        let index = self.find_or_create_fib(table_id);
        self.fib_index_by_sw_if_index.insert(sw_if_index, index);
    }

    /// The table a sw-interface looks up in (table 0 by default).
    #[must_use]
    pub fn fib_index_for_sw_interface(&self, sw_if_index: u32) -> u32 {
        self.fib_index_by_sw_if_index
            .get(&sw_if_index)
            .copied()
            .unwrap_or(0)
    }

    /// Register a route add/del hook.
    pub fn add_route_hook(&mut self, hook: Box<dyn FnMut(&RouteEvent)>) {
        self.route_hooks.push(hook);
    }

    /// Register an interface-address add/del hook.
    pub fn add_address_hook(&mut self, hook: Box<dyn FnMut(&AddressEvent)>) {
        self.address_hooks.push(hook);
    }

    /// Add or delete a route.
    ///
    /// `table` is a table id, or a raw fib index with
    /// [`RouteFlags::FIB_INDEX`]. See [`RouteFlags`] for the rest.
    ///
    /// # Errors
    ///
    /// Returns [`FibError::NotFound`] when deleting an absent prefix or
    /// addressing an absent fib index.
    pub fn add_del_route(
        &mut self,
        table: u32,
        dst: Ipv4Addr,
        dst_len: u8,
        adj: AdjIndex,
        flags: RouteFlags,
    ) -> Result<(), FibError> {
        if dst_len > 32 {
            return Err(FibError::InvalidArgument("prefix length exceeds 32"));
        }
        let fib_index = if flags.contains(RouteFlags::FIB_INDEX) {
            if (table as usize) >= self.fibs.len() {
                return Err(FibError::NotFound);
            }
            table
        } else {
            self.find_or_create_fib(table)
        };
        let fib = &mut self.fibs[fib_index as usize];
        let is_del = flags.contains(RouteFlags::DEL);
        let adj = if is_del {
            fib.remove(dst, dst_len).ok_or(FibError::NotFound)?
        } else {
            if flags.contains(RouteFlags::KEEP_OLD_ADJACENCY) && fib.get(dst, dst_len).is_some() {
                return Ok(());
            }
            fib.insert(dst, dst_len, adj);
            adj
        };
        debug!(fib_index, %dst, dst_len, %adj, is_del, "route change");
        if !flags.contains(RouteFlags::NO_REDISTRIBUTE) {
            let event = RouteEvent {
                fib_index,
                dst,
                dst_len,
                adj,
                is_del,
            };
            let mut hooks = std::mem::take(&mut self.route_hooks);
            for hook in &mut hooks {
                hook(&event);
            }
            let added = std::mem::replace(&mut self.route_hooks, hooks);
            self.route_hooks.extend(added);
        }
        if !flags.contains(RouteFlags::NOT_LAST_IN_GROUP) {
            self.maybe_remap_adjacencies();
        }
        Ok(())
    }

    /// Data-path lookup: LPM in the interface's table, then one lazy remap
    /// hop for entries not yet swept.
    #[must_use]
    pub fn lookup(&self, fib_index: u32, dst: Ipv4Addr) -> AdjIndex {
        let Some(fib) = self.fibs.get(fib_index as usize) else {
            return MISS_ADJ_INDEX;
        };
        self.adjacencies.remapped(fib.lookup(dst))
    }

    /// Sweep outstanding adjacency remaps through every table.
    pub fn maybe_remap_adjacencies(&mut self) {
        if self.adjacencies.n_remaps() == 0 {
            return;
        }
        let mut pairs = Vec::new();
        self.adjacencies.take_remaps(|old, new| pairs.push((old, new)));
        for fib in &mut self.fibs {
            for (old, new) in &pairs {
                for len in 0..=32u8 {
                    let updates: Vec<u32> = fib.maps[len as usize]
                        .iter()
                        .filter(|(_, adj)| **adj == *old)
                        .map(|(dst, _)| *dst)
                        .collect();
                    for dst in updates {
                        fib.maps[len as usize].insert(dst, *new);
                        fib.mtrie.set(Ipv4Addr::from(dst), len, *new);
                    }
                }
            }
        }
    }

    /// Bind `address/len` to a sw-interface: installs the prefix route to
    /// an ARP adjacency and the host route to a local adjacency, in the
    /// interface's table.
    ///
    /// # Errors
    ///
    /// Returns [`FibError::InUse`] when the address is already bound.
    pub fn add_interface_address(
        &mut self,
        sw_if_index: u32,
        address: Ipv4Addr,
        len: u8,
    ) -> Result<(), FibError> {
        if self
            .addresses
            .iter()
            .any(|a| a.sw_if_index == sw_if_index && a.address == address && a.len == len)
        {
            return Err(FibError::InUse("address already bound"));
        }
        let fib_index = self.fib_index_for_sw_interface(sw_if_index);
        let arp_adj = self.adjacencies.add(AdjacencyKind::Arp { sw_if_index });
        let local_adj = self.adjacencies.add(AdjacencyKind::Local {
            ip_protocol_slot: 0,
        });
        self.add_del_route(
            fib_index,
            address,
            len,
            arp_adj,
            RouteFlags::FIB_INDEX | RouteFlags::NOT_LAST_IN_GROUP,
        )?;
        self.add_del_route(fib_index, address, 32, local_adj, RouteFlags::FIB_INDEX)?;
        self.addresses.push(InterfaceAddress {
            sw_if_index,
            address,
            len,
            arp_adj,
            local_adj,
        });
        let event = AddressEvent {
            sw_if_index,
            address,
            len,
            is_del: false,
        };
        self.fire_address_hooks(&event);
        Ok(())
    }

    /// Unbind an address, deleting both routes it installed.
    ///
    /// # Errors
    ///
    /// Returns [`FibError::NotFound`] when the address is not bound.
    pub fn del_interface_address(
        &mut self,
        sw_if_index: u32,
        address: Ipv4Addr,
        len: u8,
    ) -> Result<(), FibError> {
        let at = self
            .addresses
            .iter()
            .position(|a| a.sw_if_index == sw_if_index && a.address == address && a.len == len)
            .ok_or(FibError::NotFound)?;
        let entry = self.addresses.remove(at);
        let fib_index = self.fib_index_for_sw_interface(sw_if_index);
        self.add_del_route(
            fib_index,
            address,
            len,
            MISS_ADJ_INDEX,
            RouteFlags::FIB_INDEX | RouteFlags::DEL | RouteFlags::NOT_LAST_IN_GROUP,
        )?;
        self.add_del_route(
            fib_index,
            address,
            32,
            MISS_ADJ_INDEX,
            RouteFlags::FIB_INDEX | RouteFlags::DEL,
        )?;
        self.adjacencies.del_block(entry.arp_adj, 1);
        self.adjacencies.del_block(entry.local_adj, 1);
        let event = AddressEvent {
            sw_if_index,
            address,
            len,
            is_del: true,
        };
        self.fire_address_hooks(&event);
        Ok(())
    }

    fn fire_address_hooks(&mut self, event: &AddressEvent) {
        let mut hooks = std::mem::take(&mut self.address_hooks);
        for hook in &mut hooks {
            hook(event);
        }
        let added = std::mem::replace(&mut self.address_hooks, hooks);
        self.address_hooks.extend(added);
    }

    /// The interface an address is locally bound to, if any.
    #[must_use]
    pub fn local_interface_for(&self, address: Ipv4Addr) -> Option<u32> {
        self.addresses
            .iter()
            .find(|a| a.address == address)
            .map(|a| a.sw_if_index)
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod test {
    use super::*;
    use crate::rewrite::RewriteHeader;
    use graph::NodeIndex;
    use rand::{Rng, SeedableRng};

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    fn rewrite_adj(m: &mut Ip4Main) -> AdjIndex {
        let mut rw = RewriteHeader::new(1, NodeIndex::new(1), 0, 1500);
        rw.set_data(&[0xee; 14]).unwrap();
        m.adjacencies.add(AdjacencyKind::Rewrite(rw))
    }

    #[test]
    fn lookup_follows_longest_prefix() {
        let mut m = Ip4Main::new(1);
        let a8 = rewrite_adj(&mut m);
        let a24 = rewrite_adj(&mut m);
        m.add_del_route(0, ip("10.0.0.0"), 8, a8, RouteFlags::empty())
            .unwrap();
        m.add_del_route(0, ip("10.0.0.0"), 24, a24, RouteFlags::empty())
            .unwrap();
        assert_eq!(m.lookup(0, ip("10.0.0.7")), a24);
        assert_eq!(m.lookup(0, ip("10.9.0.7")), a8);
        assert_eq!(m.lookup(0, ip("11.0.0.1")), MISS_ADJ_INDEX);
    }

    #[test]
    fn mtrie_and_hash_variants_agree() {
        let mut m = Ip4Main::new(1);
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let mut adjs = Vec::new();
        for _ in 0..64 {
            let adj = rewrite_adj(&mut m);
            let dst = Ipv4Addr::from(rng.random::<u32>());
            let len = rng.random_range(0..=32u8);
            m.add_del_route(0, dst, len, adj, RouteFlags::empty()).unwrap();
            adjs.push((dst, len));
        }
        let fib = m.fib(0).unwrap();
        for _ in 0..2000 {
            let probe = Ipv4Addr::from(rng.random::<u32>());
            assert_eq!(fib.lookup(probe), fib.lookup_hash(probe), "probe {probe}");
        }
        // and on hosts inside each installed prefix
        for (dst, _len) in adjs {
            assert_eq!(fib.lookup(dst), fib.lookup_hash(dst));
        }
    }

    #[test]
    fn add_then_del_restores_prior_state() {
        let mut m = Ip4Main::new(1);
        let base = rewrite_adj(&mut m);
        let extra = rewrite_adj(&mut m);
        m.add_del_route(0, ip("10.0.0.0"), 8, base, RouteFlags::empty())
            .unwrap();
        let before: Vec<_> = m.fib(0).unwrap().entries().collect();
        m.add_del_route(0, ip("10.1.0.0"), 16, extra, RouteFlags::empty())
            .unwrap();
        m.add_del_route(0, ip("10.1.0.0"), 16, extra, RouteFlags::DEL)
            .unwrap();
        let after: Vec<_> = m.fib(0).unwrap().entries().collect();
        assert_eq!(before, after);
        // sweep of addresses must agree too
        let fib = m.fib(0).unwrap();
        for host in [ip("10.1.2.3"), ip("10.200.0.1"), ip("12.0.0.1")] {
            assert_eq!(fib.lookup(host), fib.lookup_hash(host));
        }
    }

    #[test]
    fn deleting_absent_route_is_not_found() {
        let mut m = Ip4Main::new(1);
        assert!(matches!(
            m.add_del_route(0, ip("10.0.0.0"), 8, MISS_ADJ_INDEX, RouteFlags::DEL),
            Err(FibError::NotFound)
        ));
    }

    #[test]
    fn tables_are_independent() {
        let mut m = Ip4Main::new(1);
        let a = rewrite_adj(&mut m);
        m.add_del_route(100, ip("10.0.0.0"), 8, a, RouteFlags::empty())
            .unwrap();
        let t100 = m.find_or_create_fib(100);
        assert_ne!(t100, 0);
        assert_eq!(m.lookup(t100, ip("10.1.1.1")), a);
        assert_eq!(m.lookup(0, ip("10.1.1.1")), MISS_ADJ_INDEX);
        // interface binding picks the table
        m.set_interface_fib(5, 100);
        assert_eq!(m.fib_index_for_sw_interface(5), t100);
        assert_eq!(m.fib_index_for_sw_interface(6), 0);
    }

    #[test]
    fn route_hooks_fire_unless_suppressed() {
        let mut m = Ip4Main::new(1);
        let a = rewrite_adj(&mut m);
        let events = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        {
            let events = events.clone();
            m.add_route_hook(Box::new(move |e| {
                events.borrow_mut().push((e.dst, e.dst_len, e.is_del));
            }));
        }
        m.add_del_route(0, ip("10.0.0.0"), 24, a, RouteFlags::empty())
            .unwrap();
        m.add_del_route(0, ip("10.0.1.0"), 24, a, RouteFlags::NO_REDISTRIBUTE)
            .unwrap();
        m.add_del_route(0, ip("10.0.0.0"), 24, a, RouteFlags::DEL)
            .unwrap();
        assert_eq!(
            *events.borrow(),
            vec![(ip("10.0.0.0"), 24, false), (ip("10.0.0.0"), 24, true)]
        );
    }

    #[test]
    fn interface_address_installs_and_removes_both_routes() {
        let mut m = Ip4Main::new(1);
        m.add_interface_address(3, ip("10.0.0.1"), 24).unwrap();
        let arp = m.lookup(0, ip("10.0.0.9"));
        assert!(matches!(
            m.adjacencies.get(arp).unwrap().kind,
            AdjacencyKind::Arp { sw_if_index: 3 }
        ));
        let local = m.lookup(0, ip("10.0.0.1"));
        assert!(matches!(
            m.adjacencies.get(local).unwrap().kind,
            AdjacencyKind::Local { .. }
        ));
        assert_eq!(m.local_interface_for(ip("10.0.0.1")), Some(3));
        // double bind refused
        assert!(matches!(
            m.add_interface_address(3, ip("10.0.0.1"), 24),
            Err(FibError::InUse(_))
        ));
        m.del_interface_address(3, ip("10.0.0.1"), 24).unwrap();
        assert_eq!(m.lookup(0, ip("10.0.0.9")), MISS_ADJ_INDEX);
        assert_eq!(m.lookup(0, ip("10.0.0.1")), MISS_ADJ_INDEX);
        assert_eq!(m.local_interface_for(ip("10.0.0.1")), None);
    }

    #[test]
    fn remap_sweep_rewrites_stale_entries() {
        let mut m = Ip4Main::new(1);
        let a = rewrite_adj(&mut m);
        let b = rewrite_adj(&mut m);
        m.add_del_route(0, ip("10.0.0.0"), 24, a, RouteFlags::empty())
            .unwrap();
        m.adjacencies.register_remap(a, b);
        // lazy path already sees the new index
        assert_eq!(m.lookup(0, ip("10.0.0.1")), b);
        m.maybe_remap_adjacencies();
        assert_eq!(m.fib(0).unwrap().get(ip("10.0.0.0"), 24), Some(b));
        assert_eq!(m.adjacencies.n_remaps(), 0);
    }
}
