// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! IPv6 forwarding: per-prefix-length hash maps, longest first.

use crate::adjacency::{AdjIndex, AdjacencyKind, AdjacencyTable, FibError, MISS_ADJ_INDEX};
use crate::multipath::MultipathMain;
use crate::RouteFlags;
use ahash::RandomState;
use std::collections::HashMap;
use std::net::Ipv6Addr;
use tracing::debug;

fn mask(len: u8) -> u128 {
    if len == 0 {
        0
    } else {
        u128::MAX << (128 - len)
    }
}

/// A route change announced to registered hooks.
#[derive(Debug, Clone, Copy)]
pub struct Route6Event {
    /// FIB the change applies to.
    pub fib_index: u32,
    /// Destination prefix.
    pub dst: Ipv6Addr,
    /// Prefix length.
    pub dst_len: u8,
    /// Adjacency involved.
    pub adj: AdjIndex,
    /// True for deletion.
    pub is_del: bool,
}

/// An interface address change announced to registered hooks.
#[derive(Debug, Clone, Copy)]
pub struct Address6Event {
    /// Interface the address was bound to or removed from.
    pub sw_if_index: u32,
    /// The address.
    pub address: Ipv6Addr,
    /// Its prefix length.
    pub len: u8,
    /// True for deletion.
    pub is_del: bool,
}

/// One IPv6 table.
pub struct Ip6Fib {
    /// Opaque table id chosen by the control plane.
    pub table_id: u32,
    /// Dense index of this table.
    pub index: u32,
    maps: Vec<HashMap<u128, AdjIndex, RandomState>>,
    /// Prefix lengths with at least one entry, longest first.
    live_lens: Vec<u8>,
}

impl Ip6Fib {
    fn new(table_id: u32, index: u32) -> Self {
        Self {
            table_id,
            index,
            maps: (0..=128)
                .map(|_| HashMap::with_hasher(RandomState::with_seed(0)))
                .collect(),
            live_lens: Vec::new(),
        }
    }

    /// Longest-prefix match.
    #[must_use]
    pub fn lookup(&self, dst: Ipv6Addr) -> AdjIndex {
        let dst = u128::from(dst);
        for len in &self.live_lens {
            if let Some(adj) = self.maps[*len as usize].get(&(dst & mask(*len))) {
                return *adj;
            }
        }
        MISS_ADJ_INDEX
    }

    /// The stored adjacency for an exact prefix.
    #[must_use]
    pub fn get(&self, dst: Ipv6Addr, len: u8) -> Option<AdjIndex> {
        self.maps[len as usize]
            .get(&(u128::from(dst) & mask(len)))
            .copied()
    }

    /// Stored `(prefix, len, adj)` entries, longest first.
    pub fn entries(&self) -> impl Iterator<Item = (Ipv6Addr, u8, AdjIndex)> + '_ {
        self.live_lens.iter().flat_map(move |len| {
            self.maps[*len as usize]
                .iter()
                .map(move |(dst, adj)| (Ipv6Addr::from(*dst), *len, *adj))
        })
    }

    fn insert(&mut self, dst: Ipv6Addr, len: u8, adj: AdjIndex) {
        let masked = u128::from(dst) & mask(len);
        self.maps[len as usize].insert(masked, adj);
        if !self.live_lens.contains(&len) {
            self.live_lens.push(len);
            self.live_lens.sort_unstable_by(|a, b| b.cmp(a));
        }
    }

    fn remove(&mut self, dst: Ipv6Addr, len: u8) -> Option<AdjIndex> {
        let masked = u128::from(dst) & mask(len);
        let old = self.maps[len as usize].remove(&masked)?;
        if self.maps[len as usize].is_empty() {
            self.live_lens.retain(|l| *l != len);
        }
        Some(old)
    }
}

struct InterfaceAddress6 {
    sw_if_index: u32,
    address: Ipv6Addr,
    len: u8,
    nd_adj: AdjIndex,
    local_adj: AdjIndex,
}

/// The IPv6 side of the forwarding base.
pub struct Ip6Main {
    /// Shared adjacency heap and counters.
    pub adjacencies: AdjacencyTable,
    /// Multipath group state.
    pub multipath: MultipathMain,
    fibs: Vec<Ip6Fib>,
    fib_index_by_table_id: HashMap<u32, u32, RandomState>,
    fib_index_by_sw_if_index: HashMap<u32, u32, RandomState>,
    addresses: Vec<InterfaceAddress6>,
    route_hooks: Vec<Box<dyn FnMut(&Route6Event)>>,
    address_hooks: Vec<Box<dyn FnMut(&Address6Event)>>,
}

impl Ip6Main {
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
        let _ = main.find_or_create_fib(0);
        main
    }

    /// Dense index of `table_id`, creating the table on first use.
    pub fn find_or_create_fib(&mut self, table_id: u32) -> u32 {
        if let Some(index) = self.fib_index_by_table_id.get(&table_id) {
            return *index;
        }
        let index = self.fibs.len() as u32;
        debug!(table_id, index, "create ip6 fib");
        self.fibs.push(Ip6Fib::new(table_id, index));
        self.fib_index_by_table_id.insert(table_id, index);
        index
    }

    /// Borrow a table by dense index.
    ///
    /// # Errors
    ///
    /// Returns [`FibError::NotFound`] for a stale index.
    pub fn fib(&self, fib_index: u32) -> Result<&Ip6Fib, FibError> {
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
    pub fn add_route_hook(&mut self, hook: Box<dyn FnMut(&Route6Event)>) {
        self.route_hooks.push(hook);
    }

    /// Register an interface-address add/del hook.
    pub fn add_address_hook(&mut self, hook: Box<dyn FnMut(&Address6Event)>) {
        self.address_hooks.push(hook);
    }

    /// Add or delete a route; flags as for the IPv4 variant.
    ///
    /// # Errors
    ///
    /// Returns [`FibError::NotFound`] when deleting an absent prefix or
    /// addressing an absent fib index.
    pub fn add_del_route(
        &mut self,
        table: u32,
        dst: Ipv6Addr,
        dst_len: u8,
        adj: AdjIndex,
        flags: RouteFlags,
    ) -> Result<(), FibError> {
        if dst_len > 128 {
            return Err(FibError::InvalidArgument("prefix length exceeds 128"));
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
            let event = Route6Event {
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

    /// Data-path lookup with the lazy remap hop.
    #[must_use]
    pub fn lookup(&self, fib_index: u32, dst: Ipv6Addr) -> AdjIndex {
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
                for len in fib.live_lens.clone() {
                    let updates: Vec<u128> = fib.maps[len as usize]
                        .iter()
                        .filter(|(_, adj)| **adj == *old)
                        .map(|(dst, _)| *dst)
                        .collect();
                    for dst in updates {
                        fib.maps[len as usize].insert(dst, *new);
                    }
                }
            }
        }
    }

    /// Bind `address/len` to a sw-interface: prefix route to a
    /// discover-neighbor adjacency, host route to a local adjacency.
    ///
    /// # Errors
    ///
    /// Returns [`FibError::InUse`] when the address is already bound.
    pub fn add_interface_address(
        &mut self,
        sw_if_index: u32,
        address: Ipv6Addr,
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
        let nd_adj = self.adjacencies.add(AdjacencyKind::Arp { sw_if_index });
        let local_adj = self.adjacencies.add(AdjacencyKind::Local {
            ip_protocol_slot: 0,
        });
        self.add_del_route(
            fib_index,
            address,
            len,
            nd_adj,
            RouteFlags::FIB_INDEX | RouteFlags::NOT_LAST_IN_GROUP,
        )?;
        self.add_del_route(fib_index, address, 128, local_adj, RouteFlags::FIB_INDEX)?;
        self.addresses.push(InterfaceAddress6 {
            sw_if_index,
            address,
            len,
            nd_adj,
            local_adj,
        });
        let event = Address6Event {
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
        address: Ipv6Addr,
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
            128,
            MISS_ADJ_INDEX,
            RouteFlags::FIB_INDEX | RouteFlags::DEL,
        )?;
        self.adjacencies.del_block(entry.nd_adj, 1);
        self.adjacencies.del_block(entry.local_adj, 1);
        let event = Address6Event {
            sw_if_index,
            address,
            len,
            is_del: true,
        };
        self.fire_address_hooks(&event);
        Ok(())
    }

    fn fire_address_hooks(&mut self, event: &Address6Event) {
        let mut hooks = std::mem::take(&mut self.address_hooks);
        for hook in &mut hooks {
            hook(event);
        }
        let added = std::mem::replace(&mut self.address_hooks, hooks);
        self.address_hooks.extend(added);
    }

    /// The interface an address is locally bound to, if any.
    #[must_use]
    pub fn local_interface_for(&self, address: &Ipv6Addr) -> Option<u32> {
        self.addresses
            .iter()
            .find(|a| a.address == *address)
            .map(|a| a.sw_if_index)
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod test {
    use super::*;
    use crate::rewrite::RewriteHeader;
    use graph::NodeIndex;

    fn ip(s: &str) -> Ipv6Addr {
        s.parse().unwrap()
    }

    fn rewrite_adj(m: &mut Ip6Main) -> AdjIndex {
        let mut rw = RewriteHeader::new(1, NodeIndex::new(1), 0, 1500);
        rw.set_data(&[0x66; 14]).unwrap();
        m.adjacencies.add(AdjacencyKind::Rewrite(rw))
    }

    #[test]
    fn longest_prefix_wins() {
        let mut m = Ip6Main::new(1);
        let a32 = rewrite_adj(&mut m);
        let a64 = rewrite_adj(&mut m);
        m.add_del_route(0, ip("2001:db8::"), 32, a32, RouteFlags::empty())
            .unwrap();
        m.add_del_route(0, ip("2001:db8:0:1::"), 64, a64, RouteFlags::empty())
            .unwrap();
        assert_eq!(m.lookup(0, ip("2001:db8:0:1::42")), a64);
        assert_eq!(m.lookup(0, ip("2001:db8:0:2::42")), a32);
        assert_eq!(m.lookup(0, ip("2001:db9::1")), MISS_ADJ_INDEX);
    }

    #[test]
    fn add_del_round_trip() {
        let mut m = Ip6Main::new(1);
        let a = rewrite_adj(&mut m);
        let before: Vec<_> = m.fib(0).unwrap().entries().collect();
        m.add_del_route(0, ip("fd00::"), 8, a, RouteFlags::empty())
            .unwrap();
        m.add_del_route(0, ip("fd00::"), 8, a, RouteFlags::DEL)
            .unwrap();
        let after: Vec<_> = m.fib(0).unwrap().entries().collect();
        assert_eq!(before, after);
        assert!(matches!(
            m.add_del_route(0, ip("fd00::"), 8, a, RouteFlags::DEL),
            Err(FibError::NotFound)
        ));
    }

    #[test]
    fn host_routes_for_interface_addresses() {
        let mut m = Ip6Main::new(1);
        m.add_interface_address(2, ip("2001:db8::1"), 64).unwrap();
        assert!(matches!(
            m.adjacencies
                .get(m.lookup(0, ip("2001:db8::9")))
                .unwrap()
                .kind,
            AdjacencyKind::Arp { sw_if_index: 2 }
        ));
        assert!(matches!(
            m.adjacencies
                .get(m.lookup(0, ip("2001:db8::1")))
                .unwrap()
                .kind,
            AdjacencyKind::Local { .. }
        ));
        assert_eq!(m.local_interface_for(&ip("2001:db8::1")), Some(2));
        m.del_interface_address(2, ip("2001:db8::1"), 64).unwrap();
        assert_eq!(m.lookup(0, ip("2001:db8::9")), MISS_ADJ_INDEX);
    }
}
