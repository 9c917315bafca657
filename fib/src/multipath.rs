// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Weighted multipath groups normalized onto power-of-two adjacency blocks.

use crate::adjacency::{
    AdjIndex, Adjacency, AdjacencyKind, AdjacencyTable, FibError, MISS_ADJ_INDEX,
};
use ahash::RandomState;
use std::collections::HashMap;
use tracing::debug;

/// Largest block this implementation will normalize to (2^10 slots).
const MAX_LOG2_N_ADJ: u8 = 10;

/// Control-plane record for one multipath group.
#[derive(Debug, Clone)]
pub struct MultipathInfo {
    /// Next hops exactly as the control plane supplied them.
    pub unnormalized: Vec<(AdjIndex, u32)>,
    /// Next hops with weights scaled to sum to the block size.
    pub normalized: Vec<(AdjIndex, u32)>,
    /// Block size, `1 << log2_n_adj`.
    pub n_adj: u32,
    /// FIB entries referencing this group.
    pub reference_count: u32,
}

/// Per-protocol multipath state: group interning plus the weight-error
/// tolerance that bounds normalization quality.
pub struct MultipathMain {
    by_normalized: HashMap<Vec<(u32, u32)>, AdjIndex, RandomState>,
    info: HashMap<u32, MultipathInfo, RandomState>,
    /// A block is accepted when the average per-slot weight error is below
    /// this.
    pub tolerance: f64,
}

impl Default for MultipathMain {
    fn default() -> Self {
        Self::new(0.01)
    }
}

impl MultipathMain {
    /// State with the given weight-error tolerance.
    #[must_use]
    pub fn new(tolerance: f64) -> Self {
        Self {
            by_normalized: HashMap::with_hasher(RandomState::with_seed(0)),
            info: HashMap::with_hasher(RandomState::with_seed(0)),
            tolerance,
        }
    }

    /// The control-plane record for a multipath adjacency.
    #[must_use]
    pub fn info(&self, mp_adj: AdjIndex) -> Option<&MultipathInfo> {
        self.info.get(&mp_adj.into_raw())
    }

    /// Add or delete one next hop of a group, returning the adjacency index
    /// of the resulting group. `old_mp_adj` of [`MISS_ADJ_INDEX`] means
    /// "start from an empty group"; an emptied group returns the miss
    /// index. The old group loses a reference (freeing it and registering a
    /// remap at zero), the result gains one.
    ///
    /// # Errors
    ///
    /// Returns [`FibError::NotFound`] when deleting an absent hop,
    /// [`FibError::InvalidArgument`] when a next hop is not a rewrite
    /// adjacency.
    pub fn add_del_next_hop(
        &mut self,
        adjacencies: &mut AdjacencyTable,
        old_mp_adj: AdjIndex,
        next_hop_adj: AdjIndex,
        weight: u32,
        is_del: bool,
    ) -> Result<AdjIndex, FibError> {
        let mut hops = if old_mp_adj == MISS_ADJ_INDEX {
            Vec::new()
        } else {
            self.info
                .get(&old_mp_adj.into_raw())
                .ok_or(FibError::NotFound)?
                .unnormalized
                .clone()
        };

        if is_del {
            let at = hops
                .iter()
                .position(|(adj, _)| *adj == next_hop_adj)
                .ok_or(FibError::NotFound)?;
            hops.remove(at);
        } else if weight == 0 {
            return Err(FibError::InvalidArgument("zero next-hop weight"));
        } else if let Some((_, w)) = hops.iter_mut().find(|(adj, _)| *adj == next_hop_adj) {
            *w += weight;
        } else {
            hops.push((next_hop_adj, weight));
        }

        let new_mp = if hops.is_empty() {
            MISS_ADJ_INDEX
        } else {
            self.intern(adjacencies, hops)?
        };
        if old_mp_adj != MISS_ADJ_INDEX {
            if new_mp == old_mp_adj {
                // interning re-found the same group; undo its extra reference
                if let Some(info) = self.info.get_mut(&new_mp.into_raw()) {
                    info.reference_count -= 1;
                }
            } else {
                self.release(adjacencies, old_mp_adj, new_mp);
            }
        }
        Ok(new_mp)
    }

    fn intern(
        &mut self,
        adjacencies: &mut AdjacencyTable,
        unnormalized: Vec<(AdjIndex, u32)>,
    ) -> Result<AdjIndex, FibError> {
        let (normalized, log2) = normalize(&unnormalized, self.tolerance);
        let key: Vec<(u32, u32)> = normalized
            .iter()
            .map(|(adj, w)| (adj.into_raw(), *w))
            .collect();
        if let Some(&existing) = self.by_normalized.get(&key) {
            if let Some(info) = self.info.get_mut(&existing.into_raw()) {
                info.reference_count += 1;
            }
            return Ok(existing);
        }

        let n_adj = 1u32 << log2;
        let mut block = Vec::with_capacity(n_adj as usize);
        for (adj, norm_weight) in &normalized {
            let entry = adjacencies.get(*adj)?;
            if !matches!(entry.kind, AdjacencyKind::Rewrite(_)) {
                return Err(FibError::InvalidArgument(
                    "multipath next hop must be a rewrite adjacency",
                ));
            }
            for _ in 0..*norm_weight {
                let mut slot = entry.clone();
                slot.n_adj = n_adj as u16;
                block.push(slot);
            }
        }
        let first = adjacencies.add_block(&block);
        let mp_adj = adjacencies.add(AdjacencyKind::Multipath {
            first_adj_index: first,
            log2_n_adj: log2,
        });
        debug!(%mp_adj, %first, n_adj, "new multipath group");
        self.by_normalized.insert(key, mp_adj);
        self.info.insert(
            mp_adj.into_raw(),
            MultipathInfo {
                unnormalized,
                normalized,
                n_adj,
                reference_count: 1,
            },
        );
        Ok(mp_adj)
    }

    fn release(&mut self, adjacencies: &mut AdjacencyTable, mp_adj: AdjIndex, new: AdjIndex) {
        let Some(info) = self.info.get_mut(&mp_adj.into_raw()) else {
            return;
        };
        debug_assert!(info.reference_count > 0);
        info.reference_count -= 1;
        if info.reference_count > 0 {
            return;
        }
        let info = match self.info.remove(&mp_adj.into_raw()) {
            Some(i) => i,
            None => return,
        };
        let key: Vec<(u32, u32)> = info
            .normalized
            .iter()
            .map(|(adj, w)| (adj.into_raw(), *w))
            .collect();
        self.by_normalized.remove(&key);
        if let Some(Adjacency {
            kind:
                AdjacencyKind::Multipath {
                    first_adj_index, ..
                },
            ..
        }) = adjacencies.get(mp_adj).ok().cloned()
        {
            adjacencies.del_block(first_adj_index, info.n_adj);
        }
        adjacencies.del_block(mp_adj, 1);
        adjacencies.register_remap(mp_adj, new);
        debug!(%mp_adj, "free multipath group");
    }
}

/// Scale weights onto the smallest power-of-two block whose average
/// per-slot error is within `tolerance`. Hops come out sorted by ascending
/// weight (stable), each with a normalized weight of at least one slot.
fn normalize(hops: &[(AdjIndex, u32)], tolerance: f64) -> (Vec<(AdjIndex, u32)>, u8) {
    let mut sorted: Vec<(AdjIndex, u32)> = hops.to_vec();
    sorted.sort_by_key(|(_, w)| *w);
    let total: f64 = sorted.iter().map(|(_, w)| f64::from(*w)).sum();
    let min_log2 = (sorted.len() as u32).next_power_of_two().trailing_zeros() as u8;

    let mut best: Option<(Vec<u32>, u8)> = None;
    for log2 in min_log2..=MAX_LOG2_N_ADJ {
        let n_adj = 1u32 << log2;
        if (n_adj as usize) < sorted.len() {
            continue;
        }
        let scaled: Vec<f64> = sorted
            .iter()
            .map(|(_, w)| f64::from(*w) * f64::from(n_adj) / total)
            .collect();
        let mut norm: Vec<u32> = scaled.iter().map(|s| (s.floor() as u32).max(1)).collect();
        // hand out the remaining slots by largest fractional remainder
        let mut assigned: u32 = norm.iter().sum();
        while assigned < n_adj {
            let i = pick_largest_remainder(&scaled, &norm);
            norm[i] += 1;
            assigned += 1;
        }
        while assigned > n_adj {
            let i = pick_most_overweight(&scaled, &norm);
            if norm[i] <= 1 {
                break;
            }
            norm[i] -= 1;
            assigned -= 1;
        }
        if assigned != n_adj {
            continue;
        }
        let error: f64 = scaled
            .iter()
            .zip(&norm)
            .map(|(s, n)| (s - f64::from(*n)).abs())
            .sum::<f64>()
            / f64::from(n_adj);
        if error <= tolerance {
            best = Some((norm, log2));
            break;
        }
        // remember the last attempt in case nothing meets the tolerance
        best = Some((norm, log2));
    }
    let (norm, log2) = best.unwrap_or((vec![1; sorted.len()], min_log2));
    (
        sorted
            .into_iter()
            .zip(norm)
            .map(|((adj, _), n)| (adj, n))
            .collect(),
        log2,
    )
}

fn pick_largest_remainder(scaled: &[f64], norm: &[u32]) -> usize {
    let mut best = 0;
    let mut best_rem = f64::MIN;
    for (i, (s, n)) in scaled.iter().zip(norm).enumerate() {
        let rem = s - f64::from(*n);
        if rem > best_rem {
            best_rem = rem;
            best = i;
        }
    }
    best
}

fn pick_most_overweight(scaled: &[f64], norm: &[u32]) -> usize {
    let mut best = 0;
    let mut best_over = f64::MIN;
    for (i, (s, n)) in scaled.iter().zip(norm).enumerate() {
        let over = f64::from(*n) - s;
        if over > best_over && *n > 1 {
            best_over = over;
            best = i;
        }
    }
    best
}

#[allow(clippy::unwrap_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;
    use crate::rewrite::RewriteHeader;
    use graph::NodeIndex;

    fn rewrite_adj(t: &mut AdjacencyTable, tag: u8) -> AdjIndex {
        let mut rw = RewriteHeader::new(0, NodeIndex::new(1), 0, 1500);
        rw.set_data(&[tag; 14]).unwrap();
        t.add(AdjacencyKind::Rewrite(rw))
    }

    fn block_pattern(t: &AdjacencyTable, mp: AdjIndex) -> Vec<u8> {
        let Ok(Adjacency {
            kind:
                AdjacencyKind::Multipath {
                    first_adj_index,
                    log2_n_adj,
                },
            ..
        }) = t.get(mp)
        else {
            panic!("not a multipath adjacency");
        };
        (0..1u32 << log2_n_adj)
            .map(|slot| {
                let Ok(Adjacency {
                    kind: AdjacencyKind::Rewrite(rw),
                    ..
                }) = t.get(first_adj_index.add(slot))
                else {
                    panic!("block slot is not a rewrite");
                };
                rw.data()[0]
            })
            .collect()
    }

    #[test]
    fn one_one_two_normalizes_to_four_slots() {
        let mut t = AdjacencyTable::new(1);
        let mut mp = MultipathMain::default();
        let a = rewrite_adj(&mut t, 0xa);
        let b = rewrite_adj(&mut t, 0xb);
        let c = rewrite_adj(&mut t, 0xc);
        let g = mp
            .add_del_next_hop(&mut t, MISS_ADJ_INDEX, a, 1, false)
            .unwrap();
        let g = mp.add_del_next_hop(&mut t, g, b, 1, false).unwrap();
        let g = mp.add_del_next_hop(&mut t, g, c, 2, false).unwrap();
        assert_eq!(block_pattern(&t, g), vec![0xa, 0xb, 0xc, 0xc]);
        let info = mp.info(g).unwrap();
        assert_eq!(info.n_adj, 4);
        assert_eq!(info.unnormalized.len(), 3);
    }

    #[test]
    fn identical_groups_intern() {
        let mut t = AdjacencyTable::new(1);
        let mut mp = MultipathMain::default();
        let a = rewrite_adj(&mut t, 1);
        let b = rewrite_adj(&mut t, 2);
        let g1 = mp
            .add_del_next_hop(&mut t, MISS_ADJ_INDEX, a, 1, false)
            .unwrap();
        let g1 = mp.add_del_next_hop(&mut t, g1, b, 1, false).unwrap();
        let g2 = mp
            .add_del_next_hop(&mut t, MISS_ADJ_INDEX, a, 1, false)
            .unwrap();
        let g2 = mp.add_del_next_hop(&mut t, g2, b, 1, false).unwrap();
        assert_eq!(g1, g2);
        assert_eq!(mp.info(g1).unwrap().reference_count, 2);
    }

    #[test]
    fn delete_to_empty_returns_miss_and_remaps() {
        let mut t = AdjacencyTable::new(1);
        let mut mp = MultipathMain::default();
        let a = rewrite_adj(&mut t, 1);
        let g = mp
            .add_del_next_hop(&mut t, MISS_ADJ_INDEX, a, 3, false)
            .unwrap();
        let back = mp.add_del_next_hop(&mut t, g, a, 0, true).unwrap();
        assert_eq!(back, MISS_ADJ_INDEX);
        assert!(mp.info(g).is_none());
        assert_eq!(t.remapped(g), MISS_ADJ_INDEX);
        // deleting an absent hop reports not-found
        assert!(matches!(
            mp.add_del_next_hop(&mut t, MISS_ADJ_INDEX, a, 0, true),
            Err(FibError::NotFound)
        ));
    }

    #[test]
    fn normalization_error_within_tolerance() {
        // weights 1..=5 over various tolerances: every produced block must
        // carry each hop at least once, total a power of two, and at the
        // default tolerance approximate the weight distribution per slot
        let mut t = AdjacencyTable::new(1);
        let mut mp = MultipathMain::default();
        let hops: Vec<AdjIndex> = (0..5).map(|i| rewrite_adj(&mut t, i)).collect();
        let mut g = MISS_ADJ_INDEX;
        for (i, h) in hops.iter().enumerate() {
            g = mp
                .add_del_next_hop(&mut t, g, *h, (i + 1) as u32, false)
                .unwrap();
        }
        let info = mp.info(g).unwrap();
        assert!(info.n_adj.is_power_of_two());
        let total: f64 = info.unnormalized.iter().map(|(_, w)| f64::from(*w)).sum();
        let mut err = 0.0;
        for ((_, w), (_, n)) in info.unnormalized.iter().zip(
            // unnormalized kept insertion order, normalized sorted ascending;
            // weights are distinct so order matches here
            info.normalized.iter(),
        ) {
            err += (f64::from(*w) / total - f64::from(*n) / f64::from(info.n_adj)).abs();
        }
        // each term |w/total - n/n_adj| is the per-slot error contribution,
        // so the sum is already the average per-slot error
        assert!(err <= mp.tolerance, "avg error {err} over {} slots", info.n_adj);
        assert_eq!(
            info.normalized.iter().map(|(_, n)| *n).sum::<u32>(),
            info.n_adj
        );
    }

    #[test]
    fn non_rewrite_next_hop_is_refused() {
        let mut t = AdjacencyTable::new(1);
        let mut mp = MultipathMain::default();
        let drop = t.add(AdjacencyKind::Drop);
        assert!(matches!(
            mp.add_del_next_hop(&mut t, MISS_ADJ_INDEX, drop, 1, false),
            Err(FibError::InvalidArgument(_))
        ));
    }
}
