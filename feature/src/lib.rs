// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![deny(unsafe_code, missing_docs, clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![deny(clippy::all)]

//! The per-interface feature-configuration compiler.
//!
//! An ordered list of features — each a `(priority, node, config bytes)`
//! triple — compiles into a single byte string of the form
//! `[edge0][cfg0][edge1][cfg1]...`, where each edge byte is the node-local
//! next-edge from the previous feature's node (the origin node for edge 0).
//! Identical strings intern to one refcounted pool entry, so every
//! interface with the same feature combination shares one dispatch path.
//!
//! The null config, pool index 0, is immortal: it is what an interface with
//! no features points at.

use ahash::RandomState;
use buffer::Opaque;
use graph::{GraphError, NodeIndex, Runtime};
use id::Idx;
use std::collections::HashMap;
use tracing::debug;

/// Opaque lane holding a buffer's current config index.
pub const OPAQUE_LANE_CONFIG: usize = 3;
/// Opaque lane holding a buffer's config-string cursor.
pub const OPAQUE_LANE_CURSOR: usize = 4;

/// Pool index of a compiled config.
pub type ConfigIndex = Idx<Config>;

/// The immortal empty config.
pub const NULL_CONFIG: ConfigIndex = ConfigIndex::new(0);

/// One feature in a config: a graph node to visit plus the bytes it reads
/// from the config string on each packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feature {
    /// Higher priorities run first.
    pub priority: u32,
    /// Node performing the feature.
    pub node_index: NodeIndex,
    /// Per-feature configuration bytes, copied into the compiled string.
    pub config: Vec<u8>,
    /// Edge from the previous feature's node (or the origin), filled at
    /// compile time.
    pub next_edge: u16,
}

/// A compiled, interned feature list.
#[derive(Debug)]
pub struct Config {
    /// Features, highest priority first.
    pub features: Vec<Feature>,
    /// The compiled `[edge][cfg]...` string placed in buffer opaque areas.
    pub buffer_config: Vec<u8>,
    /// Interfaces (and directions) pointing at this entry.
    pub refcount: u32,
}

/// Feature-compiler failures.
#[derive(Debug, thiserror::Error)]
pub enum FeatureError {
    /// The config index does not name a live entry.
    #[error("no such config: {0}")]
    NotFound(ConfigIndex),
    /// Delete did not match any `(priority, node, bytes)` feature.
    #[error("no such feature")]
    FeatureNotFound,
    /// An edge id does not fit the one-byte encoding.
    #[error("next-edge {0} does not fit in a config byte")]
    EdgeOverflow(u16),
    /// Graph wiring failure.
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// One direction's feature-config state: the pool of compiled configs and
/// the interning map, anchored at an origin node.
pub struct ConfigMain {
    origin_node: NodeIndex,
    configs: Vec<Option<Config>>,
    by_string: HashMap<Vec<u8>, ConfigIndex, RandomState>,
}

impl ConfigMain {
    /// A compiler anchored at `origin_node`, the node whose cached next
    /// edge enters the feature chain. The null config occupies index 0.
    #[must_use]
    pub fn new(origin_node: NodeIndex) -> Self {
        Self {
            origin_node,
            configs: vec![Some(Config {
                features: Vec::new(),
                buffer_config: Vec::new(),
                refcount: 0,
            })],
            by_string: HashMap::with_hasher(RandomState::with_seed(0)),
        }
    }

    /// The origin node this compiler hangs off.
    #[must_use]
    pub fn origin_node(&self) -> NodeIndex {
        self.origin_node
    }

    /// Borrow a config entry.
    ///
    /// # Errors
    ///
    /// Returns [`FeatureError::NotFound`] for a stale index.
    pub fn get(&self, index: ConfigIndex) -> Result<&Config, FeatureError> {
        self.configs
            .get(index.as_usize())
            .and_then(Option::as_ref)
            .ok_or(FeatureError::NotFound(index))
    }

    fn compile(
        &mut self,
        rt: &mut Runtime,
        mut features: Vec<Feature>,
    ) -> Result<ConfigIndex, FeatureError> {
        // Highest priority runs first; ties break on node index so that
        // identical feature sets always compile to identical strings.
        features.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.node_index.into_raw().cmp(&b.node_index.into_raw()))
        });
        let mut string = Vec::new();
        let mut last = self.origin_node;
        for f in &mut features {
            let edge = rt.add_next(last, f.node_index)?;
            if edge > u16::from(u8::MAX) {
                return Err(FeatureError::EdgeOverflow(edge));
            }
            f.next_edge = edge;
            string.push(edge as u8);
            string.extend_from_slice(&f.config);
            last = f.node_index;
        }
        if let Some(existing) = self.by_string.get(&string) {
            return Ok(*existing);
        }
        let index = match self.configs.iter().skip(1).position(Option::is_none) {
            Some(i) => ConfigIndex::new((i + 1) as u32),
            None => {
                self.configs.push(None);
                ConfigIndex::new((self.configs.len() - 1) as u32)
            }
        };
        debug!(%index, n_features = features.len(), "new feature config");
        self.by_string.insert(string.clone(), index);
        self.configs[index.as_usize()] = Some(Config {
            features,
            buffer_config: string,
            refcount: 0,
        });
        Ok(index)
    }

    fn remove_reference(&mut self, index: ConfigIndex) {
        if index == NULL_CONFIG {
            return;
        }
        let Some(Some(config)) = self.configs.get_mut(index.as_usize()) else {
            return;
        };
        debug_assert!(config.refcount > 0);
        config.refcount -= 1;
        if config.refcount == 0 {
            let string = std::mem::take(&mut config.buffer_config);
            self.by_string.remove(&string);
            self.configs[index.as_usize()] = None;
            debug!(%index, "free feature config");
        }
    }

    /// Add a feature to the list compiled in `config_id`, returning the
    /// interned index of the resulting config. The old config loses a
    /// reference, the new one gains one.
    ///
    /// # Errors
    ///
    /// Returns [`FeatureError`] for stale indices or an edge that does not
    /// fit the one-byte encoding.
    pub fn add_feature(
        &mut self,
        rt: &mut Runtime,
        config_id: ConfigIndex,
        priority: u32,
        node_index: NodeIndex,
        config: &[u8],
    ) -> Result<ConfigIndex, FeatureError> {
        let old = self.get(config_id)?;
        let mut features = old.features.clone();
        features.push(Feature {
            priority,
            node_index,
            config: config.to_vec(),
            next_edge: 0,
        });
        let new = self.compile(rt, features)?;
        self.remove_reference(config_id);
        if let Some(Some(c)) = self.configs.get_mut(new.as_usize()) {
            c.refcount += 1;
        }
        Ok(new)
    }

    /// Remove the feature matching `(priority, node, bytes)` exactly.
    /// An emptied list maps to [`NULL_CONFIG`].
    ///
    /// # Errors
    ///
    /// Returns [`FeatureError::FeatureNotFound`] when nothing matches.
    pub fn del_feature(
        &mut self,
        rt: &mut Runtime,
        config_id: ConfigIndex,
        priority: u32,
        node_index: NodeIndex,
        config: &[u8],
    ) -> Result<ConfigIndex, FeatureError> {
        if config_id == NULL_CONFIG {
            return Err(FeatureError::FeatureNotFound);
        }
        let old = self.get(config_id)?;
        let at = old
            .features
            .iter()
            .position(|f| {
                f.priority == priority && f.node_index == node_index && f.config == config
            })
            .ok_or(FeatureError::FeatureNotFound)?;
        let mut features = old.features.clone();
        features.remove(at);
        let new = if features.is_empty() {
            NULL_CONFIG
        } else {
            let new = self.compile(rt, features)?;
            if let Some(Some(c)) = self.configs.get_mut(new.as_usize()) {
                c.refcount += 1;
            }
            new
        };
        self.remove_reference(config_id);
        Ok(new)
    }

    /// The edge the origin node takes into the chain, with the cursor the
    /// first feature node resumes from. `None` for the null config.
    ///
    /// # Errors
    ///
    /// Returns [`FeatureError::NotFound`] for a stale index.
    pub fn begin(&self, index: ConfigIndex) -> Result<Option<(u16, u32)>, FeatureError> {
        let config = self.get(index)?;
        Ok(config
            .buffer_config
            .first()
            .map(|edge| (u16::from(*edge), 1)))
    }

    /// A feature node's view: its `len`-byte config at `cursor`, and — when
    /// another feature follows — the edge to it plus the advanced cursor.
    ///
    /// # Errors
    ///
    /// Returns [`FeatureError::NotFound`] for a stale index.
    #[allow(clippy::type_complexity)]
    pub fn advance(
        &self,
        index: ConfigIndex,
        cursor: u32,
        len: u32,
    ) -> Result<(&[u8], Option<(u16, u32)>), FeatureError> {
        let config = self.get(index)?;
        let s = &config.buffer_config;
        let at = cursor as usize;
        let end = at + len as usize;
        let bytes = s.get(at..end).unwrap_or(&[]);
        let next = s
            .get(end)
            .map(|edge| (u16::from(*edge), (end + 1) as u32));
        Ok((bytes, next))
    }

    /// Stamp a buffer's opaque area with a config index and its entry
    /// cursor.
    pub fn set_buffer_config(opaque: &mut Opaque, index: ConfigIndex, cursor: u32) {
        opaque.set_u32(OPAQUE_LANE_CONFIG, index.into_raw());
        opaque.set_u32(OPAQUE_LANE_CURSOR, cursor);
    }

    /// Read back a buffer's (config index, cursor).
    #[must_use]
    pub fn buffer_config(opaque: &Opaque) -> (ConfigIndex, u32) {
        (
            ConfigIndex::new(opaque.u32(OPAQUE_LANE_CONFIG)),
            opaque.u32(OPAQUE_LANE_CURSOR),
        )
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod test {
    use super::*;
    use buffer::{BufferConfig, BufferPool};
    use graph::{DispatchCtx, Frame, NodeDesc, NodeFunction};

    struct Nop;
    impl NodeFunction for Nop {
        fn run(&mut self, _ctx: &mut DispatchCtx<'_>, frame: &Frame) -> u32 {
            frame.n_vectors() as u32
        }
    }

    fn setup(n_nodes: usize) -> (Runtime, NodeIndex, Vec<NodeIndex>) {
        let mut rt = Runtime::new_with_manual_clock(BufferPool::new(BufferConfig::default()));
        let origin = rt
            .register_node(NodeDesc::internal("origin"), Box::new(Nop))
            .unwrap();
        let nodes = (0..n_nodes)
            .map(|i| {
                rt.register_node(NodeDesc::internal(&format!("feature{i}")), Box::new(Nop))
                    .unwrap()
            })
            .collect();
        (rt, origin, nodes)
    }

    #[test]
    fn empty_config_is_null() {
        let (_rt, origin, _) = setup(0);
        let cm = ConfigMain::new(origin);
        assert_eq!(cm.get(NULL_CONFIG).unwrap().features.len(), 0);
        assert_eq!(cm.begin(NULL_CONFIG).unwrap(), None);
    }

    #[test]
    fn add_orders_add_compiles_string() {
        let (mut rt, origin, nodes) = setup(2);
        let mut cm = ConfigMain::new(origin);
        let c1 = cm
            .add_feature(&mut rt, NULL_CONFIG, 10, nodes[0], &[0xaa])
            .unwrap();
        let c2 = cm.add_feature(&mut rt, c1, 20, nodes[1], &[]).unwrap();
        let config = cm.get(c2).unwrap();
        // higher priority first
        assert_eq!(config.features[0].node_index, nodes[1]);
        assert_eq!(config.features[1].node_index, nodes[0]);
        // string: [edge origin->n1][edge n1->n0][0xaa]
        assert_eq!(config.buffer_config.len(), 3);
        assert_eq!(config.buffer_config[2], 0xaa);
        // origin enters at the high-priority feature
        let (edge, cursor) = cm.begin(c2).unwrap().unwrap();
        assert_eq!(rt.node(origin).next_nodes[edge as usize], nodes[1]);
        // the first feature has no bytes; its next edge leads to the second
        let (bytes, next) = cm.advance(c2, cursor, 0).unwrap();
        assert!(bytes.is_empty());
        let (edge2, cursor2) = next.unwrap();
        assert_eq!(rt.node(nodes[1]).next_nodes[edge2 as usize], nodes[0]);
        // the second feature consumes its byte and the chain ends
        let (bytes2, next2) = cm.advance(c2, cursor2, 1).unwrap();
        assert_eq!(bytes2, &[0xaa]);
        assert_eq!(next2, None);
    }

    #[test]
    fn interning_is_order_independent() {
        let (mut rt, origin, nodes) = setup(2);
        let mut cm = ConfigMain::new(origin);
        // interface S: add (10, X) then (20, Y)
        let s1 = cm.add_feature(&mut rt, NULL_CONFIG, 10, nodes[0], &[]).unwrap();
        let s2 = cm.add_feature(&mut rt, s1, 20, nodes[1], &[]).unwrap();
        // interface T: same adds in reverse order
        let t1 = cm.add_feature(&mut rt, NULL_CONFIG, 20, nodes[1], &[]).unwrap();
        let t2 = cm.add_feature(&mut rt, t1, 10, nodes[0], &[]).unwrap();
        assert_eq!(s2, t2);
        assert_eq!(cm.get(s2).unwrap().refcount, 2);
    }

    #[test]
    fn delete_to_empty_returns_null_and_frees() {
        let (mut rt, origin, nodes) = setup(1);
        let mut cm = ConfigMain::new(origin);
        let c1 = cm
            .add_feature(&mut rt, NULL_CONFIG, 5, nodes[0], &[1, 2])
            .unwrap();
        assert_ne!(c1, NULL_CONFIG);
        // wrong bytes do not match
        assert!(matches!(
            cm.del_feature(&mut rt, c1, 5, nodes[0], &[1]),
            Err(FeatureError::FeatureNotFound)
        ));
        let back = cm.del_feature(&mut rt, c1, 5, nodes[0], &[1, 2]).unwrap();
        assert_eq!(back, NULL_CONFIG);
        // entry was freed
        assert!(cm.get(c1).is_err());
        // and its index is reusable
        let c2 = cm
            .add_feature(&mut rt, NULL_CONFIG, 9, nodes[0], &[3])
            .unwrap();
        assert_eq!(c2, c1);
    }

    #[test]
    fn shared_configs_survive_one_release() {
        let (mut rt, origin, nodes) = setup(1);
        let mut cm = ConfigMain::new(origin);
        let a = cm.add_feature(&mut rt, NULL_CONFIG, 1, nodes[0], &[]).unwrap();
        let b = cm.add_feature(&mut rt, NULL_CONFIG, 1, nodes[0], &[]).unwrap();
        assert_eq!(a, b);
        assert_eq!(cm.get(a).unwrap().refcount, 2);
        let back = cm.del_feature(&mut rt, a, 1, nodes[0], &[]).unwrap();
        assert_eq!(back, NULL_CONFIG);
        // still alive for the second holder
        assert_eq!(cm.get(b).unwrap().refcount, 1);
    }

    #[test]
    fn buffer_opaque_stamp_round_trip() {
        let mut opaque = buffer::Opaque::default();
        ConfigMain::set_buffer_config(&mut opaque, ConfigIndex::new(7), 3);
        assert_eq!(
            ConfigMain::buffer_config(&opaque),
            (ConfigIndex::new(7), 3)
        );
    }
}
