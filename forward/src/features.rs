// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Per-interface, per-direction feature state built on the config
//! compiler: each sw-interface holds a current config index.

use ahash::RandomState;
use feature::{ConfigIndex, ConfigMain, FeatureError, NULL_CONFIG};
use graph::{NodeIndex, Runtime};
use std::collections::HashMap;

/// One direction's feature state for one address family.
pub struct RxFeatures {
    /// The compiler, anchored at the address family's input node.
    pub config_main: ConfigMain,
    current_by_sw: HashMap<u32, ConfigIndex, RandomState>,
}

impl RxFeatures {
    /// Feature state anchored at `origin_node`.
    #[must_use]
    pub fn new(origin_node: NodeIndex) -> Self {
        Self {
            config_main: ConfigMain::new(origin_node),
            current_by_sw: HashMap::with_hasher(RandomState::with_seed(0)),
        }
    }

    /// The current config index of a sw-interface ([`NULL_CONFIG`] when no
    /// feature was ever enabled).
    #[must_use]
    pub fn current(&self, sw_if_index: u32) -> ConfigIndex {
        self.current_by_sw
            .get(&sw_if_index)
            .copied()
            .unwrap_or(NULL_CONFIG)
    }

    /// Enable a feature on an interface.
    ///
    /// # Errors
    ///
    /// Propagates compiler failures.
    pub fn enable(
        &mut self,
        rt: &mut Runtime,
        sw_if_index: u32,
        priority: u32,
        node_index: NodeIndex,
        config: &[u8],
    ) -> Result<ConfigIndex, FeatureError> {
        let old = self.current(sw_if_index);
        let new = self
            .config_main
            .add_feature(rt, old, priority, node_index, config)?;
        self.current_by_sw.insert(sw_if_index, new);
        Ok(new)
    }

    /// Disable a feature on an interface.
    ///
    /// # Errors
    ///
    /// Propagates compiler failures, including feature-not-found.
    pub fn disable(
        &mut self,
        rt: &mut Runtime,
        sw_if_index: u32,
        priority: u32,
        node_index: NodeIndex,
        config: &[u8],
    ) -> Result<ConfigIndex, FeatureError> {
        let old = self.current(sw_if_index);
        let new = self
            .config_main
            .del_feature(rt, old, priority, node_index, config)?;
        if new == NULL_CONFIG {
            self.current_by_sw.remove(&sw_if_index);
        } else {
            self.current_by_sw.insert(sw_if_index, new);
        }
        Ok(new)
    }
}
