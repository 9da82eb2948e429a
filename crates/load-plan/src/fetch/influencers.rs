use std::collections::{BTreeSet, HashSet};

use super::LockMode;
use crate::config::LoadPlanConfig;
use crate::graph::{EntityGraph, GraphSemantic};
use crate::navigable_path::NavigablePath;

/// Entity graph applied to a load together with its semantic
#[derive(Debug, Clone)]
pub struct EffectiveEntityGraph {
    pub graph: EntityGraph,
    pub semantic: GraphSemantic,
}

/// Per-load settings that change fetch decisions
#[derive(Debug, Clone)]
pub struct LoadQueryInfluencers {
    pub enabled_fetch_profiles: BTreeSet<String>,
    pub effective_entity_graph: Option<EffectiveEntityGraph>,
    pub lock_mode: LockMode,
    pub max_fetch_depth: Option<usize>,
    pub max_join_fetched_collections: usize,
    pub batch_size: Option<usize>,
    pub force_fetch_lazy_attributes: bool,
    pub alias_stem_length: usize,

    /// Paths named by `join fetch` in the originating query
    pub join_fetch_paths: HashSet<NavigablePath>,
}

impl Default for LoadQueryInfluencers {
    fn default() -> Self {
        Self::from_config(&LoadPlanConfig::default())
    }
}

impl LoadQueryInfluencers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed influencers from configuration
    pub fn from_config(config: &LoadPlanConfig) -> Self {
        Self {
            enabled_fetch_profiles: BTreeSet::new(),
            effective_entity_graph: None,
            lock_mode: LockMode::None,
            max_fetch_depth: config.max_fetch_depth,
            max_join_fetched_collections: config.max_join_fetched_collections,
            batch_size: config.default_batch_fetch_size,
            force_fetch_lazy_attributes: config.force_fetch_lazy_attributes,
            alias_stem_length: config.alias_stem_length,
            join_fetch_paths: HashSet::new(),
        }
    }

    pub fn with_fetch_profile(mut self, name: impl Into<String>) -> Self {
        self.enabled_fetch_profiles.insert(name.into());
        self
    }

    pub fn with_entity_graph(mut self, graph: EntityGraph, semantic: GraphSemantic) -> Self {
        self.effective_entity_graph = Some(EffectiveEntityGraph { graph, semantic });
        self
    }

    pub fn with_lock_mode(mut self, lock_mode: LockMode) -> Self {
        self.lock_mode = lock_mode;
        self
    }

    pub fn with_max_fetch_depth(mut self, depth: usize) -> Self {
        self.max_fetch_depth = Some(depth);
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    pub fn with_join_fetch_path(mut self, path: NavigablePath) -> Self {
        self.join_fetch_paths.insert(path);
        self
    }

    pub fn is_fetch_profile_enabled(&self, name: &str) -> bool {
        self.enabled_fetch_profiles.contains(name)
    }

    pub fn has_enabled_fetch_profiles(&self) -> bool {
        !self.enabled_fetch_profiles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config() {
        let config = LoadPlanConfig::new()
            .with_max_fetch_depth(2)
            .with_default_batch_fetch_size(16);
        let influencers = LoadQueryInfluencers::from_config(&config).with_fetch_profile("summary");

        assert_eq!(influencers.max_fetch_depth, Some(2));
        assert_eq!(influencers.batch_size, Some(16));
        assert_eq!(influencers.max_join_fetched_collections, 1);
        assert!(influencers.is_fetch_profile_enabled("summary"));
        assert!(!influencers.is_fetch_profile_enabled("detail"));
        assert_eq!(influencers.lock_mode, LockMode::None);
    }
}
