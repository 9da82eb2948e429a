//! The visitation strategy that turns a metamodel walk into a load plan
//!
//! Two stacks track where the walk is: expanding fetch sources (entities,
//! composites, identifier descriptions, collection indexes and elements) and
//! collection references. Both must be empty again when the walk finishes.

use std::collections::{HashMap, HashSet};

use crate::error::{LoadPlanError, LoadPlanResult};
use crate::fetch::{FetchStrategy, FetchStyle, FetchTiming, LoadQueryInfluencers, LockMode};
use crate::metamodel::{
    AssociationDefinition, AssociationKey, AssociationNature, AttributeDefinition, AttributeKind,
    CollectionDefinition, CollectionPartDefinition, CompositeDefinition, EntityDefinition,
    IdentifierDefinition, Metamodel,
};
use crate::navigable_path::{NavigablePath, ELEMENT_PART, IDENTIFIER_PART, INDEX_PART};
use crate::plan::{
    CollectionJoin, CollectionSpaces, Disposition, EntityJoin, LoadPlan, NodeId, NodeKind,
    PlanNode, PlanNodes, QuerySpaces, Return, ScalarReturn,
};
use crate::sql_ast::{JoinType, ModelPartRef, TableGroupId, VirtualKind};
use crate::walk::{AssociationVisitationStrategy, MetamodelGraphWalker};

use super::{FetchDecision, LoadPlanBuildingPolicy};

/// Builds one load plan from one walk
///
/// Builders are single use: a second root in the same builder fails with
/// [`LoadPlanError::DuplicateRootReturn`].
pub struct LoadPlanBuilder<'m, P> {
    metamodel: &'m Metamodel,
    influencers: &'m LoadQueryInfluencers,
    policy: P,

    query_spaces: QuerySpaces,
    nodes: PlanNodes,
    root_return: Option<Return>,

    /// Path and alias of the root when it comes from a query
    root_path: Option<NavigablePath>,
    root_alias: Option<String>,
    /// Existing group to use for the root instead of creating one
    root_table_group: Option<TableGroupId>,

    fetch_source_stack: Vec<NodeId>,
    collection_reference_stack: Vec<NodeId>,
    property_path_stack: Vec<String>,

    association_key_sources: HashMap<AssociationKey, Option<NodeId>>,
    /// Joined to-one fetches for the inverse side of a pair
    inverse_fetches: HashSet<NodeId>,
    collection_spaces: HashMap<NodeId, CollectionSpaces>,
    join_fetched_collections: usize,
}

impl<'m, P: LoadPlanBuildingPolicy> LoadPlanBuilder<'m, P> {
    pub fn new(metamodel: &'m Metamodel, influencers: &'m LoadQueryInfluencers, policy: P) -> Self {
        for profile in &influencers.enabled_fetch_profiles {
            if metamodel.fetch_profile(profile).is_none() {
                tracing::warn!("Fetch profile `{}` is not defined; ignoring it", profile);
            }
        }

        Self {
            metamodel,
            influencers,
            policy,
            query_spaces: QuerySpaces::new(influencers.alias_stem_length),
            nodes: PlanNodes::new(),
            root_return: None,
            root_path: None,
            root_alias: None,
            root_table_group: None,
            fetch_source_stack: Vec::new(),
            collection_reference_stack: Vec::new(),
            property_path_stack: Vec::new(),
            association_key_sources: HashMap::new(),
            inverse_fetches: HashSet::new(),
            collection_spaces: HashMap::new(),
            join_fetched_collections: 0,
        }
    }

    /// Build on top of query spaces that already hold the query's joins
    pub fn with_query_spaces(mut self, query_spaces: QuerySpaces) -> Self {
        self.query_spaces = query_spaces;
        self
    }

    pub fn with_root_path(mut self, root_path: NavigablePath) -> Self {
        self.root_path = Some(root_path);
        self
    }

    pub fn with_root_alias(mut self, alias: impl Into<String>) -> Self {
        self.root_alias = Some(alias.into());
        self
    }

    pub fn with_root_table_group(mut self, table_group: TableGroupId) -> Self {
        self.root_table_group = Some(table_group);
        self
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn nodes(&self) -> &PlanNodes {
        &self.nodes
    }

    pub fn query_spaces(&self) -> &QuerySpaces {
        &self.query_spaces
    }

    /// Fetch source an association key was first registered under
    pub fn registered_fetch_source(&self, key: &AssociationKey) -> Option<NodeId> {
        self.association_key_sources.get(key).copied().flatten()
    }

    pub fn build_load_plan(self) -> LoadPlanResult<LoadPlan> {
        self.build_with_scalar_returns(Vec::new())
    }

    /// Package the walk result, with scalar returns selected next to the root
    pub fn build_with_scalar_returns(self, scalars: Vec<ScalarReturn>) -> LoadPlanResult<LoadPlan> {
        let root = self
            .root_return
            .ok_or_else(|| LoadPlanError::illegal_state("No root return was registered by the walk"))?;
        let disposition = match (&root, scalars.is_empty()) {
            (Return::Entity(_), true) => Disposition::EntityLoader,
            (Return::Collection(_), true) => Disposition::CollectionInitializer,
            (Return::Entity(_) | Return::Collection(_), false) => Disposition::Mixed,
            (Return::Scalar(_), _) => {
                return Err(LoadPlanError::illegal_state(
                    "Unexpected root return type, expecting an entity or collection return",
                ))
            }
        };

        let mut returns = vec![root];
        returns.extend(scalars.into_iter().map(Return::Scalar));
        let (from_clause, _) = self.query_spaces.into_parts();

        tracing::debug!(
            "Built {:?} load plan with {} return(s), {} node(s) and {} table group(s)",
            disposition,
            returns.len(),
            self.nodes.len(),
            from_clause.rendered_table_group_count()
        );
        Ok(LoadPlan::new(
            returns,
            self.nodes,
            from_clause,
            disposition,
            self.influencers.force_fetch_lazy_attributes,
        ))
    }

    fn depth_indicator(&self) -> String {
        ">>".repeat(self.fetch_source_stack.len())
    }

    fn node(&self, id: NodeId) -> LoadPlanResult<&PlanNode> {
        self.nodes
            .get(id)
            .ok_or_else(|| LoadPlanError::illegal_state(format!("Unknown plan node {}", id)))
    }

    fn current_source(&self) -> Option<NodeId> {
        self.fetch_source_stack.last().copied()
    }

    fn require_current_source(&self) -> LoadPlanResult<NodeId> {
        self.current_source()
            .ok_or_else(|| LoadPlanError::walking("No fetch source on the stack"))
    }

    fn current_collection(&self) -> Option<NodeId> {
        self.collection_reference_stack.last().copied()
    }

    fn push_to_stack(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.get(id) {
            tracing::trace!(
                "{} Pushing fetch source {} {} : {}",
                self.depth_indicator(),
                node.kind,
                id,
                node.navigable_path
            );
        }
        self.fetch_source_stack.push(id);
    }

    fn pop_from_stack(&mut self) -> LoadPlanResult<NodeId> {
        let id = self
            .fetch_source_stack
            .pop()
            .ok_or_else(|| LoadPlanError::walking("Popped an empty fetch source stack"))?;
        tracing::trace!("{} Popped fetch source {}", self.depth_indicator(), id);
        Ok(id)
    }

    fn push_to_collection_stack(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.get(id) {
            tracing::trace!(
                "{} Pushing collection reference {} {} : {}",
                self.depth_indicator(),
                node.kind,
                id,
                node.navigable_path
            );
        }
        self.collection_reference_stack.push(id);
    }

    fn pop_from_collection_stack(&mut self) -> LoadPlanResult<NodeId> {
        let id = self
            .collection_reference_stack
            .pop()
            .ok_or_else(|| LoadPlanError::walking("Popped an empty collection reference stack"))?;
        tracing::trace!("{} Popped collection reference {}", self.depth_indicator(), id);
        Ok(id)
    }

    fn check_no_root_return(&self, attempted: &NavigablePath) -> LoadPlanResult<()> {
        match &self.root_return {
            Some(existing) => Err(LoadPlanError::DuplicateRootReturn {
                existing: self.describe_return(existing),
                attempted: attempted.to_string(),
            }),
            None => Ok(()),
        }
    }

    fn describe_return(&self, root: &Return) -> String {
        match root.node().and_then(|id| self.nodes.get(id)) {
            Some(node) => format!("{} {}", node.kind, node.navigable_path),
            None => "scalar return".to_string(),
        }
    }

    /// Entity or collection role that owns the node's attributes
    fn owner_name(&self, id: NodeId) -> String {
        let mut current = self.nodes.get(id);
        while let Some(node) = current {
            if node.is_entity_reference() {
                return node.entity_name.clone().unwrap_or_default();
            }
            if let Some(role) = &node.collection_role {
                return role.clone();
            }
            current = node.owner.and_then(|owner| self.nodes.get(owner));
        }
        String::new()
    }

    fn owning_entity(&self, source: NodeId) -> LoadPlanResult<Option<&'m EntityDefinition>> {
        let metamodel = self.metamodel;
        let entity_name = self
            .nodes
            .resolve_entity_reference(source)
            .and_then(|id| self.nodes.get(id))
            .and_then(|node| node.entity_name.as_deref());
        match entity_name {
            Some(name) => Ok(Some(metamodel.entity(name)?)),
            None => Ok(None),
        }
    }

    fn part_entity(&self, part: &CollectionPartDefinition) -> LoadPlanResult<Option<&'m EntityDefinition>> {
        let metamodel = self.metamodel;
        match part.entity_name() {
            Some(name) => Ok(Some(metamodel.entity(name)?)),
            None => Ok(None),
        }
    }

    /// `Owner.path.to.attribute` naming an association occurrence
    fn association_role(&self, source: NodeId, navigable_path: &NavigablePath) -> String {
        let owner = self
            .nodes
            .resolve_entity_reference(source)
            .and_then(|id| self.nodes.get(id));
        match owner {
            Some(owner) => {
                let relative = navigable_path
                    .relative_to(&owner.navigable_path)
                    .unwrap_or_else(|| navigable_path.local_name().to_string());
                format!("{}.{}", owner.entity_name.as_deref().unwrap_or_default(), relative)
            }
            None => format!("{}.{}", self.owner_name(source), navigable_path.local_name()),
        }
    }

    /// Whether every row of the source is guaranteed to be present
    fn is_required(&self, source: NodeId) -> bool {
        let mut current = self.nodes.get(source);
        while let Some(node) = current {
            match node.kind {
                NodeKind::EntityReturn | NodeKind::CollectionReturn => return true,
                NodeKind::CompositeFetch | NodeKind::EntityIdentifier => {}
                _ => return false,
            }
            current = node.owner.and_then(|owner| self.nodes.get(owner));
        }
        false
    }

    fn determine_fetch_strategy(
        &mut self,
        attribute: &AttributeDefinition,
        association: &AssociationDefinition,
        navigable_path: &NavigablePath,
        circular: bool,
    ) -> LoadPlanResult<FetchStrategy> {
        let owner = self
            .current_source()
            .and_then(|source| self.nodes.resolve_entity_reference(source))
            .and_then(|id| self.nodes.get(id));
        let owner_entity = owner.and_then(|node| node.entity_name.clone());
        let owner_path = owner
            .and_then(|node| navigable_path.relative_to(&node.navigable_path))
            .unwrap_or_else(|| attribute.name.clone());

        let decision = FetchDecision {
            attribute,
            association,
            owner_entity: owner_entity.as_deref(),
            owner_path: &owner_path,
            navigable_path,
            influencers: self.influencers,
            metamodel: self.metamodel,
            circular,
        };
        let strategy = self.policy.determine_fetch_strategy(&decision)?;
        if strategy.is_join_fetched() {
            Ok(self.adjust_join_fetch_if_needed(association, strategy, navigable_path))
        } else {
            Ok(strategy)
        }
    }

    /// Downgrade a JOIN decision the current load cannot honor
    fn adjust_join_fetch_if_needed(
        &self,
        association: &AssociationDefinition,
        strategy: FetchStrategy,
        navigable_path: &NavigablePath,
    ) -> FetchStrategy {
        let select = strategy.with_style(FetchStyle::Select);
        let lock_mode = self.influencers.lock_mode;
        if lock_mode.greater_than(LockMode::Read) {
            tracing::debug!(
                "Fetching {} by select instead of join, lock mode {:?}",
                navigable_path,
                lock_mode
            );
            return select;
        }

        if let Some(max_fetch_depth) = self.influencers.max_fetch_depth {
            if self.fetch_source_stack.len() > max_fetch_depth {
                tracing::debug!(
                    "Fetching {} by select instead of join, depth {} exceeds {}",
                    navigable_path,
                    self.fetch_source_stack.len(),
                    max_fetch_depth
                );
                return select;
            }
        }

        if association.is_collection() && self.is_too_many_collections() {
            tracing::debug!(
                "Fetching {} by select instead of join, {} collection(s) already joined",
                navigable_path,
                self.join_fetched_collections
            );
            return select;
        }

        strategy
    }

    /// A root collection return counts as one joined collection
    fn is_too_many_collections(&self) -> bool {
        let root_collection = usize::from(matches!(self.root_return, Some(Return::Collection(_))));
        self.join_fetched_collections + root_collection >= self.influencers.max_join_fetched_collections
    }

    fn validate_fetch_plan(
        &self,
        source: NodeId,
        attribute: &AttributeDefinition,
        association: &AssociationDefinition,
        strategy: FetchStrategy,
    ) -> LoadPlanResult<()> {
        if strategy.timing == FetchTiming::Delayed && strategy.style == FetchStyle::Join {
            return Err(LoadPlanError::InvalidFetchPlan {
                attribute: attribute.name.clone(),
                message: "JOIN style cannot be combined with DELAYED timing".to_string(),
            });
        }
        if strategy.is_join_fetched()
            && association.is_collection()
            && self.node(source)?.kind == NodeKind::EntityIdentifier
        {
            return Err(LoadPlanError::InvalidFetchPlan {
                attribute: attribute.name.clone(),
                message: "collections cannot be join fetched from an identifier".to_string(),
            });
        }
        Ok(())
    }

    fn handle_composite_attribute(
        &mut self,
        source: NodeId,
        attribute: &AttributeDefinition,
        composite: &CompositeDefinition,
        navigable_path: NavigablePath,
    ) -> LoadPlanResult<bool> {
        let owner_space = self.node(source)?.query_space;
        let owner_name = self.owner_name(source);
        let space = owner_space.map(|owner| {
            self.query_spaces.make_composite_space(
                owner,
                navigable_path.clone(),
                &owner_name,
                &composite.type_name,
                VirtualKind::Composite,
            )
        });

        let id = self.nodes.add(
            PlanNode::new(NodeKind::CompositeFetch, navigable_path)
                .with_attribute(attribute.name.as_str())
                .with_composite_type(composite.type_name.as_str())
                .with_owner(source)
                .with_query_space(space),
        );
        self.push_to_stack(id);
        Ok(true)
    }

    fn handle_association_attribute(
        &mut self,
        source: NodeId,
        attribute: &AttributeDefinition,
        association: &AssociationDefinition,
        navigable_path: NavigablePath,
    ) -> LoadPlanResult<bool> {
        let strategy = self.determine_fetch_strategy(attribute, association, &navigable_path, false)?;
        self.validate_fetch_plan(source, attribute, association, strategy)?;

        if !strategy.is_immediate() {
            tracing::trace!(
                "{} Deferring {} ({})",
                self.depth_indicator(),
                navigable_path,
                strategy
            );
            return Ok(false);
        }

        let metamodel = self.metamodel;
        match association.nature {
            AssociationNature::Any => {
                // the target table is not known statically
                self.nodes.add(
                    PlanNode::new(NodeKind::AnyFetch, navigable_path)
                        .with_attribute(attribute.name.as_str())
                        .with_owner(source)
                        .with_fetch_strategy(strategy.with_style(FetchStyle::Select)),
                );
                Ok(false)
            }
            AssociationNature::Entity => {
                let target = metamodel.entity(&association.target)?;
                let join_fetched = strategy.is_join_fetched();
                let space = if join_fetched {
                    Some(self.join_entity(source, association, target, &navigable_path)?)
                } else {
                    None
                };
                let id = self.nodes.add(
                    PlanNode::new(NodeKind::EntityFetch, navigable_path)
                        .with_attribute(attribute.name.as_str())
                        .with_entity(target.name.as_str())
                        .with_owner(source)
                        .with_fetch_strategy(strategy)
                        .with_query_space(space),
                );
                if join_fetched {
                    if association.mapped_by.is_some() {
                        self.inverse_fetches.insert(id);
                    }
                    self.push_to_stack(id);
                }
                Ok(join_fetched)
            }
            AssociationNature::Collection => {
                let collection = metamodel.collection(&association.target)?;
                if strategy.is_join_fetched() {
                    let id = self.add_joined_collection_fetch(source, attribute, collection, strategy, navigable_path)?;
                    self.push_to_collection_stack(id);
                    Ok(true)
                } else {
                    self.nodes.add(
                        PlanNode::new(NodeKind::CollectionFetch, navigable_path)
                            .with_attribute(attribute.name.as_str())
                            .with_collection_role(collection.role.as_str())
                            .with_owner(source)
                            .with_fetch_strategy(strategy),
                    );
                    Ok(false)
                }
            }
        }
    }

    fn add_joined_collection_fetch(
        &mut self,
        source: NodeId,
        attribute: &AttributeDefinition,
        collection: &CollectionDefinition,
        strategy: FetchStrategy,
        navigable_path: NavigablePath,
    ) -> LoadPlanResult<NodeId> {
        let spaces = self.join_collection(source, collection, &navigable_path)?;
        let id = self.nodes.add(
            PlanNode::new(NodeKind::CollectionFetch, navigable_path)
                .with_attribute(attribute.name.as_str())
                .with_collection_role(collection.role.as_str())
                .with_owner(source)
                .with_fetch_strategy(strategy)
                .with_query_space(Some(spaces.collection)),
        );
        self.collection_spaces.insert(id, spaces);
        self.join_fetched_collections += 1;
        Ok(id)
    }

    fn source_space(&self, source: NodeId) -> LoadPlanResult<TableGroupId> {
        let node = self.node(source)?;
        node.query_space.ok_or_else(|| {
            LoadPlanError::illegal_state(format!(
                "Fetch source {} at {} has no table group to join from",
                source, node.navigable_path
            ))
        })
    }

    /// Table group for a joined to-one, reusing a compatible existing join
    fn join_entity(
        &mut self,
        source: NodeId,
        association: &AssociationDefinition,
        target: &EntityDefinition,
        navigable_path: &NavigablePath,
    ) -> LoadPlanResult<TableGroupId> {
        let owner_space = self.source_space(source)?;
        let role = self.association_role(source, navigable_path);
        let join_type = if association.optional || !self.is_required(source) {
            JoinType::Left
        } else {
            JoinType::Inner
        };

        let producer = ModelPartRef::Association(role.clone());
        if let Some(existing) = self
            .query_spaces
            .from_clause()
            .find_compatible_join(owner_space, &producer, join_type)
        {
            // an implicit join of the query only renders once fetched through
            self.query_spaces.from_clause_mut().initialize_table_group(existing);
            return Ok(existing);
        }

        let owner_entity = self.owning_entity(source)?;
        self.query_spaces.make_entity_join(EntityJoin {
            owner: owner_space,
            owner_entity,
            role,
            association,
            target,
            navigable_path: navigable_path.clone(),
            join_type,
            fetched: true,
            source_alias: None,
        })
    }

    /// Table groups for a joined collection, reusing a compatible existing join
    fn join_collection(
        &mut self,
        source: NodeId,
        collection: &CollectionDefinition,
        navigable_path: &NavigablePath,
    ) -> LoadPlanResult<CollectionSpaces> {
        let owner_space = self.source_space(source)?;
        let element_entity = self.part_entity(&collection.element)?;

        let producer = ModelPartRef::Association(collection.role.clone());
        let existing = self
            .query_spaces
            .from_clause()
            .find_compatible_join(owner_space, &producer, JoinType::Left);
        if let Some(existing) = existing {
            let element = self
                .query_spaces
                .from_clause()
                .table_group(existing)
                .map(|group| group.navigable_path().append(ELEMENT_PART))
                .and_then(|path| self.query_spaces.from_clause().find_table_group(&path));
            let from_clause = self.query_spaces.from_clause_mut();
            from_clause.initialize_table_group(existing);
            if let Some(element) = element {
                from_clause.initialize_table_group(element);
            }
            return Ok(CollectionSpaces {
                collection: existing,
                element,
            });
        }

        let metamodel = self.metamodel;
        let owner_entity = metamodel.entity(&collection.owner)?;
        self.query_spaces.make_collection_join(CollectionJoin {
            owner: owner_space,
            owner_entity,
            collection,
            element_entity,
            navigable_path: navigable_path.clone(),
            join_type: JoinType::Left,
            fetched: true,
            source_alias: None,
        })
    }

    /// Back-reference to an entity already loaded higher up the plan
    fn build_bidirectional_fetch(
        &mut self,
        source: NodeId,
        attribute: &AttributeDefinition,
        association: &AssociationDefinition,
        strategy: FetchStrategy,
        navigable_path: NavigablePath,
    ) -> LoadPlanResult<()> {
        let current = self.nodes.resolve_entity_reference(source).ok_or_else(|| {
            LoadPlanError::walking(format!(
                "Circular association {} has no owning entity reference",
                navigable_path
            ))
        })?;
        let metamodel = self.metamodel;
        let current_entity = match self.node(current)?.entity_name.as_deref() {
            Some(name) => metamodel.entity(name)?,
            None => return Err(LoadPlanError::walking("Entity reference without an entity")),
        };

        let key = &association.association_key;
        // a derived identity mapped by this very association is not a pair
        if *key == current_entity.identity_key() {
            tracing::trace!(
                "{} {} is the identity key of {}; no bidirectional fetch for {}",
                self.depth_indicator(),
                key,
                current_entity.name,
                navigable_path
            );
            return Ok(());
        }
        let Some(registered) = self.registered_fetch_source(key) else {
            return Ok(());
        };

        let target = self.back_reference_target(registered, association, &navigable_path)?;
        let (target_entity, target_path, target_space) = {
            let node = self.node(target)?;
            (
                node.entity_name.clone().unwrap_or_default(),
                node.navigable_path.clone(),
                node.query_space,
            )
        };
        let owner_space = self.node(source)?.query_space;
        let space = match (owner_space, target_space) {
            (Some(owner), Some(target_space)) => Some(self.query_spaces.make_mapped_by_space(
                owner,
                target_space,
                navigable_path.clone(),
                &target_entity,
            )),
            _ => None,
        };

        let id = self.nodes.add(
            PlanNode::new(NodeKind::BidirectionalEntityFetch { target }, navigable_path.clone())
                .with_attribute(attribute.name.as_str())
                .with_entity(target_entity)
                .with_owner(source)
                .with_fetch_strategy(strategy)
                .with_query_space(space),
        );
        tracing::debug!(
            "Resolved circular association {} into bidirectional fetch {} of {}",
            navigable_path,
            id,
            target_path
        );
        Ok(())
    }

    /// Entity reference a circular to-one points back to
    ///
    /// The key was registered either under the entity it fetched or, for the
    /// inverse side of a pair, under that entity's owner. Whichever of the
    /// two has the association's target type is the back-reference.
    fn back_reference_target(
        &self,
        registered: NodeId,
        association: &AssociationDefinition,
        navigable_path: &NavigablePath,
    ) -> LoadPlanResult<NodeId> {
        let reference = self.nodes.resolve_entity_reference(registered).ok_or_else(|| {
            LoadPlanError::walking(format!(
                "Fetch source {} registered for {} is not an entity reference",
                registered, association.association_key
            ))
        })?;
        let owner_reference = self
            .nodes
            .get(reference)
            .and_then(|node| node.owner)
            .and_then(|owner| self.nodes.resolve_entity_reference(owner));

        [Some(reference), owner_reference]
            .into_iter()
            .flatten()
            .find(|id| {
                self.nodes
                    .get(*id)
                    .and_then(|node| node.entity_name.as_deref())
                    == Some(association.target.as_str())
            })
            .ok_or_else(|| {
                LoadPlanError::walking(format!(
                    "Circular association {} targets {}, but {} was registered for {}",
                    navigable_path, association.target, reference, association.association_key
                ))
            })
    }

    /// Source a key registered while `top` is on the stack belongs to
    ///
    /// Keys belong to the entity just fetched, except for the inverse side
    /// of a pair, whose key belongs to the owner so that the owning side
    /// resolves back to it. Collections never sit on the fetch source stack,
    /// so their keys land on the owner as well.
    fn association_owner(&self, top: NodeId) -> NodeId {
        match self.nodes.get(top) {
            Some(node)
                if self.inverse_fetches.contains(&top)
                    && self.property_path_stack.last().map(String::as_str)
                        == Some(node.navigable_path.full_path()) =>
            {
                node.owner.unwrap_or(top)
            }
            _ => top,
        }
    }

    /// Whether `id` is the fetch pushed for `attribute` at `path`
    fn is_fetch_of(&self, id: NodeId, attribute: &AttributeDefinition, path: &str) -> bool {
        self.nodes
            .get(id)
            .map(|node| {
                node.kind.is_fetch()
                    && node.attribute.as_deref() == Some(attribute.name.as_str())
                    && node.navigable_path.full_path() == path
            })
            .unwrap_or(false)
    }
}

impl<'m, P: LoadPlanBuildingPolicy> AssociationVisitationStrategy for LoadPlanBuilder<'m, P> {
    fn start(&mut self) -> LoadPlanResult<()> {
        if !self.fetch_source_stack.is_empty() || !self.collection_reference_stack.is_empty() {
            return Err(LoadPlanError::walking(
                "Fetch source stacks were not empty on start",
            ));
        }
        self.property_path_stack.push(String::new());
        self.policy.on_start()
    }

    fn finish(&mut self) -> LoadPlanResult<()> {
        self.property_path_stack.pop();
        let stacks = if self.fetch_source_stack.is_empty() && self.collection_reference_stack.is_empty() {
            Ok(())
        } else {
            Err(LoadPlanError::walking(format!(
                "Fetch source stacks were not empty on finish ({} fetch sources, {} collection references)",
                self.fetch_source_stack.len(),
                self.collection_reference_stack.len()
            )))
        };
        let policy = self.policy.on_finish();
        stacks.and(policy)
    }

    fn starting_entity(&mut self, entity: &EntityDefinition) -> LoadPlanResult<()> {
        // non-root entities were set up by starting_attribute or the collection part
        if !self.fetch_source_stack.is_empty() {
            return Ok(());
        }
        if !self.policy.supports_root_entity_returns() {
            return Err(LoadPlanError::UnsupportedRootReturn {
                kind: "entity".to_string(),
            });
        }

        let path = self
            .root_path
            .clone()
            .unwrap_or_else(|| NavigablePath::new(entity.name.as_str()));
        self.check_no_root_return(&path)?;

        let space = match self.root_table_group {
            Some(existing) => existing,
            None => self
                .query_spaces
                .make_root_entity_space(entity, path.clone(), self.root_alias.as_deref()),
        };
        let id = self.nodes.add(
            PlanNode::new(NodeKind::EntityReturn, path)
                .with_entity(entity.name.as_str())
                .with_query_space(Some(space)),
        );
        self.root_return = Some(Return::Entity(id));
        self.push_to_stack(id);
        self.association_key_registered(&entity.identity_key());
        Ok(())
    }

    fn finishing_entity(&mut self, entity: &EntityDefinition) -> LoadPlanResult<()> {
        let is_root = self
            .current_source()
            .and_then(|id| self.nodes.get(id))
            .map(|node| {
                node.kind == NodeKind::EntityReturn
                    && node.entity_name.as_deref() == Some(entity.name.as_str())
            })
            .unwrap_or(false);
        if is_root {
            self.pop_from_stack()?;
        }
        Ok(())
    }

    fn starting_entity_identifier(
        &mut self,
        entity: &EntityDefinition,
        identifier: &IdentifierDefinition,
    ) -> LoadPlanResult<()> {
        let source = self.require_current_source()?;
        let (path, owner_space) = {
            let node = self.node(source)?;
            if !node.is_entity_reference() {
                return Err(LoadPlanError::walking(format!(
                    "Unexpected {} on the fetch source stack while processing the identifier of {}",
                    node.kind, entity.name
                )));
            }
            if node.entity_name.as_deref() != Some(entity.name.as_str()) {
                return Err(LoadPlanError::walking(format!(
                    "Encountered unexpected fetch owner {} while processing the identifier of {}",
                    node.navigable_path, entity.name
                )));
            }
            (node.navigable_path.append(IDENTIFIER_PART), node.query_space)
        };

        let Some(composite) = identifier.composite() else {
            return Ok(());
        };
        let space = owner_space.map(|owner| {
            self.query_spaces.make_composite_space(
                owner,
                path.clone(),
                &entity.name,
                &composite.type_name,
                VirtualKind::Synthetic,
            )
        });
        let id = self.nodes.add(
            PlanNode::new(NodeKind::EntityIdentifier, path)
                .with_composite_type(composite.type_name.as_str())
                .with_owner(source)
                .with_query_space(space),
        );
        if let Some(owner) = self.nodes.get_mut(source) {
            owner.identifier = Some(id);
        }
        self.push_to_stack(id);
        Ok(())
    }

    fn finishing_entity_identifier(
        &mut self,
        entity: &EntityDefinition,
        _identifier: &IdentifierDefinition,
    ) -> LoadPlanResult<()> {
        let source = self.require_current_source()?;
        let node = self.node(source)?;
        if node.kind != NodeKind::EntityIdentifier {
            // simple identifiers push nothing; the owner must still be on top
            if !node.is_entity_reference() || node.entity_name.as_deref() != Some(entity.name.as_str()) {
                return Err(LoadPlanError::walking(format!(
                    "Unexpected {} on the fetch source stack while finishing the identifier of {}",
                    node.kind, entity.name
                )));
            }
            return Ok(());
        }

        self.pop_from_stack()?;
        let owner = self.require_current_source()?;
        let owner = self.node(owner)?;
        if owner.entity_name.as_deref() != Some(entity.name.as_str()) {
            return Err(LoadPlanError::walking(format!(
                "Encountered unexpected fetch owner {} while finishing the identifier of {}",
                owner.navigable_path, entity.name
            )));
        }
        Ok(())
    }

    fn starting_collection(&mut self, collection: &CollectionDefinition) -> LoadPlanResult<()> {
        // collection fetches were set up by starting_attribute
        if !self.fetch_source_stack.is_empty() {
            return Ok(());
        }
        if !self.policy.supports_root_collection_returns() {
            return Err(LoadPlanError::UnsupportedRootReturn {
                kind: "collection".to_string(),
            });
        }

        let path = self
            .root_path
            .clone()
            .unwrap_or_else(|| NavigablePath::new(collection.role.as_str()));
        self.check_no_root_return(&path)?;

        let element_entity = self.part_entity(&collection.element)?;
        let spaces = self
            .query_spaces
            .make_root_collection_space(collection, element_entity, path.clone())?;
        let id = self.nodes.add(
            PlanNode::new(NodeKind::CollectionReturn, path)
                .with_collection_role(collection.role.as_str())
                .with_query_space(Some(spaces.collection)),
        );
        self.collection_spaces.insert(id, spaces);
        self.root_return = Some(Return::Collection(id));
        self.push_to_collection_stack(id);
        self.association_key_registered(&collection.identity_key());
        Ok(())
    }

    fn finishing_collection(&mut self, _collection: &CollectionDefinition) -> LoadPlanResult<()> {
        let is_root = self.fetch_source_stack.is_empty() && self.collection_reference_stack.len() == 1;
        if !is_root {
            return Ok(());
        }
        let id = self.pop_from_collection_stack()?;
        if self.node(id)?.kind != NodeKind::CollectionReturn {
            return Err(LoadPlanError::walking(format!(
                "Mismatched collection reference {} on pop, expecting the collection return",
                id
            )));
        }
        Ok(())
    }

    fn starting_collection_index(
        &mut self,
        collection: &CollectionDefinition,
        index: &CollectionPartDefinition,
    ) -> LoadPlanResult<()> {
        self.policy.on_starting_collection_index(collection, index)?;
        let collection_id = self.current_collection().ok_or_else(|| {
            LoadPlanError::walking(format!(
                "No collection reference on the stack for the index of {}",
                collection.role
            ))
        })?;
        if !index.is_expanding() {
            return Ok(());
        }

        let collection_path = self.node(collection_id)?.navigable_path.clone();
        let index_entity = self.part_entity(index)?;
        let space = match self.collection_spaces.get(&collection_id) {
            Some(spaces) => {
                let group = spaces.collection;
                self.query_spaces
                    .make_index_space(group, collection, index_entity, &collection_path)?
            }
            None => None,
        };

        let node = PlanNode::new(NodeKind::CollectionIndex, collection_path.append(INDEX_PART))
            .with_owner(collection_id)
            .with_query_space(space);
        let node = match index {
            CollectionPartDefinition::Entity { entity, .. } => node.with_entity(entity.as_str()),
            CollectionPartDefinition::Composite(composite) => node.with_composite_type(composite.type_name.as_str()),
            _ => node,
        };
        let id = self.nodes.add(node);
        if let Some(owner) = self.nodes.get_mut(collection_id) {
            owner.index_graph = Some(id);
        }
        self.push_to_stack(id);
        Ok(())
    }

    fn finishing_collection_index(
        &mut self,
        collection: &CollectionDefinition,
        index: &CollectionPartDefinition,
    ) -> LoadPlanResult<()> {
        if index.is_expanding() {
            let id = self.pop_from_stack()?;
            if self.node(id)?.kind != NodeKind::CollectionIndex {
                return Err(LoadPlanError::walking(format!(
                    "Mismatched fetch source {} on pop, expecting the index of {}",
                    id, collection.role
                )));
            }
        }
        self.policy.on_finishing_collection_index(collection, index)
    }

    fn starting_collection_elements(
        &mut self,
        collection: &CollectionDefinition,
        element: &CollectionPartDefinition,
    ) -> LoadPlanResult<()> {
        self.policy.on_starting_collection_elements(collection, element)?;
        let collection_id = self.current_collection().ok_or_else(|| {
            LoadPlanError::walking(format!(
                "No collection reference on the stack for the elements of {}",
                collection.role
            ))
        })?;
        if !element.is_expanding() {
            return Ok(());
        }

        let collection_path = self.node(collection_id)?.navigable_path.clone();
        let space = self
            .collection_spaces
            .get(&collection_id)
            .and_then(|spaces| spaces.element);

        let node = PlanNode::new(NodeKind::CollectionElement, collection_path.append(ELEMENT_PART))
            .with_owner(collection_id)
            .with_query_space(space);
        let node = match element {
            CollectionPartDefinition::Entity { entity, .. } => node.with_entity(entity.as_str()),
            CollectionPartDefinition::Composite(composite) => node.with_composite_type(composite.type_name.as_str()),
            _ => node,
        };
        let id = self.nodes.add(node);
        if let Some(owner) = self.nodes.get_mut(collection_id) {
            owner.element_graph = Some(id);
        }
        self.push_to_stack(id);
        Ok(())
    }

    fn finishing_collection_elements(
        &mut self,
        collection: &CollectionDefinition,
        element: &CollectionPartDefinition,
    ) -> LoadPlanResult<()> {
        if element.is_expanding() {
            let id = self.pop_from_stack()?;
            if self.node(id)?.kind != NodeKind::CollectionElement {
                return Err(LoadPlanError::walking(format!(
                    "Mismatched fetch source {} on pop, expecting the elements of {}",
                    id, collection.role
                )));
            }
        }
        self.policy.on_finishing_collection_elements(collection, element)
    }

    fn starting_composite(&mut self, composite: &CompositeDefinition) -> LoadPlanResult<()> {
        if self.fetch_source_stack.is_empty() && self.collection_reference_stack.is_empty() {
            return Err(LoadPlanError::walking(
                "A composite cannot be the root of a walk",
            ));
        }
        // pushed by starting_attribute, the collection parts or the identifier
        let source = self.require_current_source()?;
        match self.node(source)?.kind {
            NodeKind::CompositeFetch
            | NodeKind::CollectionElement
            | NodeKind::CollectionIndex
            | NodeKind::EntityIdentifier => Ok(()),
            other => Err(LoadPlanError::walking(format!(
                "Mismatched fetch source {} ({}) for composite {}",
                source, other, composite.type_name
            ))),
        }
    }

    fn finishing_composite(&mut self, composite: &CompositeDefinition) -> LoadPlanResult<()> {
        // popped by finishing_attribute, the collection parts or the identifier
        self.starting_composite(composite)
    }

    fn starting_attribute(&mut self, attribute: &AttributeDefinition) -> LoadPlanResult<bool> {
        self.policy.on_starting_attribute(attribute)?;
        let source = self.require_current_source()?;
        let path = self.node(source)?.navigable_path.append(&attribute.name);
        tracing::trace!("{} Starting attribute {}", self.depth_indicator(), path);
        self.property_path_stack.push(path.full_path().to_string());

        match &attribute.kind {
            AttributeKind::Basic => Ok(true),
            AttributeKind::Composite(composite) => {
                self.handle_composite_attribute(source, attribute, composite, path)
            }
            AttributeKind::Association(association) => {
                self.handle_association_attribute(source, attribute, association, path)
            }
        }
    }

    fn finishing_attribute(&mut self, attribute: &AttributeDefinition) -> LoadPlanResult<()> {
        let path = self
            .property_path_stack
            .pop()
            .ok_or_else(|| LoadPlanError::walking("Popped an empty property path stack"))?;

        match &attribute.kind {
            AttributeKind::Association(association) if association.is_collection() => {
                if let Some(top) = self.current_collection() {
                    if self.is_fetch_of(top, attribute, &path) {
                        self.pop_from_collection_stack()?;
                    }
                }
            }
            AttributeKind::Association(_) | AttributeKind::Composite(_) => {
                if let Some(top) = self.current_source() {
                    if self.is_fetch_of(top, attribute, &path) {
                        self.pop_from_stack()?;
                    }
                }
            }
            AttributeKind::Basic => {}
        }

        tracing::trace!("{} Finishing attribute {}", self.depth_indicator(), path);
        self.policy.on_finishing_attribute(attribute)
    }

    fn found_circular_association(&mut self, attribute: &AttributeDefinition) -> LoadPlanResult<()> {
        let Some(association) = attribute.association() else {
            return Err(LoadPlanError::walking(format!(
                "Circular attribute {} is not an association",
                attribute.name
            )));
        };
        let source = self.require_current_source()?;
        let path = self.node(source)?.navigable_path.append(&attribute.name);
        let strategy = self.determine_fetch_strategy(attribute, association, &path, true)?;
        if strategy.style != FetchStyle::Join {
            return Ok(());
        }

        match association.nature {
            AssociationNature::Entity => {
                self.build_bidirectional_fetch(source, attribute, association, strategy, path)
            }
            AssociationNature::Collection => {
                if self.policy.join_fetch_circular_collection(attribute) {
                    let metamodel = self.metamodel;
                    let collection = metamodel.collection(&association.target)?;
                    let id = self.add_joined_collection_fetch(source, attribute, collection, strategy, path)?;
                    tracing::debug!("Join fetching circular collection {} as {}", collection.role, id);
                }
                Ok(())
            }
            AssociationNature::Any => Ok(()),
        }
    }

    fn is_duplicate_association_key(&self, key: &AssociationKey) -> bool {
        self.association_key_sources.contains_key(key)
    }

    fn association_key_registered(&mut self, key: &AssociationKey) {
        let source = self.current_source().map(|top| self.association_owner(top));
        tracing::trace!(
            "{} Registering {} -> {:?}",
            self.depth_indicator(),
            key,
            source
        );
        self.association_key_sources.entry(key.clone()).or_insert(source);
    }
}

/// Walk `entity` and build its load plan
pub fn build_entity_load_plan<P: LoadPlanBuildingPolicy>(
    metamodel: &Metamodel,
    influencers: &LoadQueryInfluencers,
    policy: P,
    entity: &str,
) -> LoadPlanResult<LoadPlan> {
    let mut builder = LoadPlanBuilder::new(metamodel, influencers, policy);
    MetamodelGraphWalker::visit_entity(&mut builder, metamodel, entity)?;
    builder.build_load_plan()
}

/// Walk the collection `role` and build its initializer load plan
pub fn build_collection_load_plan<P: LoadPlanBuildingPolicy>(
    metamodel: &Metamodel,
    influencers: &LoadQueryInfluencers,
    policy: P,
    role: &str,
) -> LoadPlanResult<LoadPlan> {
    let mut builder = LoadPlanBuilder::new(metamodel, influencers, policy);
    MetamodelGraphWalker::visit_collection(&mut builder, metamodel, role)?;
    builder.build_load_plan()
}
