//! Return and fetch nodes of a load plan
//!
//! Nodes live in a [`PlanNodes`] arena and reference each other by
//! [`NodeId`]; a bidirectional fetch points back at the entity reference it
//! reuses instead of owning a copy of it.

use serde::Serialize;
use std::fmt;

use crate::fetch::FetchStrategy;
use crate::navigable_path::NavigablePath;
use crate::sql_ast::TableGroupId;

/// Index of a node inside its plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// What a plan node stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    EntityReturn,
    CollectionReturn,
    EntityFetch,
    /// Back-reference to an entity already loaded higher up the plan
    BidirectionalEntityFetch { target: NodeId },
    CollectionFetch,
    CompositeFetch,
    AnyFetch,
    CollectionIndex,
    CollectionElement,
    /// Identifier description of an entity with a composite identifier
    EntityIdentifier,
}

impl NodeKind {
    pub fn is_return(self) -> bool {
        matches!(self, Self::EntityReturn | Self::CollectionReturn)
    }

    pub fn is_fetch(self) -> bool {
        matches!(
            self,
            Self::EntityFetch
                | Self::BidirectionalEntityFetch { .. }
                | Self::CollectionFetch
                | Self::CompositeFetch
                | Self::AnyFetch
        )
    }

    /// Kinds whose node is a collection reference
    pub fn is_collection_reference(self) -> bool {
        matches!(self, Self::CollectionReturn | Self::CollectionFetch)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::EntityReturn => "EntityReturn",
            Self::CollectionReturn => "CollectionReturn",
            Self::EntityFetch => "EntityFetch",
            Self::BidirectionalEntityFetch { .. } => "BidirectionalEntityFetch",
            Self::CollectionFetch => "CollectionFetch",
            Self::CompositeFetch => "CompositeFetch",
            Self::AnyFetch => "AnyFetch",
            Self::CollectionIndex => "CollectionIndex",
            Self::CollectionElement => "CollectionElement",
            Self::EntityIdentifier => "EntityIdentifier",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One return, fetch or collection part of a load plan
#[derive(Debug, Clone, Serialize)]
pub struct PlanNode {
    pub id: NodeId,
    pub kind: NodeKind,
    pub navigable_path: NavigablePath,

    /// Name of the fetched attribute; `None` for returns and collection parts
    pub attribute: Option<String>,

    /// Entity loaded by this node, if it is an entity reference
    pub entity_name: Option<String>,
    pub collection_role: Option<String>,
    pub composite_type: Option<String>,

    /// Resolved strategy of a fetch
    pub fetch_strategy: Option<FetchStrategy>,

    pub owner: Option<NodeId>,
    pub fetches: Vec<NodeId>,

    /// Index part of a collection reference
    pub index_graph: Option<NodeId>,
    /// Element part of a collection reference
    pub element_graph: Option<NodeId>,
    /// Identifier description of an entity reference
    pub identifier: Option<NodeId>,

    /// Table group backing the node; `None` for select-fetched nodes
    pub query_space: Option<TableGroupId>,
}

impl PlanNode {
    pub fn new(kind: NodeKind, navigable_path: NavigablePath) -> Self {
        Self {
            id: NodeId(0),
            kind,
            navigable_path,
            attribute: None,
            entity_name: None,
            collection_role: None,
            composite_type: None,
            fetch_strategy: None,
            owner: None,
            fetches: Vec::new(),
            index_graph: None,
            element_graph: None,
            identifier: None,
            query_space: None,
        }
    }

    pub fn with_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }

    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.entity_name = Some(entity.into());
        self
    }

    pub fn with_collection_role(mut self, role: impl Into<String>) -> Self {
        self.collection_role = Some(role.into());
        self
    }

    pub fn with_composite_type(mut self, type_name: impl Into<String>) -> Self {
        self.composite_type = Some(type_name.into());
        self
    }

    pub fn with_fetch_strategy(mut self, strategy: FetchStrategy) -> Self {
        self.fetch_strategy = Some(strategy);
        self
    }

    pub fn with_owner(mut self, owner: NodeId) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn with_query_space(mut self, query_space: Option<TableGroupId>) -> Self {
        self.query_space = query_space;
        self
    }

    /// Whether the node loads an entity of its own
    pub fn is_entity_reference(&self) -> bool {
        self.entity_name.is_some()
            && matches!(
                self.kind,
                NodeKind::EntityReturn
                    | NodeKind::EntityFetch
                    | NodeKind::CollectionIndex
                    | NodeKind::CollectionElement
            )
    }

    /// Whether the node can own fetches
    pub fn is_expanding(&self) -> bool {
        match self.kind {
            NodeKind::EntityReturn | NodeKind::CompositeFetch | NodeKind::EntityIdentifier => true,
            NodeKind::EntityFetch | NodeKind::CollectionIndex | NodeKind::CollectionElement => {
                self.entity_name.is_some() || self.composite_type.is_some()
            }
            _ => false,
        }
    }

    pub fn is_join_fetched(&self) -> bool {
        self.fetch_strategy
            .map(|strategy| strategy.is_join_fetched())
            .unwrap_or(false)
    }
}

/// Arena of plan nodes
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct PlanNodes {
    nodes: Vec<PlanNode>,
}

impl PlanNodes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move a node into the arena, linking it to its owner
    pub fn add(&mut self, mut node: PlanNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        node.id = id;
        let owner = node.owner;
        let is_fetch = node.kind.is_fetch();
        self.nodes.push(node);

        if let Some(owner) = owner.and_then(|owner| self.nodes.get_mut(owner.0)) {
            if is_fetch {
                owner.fetches.push(id);
            }
        }
        id
    }

    pub fn get(&self, id: NodeId) -> Option<&PlanNode> {
        self.nodes.get(id.0)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut PlanNode> {
        self.nodes.get_mut(id.0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlanNode> {
        self.nodes.iter()
    }

    /// Fetch nodes owned by `id`, in walk order
    pub fn fetches(&self, id: NodeId) -> impl Iterator<Item = &PlanNode> {
        self.get(id)
            .map(|node| node.fetches.as_slice())
            .unwrap_or(&[])
            .iter()
            .filter_map(|fetch| self.get(*fetch))
    }

    /// Nearest entity reference at or above `id`
    ///
    /// Bidirectional fetches resolve to the entity they point back at.
    pub fn resolve_entity_reference(&self, id: NodeId) -> Option<NodeId> {
        let mut current = self.get(id)?;
        loop {
            if let NodeKind::BidirectionalEntityFetch { target } = current.kind {
                return Some(target);
            }
            if current.is_entity_reference() {
                return Some(current.id);
            }
            current = self.get(current.owner?)?;
        }
    }

    /// First node loaded for `navigable_path`
    pub fn find_by_path(&self, navigable_path: &NavigablePath) -> Option<&PlanNode> {
        self.nodes
            .iter()
            .find(|node| &node.navigable_path == navigable_path)
    }

    /// Number of nodes of the given kind
    pub fn count_kind(&self, kind: NodeKind) -> usize {
        self.nodes.iter().filter(|node| node.kind == kind).count()
    }
}
