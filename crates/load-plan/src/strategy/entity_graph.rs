//! Entity graph overlay
//!
//! The graph is walked in lockstep with the metamodel. Every attribute and
//! collection part pushes a frame on both stacks, `None` when the graph has
//! nothing for it, so push and pop counts always match the walk.

use std::sync::Arc;

use crate::error::{LoadPlanError, LoadPlanResult};
use crate::fetch::{FetchStrategy, LoadQueryInfluencers};
use crate::graph::{AttributeNode, EntityGraph, GraphSemantic, SubGraph};
use crate::metamodel::{
    AssociationNature, AttributeDefinition, CollectionDefinition, CollectionPartDefinition,
};

use super::{determine_fetch_plan, FetchDecision, LoadPlanBuildingPolicy};

/// Fetches what an entity graph names, in FETCH or LOAD semantic
#[derive(Debug, Clone)]
pub struct EntityGraphPolicy {
    graph: EntityGraph,
    semantic: GraphSemantic,
    graph_stack: Vec<Option<Arc<SubGraph>>>,
    attribute_stack: Vec<Option<Arc<AttributeNode>>>,
}

impl EntityGraphPolicy {
    pub fn new(graph: EntityGraph, semantic: GraphSemantic) -> Self {
        Self {
            graph,
            semantic,
            graph_stack: Vec::new(),
            attribute_stack: Vec::new(),
        }
    }

    /// Policy for the graph carried by the influencers, if any
    pub fn from_influencers(influencers: &LoadQueryInfluencers) -> Option<Self> {
        influencers
            .effective_entity_graph
            .as_ref()
            .map(|effective| Self::new(effective.graph.clone(), effective.semantic))
    }

    pub fn semantic(&self) -> GraphSemantic {
        self.semantic
    }

    pub fn graph(&self) -> &EntityGraph {
        &self.graph
    }

    fn current_graph(&self) -> Option<&Arc<SubGraph>> {
        self.graph_stack.last().and_then(Option::as_ref)
    }

    fn current_attribute(&self) -> Option<&Arc<AttributeNode>> {
        self.attribute_stack.last().and_then(Option::as_ref)
    }

    fn pop_graph(&mut self) -> LoadPlanResult<()> {
        self.graph_stack
            .pop()
            .map(|_| ())
            .ok_or_else(|| LoadPlanError::walking("Popped an empty entity graph stack"))
    }

    /// Decision for an attribute the graph does not name
    fn implicit_fetch_strategy(&self, decision: &FetchDecision<'_>) -> FetchStrategy {
        match self.semantic {
            GraphSemantic::Fetch => FetchStrategy::DELAYED_SELECT,
            GraphSemantic::Load => determine_fetch_plan(decision),
        }
    }
}

impl LoadPlanBuildingPolicy for EntityGraphPolicy {
    fn determine_fetch_strategy(&mut self, decision: &FetchDecision<'_>) -> LoadPlanResult<FetchStrategy> {
        let explicit = if decision.circular {
            // circular attributes are not entered, so the graph on top is the owner's
            self.current_graph()
                .map(|graph| graph.contains_attribute(&decision.attribute.name))
                .unwrap_or(false)
        } else {
            self.current_attribute().is_some()
        };

        if explicit {
            Ok(FetchStrategy::EAGER_JOIN)
        } else {
            Ok(self.implicit_fetch_strategy(decision))
        }
    }

    fn supports_root_collection_returns(&self) -> bool {
        false
    }

    fn join_fetch_circular_collection(&self, attribute: &AttributeDefinition) -> bool {
        self.current_graph()
            .map(|graph| graph.contains_attribute(&attribute.name))
            .unwrap_or(false)
    }

    fn on_start(&mut self) -> LoadPlanResult<()> {
        if !self.graph_stack.is_empty() || !self.attribute_stack.is_empty() {
            return Err(LoadPlanError::walking(
                "Entity graph stacks were not empty on start",
            ));
        }
        self.graph_stack.push(Some(self.graph.root().clone()));
        Ok(())
    }

    fn on_finish(&mut self) -> LoadPlanResult<()> {
        self.pop_graph()?;
        if !self.graph_stack.is_empty() || !self.attribute_stack.is_empty() {
            return Err(LoadPlanError::walking(format!(
                "Entity graph stacks were not empty on finish ({} graph, {} attribute frames)",
                self.graph_stack.len(),
                self.attribute_stack.len()
            )));
        }
        Ok(())
    }

    fn on_starting_attribute(&mut self, attribute: &AttributeDefinition) -> LoadPlanResult<()> {
        let node = self
            .current_graph()
            .and_then(|graph| graph.attribute_node(&attribute.name));
        let value_type = match attribute.association() {
            Some(association) if association.nature == AssociationNature::Entity => &association.target,
            _ => &attribute.type_name,
        };
        let subgraph = node.as_ref().and_then(|node| node.subgraph(value_type));
        self.attribute_stack.push(node);
        self.graph_stack.push(subgraph);
        Ok(())
    }

    fn on_finishing_attribute(&mut self, _attribute: &AttributeDefinition) -> LoadPlanResult<()> {
        self.attribute_stack
            .pop()
            .ok_or_else(|| LoadPlanError::walking("Popped an empty entity graph attribute stack"))?;
        self.pop_graph()
    }

    fn on_starting_collection_index(
        &mut self,
        _collection: &CollectionDefinition,
        index: &CollectionPartDefinition,
    ) -> LoadPlanResult<()> {
        let subgraph = self
            .current_attribute()
            .and_then(|node| node.key_subgraph(index.type_name()));
        self.graph_stack.push(subgraph);
        Ok(())
    }

    fn on_finishing_collection_index(
        &mut self,
        _collection: &CollectionDefinition,
        _index: &CollectionPartDefinition,
    ) -> LoadPlanResult<()> {
        self.pop_graph()
    }

    fn on_starting_collection_elements(
        &mut self,
        _collection: &CollectionDefinition,
        element: &CollectionPartDefinition,
    ) -> LoadPlanResult<()> {
        let subgraph = self
            .current_attribute()
            .and_then(|node| node.subgraph(element.type_name()));
        self.graph_stack.push(subgraph);
        Ok(())
    }

    fn on_finishing_collection_elements(
        &mut self,
        _collection: &CollectionDefinition,
        _element: &CollectionPartDefinition,
    ) -> LoadPlanResult<()> {
        self.pop_graph()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metamodel::{AttributeDefinition, Metamodel};
    use crate::navigable_path::NavigablePath;

    fn graph() -> EntityGraph {
        EntityGraph::new(SubGraph::new("Order").with_attribute(
            AttributeNode::new("customer").with_subgraph(SubGraph::new("Customer").with_attributes(&["address"])),
        ))
    }

    #[test]
    fn test_stacks_balance_with_placeholders() {
        let mut policy = EntityGraphPolicy::new(graph(), GraphSemantic::Fetch);
        let customer = AttributeDefinition::many_to_one("customer", "Customer", "orders", vec!["customer_id"]);
        let total = AttributeDefinition::basic("total", "decimal", "total");

        policy.on_start().unwrap();
        policy.on_starting_attribute(&total).unwrap();
        assert!(policy.current_attribute().is_none());
        assert_eq!(policy.graph_stack.len(), 2);
        policy.on_finishing_attribute(&total).unwrap();

        policy.on_starting_attribute(&customer).unwrap();
        assert_eq!(policy.current_graph().map(|g| g.type_name()), Some("Customer"));
        policy.on_finishing_attribute(&customer).unwrap();

        policy.on_finish().unwrap();
        assert!(policy.graph_stack.is_empty());
        assert!(policy.attribute_stack.is_empty());
    }

    #[test]
    fn test_subgraph_follows_the_association_target() {
        let mut policy = EntityGraphPolicy::new(graph(), GraphSemantic::Fetch);
        let customer = AttributeDefinition::many_to_one("customer", "Customer", "orders", vec!["customer_id"])
            .with_type_name("Party");

        policy.on_start().unwrap();
        policy.on_starting_attribute(&customer).unwrap();
        let current = policy.current_graph().unwrap();
        assert_eq!(current.type_name(), "Customer");
        assert!(current.contains_attribute("address"));
        policy.on_finishing_attribute(&customer).unwrap();
        policy.on_finish().unwrap();
    }

    #[test]
    fn test_finish_with_open_frames_fails() {
        let mut policy = EntityGraphPolicy::new(graph(), GraphSemantic::Load);
        let customer = AttributeDefinition::many_to_one("customer", "Customer", "orders", vec!["customer_id"]);
        policy.on_start().unwrap();
        policy.on_starting_attribute(&customer).unwrap();
        assert!(matches!(policy.on_finish(), Err(LoadPlanError::Walking { .. })));
    }

    #[test]
    fn test_named_attribute_is_joined() {
        let metamodel = Metamodel::new();
        let influencers = LoadQueryInfluencers::new();
        let customer = AttributeDefinition::many_to_one("customer", "Customer", "orders", vec!["customer_id"]);
        let path = NavigablePath::new("Order").append("customer");
        let mut policy = EntityGraphPolicy::new(graph(), GraphSemantic::Fetch);

        policy.on_start().unwrap();
        policy.on_starting_attribute(&customer).unwrap();
        let strategy = policy
            .determine_fetch_strategy(&FetchDecision {
                attribute: &customer,
                association: customer.association().unwrap(),
                owner_entity: Some("Order"),
                owner_path: "customer",
                navigable_path: &path,
                influencers: &influencers,
                metamodel: &metamodel,
                circular: false,
            })
            .unwrap();
        assert_eq!(strategy, FetchStrategy::EAGER_JOIN);
    }
}
