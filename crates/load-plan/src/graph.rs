//! Entity graph model
//!
//! An [`EntityGraph`] names the attributes that must be loaded eagerly,
//! independent of the mapped fetch settings. Graph nodes are shared through
//! `Arc` so the walk can hold cheap handles on its stacks.
//!
//! Graphs are built programmatically or parsed from the textual form
//! `customer(address), lineItems(product), tags`, where `name:Type(..)`
//! selects a subgraph for a specific subtype and `name.key(..)` describes
//! the key of a map-like collection.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{LoadPlanError, LoadPlanResult};
use crate::metamodel::{
    AttributeDefinition, AttributeKind, AssociationNature, CollectionPartDefinition,
    CompositeDefinition, EntityDefinition, Metamodel,
};

/// How attributes outside the graph are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GraphSemantic {
    /// Attributes outside the graph are lazy
    Fetch,
    /// Attributes outside the graph keep their mapped fetch settings
    Load,
}

impl GraphSemantic {
    pub fn hint_name(self) -> &'static str {
        match self {
            Self::Fetch => "elif.fetchgraph",
            Self::Load => "elif.loadgraph",
        }
    }

    pub fn from_hint_name(name: &str) -> Option<Self> {
        match name {
            "elif.fetchgraph" | "fetchgraph" => Some(Self::Fetch),
            "elif.loadgraph" | "loadgraph" => Some(Self::Load),
            _ => None,
        }
    }
}

/// Graph node for one type: attribute nodes keyed by attribute name
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SubGraph {
    type_name: String,
    attribute_nodes: BTreeMap<String, Arc<AttributeNode>>,
}

impl SubGraph {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            attribute_nodes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, node: AttributeNode) -> Self {
        self.add_attribute_node(node);
        self
    }

    /// Add attribute nodes without subgraphs
    pub fn with_attributes(mut self, names: &[&str]) -> Self {
        for name in names {
            self.add_attribute_node(AttributeNode::new(*name));
        }
        self
    }

    pub fn add_attribute_node(&mut self, node: AttributeNode) {
        self.attribute_nodes.insert(node.name.clone(), Arc::new(node));
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn attribute_node(&self, name: &str) -> Option<Arc<AttributeNode>> {
        self.attribute_nodes.get(name).cloned()
    }

    pub fn contains_attribute(&self, name: &str) -> bool {
        self.attribute_nodes.contains_key(name)
    }

    pub fn attribute_nodes(&self) -> impl Iterator<Item = &AttributeNode> {
        self.attribute_nodes.values().map(|n| n.as_ref())
    }
}

/// Graph node for one attribute, with subgraphs keyed by type name
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AttributeNode {
    name: String,
    subgraphs: BTreeMap<String, Arc<SubGraph>>,
    key_subgraphs: BTreeMap<String, Arc<SubGraph>>,
}

impl AttributeNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subgraphs: BTreeMap::new(),
            key_subgraphs: BTreeMap::new(),
        }
    }

    pub fn with_subgraph(mut self, subgraph: SubGraph) -> Self {
        self.subgraphs
            .insert(subgraph.type_name.clone(), Arc::new(subgraph));
        self
    }

    pub fn with_key_subgraph(mut self, subgraph: SubGraph) -> Self {
        self.key_subgraphs
            .insert(subgraph.type_name.clone(), Arc::new(subgraph));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subgraph for the concrete type of the attribute value
    pub fn subgraph(&self, type_name: &str) -> Option<Arc<SubGraph>> {
        self.subgraphs.get(type_name).cloned()
    }

    /// Subgraph for the concrete type of a map key
    pub fn key_subgraph(&self, type_name: &str) -> Option<Arc<SubGraph>> {
        self.key_subgraphs.get(type_name).cloned()
    }
}

/// Root graph of an entity
#[derive(Debug, Clone, PartialEq)]
pub struct EntityGraph {
    name: Option<String>,
    root: Arc<SubGraph>,
}

impl EntityGraph {
    pub fn new(root: SubGraph) -> Self {
        Self {
            name: None,
            root: Arc::new(root),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn entity_name(&self) -> &str {
        &self.root.type_name
    }

    pub fn root(&self) -> &Arc<SubGraph> {
        &self.root
    }

    /// Parse the textual graph form against the metamodel
    pub fn parse(metamodel: &Metamodel, entity: &str, text: &str) -> LoadPlanResult<Self> {
        let definition = metamodel.entity(entity)?;
        let mut parser = GraphParser {
            metamodel,
            chars: text.chars().collect(),
            pos: 0,
        };
        let root = parser.parse_subgraph(entity, Container::Entity(definition))?;
        parser.skip_whitespace();
        if parser.pos < parser.chars.len() {
            return Err(parser.error("unexpected trailing input"));
        }
        Ok(Self::new(root))
    }
}

#[derive(Clone, Copy)]
enum Container<'a> {
    Entity(&'a EntityDefinition),
    Composite(&'a CompositeDefinition),
}

impl<'a> Container<'a> {
    fn attribute(&self, name: &str) -> Option<&'a AttributeDefinition> {
        match self {
            Container::Entity(entity) => entity.find_attribute(name),
            Container::Composite(composite) => composite.attribute(name),
        }
    }

    fn name(&self) -> &'a str {
        match self {
            Container::Entity(entity) => &entity.name,
            Container::Composite(composite) => &composite.type_name,
        }
    }
}

struct GraphParser<'m> {
    metamodel: &'m Metamodel,
    chars: Vec<char>,
    pos: usize,
}

impl<'m> GraphParser<'m> {
    fn parse_subgraph(&mut self, type_name: &str, container: Container<'m>) -> LoadPlanResult<SubGraph> {
        let mut subgraph = SubGraph::new(type_name);
        loop {
            self.skip_whitespace();
            let name = self.identifier()?;
            let attribute = container.attribute(&name).ok_or_else(|| LoadPlanError::UnknownAttribute {
                owner: container.name().to_string(),
                attribute: name.clone(),
            })?;

            let mut node = AttributeNode::new(name.as_str());
            let mut is_key = false;
            if self.eat('.') {
                let qualifier = self.identifier()?;
                if qualifier != "key" {
                    return Err(self.error("expected `key` after `.`"));
                }
                is_key = true;
            }

            let explicit_type = if self.eat(':') {
                Some(self.identifier()?)
            } else {
                None
            };

            if self.eat('(') {
                let (sub_type, sub_container) =
                    self.nested_container(attribute, is_key, explicit_type.as_deref())?;
                let nested = self.parse_subgraph(&sub_type, sub_container)?;
                self.expect(')')?;
                node = if is_key {
                    node.with_key_subgraph(nested)
                } else {
                    node.with_subgraph(nested)
                };
            } else if is_key || explicit_type.is_some() {
                return Err(self.error("expected `(`"));
            }

            // Repeated mentions merge their subgraphs into one node.
            let merged = match subgraph.attribute_nodes.remove(&node.name) {
                Some(existing) => {
                    let mut existing = Arc::try_unwrap(existing).unwrap_or_else(|shared| (*shared).clone());
                    existing.subgraphs.extend(node.subgraphs);
                    existing.key_subgraphs.extend(node.key_subgraphs);
                    existing
                }
                None => node,
            };
            subgraph.add_attribute_node(merged);

            self.skip_whitespace();
            if !self.eat(',') {
                break;
            }
        }
        Ok(subgraph)
    }

    fn nested_container(
        &self,
        attribute: &'m AttributeDefinition,
        is_key: bool,
        explicit_type: Option<&str>,
    ) -> LoadPlanResult<(String, Container<'m>)> {
        let unsupported = || {
            LoadPlanError::semantic(format!(
                "Attribute `{}` cannot carry a subgraph",
                attribute.name
            ))
        };

        match &attribute.kind {
            AttributeKind::Basic => Err(unsupported()),
            AttributeKind::Composite(composite) if !is_key => {
                Ok((composite.type_name.clone(), Container::Composite(composite)))
            }
            AttributeKind::Composite(_) => Err(unsupported()),
            AttributeKind::Association(association) => match association.nature {
                AssociationNature::Any => Err(unsupported()),
                AssociationNature::Entity if is_key => Err(unsupported()),
                AssociationNature::Entity => {
                    check_explicit_type(attribute, &association.target, explicit_type)?;
                    let entity = self.metamodel.entity(&association.target)?;
                    Ok((entity.name.clone(), Container::Entity(entity)))
                }
                AssociationNature::Collection => {
                    let collection = self.metamodel.collection(&association.target)?;
                    let part = if is_key {
                        collection.index.as_ref().ok_or_else(unsupported)?
                    } else {
                        &collection.element
                    };
                    match part {
                        CollectionPartDefinition::Entity { entity, .. } => {
                            check_explicit_type(attribute, entity, explicit_type)?;
                            let entity = self.metamodel.entity(entity)?;
                            Ok((entity.name.clone(), Container::Entity(entity)))
                        }
                        CollectionPartDefinition::Composite(composite) => {
                            Ok((composite.type_name.clone(), Container::Composite(composite)))
                        }
                        _ => Err(unsupported()),
                    }
                }
            },
        }
    }

    fn identifier(&mut self) -> LoadPlanResult<String> {
        self.skip_whitespace();
        let start = self.pos;
        while self.pos < self.chars.len()
            && (self.chars[self.pos].is_alphanumeric() || self.chars[self.pos] == '_')
        {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(self.error("expected an attribute name"));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn eat(&mut self, expected: char) -> bool {
        self.skip_whitespace();
        if self.chars.get(self.pos) == Some(&expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: char) -> LoadPlanResult<()> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.error(&format!("expected `{}`", expected)))
        }
    }

    fn skip_whitespace(&mut self) {
        while self.pos < self.chars.len() && self.chars[self.pos].is_whitespace() {
            self.pos += 1;
        }
    }

    fn error(&self, message: &str) -> LoadPlanError {
        LoadPlanError::semantic(format!(
            "Invalid entity graph at position {}: {}",
            self.pos, message
        ))
    }
}

/// Walks only visit the mapped target, so `attr:Type` must name it
fn check_explicit_type(
    attribute: &AttributeDefinition,
    mapped: &str,
    explicit_type: Option<&str>,
) -> LoadPlanResult<()> {
    match explicit_type {
        Some(explicit) if explicit != mapped => Err(LoadPlanError::semantic(format!(
            "Attribute `{}` is mapped to `{}`; subgraphs for `{}` are not supported",
            attribute.name, mapped, explicit
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metamodel::CollectionDefinition;

    fn model() -> Metamodel {
        Metamodel::new()
            .with_entity(
                EntityDefinition::new("Order", "orders")
                    .with_attribute(AttributeDefinition::basic("number", "String", "number"))
                    .with_attribute(AttributeDefinition::many_to_one(
                        "customer",
                        "Customer",
                        "orders",
                        vec!["customer_id"],
                    ))
                    .with_attribute(AttributeDefinition::collection(
                        "lineItems",
                        "Order.lineItems",
                        "LineItem",
                        "line_items",
                        vec!["order_id"],
                    )),
            )
            .unwrap()
            .with_entity(
                EntityDefinition::new("Customer", "customers").with_attribute(
                    AttributeDefinition::composite(
                        "address",
                        CompositeDefinition::new("Address")
                            .with_attribute(AttributeDefinition::basic("city", "String", "city")),
                    ),
                ),
            )
            .unwrap()
            .with_entity(
                EntityDefinition::new("LineItem", "line_items").with_attribute(
                    AttributeDefinition::many_to_one("product", "Product", "line_items", vec!["product_id"]),
                ),
            )
            .unwrap()
            .with_entity(EntityDefinition::new("Product", "products"))
            .unwrap()
            .with_collection(CollectionDefinition::one_to_many(
                "Order.lineItems",
                "Order",
                "LineItem",
                "line_items",
                vec!["order_id"],
            ))
            .unwrap()
    }

    #[test]
    fn test_builder_lookup() {
        let graph = EntityGraph::new(
            SubGraph::new("Order")
                .with_attribute(
                    AttributeNode::new("customer")
                        .with_subgraph(SubGraph::new("Customer").with_attributes(&["address"])),
                )
                .with_attributes(&["lineItems"]),
        );
        let customer = graph.root().attribute_node("customer").unwrap();
        assert!(customer.subgraph("Customer").unwrap().contains_attribute("address"));
        assert!(customer.subgraph("VipCustomer").is_none());
        assert!(graph.root().attribute_node("number").is_none());
        assert_eq!(graph.entity_name(), "Order");
    }

    #[test]
    fn test_parse_nested_graph() {
        let graph = EntityGraph::parse(&model(), "Order", "customer(address(city)), lineItems(product)").unwrap();
        let root = graph.root();
        assert!(root.contains_attribute("customer"));
        let line_items = root.attribute_node("lineItems").unwrap();
        let element = line_items.subgraph("LineItem").unwrap();
        assert!(element.contains_attribute("product"));

        let address = root
            .attribute_node("customer")
            .and_then(|n| n.subgraph("Customer"))
            .and_then(|s| s.attribute_node("address"))
            .and_then(|n| n.subgraph("Address"))
            .unwrap();
        assert!(address.contains_attribute("city"));
    }

    #[test]
    fn test_parse_rejects_unknown_attribute() {
        let result = EntityGraph::parse(&model(), "Order", "customer, shipping");
        assert!(matches!(
            result,
            Err(LoadPlanError::UnknownAttribute { ref attribute, .. }) if attribute == "shipping"
        ));
    }

    #[test]
    fn test_parse_rejects_subgraph_on_basic() {
        assert!(EntityGraph::parse(&model(), "Order", "number(x)").is_err());
        assert!(EntityGraph::parse(&model(), "Order", "customer(").is_err());
    }

    #[test]
    fn test_explicit_type_must_be_the_mapped_target() {
        let graph = EntityGraph::parse(&model(), "Order", "customer:Customer(address)").unwrap();
        assert!(graph
            .root()
            .attribute_node("customer")
            .and_then(|n| n.subgraph("Customer"))
            .unwrap()
            .contains_attribute("address"));

        let result = EntityGraph::parse(&model(), "Order", "customer:Product(address)");
        assert!(matches!(result, Err(LoadPlanError::Semantic { .. })));
        let result = EntityGraph::parse(&model(), "Order", "lineItems:Product(product)");
        assert!(matches!(result, Err(LoadPlanError::Semantic { .. })));
    }

    #[test]
    fn test_semantic_hint_names() {
        assert_eq!(
            GraphSemantic::from_hint_name(GraphSemantic::Fetch.hint_name()),
            Some(GraphSemantic::Fetch)
        );
        assert_eq!(
            GraphSemantic::from_hint_name("loadgraph"),
            Some(GraphSemantic::Load)
        );
        assert_eq!(GraphSemantic::from_hint_name("other"), None);
    }
}
