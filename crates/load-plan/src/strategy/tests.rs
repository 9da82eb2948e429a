use super::*;
use crate::error::LoadPlanError;
use crate::fetch::{CascadeStyle, CascadingAction, FetchStyle, FetchTiming};
use crate::metamodel::{
    CollectionDefinition, CompositeDefinition, EntityDefinition, FetchMapping,
    IdentifierDefinition,
};
use crate::navigable_path::{NavigablePath, IDENTIFIER_PART};
use crate::plan::{Disposition, LoadPlan, NodeId, NodeKind, PlanNode};
use crate::sql_ast::{TableGroupKind, VirtualKind};
use crate::walk::{AssociationVisitationStrategy, MetamodelGraphWalker};

fn shop() -> Metamodel {
    let order = EntityDefinition::new("Order", "orders")
        .with_attribute(AttributeDefinition::basic("total", "decimal", "total"))
        .with_attribute(
            AttributeDefinition::many_to_one("customer", "Customer", "orders", vec!["customer_id"])
                .with_fetch(FetchMapping::join())
                .with_cascade(CascadeStyle::of(&[CascadingAction::Merge])),
        )
        .with_attribute(
            AttributeDefinition::many_to_one("shipper", "Shipper", "orders", vec!["shipper_id"])
                .with_fetch(FetchMapping::join()),
        )
        .with_attribute(
            AttributeDefinition::collection("lines", "Order.lines", "OrderLine", "order_lines", vec!["order_id"])
                .with_fetch(FetchMapping::join()),
        )
        .with_attribute(AttributeDefinition::any("payment", "orders", "payment_type", "payment_id"));

    let line_id = CompositeDefinition::new("OrderLineId")
        .with_attribute(
            AttributeDefinition::many_to_one("order", "Order", "order_lines", vec!["order_id"])
                .with_fetch(FetchMapping::lazy()),
        )
        .with_attribute(AttributeDefinition::basic("number", "int", "line_number"));
    let line = EntityDefinition::new("OrderLine", "order_lines")
        .with_identifier(IdentifierDefinition::Encapsulated {
            attribute: "id".to_string(),
            composite: line_id,
        })
        .with_attribute(
            AttributeDefinition::many_to_one("product", "Product", "order_lines", vec!["product_id"])
                .with_fetch(FetchMapping::join()),
        );

    Metamodel::new()
        .with_entity(order)
        .and_then(|m| m.with_entity(EntityDefinition::new("Customer", "customers")))
        .and_then(|m| m.with_entity(EntityDefinition::new("Shipper", "shippers")))
        .and_then(|m| m.with_entity(EntityDefinition::new("Product", "products")))
        .and_then(|m| m.with_entity(line))
        .and_then(|m| {
            m.with_collection(CollectionDefinition::one_to_many(
                "Order.lines",
                "Order",
                "OrderLine",
                "order_lines",
                vec!["order_id"],
            ))
        })
        .unwrap()
}

#[test]
fn test_fetch_style_plan_joins_mapped_associations() {
    let metamodel = shop();
    let influencers = LoadQueryInfluencers::new();
    let plan = build_entity_load_plan(&metamodel, &influencers, FetchStylePolicy::new(), "Order").unwrap();

    assert_eq!(plan.disposition(), Disposition::EntityLoader);
    let root = plan.root_node().unwrap();
    let fetched: Vec<&str> = plan
        .fetches(root.id)
        .filter_map(|n| n.attribute.as_deref())
        .collect();
    assert_eq!(fetched, vec!["customer", "shipper", "lines", "payment"]);

    let lines = plan.find_fetch(&NavigablePath::new("Order").append("lines")).unwrap();
    assert_eq!(lines.kind, NodeKind::CollectionFetch);
    assert!(lines.is_join_fetched());
    assert!(plan.has_collection_join_fetches());

    // the any-valued association can only be selected
    let payment = plan.find_fetch(&NavigablePath::new("Order").append("payment")).unwrap();
    assert_eq!(payment.kind, NodeKind::AnyFetch);
    assert_eq!(payment.fetch_strategy.map(|s| s.style), Some(FetchStyle::Select));
    assert!(payment.query_space.is_none());
}

#[test]
fn test_composite_identifier_becomes_a_fetch_source() {
    let metamodel = shop();
    let influencers = LoadQueryInfluencers::new();
    let plan = build_entity_load_plan(&metamodel, &influencers, FetchStylePolicy::new(), "Order").unwrap();

    let element = plan
        .nodes()
        .iter()
        .find(|n| n.kind == NodeKind::CollectionElement)
        .unwrap();
    let identifier = plan.node(element.identifier.unwrap()).unwrap();
    assert_eq!(identifier.kind, NodeKind::EntityIdentifier);
    assert_eq!(identifier.navigable_path, element.navigable_path.append(IDENTIFIER_PART));

    let group = plan
        .query_spaces()
        .table_group(identifier.query_space.unwrap())
        .unwrap();
    assert!(matches!(
        group.kind(),
        TableGroupKind::Virtual(v) if v.kind == VirtualKind::Synthetic
    ));

    // the lazy key-many-to-one under the identifier is deferred
    let order = identifier.navigable_path.append("order");
    assert!(plan.find_fetch(&order).is_none());

    let product = plan.find_fetch(&element.navigable_path.append("product")).unwrap();
    assert!(product.is_join_fetched());
    assert_eq!(product.owner, Some(element.id));
}

#[test]
fn test_cascade_policy_only_joins_cascading_associations() {
    let metamodel = shop();
    let influencers = LoadQueryInfluencers::new();
    let policy = CascadeStylePolicy::new(CascadingAction::Merge);
    let plan = build_entity_load_plan(&metamodel, &influencers, policy, "Order").unwrap();

    let root = NavigablePath::new("Order");
    assert!(plan.find_fetch(&root.append("customer")).unwrap().is_join_fetched());
    assert!(plan.find_fetch(&root.append("shipper")).is_none());
    assert!(plan.find_fetch(&root.append("lines")).is_none());
}

#[test]
fn test_cascade_policy_rejects_root_collections() {
    let metamodel = shop();
    let influencers = LoadQueryInfluencers::new();
    let policy = CascadeStylePolicy::new(CascadingAction::Merge);
    let result = build_collection_load_plan(&metamodel, &influencers, policy, "Order.lines");
    assert!(matches!(
        result,
        Err(LoadPlanError::UnsupportedRootReturn { kind }) if kind == "collection"
    ));
}

#[test]
fn test_root_collection_counts_as_joined_collection() {
    let tag = EntityDefinition::new("Tag", "tags");
    let line = EntityDefinition::new("OrderLine", "order_lines").with_attribute(
        AttributeDefinition::collection("tags", "OrderLine.tags", "Tag", "line_tags", vec!["line_id"])
            .with_fetch(FetchMapping::join()),
    );
    let metamodel = Metamodel::new()
        .with_entity(EntityDefinition::new("Order", "orders"))
        .and_then(|m| m.with_entity(line))
        .and_then(|m| m.with_entity(tag))
        .and_then(|m| {
            m.with_collection(CollectionDefinition::one_to_many(
                "Order.lines",
                "Order",
                "OrderLine",
                "order_lines",
                vec!["order_id"],
            ))
        })
        .and_then(|m| {
            m.with_collection(CollectionDefinition::with_table(
                "OrderLine.tags",
                "OrderLine",
                "line_tags",
                vec!["line_id"],
                CollectionPartDefinition::entity("Tag", vec!["tag_id"]),
            ))
        })
        .unwrap();

    let influencers = LoadQueryInfluencers::new();
    let plan =
        build_collection_load_plan(&metamodel, &influencers, FetchStylePolicy::new(), "Order.lines").unwrap();
    assert_eq!(plan.disposition(), Disposition::CollectionInitializer);

    let tags = plan
        .nodes()
        .iter()
        .find(|n| n.attribute.as_deref() == Some("tags"))
        .unwrap();
    assert_eq!(
        tags.fetch_strategy,
        Some(FetchStrategy::new(FetchTiming::Immediate, FetchStyle::Select))
    );
    assert!(tags.query_space.is_none());
    assert_eq!(plan.query_spaces().rendered_table_group_count(), 1);
}

#[test]
fn test_second_root_is_rejected() {
    let metamodel = shop();
    let influencers = LoadQueryInfluencers::new();
    let mut builder = LoadPlanBuilder::new(&metamodel, &influencers, FetchStylePolicy::new());
    MetamodelGraphWalker::visit_entity(&mut builder, &metamodel, "Customer").unwrap();

    let second = MetamodelGraphWalker::visit_entity(&mut builder, &metamodel, "Shipper");
    assert!(matches!(second, Err(LoadPlanError::DuplicateRootReturn { .. })));
}

#[test]
fn test_finish_with_open_stack_fails() {
    let metamodel = shop();
    let influencers = LoadQueryInfluencers::new();
    let mut builder = LoadPlanBuilder::new(&metamodel, &influencers, FetchStylePolicy::new());
    let customer = metamodel.entity("Customer").unwrap();

    builder.start().unwrap();
    builder.starting_entity(customer).unwrap();
    assert!(matches!(builder.finish(), Err(LoadPlanError::Walking { .. })));
}

#[test]
fn test_build_without_walk_is_illegal() {
    let metamodel = shop();
    let influencers = LoadQueryInfluencers::new();
    let builder = LoadPlanBuilder::new(&metamodel, &influencers, FetchStylePolicy::new());
    assert!(matches!(
        builder.build_load_plan(),
        Err(LoadPlanError::IllegalState { .. })
    ));
}

#[test]
fn test_undefined_fetch_profile_is_ignored() {
    let metamodel = shop();
    let influencers = LoadQueryInfluencers::new().with_fetch_profile("missing");
    let plan = build_entity_load_plan(&metamodel, &influencers, FetchStylePolicy::new(), "Customer").unwrap();
    assert_eq!(plan.returns().len(), 1);
}

fn back_reference<'p>(plan: &'p LoadPlan, path: &NavigablePath) -> &'p PlanNode {
    plan.nodes()
        .iter()
        .find(|n| matches!(n.kind, NodeKind::BidirectionalEntityFetch { .. }) && &n.navigable_path == path)
        .unwrap()
}

fn target_of(node: &PlanNode) -> NodeId {
    match node.kind {
        NodeKind::BidirectionalEntityFetch { target } => target,
        _ => panic!("{} is not a back reference", node.navigable_path),
    }
}

#[test]
fn test_shared_key_resolves_to_the_fetched_entity() {
    let order = EntityDefinition::new("Order", "orders")
        .with_attribute(
            AttributeDefinition::many_to_one("customer", "Customer", "orders", vec!["customer_id"])
                .with_fetch(FetchMapping::join()),
        )
        .with_attribute(
            AttributeDefinition::many_to_one("seller", "Customer", "orders", vec!["seller_id"])
                .with_fetch(FetchMapping::join()),
        );
    let customer = EntityDefinition::new("Customer", "customers").with_attribute(
        AttributeDefinition::many_to_one("address", "Address", "customers", vec!["address_id"])
            .with_fetch(FetchMapping::join()),
    );
    let metamodel = Metamodel::new()
        .with_entity(order)
        .and_then(|m| m.with_entity(customer))
        .and_then(|m| m.with_entity(EntityDefinition::new("Address", "addresses")))
        .unwrap();

    let influencers = LoadQueryInfluencers::new();
    let plan = build_entity_load_plan(&metamodel, &influencers, FetchStylePolicy::new(), "Order").unwrap();

    let root = NavigablePath::new("Order");
    let first = plan.find_fetch(&root.append("customer").append("address")).unwrap();
    assert_eq!(first.kind, NodeKind::EntityFetch);

    let second = back_reference(&plan, &root.append("seller").append("address"));
    assert_eq!(second.entity_name.as_deref(), Some("Address"));
    assert_eq!(target_of(second), first.id);
}

#[test]
fn test_two_entity_cycle_resolves_to_the_matching_type() {
    let a = EntityDefinition::new("A", "a").with_attribute(
        AttributeDefinition::many_to_one("b", "B", "a", vec!["b_id"]).with_fetch(FetchMapping::join()),
    );
    let b = EntityDefinition::new("B", "b").with_attribute(
        AttributeDefinition::many_to_one("a", "A", "b", vec!["a_id"]).with_fetch(FetchMapping::join()),
    );
    let metamodel = Metamodel::new()
        .with_entity(a)
        .and_then(|m| m.with_entity(b))
        .unwrap();

    let influencers = LoadQueryInfluencers::new();
    let plan = build_entity_load_plan(&metamodel, &influencers, FetchStylePolicy::new(), "A").unwrap();

    let root = NavigablePath::new("A");
    let b_fetch = plan.find_fetch(&root.append("b")).unwrap();
    let cycle = back_reference(&plan, &root.append("b").append("a").append("b"));
    assert_eq!(cycle.entity_name.as_deref(), Some("B"));
    assert_eq!(target_of(cycle), b_fetch.id);
}

fn people() -> Metamodel {
    let person = EntityDefinition::new("Person", "persons").with_attribute(
        AttributeDefinition::one_to_one_inverse("passport", "Passport", "passports", vec!["person_id"], vec!["id"], "person")
            .with_fetch(FetchMapping::join()),
    );
    let passport = EntityDefinition::new("Passport", "passports").with_attribute(
        AttributeDefinition::many_to_one("person", "Person", "passports", vec!["person_id"])
            .with_fetch(FetchMapping::join()),
    );
    Metamodel::new()
        .with_entity(person)
        .and_then(|m| m.with_entity(passport))
        .unwrap()
}

#[test]
fn test_one_to_one_pair_points_back_from_either_side() {
    let metamodel = people();
    let influencers = LoadQueryInfluencers::new();

    let plan = build_entity_load_plan(&metamodel, &influencers, FetchStylePolicy::new(), "Person").unwrap();
    let root = plan.root_node().unwrap();
    let person = back_reference(&plan, &NavigablePath::new("Person").append("passport").append("person"));
    assert_eq!(target_of(person), root.id);

    let plan = build_entity_load_plan(&metamodel, &influencers, FetchStylePolicy::new(), "Passport").unwrap();
    let root = plan.root_node().unwrap();
    let passport = back_reference(&plan, &NavigablePath::new("Passport").append("person").append("passport"));
    assert_eq!(passport.entity_name.as_deref(), Some("Passport"));
    assert_eq!(target_of(passport), root.id);
}
