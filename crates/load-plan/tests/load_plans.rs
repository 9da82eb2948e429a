use elif_load_plan::plan::Disposition;
use elif_load_plan::sqm::{QueryLoadPlanBuilder, SqmPredicate, SqmQuerySpec, SqmSelectStatement};
use elif_load_plan::{
    build_collection_load_plan, build_entity_load_plan, AttributeNode, EntityGraph,
    EntityGraphPolicy, FetchStrategy, FetchStylePolicy, GraphSemantic, LoadPlanConfig,
    LoadPlanError, LoadQueryInfluencers, LockMode, NavigablePath, NodeKind, PlanNode, Return,
    SubGraph,
};

mod support;

fn order_path(attribute: &str) -> NavigablePath {
    NavigablePath::new("Order").append(attribute)
}

#[test]
fn test_joined_to_one_and_lazy_collection() {
    support::init_tracing();
    let metamodel = support::receipts();
    let influencers = LoadQueryInfluencers::new();
    let plan = build_entity_load_plan(&metamodel, &influencers, FetchStylePolicy::new(), "Receipt").unwrap();

    assert_eq!(plan.returns().len(), 1);
    assert!(matches!(plan.returns()[0], Return::Entity(_)));
    let root = plan.root_node().unwrap();
    assert_eq!(root.kind, NodeKind::EntityReturn);

    let joined_entities: Vec<_> = plan
        .fetches(root.id)
        .filter(|n| n.kind == NodeKind::EntityFetch && n.is_join_fetched())
        .collect();
    assert_eq!(joined_entities.len(), 1);
    assert_eq!(joined_entities[0].attribute.as_deref(), Some("customer"));
    assert_eq!(joined_entities[0].fetch_strategy, Some(FetchStrategy::EAGER_JOIN));

    let joined_collections = plan
        .fetches(root.id)
        .filter(|n| n.kind == NodeKind::CollectionFetch && n.is_join_fetched())
        .count();
    assert_eq!(joined_collections, 0);
    assert!(plan.find_fetch(&NavigablePath::new("Receipt").append("items")).is_none());
}

#[test]
fn test_bidirectional_pair_reuses_owner() {
    support::init_tracing();
    let metamodel = support::library();
    let influencers = LoadQueryInfluencers::new();
    let plan = build_entity_load_plan(&metamodel, &influencers, FetchStylePolicy::new(), "Author").unwrap();

    // authors plus the joined books; no third group for the back-reference
    assert_eq!(plan.query_spaces().rendered_table_group_count(), 2);

    let root = plan.root_node().unwrap();
    let back_reference = plan
        .nodes()
        .iter()
        .find(|n| matches!(n.kind, NodeKind::BidirectionalEntityFetch { .. }))
        .unwrap();
    assert_eq!(back_reference.kind, NodeKind::BidirectionalEntityFetch { target: root.id });
    assert_eq!(back_reference.attribute.as_deref(), Some("author"));
}

#[test]
fn test_fetch_graph_makes_other_attributes_lazy() {
    let metamodel = support::shop();
    let graph = EntityGraph::new(SubGraph::new("Order").with_attributes(&["customer"]));
    let influencers = LoadQueryInfluencers::new().with_entity_graph(graph, GraphSemantic::Fetch);
    let policy = EntityGraphPolicy::from_influencers(&influencers).unwrap();
    let plan = build_entity_load_plan(&metamodel, &influencers, policy, "Order").unwrap();

    assert!(plan.find_fetch(&order_path("customer")).unwrap().is_join_fetched());
    assert!(plan.find_fetch(&order_path("shipper")).is_none());
}

#[test]
fn test_load_graph_keeps_mapped_fetches() {
    let metamodel = support::shop();
    let graph = EntityGraph::new(SubGraph::new("Order").with_attributes(&["customer"]));
    let influencers = LoadQueryInfluencers::new().with_entity_graph(graph, GraphSemantic::Load);
    let policy = EntityGraphPolicy::from_influencers(&influencers).unwrap();
    let plan = build_entity_load_plan(&metamodel, &influencers, policy, "Order").unwrap();

    assert!(plan.find_fetch(&order_path("customer")).unwrap().is_join_fetched());
    assert!(plan.find_fetch(&order_path("shipper")).unwrap().is_join_fetched());
}

#[test]
fn test_fetch_depth_cap_downgrades_deeper_joins() {
    support::init_tracing();
    let metamodel = support::shop();
    let config = LoadPlanConfig::from_yaml_str("max_fetch_depth: 1\n").unwrap();
    let influencers = LoadQueryInfluencers::from_config(&config);
    let plan = build_entity_load_plan(&metamodel, &influencers, FetchStylePolicy::new(), "Order").unwrap();

    let customer = plan.find_fetch(&order_path("customer")).unwrap();
    assert!(customer.is_join_fetched());

    let region = plan.find_fetch(&order_path("customer").append("region")).unwrap();
    assert_eq!(region.fetch_strategy, Some(FetchStrategy::IMMEDIATE_SELECT));
    assert!(region.query_space.is_none());
}

#[test]
fn test_pessimistic_lock_disables_join_fetching() {
    let metamodel = support::shop();
    let influencers = LoadQueryInfluencers::new().with_lock_mode(LockMode::PessimisticWrite);
    let plan = build_entity_load_plan(&metamodel, &influencers, FetchStylePolicy::new(), "Order").unwrap();

    assert_eq!(plan.join_fetches().count(), 0);
    let customer = plan.find_fetch(&order_path("customer")).unwrap();
    assert_eq!(customer.fetch_strategy, Some(FetchStrategy::IMMEDIATE_SELECT));
    assert_eq!(plan.query_spaces().rendered_table_group_count(), 1);

    // the lock wins over an entity graph naming the association
    let graph = EntityGraph::new(SubGraph::new("Order").with_attributes(&["customer"]));
    let influencers = influencers.with_entity_graph(graph, GraphSemantic::Fetch);
    let policy = EntityGraphPolicy::from_influencers(&influencers).unwrap();
    let plan = build_entity_load_plan(&metamodel, &influencers, policy, "Order").unwrap();
    assert_eq!(plan.join_fetches().count(), 0);
}

#[test]
fn test_self_reference_terminates() {
    support::init_tracing();
    let metamodel = support::staff();
    let influencers = LoadQueryInfluencers::new();
    let plan = build_entity_load_plan(&metamodel, &influencers, FetchStylePolicy::new(), "Employee").unwrap();

    assert_eq!(plan.query_spaces().rendered_table_group_count(), 2);
    let manager = NavigablePath::new("Employee").append("manager");
    assert!(plan.find_fetch(&manager).unwrap().is_join_fetched());
}

#[test]
fn test_identity_key_association_is_not_a_pair() {
    let metamodel = support::staff();
    let influencers = LoadQueryInfluencers::new();
    let plan = build_entity_load_plan(&metamodel, &influencers, FetchStylePolicy::new(), "Profile").unwrap();

    assert!(plan.find_fetch(&NavigablePath::new("Profile").append("user")).is_none());
    assert!(!plan
        .nodes()
        .iter()
        .any(|n| matches!(n.kind, NodeKind::BidirectionalEntityFetch { .. })));
    assert_eq!(plan.query_spaces().rendered_table_group_count(), 1);
}

#[test]
fn test_entity_graph_rejects_collection_roots() {
    let metamodel = support::shop();
    let graph = EntityGraph::new(SubGraph::new("Order"));
    let influencers = LoadQueryInfluencers::new().with_entity_graph(graph, GraphSemantic::Load);
    let policy = EntityGraphPolicy::from_influencers(&influencers).unwrap();
    let result = build_collection_load_plan(&metamodel, &influencers, policy, "Order.lines");
    assert!(matches!(
        result,
        Err(LoadPlanError::UnsupportedRootReturn { .. })
    ));
}

#[test]
fn test_collection_initializer_plan() {
    let metamodel = support::shop();
    let influencers = LoadQueryInfluencers::new();
    let plan =
        build_collection_load_plan(&metamodel, &influencers, FetchStylePolicy::new(), "Order.lines").unwrap();

    assert_eq!(plan.disposition(), Disposition::CollectionInitializer);
    assert!(matches!(plan.returns()[0], Return::Collection(_)));
}

#[test]
fn test_query_join_fetch_extends_the_mapped_plan() {
    support::init_tracing();
    let metamodel = support::shop();
    let influencers = LoadQueryInfluencers::new();
    let statement = SqmSelectStatement::new(
        SqmQuerySpec::new()
            .from("Order", "o")
            .left_join_fetch("o.lines", "l")
            .select("o"),
    );
    let query = QueryLoadPlanBuilder::new(&metamodel, &influencers)
        .build(&statement)
        .unwrap();

    let plan = &query.plan;
    let root = NavigablePath::with_alias("Order", "o");
    let lines = plan.find_fetch(&root.append("lines")).unwrap();
    assert_eq!(lines.kind, NodeKind::CollectionFetch);
    assert!(lines.is_join_fetched());
    assert!(plan.find_fetch(&root.append("customer")).unwrap().is_join_fetched());

    // orders, lines, customers, regions, shippers
    assert_eq!(plan.query_spaces().rendered_table_group_count(), 5);

    let explain = plan.to_json();
    assert_eq!(explain["disposition"], "EntityLoader");
}

#[test]
fn test_implicit_join_of_the_restriction_is_materialized_when_fetched() {
    let metamodel = support::shop();
    let influencers = LoadQueryInfluencers::new();
    let statement = SqmSelectStatement::new(
        SqmQuerySpec::new()
            .from("Order", "o")
            .where_predicate(SqmPredicate::eq("o.shipper.id", 1))
            .select("o"),
    );
    let query = QueryLoadPlanBuilder::new(&metamodel, &influencers)
        .build(&statement)
        .unwrap();

    let plan = &query.plan;
    let shipper = plan
        .find_fetch(&NavigablePath::with_alias("Order", "o").append("shipper"))
        .unwrap();
    assert!(shipper.is_join_fetched());
    let group = plan.query_spaces().table_group(shipper.query_space.unwrap()).unwrap();
    assert!(group.is_initialized());

    // orders, shippers, customers, regions
    assert_eq!(plan.query_spaces().rendered_table_group_count(), 4);
    assert!(plan.query_spaces().has_joins());
}

#[test]
fn test_entity_graph_joins_circular_collection_only_when_named() {
    let metamodel = support::library();
    let books = NavigablePath::new("Book").append("author").append("books");

    let graph = EntityGraph::new(SubGraph::new("Book").with_attribute(
        AttributeNode::new("author").with_subgraph(SubGraph::new("Author").with_attributes(&["books"])),
    ));
    let influencers = LoadQueryInfluencers::new().with_entity_graph(graph, GraphSemantic::Fetch);
    let policy = EntityGraphPolicy::from_influencers(&influencers).unwrap();
    let plan = build_entity_load_plan(&metamodel, &influencers, policy, "Book").unwrap();
    let fetched = plan.find_fetch(&books).unwrap();
    assert_eq!(fetched.kind, NodeKind::CollectionFetch);
    assert!(fetched.is_join_fetched());

    let graph = EntityGraph::new(SubGraph::new("Book").with_attributes(&["author"]));
    let influencers = LoadQueryInfluencers::new().with_entity_graph(graph, GraphSemantic::Fetch);
    let policy = EntityGraphPolicy::from_influencers(&influencers).unwrap();
    let plan = build_entity_load_plan(&metamodel, &influencers, policy, "Book").unwrap();
    assert!(plan
        .find_fetch(&NavigablePath::new("Book").append("author"))
        .unwrap()
        .is_join_fetched());
    assert!(plan.find_fetch(&books).is_none());
}

#[test]
fn test_fetch_graph_decides_circular_to_one() {
    let metamodel = support::staff();
    let manager = NavigablePath::new("Employee").append("manager");
    let back_reference = manager.append("manager");
    let is_back_reference = |n: &&PlanNode| {
        matches!(n.kind, NodeKind::BidirectionalEntityFetch { .. }) && n.navigable_path == back_reference
    };

    let graph = EntityGraph::new(SubGraph::new("Employee").with_attribute(
        AttributeNode::new("manager").with_subgraph(SubGraph::new("Employee").with_attributes(&["manager"])),
    ));
    let influencers = LoadQueryInfluencers::new().with_entity_graph(graph, GraphSemantic::Fetch);
    let policy = EntityGraphPolicy::from_influencers(&influencers).unwrap();
    let plan = build_entity_load_plan(&metamodel, &influencers, policy, "Employee").unwrap();
    let first = plan.find_fetch(&manager).unwrap();
    let circular = plan.nodes().iter().find(is_back_reference).unwrap();
    assert_eq!(circular.kind, NodeKind::BidirectionalEntityFetch { target: first.id });

    // not named below the first manager: deferred
    let graph = EntityGraph::new(SubGraph::new("Employee").with_attributes(&["manager"]));
    let influencers = LoadQueryInfluencers::new().with_entity_graph(graph, GraphSemantic::Fetch);
    let policy = EntityGraphPolicy::from_influencers(&influencers).unwrap();
    let plan = build_entity_load_plan(&metamodel, &influencers, policy, "Employee").unwrap();
    assert!(plan.find_fetch(&manager).unwrap().is_join_fetched());
    assert!(!plan.nodes().iter().any(|n| is_back_reference(&n)));
}
