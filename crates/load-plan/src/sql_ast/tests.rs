use super::*;
use crate::error::LoadPlanError;
use crate::navigable_path::{NavigablePath, ELEMENT_PART, IDENTIFIER_PART};
use std::sync::Arc;

fn standard_group(
    generator: &mut SqlAliasBaseGenerator,
    path: &NavigablePath,
    entity: &str,
    table: &str,
) -> TableGroup {
    let mut base = generator.create_sql_alias_base(entity);
    let primary = TableReference::named(table, base.generate_new_alias(), false);
    TableGroup::new(
        path.clone(),
        ModelPartRef::Entity(entity.to_string()),
        TableGroupKind::Standard(TableStorage::new(primary, base)),
    )
}

struct Fixture {
    from_clause: FromClause,
    generator: SqlAliasBaseGenerator,
    root_path: NavigablePath,
    root: TableGroupId,
}

fn fixture() -> Fixture {
    let mut generator = SqlAliasBaseGenerator::default();
    let mut from_clause = FromClause::new();
    let root_path = NavigablePath::with_alias("Order", "o");
    let root = from_clause.add_root_table_group(standard_group(&mut generator, &root_path, "Order", "orders"));
    Fixture {
        from_clause,
        generator,
        root_path,
        root,
    }
}

fn customer_producer() -> ModelPartRef {
    ModelPartRef::Association("Order.customer".to_string())
}

fn join_customer(f: &mut Fixture, join_type: JoinType) -> TableGroupId {
    let path = f.root_path.append("customer");
    let group = standard_group(&mut f.generator, &path, "Customer", "customers");
    let id = f.from_clause.register(group);
    let orders = f.from_clause.primary_table_reference(f.root).unwrap();
    let customers = f.from_clause.primary_table_reference(id).unwrap();
    let predicate = Predicate::column_equality(
        &orders,
        &["customer_id".to_string()],
        &customers,
        &["id".to_string()],
    );
    f.from_clause.add_table_group_join(
        f.root,
        TableGroupJoin::new(path, join_type, id, Some(predicate), Some(customer_producer())),
    );
    id
}

#[test]
fn test_existing_inner_join_satisfies_left_request() {
    let mut f = fixture();
    let customer = join_customer(&mut f, JoinType::Inner);

    assert_eq!(
        f.from_clause
            .find_compatible_join(f.root, &customer_producer(), JoinType::Left),
        Some(customer)
    );
    assert_eq!(
        f.from_clause
            .find_compatible_join(f.root, &customer_producer(), JoinType::Inner),
        Some(customer)
    );
}

#[test]
fn test_existing_left_join_never_satisfies_inner_request() {
    let mut f = fixture();
    join_customer(&mut f, JoinType::Left);

    assert_eq!(
        f.from_clause
            .find_compatible_join(f.root, &customer_producer(), JoinType::Inner),
        None
    );
    assert!(f
        .from_clause
        .find_compatible_join(f.root, &ModelPartRef::Association("Order.shipper".to_string()), JoinType::Left)
        .is_none());
}

#[test]
fn test_join_with_extra_predicate_is_not_reused() {
    let mut f = fixture();
    let customer = join_customer(&mut f, JoinType::Inner);
    let customers = f.from_clause.primary_table_reference(customer).unwrap();
    f.from_clause
        .find_join_mut(f.root, customer)
        .unwrap()
        .apply_predicate(Predicate::comparison(
            Expression::column(&customers, "active"),
            ComparisonOperator::Equal,
            Expression::literal(true),
        ));

    assert!(f
        .from_clause
        .find_compatible_join(f.root, &customer_producer(), JoinType::Left)
        .is_none());
}

#[test]
fn test_prepend_table_group_join() {
    let mut f = fixture();
    let customer = join_customer(&mut f, JoinType::Left);
    let customer_path = f.root_path.append("customer");

    let shipper_path = f.root_path.append("shipper");
    let shipper = f
        .from_clause
        .register(standard_group(&mut f.generator, &shipper_path, "Shipper", "shippers"));
    f.from_clause
        .prepend_table_group_join(
            f.root,
            &customer_path,
            TableGroupJoin::new(shipper_path.clone(), JoinType::Left, shipper, None, None),
        )
        .unwrap();

    let joins: Vec<TableGroupId> = f
        .from_clause
        .table_group(f.root)
        .unwrap()
        .table_group_joins()
        .iter()
        .map(TableGroupJoin::joined_group)
        .collect();
    assert_eq!(joins, vec![shipper, customer]);

    let missing_path = f.root_path.append("billing");
    let billing = f
        .from_clause
        .register(standard_group(&mut f.generator, &missing_path, "Address", "addresses"));
    let result = f.from_clause.prepend_table_group_join(
        f.root,
        &missing_path,
        TableGroupJoin::new(missing_path.clone(), JoinType::Left, billing, None, None),
    );
    assert!(matches!(result, Err(LoadPlanError::NoSuchJoin { .. })));
}

#[test]
fn test_lookup_without_resolve_is_idempotent() {
    let mut generator = SqlAliasBaseGenerator::default();
    let mut from_clause = FromClause::new();
    let path = NavigablePath::new("Customer");
    let mut base = generator.create_sql_alias_base("Customer");
    let primary = TableReference::named("customers", base.generate_new_alias(), false);
    let storage = TableStorage::new(primary, base).with_potential_join(PotentialTableJoin {
        table_expression: "customer_details".to_string(),
        key_columns: vec!["customer_id".to_string()],
        primary_key_columns: vec!["id".to_string()],
        optional: true,
    });
    let root = from_clause.add_root_table_group(TableGroup::new(
        path.clone(),
        ModelPartRef::Entity("Customer".to_string()),
        TableGroupKind::Standard(storage),
    ));

    let first = from_clause.get_table_reference(root, &path, "customers", false).unwrap();
    let second = from_clause.get_table_reference(root, &path, "customers", false).unwrap();
    assert!(first.ptr_eq(&second));

    assert!(from_clause
        .get_table_reference(root, &path, "customer_details", false)
        .is_none());
    assert!(from_clause
        .get_table_reference(root, &path, "customer_details", false)
        .is_none());
    assert!(from_clause.table_reference_joins(root).is_empty());

    let details = from_clause
        .resolve_table_reference(root, &path, "customer_details")
        .unwrap();
    assert_eq!(from_clause.table_reference_joins(root).len(), 1);
    let again = from_clause
        .get_table_reference(root, &path, "customer_details", false)
        .unwrap();
    assert!(again.ptr_eq(&details));
}

#[test]
fn test_resolve_unknown_table_fails() {
    let mut f = fixture();
    let err = f
        .from_clause
        .resolve_table_reference(f.root, &f.root_path, "invoices")
        .unwrap_err();
    assert!(matches!(
        err,
        LoadPlanError::UnknownTableReference { ref table_expression, ref navigable_path }
            if table_expression == "invoices" && navigable_path == "Order(o)"
    ));
}

#[test]
fn test_lazy_group_uses_parent_for_foreign_key() {
    let mut f = fixture();
    let customer_path = f.root_path.append("customer");
    let mut base = f.generator.create_sql_alias_base("Customer");
    let primary = TableReference::named("customers", base.generate_new_alias(), true);
    let id_path = customer_path.append(IDENTIFIER_PART);
    let checker_path = id_path.clone();
    let lazy = LazyTableGroup::new(f.root, TableStorage::new(primary, base))
        .with_parent_use_checker(Arc::new(move |path: &NavigablePath, _table: &str| path == &checker_path));
    let customer = f.from_clause.register(TableGroup::new(
        customer_path.clone(),
        ModelPartRef::Entity("Customer".to_string()),
        TableGroupKind::Lazy(lazy),
    ));
    f.from_clause.add_table_group_join(
        f.root,
        TableGroupJoin::new(customer_path.clone(), JoinType::Left, customer, None, Some(customer_producer())),
    );

    assert!(!f.from_clause.has_joins());

    // The foreign key is answered by the owning table without a join.
    let fk = f
        .from_clause
        .get_table_reference(customer, &id_path, "orders", true)
        .unwrap();
    assert_eq!(fk.table_expression(), "orders");
    assert!(!f.from_clause.table_group(customer).unwrap().is_initialized());

    let name_path = customer_path.append("name");
    assert!(f
        .from_clause
        .get_table_reference(customer, &name_path, "customers", false)
        .is_none());

    let customers = f
        .from_clause
        .resolve_table_reference(customer, &name_path, "customers")
        .unwrap();
    assert_eq!(customers.identification_variable(), "c1_0");
    assert!(f.from_clause.table_group(customer).unwrap().is_initialized());
    assert!(f.from_clause.has_joins());
}

#[test]
fn test_lazy_group_replays_buffered_joins() {
    let mut f = fixture();
    let customer_path = f.root_path.append("customer");
    let mut base = f.generator.create_sql_alias_base("Customer");
    let primary = TableReference::named("customers", base.generate_new_alias(), true);
    let customer = f.from_clause.register(TableGroup::new(
        customer_path.clone(),
        ModelPartRef::Entity("Customer".to_string()),
        TableGroupKind::Lazy(LazyTableGroup::new(f.root, TableStorage::new(primary, base))),
    ));
    f.from_clause.add_table_group_join(
        f.root,
        TableGroupJoin::new(customer_path.clone(), JoinType::Left, customer, None, None),
    );

    let region_path = customer_path.append("region");
    let region = f
        .from_clause
        .register(standard_group(&mut f.generator, &region_path, "Region", "regions"));
    f.from_clause.add_table_group_join(
        customer,
        TableGroupJoin::new(region_path.clone(), JoinType::Left, region, None, None),
    );

    assert_eq!(f.from_clause.find_table_group(&region_path), Some(region));
    assert!(f.from_clause.initialize_table_group(customer));
    let group = f.from_clause.table_group(customer).unwrap();
    assert_eq!(group.table_group_joins().len(), 1);
    assert_eq!(group.table_group_joins()[0].joined_group(), region);
}

#[test]
fn test_virtual_group_delegates_to_underlying() {
    let mut f = fixture();
    let billing_path = f.root_path.append("billing");
    let billing = f.from_clause.register(TableGroup::new(
        billing_path.clone(),
        ModelPartRef::Composite {
            owner: "Order".to_string(),
            type_name: "Address".to_string(),
        },
        TableGroupKind::Virtual(VirtualTableGroup {
            kind: VirtualKind::Composite,
            underlying: f.root,
        }),
    ));
    f.from_clause.add_nested_table_group_join(
        f.root,
        TableGroupJoin::new(billing_path.clone(), JoinType::Inner, billing, None, None),
    );

    let via_virtual = f
        .from_clause
        .resolve_table_reference(billing, &billing_path.append("street"), "orders")
        .unwrap();
    let primary = f.from_clause.primary_table_reference(f.root).unwrap();
    assert!(via_virtual.ptr_eq(&primary));
    assert!(f
        .from_clause
        .primary_table_reference(billing)
        .unwrap()
        .ptr_eq(&primary));

    // Virtual joins never render.
    assert!(!f.from_clause.has_joins());
    assert!(f.from_clause.table_group(f.root).unwrap().is_real_table_group());
    assert_eq!(f.from_clause.rendered_table_group_count(), 1);
}

#[test]
fn test_correlated_group_turns_joins_into_roots() {
    let mut f = fixture();
    let mut sub_query = QuerySpec::new(false);
    let correlated = sub_query
        .add_correlated_root(&f.from_clause, f.root)
        .unwrap();
    assert!(sub_query
        .from_clause()
        .table_group(correlated)
        .unwrap()
        .is_virtual());

    let items_path = f.root_path.append("lineItems");
    let items = sub_query
        .from_clause_mut()
        .register(standard_group(&mut f.generator, &items_path, "LineItem", "line_items"));
    let orders = sub_query
        .from_clause_mut()
        .resolve_table_reference(correlated, &f.root_path, "orders")
        .unwrap();
    let line_items = sub_query.from_clause().primary_table_reference(items).unwrap();
    let predicate = Predicate::column_equality(
        &orders,
        &["id".to_string()],
        &line_items,
        &["order_id".to_string()],
    );
    sub_query.from_clause_mut().add_table_group_join(
        correlated,
        TableGroupJoin::new(items_path, JoinType::Inner, items, Some(predicate), None),
    );

    assert_eq!(sub_query.from_clause().roots(), &[correlated, items]);
    assert!(sub_query
        .from_clause()
        .table_group(correlated)
        .unwrap()
        .table_group_joins()
        .is_empty());
    let restriction = sub_query.where_predicate().unwrap();
    assert!(restriction.references_qualifier("o1_0"));
    assert!(restriction.references_qualifier("l1_0"));
}

#[test]
fn test_find_table_group_for_one_to_many_element() {
    let mut f = fixture();
    let items_path = f.root_path.append("lineItems");
    let items = f.from_clause.register(
        standard_group(&mut f.generator, &items_path, "LineItem", "line_items").with_one_to_many(true),
    );
    f.from_clause.add_table_group_join(
        f.root,
        TableGroupJoin::new(items_path.clone(), JoinType::Left, items, None, None),
    );

    assert_eq!(f.from_clause.find_table_group(&items_path), Some(items));
    assert_eq!(f.from_clause.find_table_group(&items_path.append(ELEMENT_PART)), Some(items));
    assert_eq!(f.from_clause.find_table_group(&f.root_path), Some(f.root));
    assert_eq!(f.from_clause.find_table_group(&f.root_path.append("customer")), None);
}

#[test]
fn test_visitors_short_circuit() {
    let mut f = fixture();
    join_customer(&mut f, JoinType::Left);

    let mut visited = 0;
    let found = f.from_clause.query_table_groups(|group| {
        visited += 1;
        (group.navigable_path().local_name() == "Order").then(|| group.id())
    });
    assert_eq!(found, Some(f.root));
    assert_eq!(visited, 1);

    let join_path = f
        .from_clause
        .query_table_group_joins(|owner, join| (owner.id() == f.root).then(|| join.navigable_path().clone()));
    assert_eq!(join_path.map(|p| p.to_string()).as_deref(), Some("Order(o).customer"));

    let aliases: Vec<String> = {
        let mut aliases = Vec::new();
        f.from_clause.query_table_references::<(), _>(|reference| {
            aliases.push(reference.identification_variable().to_string());
            None
        });
        aliases
    };
    assert_eq!(aliases, vec!["o1_0", "c1_0"]);
    assert!(f.from_clause.query_table_joins(|_| Some(())).is_none());
    assert!(f.from_clause.has_joins());
}

#[test]
fn test_foreign_group_id_is_not_found() {
    let mut f = fixture();
    join_customer(&mut f, JoinType::Left);
    let foreign = TableGroupId(42);

    assert_eq!(
        f.from_clause
            .find_compatible_join(foreign, &customer_producer(), JoinType::Left),
        None
    );
    assert!(f.from_clause.find_join(foreign, f.root).is_none());
    assert!(f.from_clause.primary_table_reference(foreign).is_none());
    assert!(f.from_clause.table_reference_joins(foreign).is_empty());
    assert!(!f.from_clause.initialize_table_group(foreign));
    assert!(f
        .from_clause
        .get_table_reference(foreign, &f.root_path, "orders", true)
        .is_none());

    let path = f.root_path.append("customer");
    let result = f.from_clause.prepend_table_group_join(
        foreign,
        &path,
        TableGroupJoin::new(path.clone(), JoinType::Left, f.root, None, None),
    );
    assert!(matches!(result, Err(LoadPlanError::IllegalState { .. })));
}
