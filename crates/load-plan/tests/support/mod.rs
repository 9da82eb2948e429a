//! Shared fixture metamodel for the integration tests

#![allow(dead_code)]

use elif_load_plan::{
    AttributeDefinition, CollectionDefinition, EntityDefinition, FetchMapping, Metamodel,
};
use tracing_subscriber::EnvFilter;

/// Install a test subscriber; `RUST_LOG=elif_load_plan=trace` shows walks
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Orders with a joined customer and shipper, lazy lines, and a region chain
///
/// `Order -> Customer -> Region` is joined all the way down; `Order.lines`
/// is a lazily loaded one-to-many.
pub fn shop() -> Metamodel {
    let order = EntityDefinition::new("Order", "orders")
        .with_attribute(AttributeDefinition::basic("total", "decimal", "total"))
        .with_attribute(
            AttributeDefinition::many_to_one("customer", "Customer", "orders", vec!["customer_id"])
                .with_fetch(FetchMapping::join()),
        )
        .with_attribute(
            AttributeDefinition::many_to_one("shipper", "Shipper", "orders", vec!["shipper_id"])
                .with_fetch(FetchMapping::join()),
        )
        .with_attribute(AttributeDefinition::collection(
            "lines",
            "Order.lines",
            "OrderLine",
            "order_lines",
            vec!["order_id"],
        ));

    let customer = EntityDefinition::new("Customer", "customers")
        .with_attribute(AttributeDefinition::basic("name", "string", "name"))
        .with_attribute(
            AttributeDefinition::many_to_one("region", "Region", "customers", vec!["region_id"])
                .with_fetch(FetchMapping::join()),
        );

    let line = EntityDefinition::new("OrderLine", "order_lines")
        .with_attribute(AttributeDefinition::basic("quantity", "int", "quantity"));

    Metamodel::new()
        .with_entity(order)
        .and_then(|m| m.with_entity(customer))
        .and_then(|m| m.with_entity(EntityDefinition::new("Shipper", "shippers")))
        .and_then(|m| m.with_entity(EntityDefinition::new("Region", "regions")))
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
        .expect("fixture metamodel is valid")
}

/// `Author.books` and `Book.author` over the same foreign key, both joined
pub fn library() -> Metamodel {
    let author = EntityDefinition::new("Author", "authors").with_attribute(
        AttributeDefinition::collection("books", "Author.books", "Book", "books", vec!["author_id"])
            .with_fetch(FetchMapping::join()),
    );
    let book = EntityDefinition::new("Book", "books")
        .with_attribute(AttributeDefinition::basic("title", "string", "title"))
        .with_attribute(
            AttributeDefinition::many_to_one("author", "Author", "books", vec!["author_id"])
                .with_fetch(FetchMapping::join()),
        );

    Metamodel::new()
        .with_entity(author)
        .and_then(|m| m.with_entity(book))
        .and_then(|m| {
            m.with_collection(CollectionDefinition::one_to_many(
                "Author.books",
                "Author",
                "Book",
                "books",
                vec!["author_id"],
            ))
        })
        .expect("fixture metamodel is valid")
}

/// A joined self reference and a profile whose identifier is its user's key
pub fn staff() -> Metamodel {
    let employee = EntityDefinition::new("Employee", "employees").with_attribute(
        AttributeDefinition::many_to_one("manager", "Employee", "employees", vec!["manager_id"])
            .with_fetch(FetchMapping::join()),
    );
    // the foreign key to the user is the profile's own primary key
    let profile = EntityDefinition::new("Profile", "profiles").with_attribute(
        AttributeDefinition::many_to_one("user", "Employee", "profiles", vec!["id"])
            .with_fetch(FetchMapping::join()),
    );

    Metamodel::new()
        .with_entity(employee)
        .and_then(|m| m.with_entity(profile))
        .expect("fixture metamodel is valid")
}

/// Receipts with exactly one joined to-one and a lazy collection of items
pub fn receipts() -> Metamodel {
    let receipt = EntityDefinition::new("Receipt", "receipts")
        .with_attribute(AttributeDefinition::basic("total", "decimal", "total"))
        .with_attribute(
            AttributeDefinition::many_to_one("customer", "Customer", "receipts", vec!["customer_id"])
                .with_fetch(FetchMapping::join()),
        )
        .with_attribute(AttributeDefinition::collection(
            "items",
            "Receipt.items",
            "ReceiptItem",
            "receipt_items",
            vec!["receipt_id"],
        ));
    let item = EntityDefinition::new("ReceiptItem", "receipt_items")
        .with_attribute(AttributeDefinition::basic("quantity", "int", "quantity"));

    Metamodel::new()
        .with_entity(receipt)
        .and_then(|m| m.with_entity(EntityDefinition::new("Customer", "customers")))
        .and_then(|m| m.with_entity(item))
        .and_then(|m| {
            m.with_collection(CollectionDefinition::one_to_many(
                "Receipt.items",
                "Receipt",
                "ReceiptItem",
                "receipt_items",
                vec!["receipt_id"],
            ))
        })
        .expect("fixture metamodel is valid")
}
