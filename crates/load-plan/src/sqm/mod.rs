//! Select statements over the domain model
//!
//! A statement is validated against the metamodel, interpreted into query
//! spaces and predicates, and then walked like any other entity load so the
//! mapped fetches are added around the statement's own joins.

pub mod interpretation;
pub mod query_builder;
pub mod resolution;
pub mod tree;
pub mod validation;

pub use interpretation::{InterpretedQuery, SortSpecification, SqmInterpreter};
pub use query_builder::{QueryLoadPlan, QueryLoadPlanBuilder};
pub use resolution::{ResolvedPart, SelectionKind};
pub use tree::{
    SetOperator, SortDirection, SqmCte, SqmExpression, SqmFetchOffset, SqmJoin, SqmPath,
    SqmPredicate, SqmQueryGroup, SqmQueryPart, SqmQuerySpec, SqmRoot, SqmSelectStatement,
    SqmSelection, SqmSortSpecification,
};
pub use validation::{validate_query_part, validate_query_spec, validate_statement};
