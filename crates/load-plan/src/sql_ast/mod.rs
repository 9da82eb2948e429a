//! SQL AST pieces produced while building a load plan
//!
//! Table references, table groups and their joins form the from clause the
//! renderer consumes read-only once the plan is built.

pub mod alias;
pub mod from_clause;
pub mod join;
pub mod predicate;
pub mod query_spec;
pub mod table_group;
pub mod table_reference;

pub use alias::{SqlAliasBase, SqlAliasBaseGenerator};
pub use from_clause::{FromClause, TableGroupQualifier};
pub use join::{JoinType, TableGroupJoin};
pub use predicate::{ColumnReference, ComparisonOperator, Expression, JunctionNature, Predicate};
pub use query_spec::QuerySpec;
pub use table_group::{
    CorrelatedTableGroup, LazyState, LazyTableGroup, ModelPartRef, ParentTableGroupUseChecker,
    PotentialTableJoin, TableGroup, TableGroupId, TableGroupKind, TableStorage, VirtualKind,
    VirtualTableGroup,
};
pub use table_reference::{
    ColumnReferenceQualifier, TableReference, TableReferenceJoin, TableReferenceKind,
};

#[cfg(test)]
mod tests;
