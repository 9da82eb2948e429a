//! Table references and the column qualifier contract

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

use super::join::JoinType;
use super::predicate::Predicate;
use crate::error::{LoadPlanError, LoadPlanResult};
use crate::navigable_path::NavigablePath;

/// Anything column references can be qualified against
pub trait ColumnReferenceQualifier {
    /// Non-failing lookup of the reference for `table_expression`
    ///
    /// With `resolve` set the qualifier may create a missing join, e.g. an
    /// optional secondary table, as a side effect.
    fn get_table_reference(
        &mut self,
        navigable_path: &NavigablePath,
        table_expression: &str,
        resolve: bool,
    ) -> Option<TableReference>;

    /// Resolving lookup that fails when the table is unknown
    fn resolve_table_reference(
        &mut self,
        navigable_path: &NavigablePath,
        table_expression: &str,
    ) -> LoadPlanResult<TableReference> {
        self.get_table_reference(navigable_path, table_expression, true)
            .ok_or_else(|| LoadPlanError::UnknownTableReference {
                table_expression: table_expression.to_string(),
                navigable_path: navigable_path.to_string(),
            })
    }
}

/// What a table reference reads from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableReferenceKind {
    Named {
        table_expression: String,
    },
    /// Union of the tables of a table-per-class hierarchy
    Union {
        union_table_expression: String,
        subclass_tables: Vec<String>,
    },
    Function {
        function_name: String,
    },
    /// Derived table produced by a query part
    QueryPart {
        label: String,
    },
}

#[derive(Debug)]
struct TableReferenceData {
    kind: TableReferenceKind,
    identification_variable: String,
    optional: bool,
    pruned_table_expression: OnceLock<String>,
}

/// One occurrence of a table in a query
///
/// Cloning shares the occurrence. Equality is by identification variable.
#[derive(Clone)]
pub struct TableReference {
    data: Arc<TableReferenceData>,
}

impl TableReference {
    fn create(kind: TableReferenceKind, identification_variable: String, optional: bool) -> Self {
        Self {
            data: Arc::new(TableReferenceData {
                kind,
                identification_variable,
                optional,
                pruned_table_expression: OnceLock::new(),
            }),
        }
    }

    pub fn named(
        table_expression: impl Into<String>,
        identification_variable: impl Into<String>,
        optional: bool,
    ) -> Self {
        Self::create(
            TableReferenceKind::Named {
                table_expression: table_expression.into(),
            },
            identification_variable.into(),
            optional,
        )
    }

    pub fn union(
        union_table_expression: impl Into<String>,
        subclass_tables: Vec<String>,
        identification_variable: impl Into<String>,
        optional: bool,
    ) -> Self {
        Self::create(
            TableReferenceKind::Union {
                union_table_expression: union_table_expression.into(),
                subclass_tables,
            },
            identification_variable.into(),
            optional,
        )
    }

    pub fn function(function_name: impl Into<String>, identification_variable: impl Into<String>) -> Self {
        Self::create(
            TableReferenceKind::Function {
                function_name: function_name.into(),
            },
            identification_variable.into(),
            false,
        )
    }

    pub fn query_part(label: impl Into<String>, identification_variable: impl Into<String>) -> Self {
        Self::create(
            TableReferenceKind::QueryPart { label: label.into() },
            identification_variable.into(),
            false,
        )
    }

    pub fn kind(&self) -> &TableReferenceKind {
        &self.data.kind
    }

    /// Table expression this reference was created for
    pub fn table_expression(&self) -> &str {
        match &self.data.kind {
            TableReferenceKind::Named { table_expression } => table_expression,
            TableReferenceKind::Union {
                union_table_expression,
                ..
            } => union_table_expression,
            TableReferenceKind::Function { function_name } => function_name,
            TableReferenceKind::QueryPart { label } => label,
        }
    }

    /// SQL alias
    pub fn identification_variable(&self) -> &str {
        &self.data.identification_variable
    }

    pub fn is_optional(&self) -> bool {
        self.data.optional
    }

    /// Whether this reference reads `table_expression`
    pub fn contains_table(&self, table_expression: &str) -> bool {
        match &self.data.kind {
            TableReferenceKind::Union {
                union_table_expression,
                subclass_tables,
            } => {
                union_table_expression == table_expression
                    || subclass_tables.iter().any(|t| t == table_expression)
            }
            _ => self.table_expression() == table_expression,
        }
    }

    /// Replace the rendered expression once; later calls are rejected
    pub fn set_pruned_table_expression(&self, expression: impl Into<String>) -> bool {
        self.data.pruned_table_expression.set(expression.into()).is_ok()
    }

    pub fn pruned_table_expression(&self) -> Option<&str> {
        self.data.pruned_table_expression.get().map(String::as_str)
    }

    /// Expression a renderer should emit
    pub fn effective_table_expression(&self) -> &str {
        self.pruned_table_expression()
            .unwrap_or_else(|| self.table_expression())
    }

    /// Same occurrence, not just same alias
    pub fn ptr_eq(&self, other: &TableReference) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl PartialEq for TableReference {
    fn eq(&self, other: &Self) -> bool {
        self.data.identification_variable == other.data.identification_variable
    }
}

impl Eq for TableReference {}

impl Hash for TableReference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.data.identification_variable.hash(state);
    }
}

impl fmt::Debug for TableReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TableReference({} as {})",
            self.effective_table_expression(),
            self.identification_variable()
        )
    }
}

impl ColumnReferenceQualifier for TableReference {
    fn get_table_reference(
        &mut self,
        _navigable_path: &NavigablePath,
        table_expression: &str,
        _resolve: bool,
    ) -> Option<TableReference> {
        self.contains_table(table_expression).then(|| self.clone())
    }
}

/// Join of a secondary table within one table group
#[derive(Debug, Clone)]
pub struct TableReferenceJoin {
    pub join_type: JoinType,
    pub table_reference: TableReference,
    pub predicate: Option<Predicate>,
}

impl TableReferenceJoin {
    pub fn new(join_type: JoinType, table_reference: TableReference, predicate: Option<Predicate>) -> Self {
        Self {
            join_type,
            table_reference,
            predicate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_by_alias() {
        let a = TableReference::named("orders", "o1_0", false);
        let b = TableReference::named("orders", "o1_0", false);
        let c = TableReference::named("orders", "o2_0", false);
        assert_eq!(a, b);
        assert!(!a.ptr_eq(&b));
        assert_ne!(a, c);
    }

    #[test]
    fn test_union_contains_subclass_tables() {
        let payments = TableReference::union(
            "payments",
            vec!["card_payments".to_string(), "cash_payments".to_string()],
            "p1_0",
            false,
        );
        assert!(payments.contains_table("payments"));
        assert!(payments.contains_table("cash_payments"));
        assert!(!payments.contains_table("orders"));
    }

    #[test]
    fn test_pruned_expression_is_set_once() {
        let payments = TableReference::union("payments", vec!["card_payments".to_string()], "p1_0", false);
        assert_eq!(payments.effective_table_expression(), "payments");
        assert!(payments.set_pruned_table_expression("card_payments"));
        assert!(!payments.set_pruned_table_expression("cash_payments"));
        assert_eq!(payments.effective_table_expression(), "card_payments");

        let shared = payments.clone();
        assert_eq!(shared.pruned_table_expression(), Some("card_payments"));
    }

    #[test]
    fn test_qualifier_lookup() {
        let path = NavigablePath::new("Order");
        let mut orders = TableReference::named("orders", "o1_0", false);

        let found = orders.get_table_reference(&path, "orders", false).unwrap();
        assert!(found.ptr_eq(&orders));
        assert!(orders.get_table_reference(&path, "customers", true).is_none());

        let err = orders.resolve_table_reference(&path, "customers").unwrap_err();
        assert!(matches!(
            err,
            LoadPlanError::UnknownTableReference { ref table_expression, ref navigable_path }
                if table_expression == "customers" && navigable_path == "Order"
        ));
    }

    #[test]
    fn test_function_and_query_part_references() {
        let series = TableReference::function("generate_series", "g1_0");
        let derived = TableReference::query_part("recent_orders", "r1_0");
        assert!(series.contains_table("generate_series"));
        assert_eq!(derived.table_expression(), "recent_orders");
        assert!(!derived.is_optional());
    }
}
