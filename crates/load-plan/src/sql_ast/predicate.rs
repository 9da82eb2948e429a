//! Predicates and expressions over column references

use serde_json::Value;
use std::fmt;

use super::query_spec::QuerySpec;
use super::table_reference::TableReference;

/// Column qualified by a table reference alias
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnReference {
    pub qualifier: String,
    pub column: String,
}

impl ColumnReference {
    pub fn new(table_reference: &TableReference, column: impl Into<String>) -> Self {
        Self {
            qualifier: table_reference.identification_variable().to_string(),
            column: column.into(),
        }
    }
}

impl fmt::Display for ColumnReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.qualifier, self.column)
    }
}

/// Scalar expression
#[derive(Debug, Clone)]
pub enum Expression {
    Column(ColumnReference),
    Literal(Value),
    Parameter(String),
    Function { name: String, arguments: Vec<Expression> },
}

impl Expression {
    pub fn column(table_reference: &TableReference, column: impl Into<String>) -> Self {
        Self::Column(ColumnReference::new(table_reference, column))
    }

    pub fn literal<T: Into<Value>>(value: T) -> Self {
        Self::Literal(value.into())
    }

    fn collect_columns<'a>(&'a self, into: &mut Vec<&'a ColumnReference>) {
        match self {
            Self::Column(column) => into.push(column),
            Self::Function { arguments, .. } => {
                for argument in arguments {
                    argument.collect_columns(into);
                }
            }
            Self::Literal(_) | Self::Parameter(_) => {}
        }
    }
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOperator {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Like,
    NotLike,
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComparisonOperator::Equal => write!(f, "="),
            ComparisonOperator::NotEqual => write!(f, "!="),
            ComparisonOperator::GreaterThan => write!(f, ">"),
            ComparisonOperator::GreaterThanOrEqual => write!(f, ">="),
            ComparisonOperator::LessThan => write!(f, "<"),
            ComparisonOperator::LessThanOrEqual => write!(f, "<="),
            ComparisonOperator::Like => write!(f, "LIKE"),
            ComparisonOperator::NotLike => write!(f, "NOT LIKE"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JunctionNature {
    And,
    Or,
}

/// Boolean condition
#[derive(Debug, Clone)]
pub enum Predicate {
    Comparison {
        lhs: Expression,
        operator: ComparisonOperator,
        rhs: Expression,
    },
    Junction {
        nature: JunctionNature,
        predicates: Vec<Predicate>,
    },
    Negated(Box<Predicate>),
    IsNull {
        expression: Expression,
        negated: bool,
    },
    InList {
        expression: Expression,
        values: Vec<Expression>,
        negated: bool,
    },
    Exists {
        subquery: Box<QuerySpec>,
        negated: bool,
    },
}

impl Predicate {
    pub fn comparison(lhs: Expression, operator: ComparisonOperator, rhs: Expression) -> Self {
        Self::Comparison { lhs, operator, rhs }
    }

    /// Pairwise equality of two column lists, AND-ed
    pub fn column_equality(
        lhs: &TableReference,
        lhs_columns: &[String],
        rhs: &TableReference,
        rhs_columns: &[String],
    ) -> Self {
        let comparisons: Vec<Predicate> = lhs_columns
            .iter()
            .zip(rhs_columns)
            .map(|(l, r)| {
                Self::comparison(
                    Expression::column(lhs, l.as_str()),
                    ComparisonOperator::Equal,
                    Expression::column(rhs, r.as_str()),
                )
            })
            .collect();
        Self::and(comparisons).unwrap_or(Self::Junction {
            nature: JunctionNature::And,
            predicates: Vec::new(),
        })
    }

    /// AND of several predicates, flattening nested conjunctions
    pub fn and(predicates: Vec<Predicate>) -> Option<Predicate> {
        let mut flattened = Vec::with_capacity(predicates.len());
        for predicate in predicates {
            match predicate {
                Predicate::Junction {
                    nature: JunctionNature::And,
                    predicates: nested,
                } => flattened.extend(nested),
                other => flattened.push(other),
            }
        }
        match flattened.len() {
            0 => None,
            1 => flattened.pop(),
            _ => Some(Predicate::Junction {
                nature: JunctionNature::And,
                predicates: flattened,
            }),
        }
    }

    /// Combine an optional predicate with another one
    pub fn combine(base: Option<Predicate>, addition: Predicate) -> Predicate {
        match base {
            None => addition,
            Some(base) => Self::and(vec![base, addition]).unwrap_or(Predicate::Junction {
                nature: JunctionNature::And,
                predicates: Vec::new(),
            }),
        }
    }

    /// Column references at this query level, not inside sub-queries
    pub fn column_references(&self) -> Vec<&ColumnReference> {
        let mut columns = Vec::new();
        self.collect_columns(&mut columns);
        columns
    }

    fn collect_columns<'a>(&'a self, into: &mut Vec<&'a ColumnReference>) {
        match self {
            Predicate::Comparison { lhs, rhs, .. } => {
                lhs.collect_columns(into);
                rhs.collect_columns(into);
            }
            Predicate::Junction { predicates, .. } => {
                for predicate in predicates {
                    predicate.collect_columns(into);
                }
            }
            Predicate::Negated(inner) => inner.collect_columns(into),
            Predicate::IsNull { expression, .. } => expression.collect_columns(into),
            Predicate::InList {
                expression, values, ..
            } => {
                expression.collect_columns(into);
                for value in values {
                    value.collect_columns(into);
                }
            }
            Predicate::Exists { .. } => {}
        }
    }

    pub fn references_qualifier(&self, qualifier: &str) -> bool {
        self.column_references()
            .iter()
            .any(|c| c.qualifier == qualifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_equality() {
        let orders = TableReference::named("orders", "o1_0", false);
        let customers = TableReference::named("customers", "c1_0", false);
        let predicate = Predicate::column_equality(
            &orders,
            &["customer_id".to_string()],
            &customers,
            &["id".to_string()],
        );
        assert!(matches!(predicate, Predicate::Comparison { operator: ComparisonOperator::Equal, .. }));
        let columns: Vec<String> = predicate.column_references().iter().map(|c| c.to_string()).collect();
        assert_eq!(columns, vec!["o1_0.customer_id", "c1_0.id"]);
        assert!(predicate.references_qualifier("c1_0"));
    }

    #[test]
    fn test_combine_flattens_conjunctions() {
        let orders = TableReference::named("orders", "o1_0", false);
        let lines = TableReference::named("order_lines", "o2_0", false);
        let keys = vec!["order_id".to_string(), "line_no".to_string()];
        let natural = Predicate::column_equality(&orders, &keys, &lines, &keys);
        let extra = Predicate::IsNull {
            expression: Expression::column(&lines, "deleted_at"),
            negated: false,
        };

        match Predicate::combine(Some(natural), extra) {
            Predicate::Junction { nature, predicates } => {
                assert_eq!(nature, JunctionNature::And);
                assert_eq!(predicates.len(), 3);
            }
            other => panic!("unexpected predicate {:?}", other),
        }
        assert!(Predicate::and(Vec::new()).is_none());
    }

    #[test]
    fn test_operator_display() {
        assert_eq!(ComparisonOperator::GreaterThanOrEqual.to_string(), ">=");
        assert_eq!(ComparisonOperator::NotLike.to_string(), "NOT LIKE");
    }
}
