//! Select tree types
//!
//! Query specifications are assembled with chained builder calls, the same
//! way a query is built up clause by clause:
//!
//! ```
//! use elif_load_plan::sqm::{SqmPredicate, SqmQuerySpec};
//!
//! let query = SqmQuerySpec::new()
//!     .from("Order", "o")
//!     .left_join_fetch("o.customer", "c")
//!     .where_predicate(SqmPredicate::eq("c.name", "ACME"))
//!     .order_by_desc("o.total");
//! assert_eq!(query.joins.len(), 1);
//! ```

use std::fmt;

use serde_json::Value;

use crate::sql_ast::{ComparisonOperator, JoinType, JunctionNature};

/// Attribute path rooted at an identification variable, e.g. `o.customer.name`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SqmPath {
    pub alias: String,
    pub attributes: Vec<String>,
}

impl SqmPath {
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            attributes: Vec::new(),
        }
    }

    /// Split a dotted path; empty segments are kept and rejected by validation
    pub fn parse(path: &str) -> Self {
        let mut segments = path.split('.').map(|segment| segment.trim().to_string());
        let alias = segments.next().unwrap_or_default();
        Self {
            alias,
            attributes: segments.collect(),
        }
    }

    pub fn append(&self, attribute: &str) -> Self {
        let mut attributes = self.attributes.clone();
        attributes.push(attribute.to_string());
        Self {
            alias: self.alias.clone(),
            attributes,
        }
    }

    /// Whether the path is a bare identification variable
    pub fn is_alias_reference(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn has_empty_segment(&self) -> bool {
        self.alias.is_empty() || self.attributes.iter().any(String::is_empty)
    }
}

impl From<&str> for SqmPath {
    fn from(path: &str) -> Self {
        Self::parse(path)
    }
}

impl fmt::Display for SqmPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.alias)?;
        for attribute in &self.attributes {
            write!(f, ".{}", attribute)?;
        }
        Ok(())
    }
}

/// `from Entity alias`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqmRoot {
    pub entity: String,
    pub alias: String,
}

/// Explicit attribute join
#[derive(Debug, Clone)]
pub struct SqmJoin {
    pub path: SqmPath,
    pub alias: String,
    pub join_type: JoinType,
    pub fetch: bool,
    pub on: Option<SqmPredicate>,
}

impl SqmJoin {
    pub fn new(path: impl Into<SqmPath>, alias: impl Into<String>, join_type: JoinType) -> Self {
        Self {
            path: path.into(),
            alias: alias.into(),
            join_type,
            fetch: false,
            on: None,
        }
    }

    pub fn fetched(mut self) -> Self {
        self.fetch = true;
        self
    }

    /// Additional ON condition
    pub fn with_on(mut self, predicate: SqmPredicate) -> Self {
        self.on = Some(predicate);
        self
    }
}

#[derive(Debug, Clone)]
pub enum SqmExpression {
    Path(SqmPath),
    Literal(Value),
    Parameter(String),
    Function {
        name: String,
        arguments: Vec<SqmExpression>,
    },
}

impl SqmExpression {
    pub fn path(path: &str) -> Self {
        Self::Path(SqmPath::parse(path))
    }

    pub fn literal<T: Into<Value>>(value: T) -> Self {
        Self::Literal(value.into())
    }

    pub fn parameter(name: impl Into<String>) -> Self {
        Self::Parameter(name.into())
    }

    pub fn function(name: impl Into<String>, arguments: Vec<SqmExpression>) -> Self {
        Self::Function {
            name: name.into(),
            arguments,
        }
    }

    /// Paths referenced by this expression
    pub fn paths(&self) -> Vec<&SqmPath> {
        match self {
            Self::Path(path) => vec![path],
            Self::Function { arguments, .. } => arguments.iter().flat_map(Self::paths).collect(),
            Self::Literal(_) | Self::Parameter(_) => Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum SqmPredicate {
    Comparison {
        lhs: SqmExpression,
        operator: ComparisonOperator,
        rhs: SqmExpression,
    },
    Junction {
        nature: JunctionNature,
        predicates: Vec<SqmPredicate>,
    },
    Negated(Box<SqmPredicate>),
    IsNull {
        expression: SqmExpression,
        negated: bool,
    },
    InList {
        expression: SqmExpression,
        values: Vec<SqmExpression>,
        negated: bool,
    },
    Exists {
        subquery: Box<SqmQuerySpec>,
        negated: bool,
    },
}

impl SqmPredicate {
    pub fn comparison(lhs: SqmExpression, operator: ComparisonOperator, rhs: SqmExpression) -> Self {
        Self::Comparison { lhs, operator, rhs }
    }

    /// `path = literal`
    pub fn eq<T: Into<Value>>(path: &str, value: T) -> Self {
        Self::comparison(
            SqmExpression::path(path),
            ComparisonOperator::Equal,
            SqmExpression::literal(value),
        )
    }

    /// `lhs = rhs` over two paths
    pub fn paths_eq(lhs: &str, rhs: &str) -> Self {
        Self::comparison(
            SqmExpression::path(lhs),
            ComparisonOperator::Equal,
            SqmExpression::path(rhs),
        )
    }

    pub fn is_null(path: &str) -> Self {
        Self::IsNull {
            expression: SqmExpression::path(path),
            negated: false,
        }
    }

    pub fn is_not_null(path: &str) -> Self {
        Self::IsNull {
            expression: SqmExpression::path(path),
            negated: true,
        }
    }

    pub fn in_list<T: Into<Value>>(path: &str, values: Vec<T>) -> Self {
        Self::InList {
            expression: SqmExpression::path(path),
            values: values.into_iter().map(SqmExpression::literal).collect(),
            negated: false,
        }
    }

    pub fn and(predicates: Vec<SqmPredicate>) -> Self {
        Self::Junction {
            nature: JunctionNature::And,
            predicates,
        }
    }

    pub fn or(predicates: Vec<SqmPredicate>) -> Self {
        Self::Junction {
            nature: JunctionNature::Or,
            predicates,
        }
    }

    pub fn not(predicate: SqmPredicate) -> Self {
        Self::Negated(Box::new(predicate))
    }

    pub fn exists(subquery: SqmQuerySpec) -> Self {
        Self::Exists {
            subquery: Box::new(subquery),
            negated: false,
        }
    }

    pub fn not_exists(subquery: SqmQuerySpec) -> Self {
        Self::Exists {
            subquery: Box::new(subquery),
            negated: true,
        }
    }

    /// AND `addition` into an optional predicate
    pub fn combine(base: Option<SqmPredicate>, addition: SqmPredicate) -> SqmPredicate {
        match base {
            None => addition,
            Some(Self::Junction {
                nature: JunctionNature::And,
                mut predicates,
            }) => {
                predicates.push(addition);
                Self::and(predicates)
            }
            Some(base) => Self::and(vec![base, addition]),
        }
    }
}

/// One item of the select list
#[derive(Debug, Clone)]
pub struct SqmSelection {
    pub expression: SqmExpression,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortDirection::Ascending => write!(f, "ASC"),
            SortDirection::Descending => write!(f, "DESC"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SqmSortSpecification {
    pub expression: SqmExpression,
    pub direction: SortDirection,
}

/// `OFFSET n ROWS FETCH FIRST m ROWS [ONLY | WITH TIES]`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SqmFetchOffset {
    pub offset: Option<u64>,
    pub fetch: Option<u64>,
    pub with_ties: bool,
}

/// Single `select ... from ... where ...` block
#[derive(Debug, Clone, Default)]
pub struct SqmQuerySpec {
    pub roots: Vec<SqmRoot>,
    pub joins: Vec<SqmJoin>,
    pub selections: Vec<SqmSelection>,
    pub distinct: bool,
    pub restriction: Option<SqmPredicate>,
    pub group_by: Vec<SqmExpression>,
    pub having: Option<SqmPredicate>,
    pub order_by: Vec<SqmSortSpecification>,
    pub fetch_offset: SqmFetchOffset,
}

impl SqmQuerySpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from(mut self, entity: impl Into<String>, alias: impl Into<String>) -> Self {
        self.roots.push(SqmRoot {
            entity: entity.into(),
            alias: alias.into(),
        });
        self
    }

    pub fn with_join(mut self, join: SqmJoin) -> Self {
        self.joins.push(join);
        self
    }

    /// INNER join of an attribute path
    pub fn join(self, path: &str, alias: &str) -> Self {
        self.with_join(SqmJoin::new(path, alias, JoinType::Inner))
    }

    /// LEFT join of an attribute path
    pub fn left_join(self, path: &str, alias: &str) -> Self {
        self.with_join(SqmJoin::new(path, alias, JoinType::Left))
    }

    pub fn join_fetch(self, path: &str, alias: &str) -> Self {
        self.with_join(SqmJoin::new(path, alias, JoinType::Inner).fetched())
    }

    pub fn left_join_fetch(self, path: &str, alias: &str) -> Self {
        self.with_join(SqmJoin::new(path, alias, JoinType::Left).fetched())
    }

    pub fn select(self, path: &str) -> Self {
        self.select_expression(SqmExpression::path(path), None)
    }

    pub fn select_as(self, path: &str, alias: &str) -> Self {
        self.select_expression(SqmExpression::path(path), Some(alias.to_string()))
    }

    pub fn select_expression(mut self, expression: SqmExpression, alias: Option<String>) -> Self {
        self.selections.push(SqmSelection { expression, alias });
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// AND a predicate into the where clause
    pub fn where_predicate(mut self, predicate: SqmPredicate) -> Self {
        self.restriction = Some(SqmPredicate::combine(self.restriction.take(), predicate));
        self
    }

    pub fn group_by(mut self, path: &str) -> Self {
        self.group_by.push(SqmExpression::path(path));
        self
    }

    pub fn having(mut self, predicate: SqmPredicate) -> Self {
        self.having = Some(SqmPredicate::combine(self.having.take(), predicate));
        self
    }

    pub fn order_by(mut self, path: &str) -> Self {
        self.order_by.push(SqmSortSpecification {
            expression: SqmExpression::path(path),
            direction: SortDirection::Ascending,
        });
        self
    }

    pub fn order_by_desc(mut self, path: &str) -> Self {
        self.order_by.push(SqmSortSpecification {
            expression: SqmExpression::path(path),
            direction: SortDirection::Descending,
        });
        self
    }

    pub fn offset(mut self, rows: u64) -> Self {
        self.fetch_offset.offset = Some(rows);
        self
    }

    pub fn fetch_first(mut self, rows: u64) -> Self {
        self.fetch_offset.fetch = Some(rows);
        self.fetch_offset.with_ties = false;
        self
    }

    pub fn fetch_first_with_ties(mut self, rows: u64) -> Self {
        self.fetch_offset.fetch = Some(rows);
        self.fetch_offset.with_ties = true;
        self
    }

    /// Number of columns this query produces; an implicit select list
    /// yields one per root
    pub fn arity(&self) -> usize {
        if self.selections.is_empty() {
            self.roots.len()
        } else {
            self.selections.len()
        }
    }

    pub fn find_join(&self, alias: &str) -> Option<&SqmJoin> {
        self.joins.iter().find(|join| join.alias == alias)
    }

    pub fn find_root(&self, alias: &str) -> Option<&SqmRoot> {
        self.roots.iter().find(|root| root.alias == alias)
    }

    pub fn fetch_joins(&self) -> impl Iterator<Item = &SqmJoin> {
        self.joins.iter().filter(|join| join.fetch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOperator {
    Union,
    UnionAll,
    Intersect,
    IntersectAll,
    Except,
    ExceptAll,
}

impl fmt::Display for SetOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetOperator::Union => write!(f, "UNION"),
            SetOperator::UnionAll => write!(f, "UNION ALL"),
            SetOperator::Intersect => write!(f, "INTERSECT"),
            SetOperator::IntersectAll => write!(f, "INTERSECT ALL"),
            SetOperator::Except => write!(f, "EXCEPT"),
            SetOperator::ExceptAll => write!(f, "EXCEPT ALL"),
        }
    }
}

/// Query parts combined by a set operator
#[derive(Debug, Clone)]
pub struct SqmQueryGroup {
    pub operator: SetOperator,
    pub parts: Vec<SqmQueryPart>,
    pub order_by: Vec<SqmSortSpecification>,
    pub fetch_offset: SqmFetchOffset,
}

impl SqmQueryGroup {
    pub fn new(operator: SetOperator) -> Self {
        Self {
            operator,
            parts: Vec::new(),
            order_by: Vec::new(),
            fetch_offset: SqmFetchOffset::default(),
        }
    }

    pub fn with_part(mut self, part: impl Into<SqmQueryPart>) -> Self {
        self.parts.push(part.into());
        self
    }

    pub fn order_by(mut self, path: &str) -> Self {
        self.order_by.push(SqmSortSpecification {
            expression: SqmExpression::path(path),
            direction: SortDirection::Ascending,
        });
        self
    }

    pub fn fetch_first_with_ties(mut self, rows: u64) -> Self {
        self.fetch_offset.fetch = Some(rows);
        self.fetch_offset.with_ties = true;
        self
    }
}

#[derive(Debug, Clone)]
pub enum SqmQueryPart {
    Spec(SqmQuerySpec),
    Group(SqmQueryGroup),
}

impl SqmQueryPart {
    /// Leftmost query specification; it defines the shape of the result
    pub fn first_query_spec(&self) -> Option<&SqmQuerySpec> {
        match self {
            SqmQueryPart::Spec(spec) => Some(spec),
            SqmQueryPart::Group(group) => group.parts.first().and_then(SqmQueryPart::first_query_spec),
        }
    }

    pub fn arity(&self) -> usize {
        self.first_query_spec().map(SqmQuerySpec::arity).unwrap_or(0)
    }

    pub fn order_by(&self) -> &[SqmSortSpecification] {
        match self {
            SqmQueryPart::Spec(spec) => &spec.order_by,
            SqmQueryPart::Group(group) => &group.order_by,
        }
    }

    pub fn fetch_offset(&self) -> SqmFetchOffset {
        match self {
            SqmQueryPart::Spec(spec) => spec.fetch_offset,
            SqmQueryPart::Group(group) => group.fetch_offset,
        }
    }
}

impl From<SqmQuerySpec> for SqmQueryPart {
    fn from(spec: SqmQuerySpec) -> Self {
        SqmQueryPart::Spec(spec)
    }
}

impl From<SqmQueryGroup> for SqmQueryPart {
    fn from(group: SqmQueryGroup) -> Self {
        SqmQueryPart::Group(group)
    }
}

/// `with name (columns) as (query)`
#[derive(Debug, Clone)]
pub struct SqmCte {
    pub name: String,
    pub columns: Vec<String>,
    pub query: SqmQueryPart,
}

impl SqmCte {
    pub fn new<S: Into<String>>(name: impl Into<String>, columns: Vec<S>, query: impl Into<SqmQueryPart>) -> Self {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            query: query.into(),
        }
    }
}

/// Top level select statement
#[derive(Debug, Clone)]
pub struct SqmSelectStatement {
    pub ctes: Vec<SqmCte>,
    pub query: SqmQueryPart,
}

impl SqmSelectStatement {
    pub fn new(query: impl Into<SqmQueryPart>) -> Self {
        Self {
            ctes: Vec::new(),
            query: query.into(),
        }
    }

    pub fn with_cte(mut self, cte: SqmCte) -> Self {
        self.ctes.push(cte);
        self
    }

    /// The query specification when the statement is not a set operation
    pub fn query_spec(&self) -> Option<&SqmQuerySpec> {
        match &self.query {
            SqmQueryPart::Spec(spec) => Some(spec),
            SqmQueryPart::Group(_) => None,
        }
    }
}
