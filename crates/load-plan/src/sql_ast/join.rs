//! Joins between table groups

use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::fmt;

use super::predicate::Predicate;
use super::table_group::{ModelPartRef, TableGroupId};
use crate::navigable_path::NavigablePath;

/// Join types
///
/// Widening only moves up the lattice `INNER ⊑ LEFT/RIGHT ⊑ FULL`; `CROSS`
/// is incomparable with every other type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

impl JoinType {
    pub fn is_outer(self) -> bool {
        matches!(self, Self::Left | Self::Right | Self::Full)
    }

    /// Whether an existing join of this type can serve a request for `requested`
    ///
    /// An existing INNER join produces a subset of the rows of the LEFT join
    /// with the same natural predicate, so it satisfies a LEFT request. The
    /// reverse never holds.
    pub fn satisfies(self, requested: JoinType) -> bool {
        self == requested || (self == Self::Inner && requested == Self::Left)
    }

    /// Whether moving from this type to `target` only widens
    pub fn can_widen_to(self, target: JoinType) -> bool {
        self == target
            || matches!(
                (self, target),
                (Self::Inner, Self::Left)
                    | (Self::Inner, Self::Right)
                    | (Self::Inner, Self::Full)
                    | (Self::Left, Self::Full)
                    | (Self::Right, Self::Full)
            )
    }
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinType::Inner => write!(f, "INNER JOIN"),
            JoinType::Left => write!(f, "LEFT JOIN"),
            JoinType::Right => write!(f, "RIGHT JOIN"),
            JoinType::Full => write!(f, "FULL JOIN"),
            JoinType::Cross => write!(f, "CROSS JOIN"),
        }
    }
}

/// Join from an owning table group to a joined table group
#[derive(Debug, Clone)]
pub struct TableGroupJoin {
    navigable_path: NavigablePath,
    join_type: Cell<JoinType>,
    natural_predicate: Option<Predicate>,
    extra_predicates: Vec<Predicate>,
    joined_group: TableGroupId,
    producer: Option<ModelPartRef>,
}

impl TableGroupJoin {
    pub fn new(
        navigable_path: NavigablePath,
        join_type: JoinType,
        joined_group: TableGroupId,
        natural_predicate: Option<Predicate>,
        producer: Option<ModelPartRef>,
    ) -> Self {
        Self {
            navigable_path,
            join_type: Cell::new(join_type),
            natural_predicate,
            extra_predicates: Vec::new(),
            joined_group,
            producer,
        }
    }

    pub fn navigable_path(&self) -> &NavigablePath {
        &self.navigable_path
    }

    pub fn join_type(&self) -> JoinType {
        self.join_type.get()
    }

    /// Widen the join type; narrowing requests are ignored
    ///
    /// Returns whether the type changed.
    pub fn widen_join_type(&self, target: JoinType) -> bool {
        let current = self.join_type.get();
        if current != target && current.can_widen_to(target) {
            self.join_type.set(target);
            true
        } else {
            false
        }
    }

    pub fn joined_group(&self) -> TableGroupId {
        self.joined_group
    }

    pub fn producer(&self) -> Option<&ModelPartRef> {
        self.producer.as_ref()
    }

    /// AND an additional ON condition onto the join
    pub fn apply_predicate(&mut self, predicate: Predicate) {
        self.extra_predicates.push(predicate);
    }

    /// Whether ON conditions beyond the association's natural one exist
    pub fn has_extra_predicates(&self) -> bool {
        !self.extra_predicates.is_empty()
    }

    pub fn natural_predicate(&self) -> Option<&Predicate> {
        self.natural_predicate.as_ref()
    }

    /// Full ON condition
    pub fn predicate(&self) -> Option<Predicate> {
        let all: Vec<Predicate> = self
            .natural_predicate
            .iter()
            .chain(self.extra_predicates.iter())
            .cloned()
            .collect();
        Predicate::and(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql_ast::predicate::Expression;
    use crate::sql_ast::TableReference;

    #[test]
    fn test_satisfies_is_monotonic() {
        assert!(JoinType::Inner.satisfies(JoinType::Left));
        assert!(JoinType::Inner.satisfies(JoinType::Inner));
        assert!(!JoinType::Left.satisfies(JoinType::Inner));
        assert!(!JoinType::Cross.satisfies(JoinType::Left));
    }

    #[test]
    fn test_widen_only() {
        let join = TableGroupJoin::new(
            NavigablePath::new("Order").append("customer"),
            JoinType::Inner,
            TableGroupId(1),
            None,
            None,
        );
        assert!(join.widen_join_type(JoinType::Left));
        assert_eq!(join.join_type(), JoinType::Left);
        assert!(!join.widen_join_type(JoinType::Inner));
        assert_eq!(join.join_type(), JoinType::Left);
        assert!(!join.widen_join_type(JoinType::Cross));
        assert!(join.widen_join_type(JoinType::Full));
    }

    #[test]
    fn test_predicates_combine() {
        let customers = TableReference::named("customers", "c1_0", false);
        let mut join = TableGroupJoin::new(
            NavigablePath::new("Order").append("customer"),
            JoinType::Left,
            TableGroupId(1),
            None,
            None,
        );
        assert!(join.predicate().is_none());

        join.apply_predicate(Predicate::IsNull {
            expression: Expression::column(&customers, "deleted_at"),
            negated: false,
        });
        assert!(join.has_extra_predicates());
        assert!(matches!(join.predicate(), Some(Predicate::IsNull { .. })));
        assert_eq!(JoinType::Left.to_string(), "LEFT JOIN");
    }
}
