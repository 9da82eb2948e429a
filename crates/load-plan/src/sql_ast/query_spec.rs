use super::from_clause::FromClause;
use super::predicate::Predicate;
use super::table_group::TableGroupId;
use crate::error::LoadPlanResult;

/// SQL query specification: from clause plus restriction
#[derive(Debug, Clone, Default)]
pub struct QuerySpec {
    from_clause: FromClause,
    restriction: Option<Predicate>,
    root: bool,
}

impl QuerySpec {
    pub fn new(root: bool) -> Self {
        Self {
            root,
            ..Self::default()
        }
    }

    pub fn is_root(&self) -> bool {
        self.root
    }

    pub fn from_clause(&self) -> &FromClause {
        &self.from_clause
    }

    pub fn from_clause_mut(&mut self) -> &mut FromClause {
        &mut self.from_clause
    }

    /// AND a predicate into the restriction
    pub fn apply_predicate(&mut self, predicate: Predicate) {
        self.restriction = Some(Predicate::combine(self.restriction.take(), predicate));
    }

    /// Restriction including the predicates produced by correlation
    pub fn where_predicate(&self) -> Option<Predicate> {
        let mut all: Vec<Predicate> = self.restriction.iter().cloned().collect();
        all.extend(self.from_clause.correlation_predicates());
        Predicate::and(all)
    }

    /// Add a root that stands for `outer_group` of the enclosing query
    pub fn add_correlated_root(
        &mut self,
        outer: &FromClause,
        outer_group: TableGroupId,
    ) -> LoadPlanResult<TableGroupId> {
        self.from_clause.add_correlated_root(outer, outer_group)
    }
}
