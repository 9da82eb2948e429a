//! From clause: arena of table groups plus the ordered roots

use std::collections::HashSet;

use super::join::{JoinType, TableGroupJoin};
use super::predicate::Predicate;
use super::table_group::{
    CorrelatedTableGroup, ModelPartRef, TableGroup, TableGroupId, TableGroupKind,
};
use super::table_reference::{ColumnReferenceQualifier, TableReference, TableReferenceJoin};
use crate::error::{LoadPlanError, LoadPlanResult};
use crate::navigable_path::{NavigablePath, ELEMENT_PART};

/// Ordered root table groups and every group joined beneath them
///
/// Group ids are only meaningful for the clause that issued them.
#[derive(Debug, Clone, Default)]
pub struct FromClause {
    groups: Vec<TableGroup>,
    roots: Vec<TableGroupId>,
    joined: HashSet<TableGroupId>,
}

enum Lookup {
    Storage,
    Delegate(TableGroupId),
    Materialize,
    Missing,
}

impl FromClause {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move a group into the arena without attaching it anywhere
    pub fn register(&mut self, mut group: TableGroup) -> TableGroupId {
        let id = TableGroupId(self.groups.len());
        group.id = id;
        self.groups.push(group);
        id
    }

    /// Register a group and add it as a root
    pub fn add_root_table_group(&mut self, group: TableGroup) -> TableGroupId {
        let id = self.register(group);
        self.add_root(id);
        id
    }

    pub fn add_root(&mut self, id: TableGroupId) {
        debug_assert!(
            !self.roots.contains(&id) && !self.joined.contains(&id),
            "table group {} is already part of the from clause",
            id
        );
        self.roots.push(id);
    }

    pub fn roots(&self) -> &[TableGroupId] {
        &self.roots
    }

    pub fn table_group(&self, id: TableGroupId) -> Option<&TableGroup> {
        self.groups.get(id.0)
    }

    pub fn table_groups(&self) -> &[TableGroup] {
        &self.groups
    }

    fn group(&self, id: TableGroupId) -> Option<&TableGroup> {
        self.groups.get(id.0)
    }

    fn group_mut(&mut self, id: TableGroupId) -> Option<&mut TableGroup> {
        self.groups.get_mut(id.0)
    }

    fn is_known_owner(&self, owner: TableGroupId, join: &TableGroupJoin) -> bool {
        let known = owner.0 < self.groups.len();
        debug_assert!(
            known,
            "join {} added to unknown table group {}",
            join.navigable_path(),
            owner
        );
        known
    }

    /// Append a join to the owner's flat join list
    ///
    /// Joins added to a correlated group become a new root plus a
    /// correlation predicate instead.
    pub fn add_table_group_join(&mut self, owner: TableGroupId, join: TableGroupJoin) {
        if self.correlate(owner, &join) {
            return;
        }
        if !self.is_known_owner(owner, &join) {
            return;
        }
        self.mark_joined(&join);
        if let Some(group) = self.group_mut(owner) {
            group.table_group_joins_mut().push(join);
        }
    }

    /// Append a join anchored beneath the owner rather than the from clause
    pub fn add_nested_table_group_join(&mut self, owner: TableGroupId, join: TableGroupJoin) {
        if self.correlate(owner, &join) {
            return;
        }
        if !self.is_known_owner(owner, &join) {
            return;
        }
        self.mark_joined(&join);
        if let Some(group) = self.group_mut(owner) {
            group.nested_table_group_joins_mut().push(join);
        }
    }

    /// Insert a join right before the existing join for `navigable_path`
    ///
    /// Flat joins are searched first, then nested joins.
    pub fn prepend_table_group_join(
        &mut self,
        owner: TableGroupId,
        navigable_path: &NavigablePath,
        join: TableGroupJoin,
    ) -> LoadPlanResult<()> {
        let group = self.group(owner).ok_or_else(|| {
            LoadPlanError::illegal_state(format!("unknown table group {}", owner))
        })?;
        let flat = group
            .table_group_joins()
            .iter()
            .position(|j| j.navigable_path() == navigable_path);
        let nested = group
            .nested_table_group_joins()
            .iter()
            .position(|j| j.navigable_path() == navigable_path);

        match (flat, nested) {
            (Some(index), _) => {
                self.mark_joined(&join);
                if let Some(group) = self.group_mut(owner) {
                    group.table_group_joins_mut().insert(index, join);
                }
                Ok(())
            }
            (None, Some(index)) => {
                self.mark_joined(&join);
                if let Some(group) = self.group_mut(owner) {
                    group.nested_table_group_joins_mut().insert(index, join);
                }
                Ok(())
            }
            (None, None) => Err(LoadPlanError::NoSuchJoin {
                navigable_path: navigable_path.to_string(),
            }),
        }
    }

    fn mark_joined(&mut self, join: &TableGroupJoin) {
        let joined = join.joined_group();
        let newly_joined = self.joined.insert(joined);
        debug_assert!(
            newly_joined && !self.roots.contains(&joined),
            "table group {} is already joined",
            joined
        );
    }

    fn correlate(&mut self, owner: TableGroupId, join: &TableGroupJoin) -> bool {
        let predicate = join.predicate();
        let Some(TableGroupKind::Correlated(correlated)) = self.group_mut(owner).map(|g| &mut g.kind) else {
            return false;
        };
        if let Some(predicate) = predicate {
            correlated.correlation_predicates.push(predicate);
        }
        tracing::trace!(
            "Correlating join {} as a sub-query root",
            join.navigable_path()
        );
        self.roots.push(join.joined_group());
        true
    }

    /// Reusable join from `owner` produced by `producer`
    ///
    /// An existing INNER join satisfies a LEFT request; joins carrying ON
    /// conditions beyond the natural one are never reused.
    pub fn find_compatible_join(
        &self,
        owner: TableGroupId,
        producer: &ModelPartRef,
        requested: JoinType,
    ) -> Option<TableGroupId> {
        let found = self
            .group(owner)?
            .all_joins()
            .find(|j| {
                j.producer() == Some(producer)
                    && j.join_type().satisfies(requested)
                    && !j.has_extra_predicates()
            })
            .map(TableGroupJoin::joined_group);
        if let Some(joined) = found.and_then(|id| self.group(id)) {
            tracing::debug!(
                "Reusing join {} for {:?} ({} requested)",
                joined.navigable_path(),
                producer,
                requested
            );
        }
        found
    }

    /// The join that attached `joined` to `owner`
    pub fn find_join(&self, owner: TableGroupId, joined: TableGroupId) -> Option<&TableGroupJoin> {
        self.group(owner)?
            .all_joins()
            .find(|j| j.joined_group() == joined)
    }

    pub fn find_join_mut(&mut self, owner: TableGroupId, joined: TableGroupId) -> Option<&mut TableGroupJoin> {
        let group = self.group_mut(owner)?;
        if let Some(index) = group
            .nested_table_group_joins()
            .iter()
            .position(|j| j.joined_group() == joined)
        {
            return group.nested_table_group_joins_mut().get_mut(index);
        }
        group
            .table_group_joins_mut()
            .iter_mut()
            .find(|j| j.joined_group() == joined)
    }

    /// Table reference lookup against one group of this clause
    pub fn get_table_reference(
        &mut self,
        id: TableGroupId,
        navigable_path: &NavigablePath,
        table_expression: &str,
        resolve: bool,
    ) -> Option<TableReference> {
        let lookup = match &self.group(id)?.kind {
            TableGroupKind::Standard(_) => Lookup::Storage,
            TableGroupKind::Lazy(lazy) if lazy.is_initialized() => Lookup::Storage,
            TableGroupKind::Lazy(lazy) => {
                if lazy.can_use_parent_table_group(navigable_path, table_expression) {
                    Lookup::Delegate(lazy.parent())
                } else if resolve {
                    Lookup::Materialize
                } else {
                    Lookup::Missing
                }
            }
            TableGroupKind::Virtual(virtual_group) => Lookup::Delegate(virtual_group.underlying),
            TableGroupKind::Correlated(correlated) => {
                return correlated.find_table_reference(table_expression);
            }
        };

        match lookup {
            Lookup::Storage => {}
            Lookup::Delegate(target) => {
                return self.get_table_reference(target, navigable_path, table_expression, resolve);
            }
            Lookup::Materialize => {
                self.group_mut(id)?.initialize();
            }
            Lookup::Missing => return None,
        }

        let own = self
            .group_mut(id)?
            .storage_mut()
            .and_then(|storage| storage.get_table_reference(table_expression, resolve));
        if own.is_some() {
            return own;
        }

        // Fall back to groups already joined beneath this one for the path.
        let candidates: Vec<TableGroupId> = self
            .group(id)?
            .all_joins()
            .map(TableGroupJoin::joined_group)
            .filter(|joined| {
                self.group(*joined).is_some_and(|group| {
                    group.is_initialized() && group.navigable_path().is_parent_or_equal(navigable_path)
                })
            })
            .collect();
        candidates
            .into_iter()
            .find_map(|joined| self.get_table_reference(joined, navigable_path, table_expression, false))
    }

    /// Resolving lookup failing with `UnknownTableReference`
    pub fn resolve_table_reference(
        &mut self,
        id: TableGroupId,
        navigable_path: &NavigablePath,
        table_expression: &str,
    ) -> LoadPlanResult<TableReference> {
        self.qualifier(id)
            .resolve_table_reference(navigable_path, table_expression)
    }

    /// Qualifier view of one group
    pub fn qualifier(&mut self, id: TableGroupId) -> TableGroupQualifier<'_> {
        TableGroupQualifier {
            from_clause: self,
            id,
        }
    }

    /// Primary table reference, following delegation
    pub fn primary_table_reference(&self, id: TableGroupId) -> Option<TableReference> {
        let group = self.group(id)?;
        match &group.kind {
            TableGroupKind::Virtual(virtual_group) => self.primary_table_reference(virtual_group.underlying),
            TableGroupKind::Correlated(correlated) => Some(correlated.primary.clone()),
            _ => group
                .storage()
                .map(|storage| storage.primary_table_reference().clone()),
        }
    }

    /// Secondary table joins, following delegation
    pub fn table_reference_joins(&self, id: TableGroupId) -> &[TableReferenceJoin] {
        match self.group(id) {
            Some(group) => match &group.kind {
                TableGroupKind::Virtual(virtual_group) => self.table_reference_joins(virtual_group.underlying),
                _ => group.table_reference_joins(),
            },
            None => &[],
        }
    }

    /// Materialize a lazy group; returns whether anything changed
    pub fn initialize_table_group(&mut self, id: TableGroupId) -> bool {
        self.group_mut(id).is_some_and(TableGroup::initialize)
    }

    /// Depth-first pre-order search over all groups
    pub fn query_table_groups<T, F>(&self, mut f: F) -> Option<T>
    where
        F: FnMut(&TableGroup) -> Option<T>,
    {
        self.roots
            .iter()
            .find_map(|root| self.query_group(*root, &mut f))
    }

    fn query_group<T, F>(&self, id: TableGroupId, f: &mut F) -> Option<T>
    where
        F: FnMut(&TableGroup) -> Option<T>,
    {
        let group = self.group(id)?;
        if let Some(result) = f(group) {
            return Some(result);
        }
        group
            .all_joins()
            .find_map(|join| self.query_group(join.joined_group(), f))
    }

    /// Depth-first search over table group joins with their owner
    pub fn query_table_group_joins<T, F>(&self, mut f: F) -> Option<T>
    where
        F: FnMut(&TableGroup, &TableGroupJoin) -> Option<T>,
    {
        self.query_table_groups(|group| {
            group.all_joins().find_map(|join| f(group, join))
        })
    }

    /// Search over secondary table joins of all materialized groups
    pub fn query_table_joins<T, F>(&self, mut f: F) -> Option<T>
    where
        F: FnMut(&TableReferenceJoin) -> Option<T>,
    {
        self.query_table_groups(|group| {
            group.table_reference_joins().iter().find_map(&mut f)
        })
    }

    /// Search over every materialized table reference
    pub fn query_table_references<T, F>(&self, mut f: F) -> Option<T>
    where
        F: FnMut(&TableReference) -> Option<T>,
    {
        self.query_table_groups(|group| {
            let storage = group.storage()?;
            std::iter::once(storage.primary_table_reference())
                .chain(storage.table_reference_joins().iter().map(|j| &j.table_reference))
                .find_map(&mut f)
        })
    }

    /// Visit every group depth-first
    pub fn visit_table_groups<F>(&self, mut f: F)
    where
        F: FnMut(&TableGroup),
    {
        self.query_table_groups::<(), _>(|group| {
            f(group);
            None
        });
    }

    /// Group backing `navigable_path`
    ///
    /// A one-to-many collection group also backs its `{element}` path.
    pub fn find_table_group(&self, navigable_path: &NavigablePath) -> Option<TableGroupId> {
        self.query_table_groups(|group| {
            if group.navigable_path() == navigable_path {
                return Some(group.id());
            }
            let backs_element = group.is_one_to_many()
                && navigable_path.local_name() == ELEMENT_PART
                && navigable_path.parent() == Some(group.navigable_path());
            backs_element.then(|| group.id())
        })
    }

    /// Whether any join will be rendered
    pub fn has_joins(&self) -> bool {
        self.roots.iter().any(|root| self.group_has_joins(*root))
    }

    fn group_has_joins(&self, id: TableGroupId) -> bool {
        let Some(group) = self.group(id) else {
            return false;
        };
        group.all_joins().any(|join| match self.group(join.joined_group()) {
            Some(joined) if joined.is_virtual() => self.group_has_joins(joined.id()),
            Some(joined) => joined.is_initialized() || self.group_has_joins(joined.id()),
            None => false,
        })
    }

    /// Number of groups that render tables
    pub fn rendered_table_group_count(&self) -> usize {
        self.groups
            .iter()
            .filter(|g| !g.is_virtual() && g.is_initialized())
            .count()
    }

    /// Add a root standing for `outer_group` of an enclosing query's clause
    ///
    /// The new group snapshots the outer table references, so columns resolved
    /// against it render with the outer aliases.
    pub fn add_correlated_root(
        &mut self,
        outer: &FromClause,
        outer_group: TableGroupId,
    ) -> LoadPlanResult<TableGroupId> {
        let group = outer.table_group(outer_group).ok_or_else(|| {
            LoadPlanError::illegal_state(format!("unknown outer table group {}", outer_group))
        })?;
        let primary = outer.primary_table_reference(outer_group).ok_or_else(|| {
            LoadPlanError::illegal_state(format!(
                "outer table group {} has no primary table to correlate",
                group.navigable_path()
            ))
        })?;
        let table_references = outer
            .table_reference_joins(outer_group)
            .iter()
            .map(|j| j.table_reference.clone())
            .collect();

        let correlated = TableGroup::new(
            group.navigable_path().clone(),
            group.model_part().clone(),
            TableGroupKind::Correlated(CorrelatedTableGroup::new(
                group.navigable_path().clone(),
                primary,
                table_references,
            )),
        );
        Ok(self.add_root_table_group(correlated))
    }

    /// Predicates collected from joins added to correlated groups
    pub fn correlation_predicates(&self) -> Vec<Predicate> {
        self.groups
            .iter()
            .filter_map(|g| match &g.kind {
                TableGroupKind::Correlated(correlated) => Some(correlated.correlation_predicates()),
                _ => None,
            })
            .flatten()
            .cloned()
            .collect()
    }
}

/// Column qualifier backed by one group of a from clause
pub struct TableGroupQualifier<'a> {
    from_clause: &'a mut FromClause,
    id: TableGroupId,
}

impl ColumnReferenceQualifier for TableGroupQualifier<'_> {
    fn get_table_reference(
        &mut self,
        navigable_path: &NavigablePath,
        table_expression: &str,
        resolve: bool,
    ) -> Option<TableReference> {
        self.from_clause
            .get_table_reference(self.id, navigable_path, table_expression, resolve)
    }
}
