//! Table groups: all tables backing one entity, collection or composite occurrence
//!
//! Groups live in the arena of a [`FromClause`](super::FromClause) and refer
//! to each other through [`TableGroupId`]. Delegating (virtual) groups point
//! at their underlying group by id instead of sharing it.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use super::alias::SqlAliasBase;
use super::join::{JoinType, TableGroupJoin};
use super::predicate::Predicate;
use super::table_reference::{TableReference, TableReferenceJoin};
use crate::navigable_path::NavigablePath;

/// Index of a table group inside its from clause
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TableGroupId(pub usize);

impl fmt::Display for TableGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Back-reference from a table group or join to the model part producing it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum ModelPartRef {
    Entity(String),
    Collection(String),
    Composite { owner: String, type_name: String },
    /// Association attribute role, `Owner.path.to.attribute`
    Association(String),
}

/// A secondary table joined only once something references it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PotentialTableJoin {
    pub table_expression: String,
    /// Columns of the secondary table referencing the primary key
    pub key_columns: Vec<String>,
    pub primary_key_columns: Vec<String>,
    pub optional: bool,
}

/// Physical tables of a real table group
#[derive(Debug, Clone)]
pub struct TableStorage {
    primary: TableReference,
    table_reference_joins: Vec<TableReferenceJoin>,
    potential_joins: Vec<PotentialTableJoin>,
    alias_base: SqlAliasBase,
}

impl TableStorage {
    pub fn new(primary: TableReference, alias_base: SqlAliasBase) -> Self {
        Self {
            primary,
            table_reference_joins: Vec::new(),
            potential_joins: Vec::new(),
            alias_base,
        }
    }

    pub fn with_table_reference_join(mut self, join: TableReferenceJoin) -> Self {
        self.table_reference_joins.push(join);
        self
    }

    pub fn with_potential_join(mut self, join: PotentialTableJoin) -> Self {
        self.potential_joins.push(join);
        self
    }

    pub fn primary_table_reference(&self) -> &TableReference {
        &self.primary
    }

    pub fn table_reference_joins(&self) -> &[TableReferenceJoin] {
        &self.table_reference_joins
    }

    pub fn alias_base_mut(&mut self) -> &mut SqlAliasBase {
        &mut self.alias_base
    }

    /// Lookup among the materialized tables only
    pub fn find_table_reference(&self, table_expression: &str) -> Option<TableReference> {
        if self.primary.contains_table(table_expression) {
            return Some(self.primary.clone());
        }
        self.table_reference_joins
            .iter()
            .find(|j| j.table_reference.contains_table(table_expression))
            .map(|j| j.table_reference.clone())
    }

    /// Lookup that joins a potential secondary table when `resolve` is set
    pub fn get_table_reference(&mut self, table_expression: &str, resolve: bool) -> Option<TableReference> {
        if let Some(found) = self.find_table_reference(table_expression) {
            return Some(found);
        }
        if !resolve {
            return None;
        }

        let position = self
            .potential_joins
            .iter()
            .position(|p| p.table_expression == table_expression)?;
        let potential = self.potential_joins.remove(position);
        let reference = TableReference::named(
            potential.table_expression.as_str(),
            self.alias_base.generate_new_alias(),
            potential.optional,
        );
        let predicate = Predicate::column_equality(
            &self.primary,
            &potential.primary_key_columns,
            &reference,
            &potential.key_columns,
        );
        let join_type = if potential.optional {
            JoinType::Left
        } else {
            JoinType::Inner
        };
        tracing::trace!(
            "Joining secondary table {} as {}",
            potential.table_expression,
            reference.identification_variable()
        );
        self.table_reference_joins
            .push(TableReferenceJoin::new(join_type, reference.clone(), Some(predicate)));
        Some(reference)
    }
}

/// Decides whether a lazy group can answer a column from its parent's tables
pub type ParentTableGroupUseChecker = Arc<dyn Fn(&NavigablePath, &str) -> bool + Send + Sync>;

/// State of a lazy table group
#[derive(Debug, Clone)]
pub enum LazyState {
    Uninitialized {
        pending: Box<TableStorage>,
        buffered_joins: Vec<TableGroupJoin>,
        buffered_nested_joins: Vec<TableGroupJoin>,
    },
    Initialized(Box<TableStorage>),
}

/// Table group whose tables are only joined once genuinely needed
#[derive(Clone)]
pub struct LazyTableGroup {
    pub(crate) parent: TableGroupId,
    pub(crate) state: LazyState,
    pub(crate) parent_use_checker: Option<ParentTableGroupUseChecker>,
}

impl LazyTableGroup {
    pub fn new(parent: TableGroupId, pending: TableStorage) -> Self {
        Self {
            parent,
            state: LazyState::Uninitialized {
                pending: Box::new(pending),
                buffered_joins: Vec::new(),
                buffered_nested_joins: Vec::new(),
            },
            parent_use_checker: None,
        }
    }

    pub fn with_parent_use_checker(mut self, checker: ParentTableGroupUseChecker) -> Self {
        self.parent_use_checker = Some(checker);
        self
    }

    pub fn parent(&self) -> TableGroupId {
        self.parent
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self.state, LazyState::Initialized(_))
    }

    pub fn state(&self) -> &LazyState {
        &self.state
    }

    /// Whether `table_expression` for `path` can be read from the parent
    pub fn can_use_parent_table_group(&self, path: &NavigablePath, table_expression: &str) -> bool {
        self.parent_use_checker
            .as_ref()
            .map(|checker| checker(path, table_expression))
            .unwrap_or(false)
    }
}

impl fmt::Debug for LazyTableGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyTableGroup")
            .field("parent", &self.parent)
            .field("state", &self.state)
            .field("has_parent_use_checker", &self.parent_use_checker.is_some())
            .finish()
    }
}

/// Flavour of a delegating group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum VirtualKind {
    /// Embedded composite attribute
    Composite,
    /// Inverse side of a bidirectional pair, reusing the owner's group
    MappedBy,
    /// Embedded index or element of a collection
    StandardVirtual,
    /// Composite identifier description
    Synthetic,
}

#[derive(Debug, Clone)]
pub struct VirtualTableGroup {
    pub kind: VirtualKind,
    pub underlying: TableGroupId,
}

/// Snapshot of an outer query's group used inside a correlated sub-query
#[derive(Debug, Clone)]
pub struct CorrelatedTableGroup {
    pub correlated_path: NavigablePath,
    pub primary: TableReference,
    pub table_references: Vec<TableReference>,
    /// Predicates replacing joins added to this group
    pub(crate) correlation_predicates: Vec<Predicate>,
}

impl CorrelatedTableGroup {
    pub fn new(correlated_path: NavigablePath, primary: TableReference, table_references: Vec<TableReference>) -> Self {
        Self {
            correlated_path,
            primary,
            table_references,
            correlation_predicates: Vec::new(),
        }
    }

    pub fn correlation_predicates(&self) -> &[Predicate] {
        &self.correlation_predicates
    }

    pub fn find_table_reference(&self, table_expression: &str) -> Option<TableReference> {
        std::iter::once(&self.primary)
            .chain(self.table_references.iter())
            .find(|r| r.contains_table(table_expression))
            .cloned()
    }
}

#[derive(Debug, Clone)]
pub enum TableGroupKind {
    Standard(TableStorage),
    Lazy(LazyTableGroup),
    Virtual(VirtualTableGroup),
    Correlated(CorrelatedTableGroup),
}

/// All tables backing one occurrence of a model part in a query
#[derive(Debug, Clone)]
pub struct TableGroup {
    pub(crate) id: TableGroupId,
    navigable_path: NavigablePath,
    model_part: ModelPartRef,
    source_alias: Option<String>,
    pub(crate) kind: TableGroupKind,
    pub(crate) table_group_joins: Vec<TableGroupJoin>,
    pub(crate) nested_table_group_joins: Vec<TableGroupJoin>,
    one_to_many: bool,
    fetched: bool,
}

impl TableGroup {
    /// Group not yet registered with a from clause
    pub fn new(navigable_path: NavigablePath, model_part: ModelPartRef, kind: TableGroupKind) -> Self {
        Self {
            id: TableGroupId(usize::MAX),
            navigable_path,
            model_part,
            source_alias: None,
            kind,
            table_group_joins: Vec::new(),
            nested_table_group_joins: Vec::new(),
            one_to_many: false,
            fetched: false,
        }
    }

    pub fn with_source_alias(mut self, alias: impl Into<String>) -> Self {
        self.source_alias = Some(alias.into());
        self
    }

    /// Mark as the single group behind a one-to-many collection and its elements
    pub fn with_one_to_many(mut self, one_to_many: bool) -> Self {
        self.one_to_many = one_to_many;
        self
    }

    pub fn with_fetched(mut self, fetched: bool) -> Self {
        self.fetched = fetched;
        self
    }

    pub fn id(&self) -> TableGroupId {
        self.id
    }

    pub fn navigable_path(&self) -> &NavigablePath {
        &self.navigable_path
    }

    pub fn model_part(&self) -> &ModelPartRef {
        &self.model_part
    }

    pub fn source_alias(&self) -> Option<&str> {
        self.source_alias.as_deref()
    }

    pub fn kind(&self) -> &TableGroupKind {
        &self.kind
    }

    pub fn is_one_to_many(&self) -> bool {
        self.one_to_many
    }

    pub fn is_fetched(&self) -> bool {
        self.fetched
    }

    /// Virtual groups are never rendered themselves
    pub fn is_virtual(&self) -> bool {
        matches!(
            self.kind,
            TableGroupKind::Virtual(_) | TableGroupKind::Correlated(_)
        )
    }

    /// Real table groups anchor joins beneath themselves
    pub fn is_real_table_group(&self) -> bool {
        !self.is_virtual() && !self.nested_table_group_joins().is_empty()
    }

    pub fn is_initialized(&self) -> bool {
        match &self.kind {
            TableGroupKind::Lazy(lazy) => lazy.is_initialized(),
            _ => true,
        }
    }

    /// Materialized tables of a real group
    pub fn storage(&self) -> Option<&TableStorage> {
        match &self.kind {
            TableGroupKind::Standard(storage) => Some(storage),
            TableGroupKind::Lazy(LazyTableGroup {
                state: LazyState::Initialized(storage),
                ..
            }) => Some(storage.as_ref()),
            _ => None,
        }
    }

    pub(crate) fn storage_mut(&mut self) -> Option<&mut TableStorage> {
        match &mut self.kind {
            TableGroupKind::Standard(storage) => Some(storage),
            TableGroupKind::Lazy(LazyTableGroup {
                state: LazyState::Initialized(storage),
                ..
            }) => Some(storage.as_mut()),
            _ => None,
        }
    }

    pub fn table_group_joins(&self) -> &[TableGroupJoin] {
        match &self.kind {
            TableGroupKind::Lazy(LazyTableGroup {
                state: LazyState::Uninitialized { buffered_joins, .. },
                ..
            }) => buffered_joins,
            _ => &self.table_group_joins,
        }
    }

    pub fn nested_table_group_joins(&self) -> &[TableGroupJoin] {
        match &self.kind {
            TableGroupKind::Lazy(LazyTableGroup {
                state: LazyState::Uninitialized {
                    buffered_nested_joins,
                    ..
                },
                ..
            }) => buffered_nested_joins,
            _ => &self.nested_table_group_joins,
        }
    }

    pub(crate) fn table_group_joins_mut(&mut self) -> &mut Vec<TableGroupJoin> {
        match &mut self.kind {
            TableGroupKind::Lazy(LazyTableGroup {
                state: LazyState::Uninitialized { buffered_joins, .. },
                ..
            }) => buffered_joins,
            _ => &mut self.table_group_joins,
        }
    }

    pub(crate) fn nested_table_group_joins_mut(&mut self) -> &mut Vec<TableGroupJoin> {
        match &mut self.kind {
            TableGroupKind::Lazy(LazyTableGroup {
                state: LazyState::Uninitialized {
                    buffered_nested_joins,
                    ..
                },
                ..
            }) => buffered_nested_joins,
            _ => &mut self.nested_table_group_joins,
        }
    }

    /// Nested joins first, then flat joins
    pub fn all_joins(&self) -> impl Iterator<Item = &TableGroupJoin> {
        self.nested_table_group_joins()
            .iter()
            .chain(self.table_group_joins().iter())
    }

    /// Secondary table joins of the materialized storage
    pub fn table_reference_joins(&self) -> &[TableReferenceJoin] {
        self.storage()
            .map(TableStorage::table_reference_joins)
            .unwrap_or(&[])
    }

    /// Materialize a lazy group, replaying buffered joins
    ///
    /// Returns whether the state changed.
    pub(crate) fn initialize(&mut self) -> bool {
        let TableGroupKind::Lazy(lazy) = &mut self.kind else {
            return false;
        };
        let LazyState::Uninitialized {
            pending,
            buffered_joins,
            buffered_nested_joins,
        } = &mut lazy.state
        else {
            return false;
        };

        let storage = pending.clone();
        let joins = std::mem::take(buffered_joins);
        let nested = std::mem::take(buffered_nested_joins);
        lazy.state = LazyState::Initialized(storage);

        self.table_group_joins.extend(joins);
        self.nested_table_group_joins.extend(nested);
        tracing::trace!("Initialized lazy table group {}", self.navigable_path);
        true
    }
}
