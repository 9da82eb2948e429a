//! Query spaces: the table groups a load plan reads from
//!
//! [`QuerySpaces`] owns the from clause being built and the alias generator,
//! and knows how to turn metamodel definitions into table groups and joins.

use std::sync::Arc;

use crate::error::{LoadPlanError, LoadPlanResult};
use crate::metamodel::{
    AssociationDefinition, CollectionDefinition, CollectionPartDefinition, EntityDefinition,
};
use crate::navigable_path::{NavigablePath, ELEMENT_PART, IDENTIFIER_PART, INDEX_PART};
use crate::sql_ast::{
    FromClause, JoinType, LazyTableGroup, ModelPartRef, ParentTableGroupUseChecker,
    PotentialTableJoin, Predicate, SqlAliasBaseGenerator, TableGroup, TableGroupId,
    TableGroupJoin, TableGroupKind, TableReference, TableReferenceJoin, TableStorage, VirtualKind,
    VirtualTableGroup,
};

/// A to-one association join to add beneath an owning group
#[derive(Debug, Clone)]
pub struct EntityJoin<'d> {
    pub owner: TableGroupId,
    /// Entity owning the attribute; needed to join the inverse side of a pair
    pub owner_entity: Option<&'d EntityDefinition>,
    /// `Owner.path.to.attribute`, used to find reusable joins
    pub role: String,
    pub association: &'d AssociationDefinition,
    pub target: &'d EntityDefinition,
    pub navigable_path: NavigablePath,
    pub join_type: JoinType,
    pub fetched: bool,
    pub source_alias: Option<String>,
}

/// A collection join to add beneath an owning group
#[derive(Debug, Clone)]
pub struct CollectionJoin<'d> {
    pub owner: TableGroupId,
    pub owner_entity: &'d EntityDefinition,
    pub collection: &'d CollectionDefinition,
    /// Definition of the element entity, if the elements are entities
    pub element_entity: Option<&'d EntityDefinition>,
    pub navigable_path: NavigablePath,
    pub join_type: JoinType,
    pub fetched: bool,
    pub source_alias: Option<String>,
}

/// Groups created for one collection occurrence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionSpaces {
    pub collection: TableGroupId,
    /// Group of the elements; the collection group itself for one-to-many
    pub element: Option<TableGroupId>,
}

/// From clause under construction plus alias allocation
#[derive(Debug, Clone)]
pub struct QuerySpaces {
    from_clause: FromClause,
    alias_generator: SqlAliasBaseGenerator,
}

impl QuerySpaces {
    pub fn new(alias_stem_length: usize) -> Self {
        Self {
            from_clause: FromClause::new(),
            alias_generator: SqlAliasBaseGenerator::new(alias_stem_length),
        }
    }

    /// Continue building on top of an existing from clause
    pub fn with_from_clause(from_clause: FromClause, alias_generator: SqlAliasBaseGenerator) -> Self {
        Self {
            from_clause,
            alias_generator,
        }
    }

    pub fn from_clause(&self) -> &FromClause {
        &self.from_clause
    }

    pub fn from_clause_mut(&mut self) -> &mut FromClause {
        &mut self.from_clause
    }

    pub fn alias_generator_mut(&mut self) -> &mut SqlAliasBaseGenerator {
        &mut self.alias_generator
    }

    pub fn into_parts(self) -> (FromClause, SqlAliasBaseGenerator) {
        (self.from_clause, self.alias_generator)
    }

    /// Root group for an entity return or query root
    pub fn make_root_entity_space(
        &mut self,
        entity: &EntityDefinition,
        navigable_path: NavigablePath,
        source_alias: Option<&str>,
    ) -> TableGroupId {
        let storage = self.entity_storage(entity, &entity.name, false);
        let mut group = TableGroup::new(
            navigable_path,
            ModelPartRef::Entity(entity.name.clone()),
            TableGroupKind::Standard(storage),
        );
        if let Some(alias) = source_alias {
            group = group.with_source_alias(alias);
        }
        let id = self.from_clause.add_root_table_group(group);
        tracing::trace!("Created root entity space {} for {}", id, entity.name);
        id
    }

    /// Join a to-one association target as a real group
    pub fn make_entity_join(&mut self, join: EntityJoin<'_>) -> LoadPlanResult<TableGroupId> {
        let (owner_reference, target_table, target_columns) = self.entity_join_sides(&join)?;
        let storage = self.entity_storage(join.target, &join.target.name, join.join_type.is_outer());
        let target_reference = storage
            .find_table_reference(target_table)
            .ok_or_else(|| unknown_table(target_table, &join.navigable_path))?;
        let predicate = Predicate::column_equality(
            &owner_reference,
            &join.association.join_columns,
            &target_reference,
            &target_columns,
        );

        let mut group = TableGroup::new(
            join.navigable_path.clone(),
            ModelPartRef::Entity(join.target.name.clone()),
            TableGroupKind::Standard(storage),
        )
        .with_fetched(join.fetched);
        if let Some(alias) = &join.source_alias {
            group = group.with_source_alias(alias.as_str());
        }
        let id = self.from_clause.register(group);
        self.from_clause.add_table_group_join(
            join.owner,
            TableGroupJoin::new(
                join.navigable_path,
                join.join_type,
                id,
                Some(predicate),
                Some(ModelPartRef::Association(join.role)),
            ),
        );
        Ok(id)
    }

    /// Join a to-one association target whose tables are only joined on demand
    ///
    /// While uninitialized, the target identifier is read from the owner's
    /// foreign key columns.
    pub fn make_lazy_entity_join(&mut self, join: EntityJoin<'_>) -> LoadPlanResult<TableGroupId> {
        let (owner_reference, target_table, target_columns) = self.entity_join_sides(&join)?;
        let storage = self.entity_storage(join.target, &join.target.name, join.join_type.is_outer());
        let target_reference = storage
            .find_table_reference(target_table)
            .ok_or_else(|| unknown_table(target_table, &join.navigable_path))?;
        let predicate = Predicate::column_equality(
            &owner_reference,
            &join.association.join_columns,
            &target_reference,
            &target_columns,
        );

        let mut lazy = LazyTableGroup::new(join.owner, storage);
        if join.association.mapped_by.is_none() {
            lazy = lazy.with_parent_use_checker(foreign_key_checker(
                &join.navigable_path,
                join.target,
                owner_reference.table_expression(),
            ));
        }

        let mut group = TableGroup::new(
            join.navigable_path.clone(),
            ModelPartRef::Entity(join.target.name.clone()),
            TableGroupKind::Lazy(lazy),
        );
        if let Some(alias) = &join.source_alias {
            group = group.with_source_alias(alias.as_str());
        }
        let id = self.from_clause.register(group);
        self.from_clause.add_table_group_join(
            join.owner,
            TableGroupJoin::new(
                join.navigable_path,
                join.join_type,
                id,
                Some(predicate),
                Some(ModelPartRef::Association(join.role)),
            ),
        );
        Ok(id)
    }

    fn entity_join_sides<'j>(
        &mut self,
        join: &'j EntityJoin<'_>,
    ) -> LoadPlanResult<(TableReference, &'j str, Vec<String>)> {
        let key_table = join.association.association_key.table.as_str();
        let (owner_table, target_table) = if join.association.mapped_by.is_some() {
            let owner_entity = join.owner_entity.ok_or_else(|| {
                LoadPlanError::illegal_state(format!(
                    "inverse association {} has no owning entity",
                    join.navigable_path
                ))
            })?;
            (owner_entity.table.as_str(), key_table)
        } else {
            (key_table, join.target.table.as_str())
        };
        let owner_reference =
            self.from_clause
                .resolve_table_reference(join.owner, &join.navigable_path, owner_table)?;
        let target_columns = if join.association.target_columns.is_empty() {
            join.target.key_columns.clone()
        } else {
            join.association.target_columns.clone()
        };
        Ok((owner_reference, target_table, target_columns))
    }

    /// Delegating group for an embedded composite
    pub fn make_composite_space(
        &mut self,
        owner: TableGroupId,
        navigable_path: NavigablePath,
        owner_entity: &str,
        type_name: &str,
        kind: VirtualKind,
    ) -> TableGroupId {
        let model_part = ModelPartRef::Composite {
            owner: owner_entity.to_string(),
            type_name: type_name.to_string(),
        };
        self.make_virtual_join(owner, navigable_path, model_part, kind, owner)
    }

    /// Delegating group reusing `target` for the inverse side of a pair
    pub fn make_mapped_by_space(
        &mut self,
        owner: TableGroupId,
        target: TableGroupId,
        navigable_path: NavigablePath,
        entity_name: &str,
    ) -> TableGroupId {
        self.make_virtual_join(
            owner,
            navigable_path,
            ModelPartRef::Entity(entity_name.to_string()),
            VirtualKind::MappedBy,
            target,
        )
    }

    fn make_virtual_join(
        &mut self,
        owner: TableGroupId,
        navigable_path: NavigablePath,
        model_part: ModelPartRef,
        kind: VirtualKind,
        underlying: TableGroupId,
    ) -> TableGroupId {
        let producer = model_part.clone();
        let id = self.from_clause.register(TableGroup::new(
            navigable_path.clone(),
            model_part,
            TableGroupKind::Virtual(VirtualTableGroup { kind, underlying }),
        ));
        self.from_clause.add_nested_table_group_join(
            owner,
            TableGroupJoin::new(navigable_path, JoinType::Inner, id, None, Some(producer)),
        );
        id
    }

    /// Root group for a collection return
    pub fn make_root_collection_space(
        &mut self,
        collection: &CollectionDefinition,
        element_entity: Option<&EntityDefinition>,
        navigable_path: NavigablePath,
    ) -> LoadPlanResult<CollectionSpaces> {
        let group = self.collection_group(collection, element_entity, navigable_path.clone(), false)?;
        let id = self.from_clause.add_root_table_group(group);
        let element = self.make_element_space(id, collection, element_entity, &navigable_path)?;
        Ok(CollectionSpaces { collection: id, element })
    }

    /// Join a collection beneath its owner, together with its element group
    pub fn make_collection_join(&mut self, join: CollectionJoin<'_>) -> LoadPlanResult<CollectionSpaces> {
        let owner_reference = self.from_clause.resolve_table_reference(
            join.owner,
            &join.navigable_path,
            &join.owner_entity.table,
        )?;

        let mut group = self.collection_group(
            join.collection,
            join.element_entity,
            join.navigable_path.clone(),
            join.join_type.is_outer(),
        )?;
        group = group.with_fetched(join.fetched);
        if let Some(alias) = &join.source_alias {
            group = group.with_source_alias(alias.as_str());
        }
        let collection_reference = group
            .storage()
            .map(|storage| storage.primary_table_reference().clone())
            .ok_or_else(|| unknown_table(&join.collection.table, &join.navigable_path))?;
        let predicate = Predicate::column_equality(
            &owner_reference,
            &join.owner_entity.key_columns,
            &collection_reference,
            &join.collection.key_columns,
        );

        let id = self.from_clause.register(group);
        self.from_clause.add_table_group_join(
            join.owner,
            TableGroupJoin::new(
                join.navigable_path.clone(),
                join.join_type,
                id,
                Some(predicate),
                Some(ModelPartRef::Association(join.collection.role.clone())),
            ),
        );
        let element = self.make_element_space(id, join.collection, join.element_entity, &join.navigable_path)?;
        Ok(CollectionSpaces { collection: id, element })
    }

    fn collection_group(
        &mut self,
        collection: &CollectionDefinition,
        element_entity: Option<&EntityDefinition>,
        navigable_path: NavigablePath,
        optional: bool,
    ) -> LoadPlanResult<TableGroup> {
        let storage = if collection.one_to_many {
            let entity = element_entity
                .ok_or_else(|| LoadPlanError::UnknownEntity(collection.element.type_name().to_string()))?;
            self.entity_storage(entity, &entity.name, optional)
        } else {
            let mut alias_base = self.alias_generator.create_sql_alias_base(collection.role_attribute());
            let primary = TableReference::named(
                collection.table.as_str(),
                alias_base.generate_new_alias(),
                optional,
            );
            TableStorage::new(primary, alias_base)
        };

        Ok(TableGroup::new(
            navigable_path,
            ModelPartRef::Collection(collection.role.clone()),
            TableGroupKind::Standard(storage),
        )
        .with_one_to_many(collection.one_to_many))
    }

    /// Element group of a collection
    ///
    /// One-to-many elements live in the collection group itself; basic and
    /// any-valued elements have no group.
    pub fn make_element_space(
        &mut self,
        collection_group: TableGroupId,
        collection: &CollectionDefinition,
        element_entity: Option<&EntityDefinition>,
        collection_path: &NavigablePath,
    ) -> LoadPlanResult<Option<TableGroupId>> {
        let element_path = collection_path.append(ELEMENT_PART);
        match &collection.element {
            CollectionPartDefinition::Entity { .. } if collection.one_to_many => Ok(Some(collection_group)),
            CollectionPartDefinition::Entity { entity, columns } => {
                let target = element_entity.ok_or_else(|| LoadPlanError::UnknownEntity(entity.clone()))?;
                let (id, join) = self.part_entity_join(collection_group, target, columns, element_path)?;
                self.from_clause.add_nested_table_group_join(collection_group, join);
                Ok(Some(id))
            }
            CollectionPartDefinition::Composite(composite) => Ok(Some(self.make_virtual_join(
                collection_group,
                element_path,
                ModelPartRef::Composite {
                    owner: collection.role.clone(),
                    type_name: composite.type_name.clone(),
                },
                VirtualKind::StandardVirtual,
                collection_group,
            ))),
            CollectionPartDefinition::Basic { .. } | CollectionPartDefinition::Any { .. } => Ok(None),
        }
    }

    /// Index group of a collection
    ///
    /// An entity index is spliced in ahead of the element join it precedes.
    pub fn make_index_space(
        &mut self,
        collection_group: TableGroupId,
        collection: &CollectionDefinition,
        index_entity: Option<&EntityDefinition>,
        collection_path: &NavigablePath,
    ) -> LoadPlanResult<Option<TableGroupId>> {
        let Some(index) = &collection.index else {
            return Ok(None);
        };
        let index_path = collection_path.append(INDEX_PART);
        match index {
            CollectionPartDefinition::Entity { entity, columns } => {
                let target = index_entity.ok_or_else(|| LoadPlanError::UnknownEntity(entity.clone()))?;
                let (id, join) = self.part_entity_join(collection_group, target, columns, index_path)?;
                let element_path = collection_path.append(ELEMENT_PART);
                if collection.is_many_to_many() {
                    self.from_clause
                        .prepend_table_group_join(collection_group, &element_path, join)?;
                } else {
                    self.from_clause.add_nested_table_group_join(collection_group, join);
                }
                Ok(Some(id))
            }
            CollectionPartDefinition::Composite(composite) => Ok(Some(self.make_virtual_join(
                collection_group,
                index_path,
                ModelPartRef::Composite {
                    owner: collection.role.clone(),
                    type_name: composite.type_name.clone(),
                },
                VirtualKind::StandardVirtual,
                collection_group,
            ))),
            CollectionPartDefinition::Basic { .. } | CollectionPartDefinition::Any { .. } => Ok(None),
        }
    }

    /// Entity group of a collection index or element, with its join
    fn part_entity_join(
        &mut self,
        collection_group: TableGroupId,
        target: &EntityDefinition,
        columns: &[String],
        navigable_path: NavigablePath,
    ) -> LoadPlanResult<(TableGroupId, TableGroupJoin)> {
        let collection_reference = self
            .from_clause
            .primary_table_reference(collection_group)
            .ok_or_else(|| LoadPlanError::illegal_state(format!(
                "collection group {} has no primary table",
                collection_group
            )))?;
        let storage = self.entity_storage(target, &target.name, false);
        let predicate = Predicate::column_equality(
            &collection_reference,
            columns,
            storage.primary_table_reference(),
            &target.key_columns,
        );
        let id = self.from_clause.register(TableGroup::new(
            navigable_path.clone(),
            ModelPartRef::Entity(target.name.clone()),
            TableGroupKind::Standard(storage),
        ));
        let join = TableGroupJoin::new(
            navigable_path,
            JoinType::Inner,
            id,
            Some(predicate),
            Some(ModelPartRef::Entity(target.name.clone())),
        );
        Ok((id, join))
    }

    /// Tables of an entity: primary (or union) table plus secondary tables
    fn entity_storage(&mut self, entity: &EntityDefinition, stem_source: &str, optional: bool) -> TableStorage {
        let mut alias_base = self.alias_generator.create_sql_alias_base(stem_source);
        let alias = alias_base.generate_new_alias();
        let primary = if entity.union_subclass_tables.is_empty() {
            TableReference::named(entity.table.as_str(), alias, optional)
        } else {
            TableReference::union(
                entity.table.as_str(),
                entity.union_subclass_tables.clone(),
                alias,
                optional,
            )
        };

        let mut mandatory = Vec::new();
        let mut potential = Vec::new();
        for secondary in &entity.secondary_tables {
            if secondary.optional {
                potential.push(PotentialTableJoin {
                    table_expression: secondary.table.clone(),
                    key_columns: secondary.key_columns.clone(),
                    primary_key_columns: entity.key_columns.clone(),
                    optional: true,
                });
            } else {
                let reference = TableReference::named(
                    secondary.table.as_str(),
                    alias_base.generate_new_alias(),
                    optional,
                );
                let predicate = Predicate::column_equality(
                    &primary,
                    &entity.key_columns,
                    &reference,
                    &secondary.key_columns,
                );
                mandatory.push(TableReferenceJoin::new(JoinType::Inner, reference, Some(predicate)));
            }
        }

        let storage = TableStorage::new(primary, alias_base);
        let storage = mandatory
            .into_iter()
            .fold(storage, TableStorage::with_table_reference_join);
        potential
            .into_iter()
            .fold(storage, TableStorage::with_potential_join)
    }
}

/// Lets a lazy to-one group answer its identifier from the owner's foreign key
fn foreign_key_checker(
    join_path: &NavigablePath,
    target: &EntityDefinition,
    foreign_key_table: &str,
) -> ParentTableGroupUseChecker {
    let id_path = join_path.append(IDENTIFIER_PART);
    let id_attribute_path = target
        .identifier
        .attribute_name()
        .map(|attribute| join_path.append(attribute));
    let foreign_key_table = foreign_key_table.to_string();
    Arc::new(move |path: &NavigablePath, table: &str| {
        table == foreign_key_table
            && (path == &id_path || id_attribute_path.as_ref() == Some(path))
    })
}

fn unknown_table(table_expression: &str, navigable_path: &NavigablePath) -> LoadPlanError {
    LoadPlanError::UnknownTableReference {
        table_expression: table_expression.to_string(),
        navigable_path: navigable_path.to_string(),
    }
}
