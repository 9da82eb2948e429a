//! Interpretation of a validated select tree into SQL AST pieces
//!
//! Explicit joins become table group joins with their ON conditions,
//! attribute paths become column references, and `EXISTS` sub-queries become
//! SQL query specs whose joins from outer aliases are correlated. Paths that
//! navigate a to-one association without an explicit join get a lazy join,
//! so reading the association's identifier never adds a table.

use std::collections::HashMap;

use crate::error::{LoadPlanError, LoadPlanResult};
use crate::metamodel::{AttributeDefinition, EntityDefinition, Metamodel};
use crate::navigable_path::{NavigablePath, ELEMENT_PART};
use crate::plan::{CollectionJoin, EntityJoin, QuerySpaces, ScalarReturn};
use crate::sql_ast::{
    Expression, FromClause, JoinType, ModelPartRef, Predicate, QuerySpec, TableGroupId,
};

use super::resolution::{element_part, resolve_attribute, ResolvedPart};
use super::tree::{
    SortDirection, SqmExpression, SqmFetchOffset, SqmJoin, SqmPath, SqmPredicate, SqmQuerySpec,
    SqmSelectStatement,
};

/// Interpreted ORDER BY item
#[derive(Debug, Clone)]
pub struct SortSpecification {
    pub expression: Expression,
    pub direction: SortDirection,
}

/// Result of interpreting a single-root query
#[derive(Debug)]
pub struct InterpretedQuery {
    pub query_spaces: QuerySpaces,
    pub root: TableGroupId,
    pub root_entity: String,
    pub root_path: NavigablePath,
    pub root_alias: String,
    /// Navigable paths of `join fetch` joins, in declaration order
    pub join_fetch_paths: Vec<NavigablePath>,
    pub scalar_returns: Vec<ScalarReturn>,
    pub restriction: Option<Predicate>,
    pub group_by: Vec<Expression>,
    pub having: Option<Predicate>,
    pub order_by: Vec<SortSpecification>,
    pub fetch_offset: SqmFetchOffset,
    pub distinct: bool,
}

/// Owner-side foreign key of a to-one join
#[derive(Debug, Clone)]
struct ForeignKey {
    table: String,
    columns: Vec<String>,
}

/// What an identification variable, or a path prefix, stands for
#[derive(Debug, Clone)]
struct Binding<'m> {
    group: TableGroupId,
    path: NavigablePath,
    part: ResolvedPart<'m>,
    /// Entity owning attributes reached from here
    owner_entity: Option<&'m EntityDefinition>,
    /// Prefix of association roles reached from here, e.g. `Order.address`
    role_base: String,
    /// Table holding columns that do not name their own table
    table: String,
    foreign_key: Option<ForeignKey>,
}

impl<'m> Binding<'m> {
    fn role(&self, attribute: &str) -> String {
        format!("{}.{}", self.role_base, attribute)
    }
}

struct QueryLevel<'m> {
    spaces: QuerySpaces,
    bindings: HashMap<String, Binding<'m>>,
    /// Roots created for outer groups, keyed by outer level and group
    correlated: HashMap<(usize, TableGroupId), TableGroupId>,
    /// ON conditions of joins that correlation turned into roots
    extra_restrictions: Vec<Predicate>,
}

impl<'m> QueryLevel<'m> {
    fn new(spaces: QuerySpaces) -> Self {
        Self {
            spaces,
            bindings: HashMap::new(),
            correlated: HashMap::new(),
            extra_restrictions: Vec::new(),
        }
    }
}

/// Turns a select tree into a from clause, predicates and join fetch paths
pub struct SqmInterpreter<'m> {
    metamodel: &'m Metamodel,
    alias_stem_length: usize,
    levels: Vec<QueryLevel<'m>>,
    join_fetch_paths: Vec<NavigablePath>,
}

impl<'m> SqmInterpreter<'m> {
    pub fn new(metamodel: &'m Metamodel, alias_stem_length: usize) -> Self {
        Self {
            metamodel,
            alias_stem_length,
            levels: Vec::new(),
            join_fetch_paths: Vec::new(),
        }
    }

    /// Interpret the statement's query; set operations are rejected
    pub fn interpret(self, statement: &SqmSelectStatement) -> LoadPlanResult<InterpretedQuery> {
        let spec = statement.query_spec().ok_or_else(|| {
            LoadPlanError::semantic("set operations cannot be interpreted into a load plan")
        })?;
        self.interpret_query_spec(spec)
    }

    pub fn interpret_query_spec(mut self, spec: &SqmQuerySpec) -> LoadPlanResult<InterpretedQuery> {
        let [root] = spec.roots.as_slice() else {
            return Err(LoadPlanError::semantic(format!(
                "load plans are built for exactly one query root, found {}",
                spec.roots.len()
            )));
        };

        let metamodel = self.metamodel;
        let entity = metamodel.entity(&root.entity)?;
        let root_path = NavigablePath::with_alias(entity.name.as_str(), root.alias.as_str());
        let mut spaces = QuerySpaces::new(self.alias_stem_length);
        let root_group = spaces.make_root_entity_space(entity, root_path.clone(), Some(&root.alias));
        self.levels.push(QueryLevel::new(spaces));
        self.bind(&root.alias, entity_binding(root_group, root_path.clone(), entity))?;

        for join in &spec.joins {
            self.interpret_join(join)?;
        }

        let scalar_returns = self.scalar_returns(spec, &root.alias)?;
        let restriction = spec
            .restriction
            .as_ref()
            .map(|predicate| self.interpret_predicate(predicate))
            .transpose()?;
        let group_by = spec
            .group_by
            .iter()
            .map(|expression| self.interpret_expression(expression))
            .collect::<LoadPlanResult<Vec<_>>>()?;
        let having = spec
            .having
            .as_ref()
            .map(|predicate| self.interpret_predicate(predicate))
            .transpose()?;
        let order_by = spec
            .order_by
            .iter()
            .map(|sort| {
                Ok(SortSpecification {
                    expression: self.interpret_expression(&sort.expression)?,
                    direction: sort.direction,
                })
            })
            .collect::<LoadPlanResult<Vec<_>>>()?;

        let level = self
            .levels
            .pop()
            .ok_or_else(|| LoadPlanError::illegal_state("query level stack is empty"))?;
        let restriction = level
            .extra_restrictions
            .into_iter()
            .fold(restriction, |base, extra| Some(Predicate::combine(base, extra)));

        tracing::debug!(
            "Interpreted query rooted at {} with {} join(s), {} join fetch(es) and {} scalar(s)",
            root_path,
            spec.joins.len(),
            self.join_fetch_paths.len(),
            scalar_returns.len()
        );
        Ok(InterpretedQuery {
            query_spaces: level.spaces,
            root: root_group,
            root_entity: entity.name.clone(),
            root_path,
            root_alias: root.alias.clone(),
            join_fetch_paths: self.join_fetch_paths,
            scalar_returns,
            restriction,
            group_by,
            having,
            order_by,
            fetch_offset: spec.fetch_offset,
            distinct: spec.distinct,
        })
    }

    fn top(&mut self) -> LoadPlanResult<&mut QueryLevel<'m>> {
        self.levels
            .last_mut()
            .ok_or_else(|| LoadPlanError::illegal_state("query level stack is empty"))
    }

    fn bind(&mut self, alias: &str, binding: Binding<'m>) -> LoadPlanResult<()> {
        self.top()?.bindings.insert(alias.to_string(), binding);
        Ok(())
    }

    /// Binding of an alias, correlating it when it belongs to an outer query
    fn binding(&mut self, alias: &str) -> LoadPlanResult<Binding<'m>> {
        let top = self
            .levels
            .len()
            .checked_sub(1)
            .ok_or_else(|| LoadPlanError::illegal_state("query level stack is empty"))?;
        if let Some(binding) = self.levels[top].bindings.get(alias) {
            return Ok(binding.clone());
        }

        let (level, outer) = (0..top)
            .rev()
            .find_map(|level| {
                self.levels[level]
                    .bindings
                    .get(alias)
                    .map(|binding| (level, binding.clone()))
            })
            .ok_or_else(|| LoadPlanError::semantic(format!("unknown identification variable `{}`", alias)))?;

        let key = (level, outer.group);
        let group = match self.levels[top].correlated.get(&key) {
            Some(group) => *group,
            None => {
                let (outer_levels, inner_levels) = self.levels.split_at_mut(top);
                let outer_from = outer_levels[level].spaces.from_clause_mut();
                outer_from.initialize_table_group(outer.group);
                let inner = &mut inner_levels[0];
                let group = inner
                    .spaces
                    .from_clause_mut()
                    .add_correlated_root(outer_from, outer.group)?;
                inner.correlated.insert(key, group);
                tracing::trace!("Correlated `{}` ({}) into a sub-query", alias, outer.path);
                group
            }
        };

        let correlated = Binding {
            group,
            foreign_key: None,
            ..outer
        };
        self.bind(alias, correlated.clone())?;
        Ok(correlated)
    }

    /// Follow one attribute from `cursor`, joining to-ones implicitly
    fn step(&mut self, cursor: Binding<'m>, name: &str, path: &SqmPath) -> LoadPlanResult<Binding<'m>> {
        let metamodel = self.metamodel;
        let resolved = resolve_attribute(metamodel, cursor.part, name, path)?;
        let navigable_path = cursor.path.append(name);

        match resolved.part {
            ResolvedPart::Entity(target) => {
                let attribute = association_attribute(resolved.attribute, path)?;
                self.implicit_entity_join(&cursor, attribute, target, navigable_path)
            }
            part => Ok(Binding {
                path: navigable_path,
                part,
                role_base: cursor.role(name),
                foreign_key: None,
                ..cursor
            }),
        }
    }

    fn implicit_entity_join(
        &mut self,
        cursor: &Binding<'m>,
        attribute: &'m AttributeDefinition,
        target: &'m EntityDefinition,
        navigable_path: NavigablePath,
    ) -> LoadPlanResult<Binding<'m>> {
        let association = attribute.association().ok_or_else(|| not_an_association(&navigable_path))?;
        let role = cursor.role(&attribute.name);
        let spaces = &mut self.top()?.spaces;

        let producer = ModelPartRef::Association(role.clone());
        let group = match spaces
            .from_clause()
            .find_compatible_join(cursor.group, &producer, JoinType::Inner)
        {
            Some(existing) => existing,
            None => {
                tracing::trace!("Implicit join for {}", navigable_path);
                spaces.make_lazy_entity_join(EntityJoin {
                    owner: cursor.group,
                    owner_entity: cursor.owner_entity,
                    role,
                    association,
                    target,
                    navigable_path: navigable_path.clone(),
                    join_type: JoinType::Inner,
                    fetched: false,
                    source_alias: None,
                })?
            }
        };

        let reads_owner_key = association.mapped_by.is_none() && association.target_columns.is_empty();
        let foreign_key = reads_owner_key.then(|| ForeignKey {
            table: association.association_key.table.clone(),
            columns: association.join_columns.clone(),
        });
        Ok(Binding {
            foreign_key,
            ..entity_binding(group, navigable_path, target)
        })
    }

    fn interpret_join(&mut self, join: &SqmJoin) -> LoadPlanResult<()> {
        let Some((last, intermediate)) = join.path.attributes.split_last() else {
            return Err(LoadPlanError::semantic(format!(
                "join path `{}` does not name an attribute",
                join.path
            )));
        };
        let mut cursor = self.binding(&join.path.alias)?;
        for name in intermediate {
            cursor = self.step(cursor, name, &join.path)?;
        }

        let metamodel = self.metamodel;
        let resolved = resolve_attribute(metamodel, cursor.part, last, &join.path)?;
        let attribute = association_attribute(resolved.attribute, &join.path)?;
        let association = attribute
            .association()
            .ok_or_else(|| not_an_association(&cursor.path))?;
        let navigable_path = cursor.path.append(last);
        let role = cursor.role(last);

        let (joined, binding) = match resolved.part {
            ResolvedPart::Entity(target) => {
                let joined = self.top()?.spaces.make_entity_join(EntityJoin {
                    owner: cursor.group,
                    owner_entity: cursor.owner_entity,
                    role,
                    association,
                    target,
                    navigable_path: navigable_path.clone(),
                    join_type: join.join_type,
                    fetched: join.fetch,
                    source_alias: Some(join.alias.clone()),
                })?;
                (joined, entity_binding(joined, navigable_path.clone(), target))
            }
            ResolvedPart::Collection(collection) => {
                let element_entity = collection
                    .element
                    .entity_name()
                    .map(|name| metamodel.entity(name))
                    .transpose()?;
                let owner_entity = metamodel.entity(&collection.owner)?;
                let joined = self.top()?.spaces.make_collection_join(CollectionJoin {
                    owner: cursor.group,
                    owner_entity,
                    collection,
                    element_entity,
                    navigable_path: navigable_path.clone(),
                    join_type: join.join_type,
                    fetched: join.fetch,
                    source_alias: Some(join.alias.clone()),
                })?;

                let element_path = navigable_path.append(ELEMENT_PART);
                let element_group = joined.element.unwrap_or(joined.collection);
                let binding = match element_entity {
                    Some(entity) => entity_binding(element_group, element_path, entity),
                    None => Binding {
                        group: element_group,
                        path: element_path,
                        part: element_part(metamodel, collection)?,
                        owner_entity: None,
                        role_base: format!("{}.{}", collection.role, ELEMENT_PART),
                        table: collection.table.clone(),
                        foreign_key: None,
                    },
                };
                (joined.collection, binding)
            }
            _ => return Err(not_an_association(&navigable_path)),
        };
        self.bind(&join.alias, binding)?;

        if let Some(on) = &join.on {
            let predicate = self.interpret_predicate(on)?;
            let level = self.top()?;
            match level.spaces.from_clause_mut().find_join_mut(cursor.group, joined) {
                Some(table_group_join) => table_group_join.apply_predicate(predicate),
                None => level.extra_restrictions.push(predicate),
            }
        }
        if join.fetch {
            self.join_fetch_paths.push(navigable_path);
        }
        Ok(())
    }

    fn scalar_returns(&mut self, spec: &SqmQuerySpec, root_alias: &str) -> LoadPlanResult<Vec<ScalarReturn>> {
        if spec.selections.is_empty() {
            return Ok(Vec::new());
        }
        let selects_root = spec.selections.iter().any(|selection| {
            matches!(&selection.expression, SqmExpression::Path(path) if path.is_alias_reference() && path.alias == root_alias)
        });
        if !selects_root {
            return Err(LoadPlanError::semantic(format!(
                "a query load plan needs its root `{}` in the select list",
                root_alias
            )));
        }

        let mut scalars = Vec::new();
        for selection in &spec.selections {
            match &selection.expression {
                SqmExpression::Path(path) if path.is_alias_reference() && path.alias == root_alias => {}
                SqmExpression::Path(path) => {
                    let (navigable_path, part, _) = self.resolve_value(path)?;
                    let ResolvedPart::Basic { type_name, .. } = part else {
                        return Err(LoadPlanError::semantic(format!(
                            "only the root entity can be selected next to scalar values, found `{}`",
                            path
                        )));
                    };
                    scalars.push(ScalarReturn {
                        navigable_path,
                        type_name: type_name.to_string(),
                        alias: selection.alias.clone(),
                    });
                }
                SqmExpression::Function { name, .. } => {
                    self.interpret_expression(&selection.expression)?;
                    let label = selection.alias.as_deref().unwrap_or(name);
                    scalars.push(ScalarReturn {
                        navigable_path: NavigablePath::new(label),
                        type_name: name.clone(),
                        alias: selection.alias.clone(),
                    });
                }
                SqmExpression::Literal(_) | SqmExpression::Parameter(_) => {
                    return Err(LoadPlanError::semantic(
                        "literals and parameters cannot be selected into a load plan",
                    ))
                }
            }
        }
        Ok(scalars)
    }

    fn interpret_predicate(&mut self, predicate: &SqmPredicate) -> LoadPlanResult<Predicate> {
        Ok(match predicate {
            SqmPredicate::Comparison { lhs, operator, rhs } => Predicate::Comparison {
                lhs: self.interpret_expression(lhs)?,
                operator: *operator,
                rhs: self.interpret_expression(rhs)?,
            },
            SqmPredicate::Junction { nature, predicates } => Predicate::Junction {
                nature: *nature,
                predicates: predicates
                    .iter()
                    .map(|predicate| self.interpret_predicate(predicate))
                    .collect::<LoadPlanResult<Vec<_>>>()?,
            },
            SqmPredicate::Negated(inner) => Predicate::Negated(Box::new(self.interpret_predicate(inner)?)),
            SqmPredicate::IsNull { expression, negated } => Predicate::IsNull {
                expression: self.interpret_expression(expression)?,
                negated: *negated,
            },
            SqmPredicate::InList {
                expression,
                values,
                negated,
            } => Predicate::InList {
                expression: self.interpret_expression(expression)?,
                values: values
                    .iter()
                    .map(|value| self.interpret_expression(value))
                    .collect::<LoadPlanResult<Vec<_>>>()?,
                negated: *negated,
            },
            SqmPredicate::Exists { subquery, negated } => Predicate::Exists {
                subquery: Box::new(self.interpret_subquery(subquery)?),
                negated: *negated,
            },
        })
    }

    fn interpret_expression(&mut self, expression: &SqmExpression) -> LoadPlanResult<Expression> {
        Ok(match expression {
            SqmExpression::Path(path) => self.resolve_value(path)?.2,
            SqmExpression::Literal(value) => Expression::Literal(value.clone()),
            SqmExpression::Parameter(name) => Expression::Parameter(name.clone()),
            SqmExpression::Function { name, arguments } => Expression::Function {
                name: name.clone(),
                arguments: arguments
                    .iter()
                    .map(|argument| self.interpret_expression(argument))
                    .collect::<LoadPlanResult<Vec<_>>>()?,
            },
        })
    }

    /// Column a value path reads, with its navigable path and model part
    ///
    /// Entity valued paths read the entity identifier.
    fn resolve_value(&mut self, path: &SqmPath) -> LoadPlanResult<(NavigablePath, ResolvedPart<'m>, Expression)> {
        let mut cursor = self.binding(&path.alias)?;
        let Some((last, intermediate)) = path.attributes.split_last() else {
            let expression = self.identifier_column(&cursor, path)?;
            return Ok((cursor.path.clone(), cursor.part, expression));
        };
        for name in intermediate {
            cursor = self.step(cursor, name, path)?;
        }

        let resolved = resolve_attribute(self.metamodel, cursor.part, last, path)?;
        let navigable_path = cursor.path.append(last);
        let expression = match resolved.part {
            ResolvedPart::Basic { table, columns, .. } => {
                let column = single_column(columns, path)?;
                // the identifier of an unjoined to-one is the owner's foreign key
                let deferred = self
                    .top()?
                    .spaces
                    .from_clause()
                    .table_group(cursor.group)
                    .map_or(false, |group| !group.is_initialized());
                let foreign_key = match (&cursor.foreign_key, resolved.attribute) {
                    (Some(foreign_key), None) if deferred => self
                        .top()?
                        .spaces
                        .from_clause_mut()
                        .get_table_reference(cursor.group, &navigable_path, &foreign_key.table, false)
                        .map(|reference| (reference, foreign_key.columns.as_slice())),
                    _ => None,
                };
                match foreign_key {
                    Some((reference, columns)) => Expression::column(&reference, single_column(columns, path)?),
                    None => {
                        let table_expression = table.unwrap_or(cursor.table.as_str());
                        let reference = self.top()?.spaces.from_clause_mut().resolve_table_reference(
                            cursor.group,
                            &navigable_path,
                            table_expression,
                        )?;
                        Expression::column(&reference, column)
                    }
                }
            }
            ResolvedPart::Entity(_) => {
                let attribute = association_attribute(resolved.attribute, path)?;
                let association = attribute.association().ok_or_else(|| not_an_association(&navigable_path))?;
                if association.mapped_by.is_some() {
                    return Err(LoadPlanError::semantic(format!(
                        "inverse association `{}` has no foreign key to compare; compare its identifier",
                        path
                    )));
                }
                let column = single_column(&association.join_columns, path)?;
                let reference = self.top()?.spaces.from_clause_mut().resolve_table_reference(
                    cursor.group,
                    &navigable_path,
                    &association.association_key.table,
                )?;
                Expression::column(&reference, column)
            }
            _ => {
                return Err(LoadPlanError::semantic(format!(
                    "`{}` cannot be used as a value",
                    path
                )))
            }
        };
        Ok((navigable_path, resolved.part, expression))
    }

    fn identifier_column(&mut self, binding: &Binding<'m>, path: &SqmPath) -> LoadPlanResult<Expression> {
        let entity = binding.part.as_entity().ok_or_else(|| {
            LoadPlanError::semantic(format!("`{}` does not denote an entity", path))
        })?;
        let column = single_column(&entity.key_columns, path)?;
        let reference = self.top()?.spaces.from_clause_mut().resolve_table_reference(
            binding.group,
            &binding.path,
            &entity.table,
        )?;
        Ok(Expression::column(&reference, column))
    }

    fn interpret_subquery(&mut self, spec: &SqmQuerySpec) -> LoadPlanResult<QuerySpec> {
        let generator = std::mem::take(self.top()?.spaces.alias_generator_mut());
        self.levels
            .push(QueryLevel::new(QuerySpaces::with_from_clause(FromClause::new(), generator)));

        let result = self.interpret_subquery_body(spec);

        let level = self
            .levels
            .pop()
            .ok_or_else(|| LoadPlanError::illegal_state("query level stack is empty"))?;
        let (from_clause, generator) = level.spaces.into_parts();
        *self.top()?.spaces.alias_generator_mut() = generator;
        let restriction = result?;

        let mut query_spec = QuerySpec::new(false);
        *query_spec.from_clause_mut() = from_clause;
        for predicate in restriction.into_iter().chain(level.extra_restrictions) {
            query_spec.apply_predicate(predicate);
        }
        Ok(query_spec)
    }

    fn interpret_subquery_body(&mut self, spec: &SqmQuerySpec) -> LoadPlanResult<Option<Predicate>> {
        let metamodel = self.metamodel;
        for root in &spec.roots {
            let entity = metamodel.entity(&root.entity)?;
            let path = NavigablePath::with_alias(entity.name.as_str(), root.alias.as_str());
            let group = self
                .top()?
                .spaces
                .make_root_entity_space(entity, path.clone(), Some(&root.alias));
            self.bind(&root.alias, entity_binding(group, path, entity))?;
        }
        for join in &spec.joins {
            self.interpret_join(join)?;
        }
        spec.restriction
            .as_ref()
            .map(|predicate| self.interpret_predicate(predicate))
            .transpose()
    }
}

fn entity_binding<'m>(group: TableGroupId, path: NavigablePath, entity: &'m EntityDefinition) -> Binding<'m> {
    Binding {
        group,
        path,
        part: ResolvedPart::Entity(entity),
        owner_entity: Some(entity),
        role_base: entity.name.clone(),
        table: entity.table.clone(),
        foreign_key: None,
    }
}

fn association_attribute<'m>(
    attribute: Option<&'m AttributeDefinition>,
    path: &SqmPath,
) -> LoadPlanResult<&'m AttributeDefinition> {
    attribute.ok_or_else(|| LoadPlanError::semantic(format!("`{}` is not an association", path)))
}

fn not_an_association(path: &NavigablePath) -> LoadPlanError {
    LoadPlanError::semantic(format!("`{}` is not an association", path))
}

fn single_column<'c>(columns: &'c [String], path: &SqmPath) -> LoadPlanResult<&'c str> {
    match columns {
        [column] => Ok(column.as_str()),
        _ => Err(LoadPlanError::semantic(format!(
            "`{}` maps to {} columns and cannot be used as a single value",
            path,
            columns.len()
        ))),
    }
}
