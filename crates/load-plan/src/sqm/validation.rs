//! Semantic checks run before a select tree is interpreted

use std::collections::{HashMap, HashSet};

use crate::error::{LoadPlanError, LoadPlanResult};
use crate::metamodel::Metamodel;

use super::resolution::{element_part, resolve_attribute, ResolvedPart, SelectionKind};
use super::tree::{
    SqmExpression, SqmFetchOffset, SqmPath, SqmPredicate, SqmQueryGroup, SqmQueryPart,
    SqmQuerySpec, SqmSelectStatement, SqmSortSpecification,
};

/// Identification variables visible at each query nesting level
struct AliasScope<'m> {
    metamodel: &'m Metamodel,
    frames: Vec<HashMap<String, ResolvedPart<'m>>>,
}

impl<'m> AliasScope<'m> {
    fn new(metamodel: &'m Metamodel) -> Self {
        Self {
            metamodel,
            frames: Vec::new(),
        }
    }

    fn push_frame(&mut self) {
        self.frames.push(HashMap::new());
    }

    fn pop_frame(&mut self) {
        self.frames.pop();
    }

    fn is_sub_query(&self) -> bool {
        self.frames.len() > 1
    }

    fn bind(&mut self, alias: &str, part: ResolvedPart<'m>) -> LoadPlanResult<()> {
        if alias.is_empty() {
            return Err(LoadPlanError::semantic("identification variables must not be empty"));
        }
        let frame = self
            .frames
            .last_mut()
            .ok_or_else(|| LoadPlanError::illegal_state("no query level to bind aliases in"))?;
        if frame.insert(alias.to_string(), part).is_some() {
            return Err(LoadPlanError::semantic(format!(
                "identification variable `{}` is declared more than once",
                alias
            )));
        }
        Ok(())
    }

    /// Whether `alias` belongs to an enclosing query
    fn is_outer_alias(&self, alias: &str) -> bool {
        let Some((current, outer)) = self.frames.split_last() else {
            return false;
        };
        !current.contains_key(alias) && outer.iter().any(|frame| frame.contains_key(alias))
    }

    fn resolve_path(&self, path: &SqmPath) -> LoadPlanResult<ResolvedPart<'m>> {
        if path.has_empty_segment() {
            return Err(LoadPlanError::semantic(format!("malformed path `{}`", path)));
        }
        let mut part = self
            .frames
            .iter()
            .rev()
            .find_map(|frame| frame.get(&path.alias).copied())
            .ok_or_else(|| {
                LoadPlanError::semantic(format!(
                    "unknown identification variable `{}` in `{}`",
                    path.alias, path
                ))
            })?;
        for attribute in &path.attributes {
            part = resolve_attribute(self.metamodel, part, attribute, path)?.part;
        }
        Ok(part)
    }
}

/// Validate a statement: its CTEs, then its query
pub fn validate_statement(statement: &SqmSelectStatement, metamodel: &Metamodel) -> LoadPlanResult<()> {
    let mut names = HashSet::new();
    for cte in &statement.ctes {
        if !names.insert(cte.name.as_str()) {
            return Err(LoadPlanError::semantic(format!(
                "CTE `{}` is declared more than once",
                cte.name
            )));
        }
        validate_query_part(&cte.query, metamodel)?;

        let arity = cte.query.arity();
        if !cte.columns.is_empty() && cte.columns.len() != arity {
            return Err(LoadPlanError::semantic(format!(
                "CTE `{}` declares {} column(s) but its query selects {}",
                cte.name,
                cte.columns.len(),
                arity
            )));
        }
    }
    validate_query_part(&statement.query, metamodel)
}

pub fn validate_query_part(part: &SqmQueryPart, metamodel: &Metamodel) -> LoadPlanResult<()> {
    match part {
        SqmQueryPart::Spec(spec) => validate_query_spec(spec, metamodel),
        SqmQueryPart::Group(group) => validate_query_group(group, metamodel),
    }
}

pub fn validate_query_spec(spec: &SqmQuerySpec, metamodel: &Metamodel) -> LoadPlanResult<()> {
    let mut scope = AliasScope::new(metamodel);
    validate_in_scope(spec, &mut scope)
}

fn validate_query_group(group: &SqmQueryGroup, metamodel: &Metamodel) -> LoadPlanResult<()> {
    if group.parts.len() < 2 {
        return Err(LoadPlanError::semantic(format!(
            "{} needs at least two query parts",
            group.operator
        )));
    }
    for part in &group.parts {
        validate_query_part(part, metamodel)?;
    }

    let first = first_spec(&group.parts[0])?;
    let first_kinds = selection_kinds(first, metamodel)?;
    let first_fetches = fetch_structure(first);
    for (index, part) in group.parts.iter().enumerate().skip(1) {
        let spec = first_spec(part)?;
        let kinds = selection_kinds(spec, metamodel)?;
        if kinds.len() != first_kinds.len() {
            return Err(LoadPlanError::semantic(format!(
                "all query parts of a {} must have the same arity: the first part selects {} item(s), part {} selects {}",
                group.operator,
                first_kinds.len(),
                index + 1,
                kinds.len()
            )));
        }
        for (position, (expected, actual)) in first_kinds.iter().zip(&kinds).enumerate() {
            if !expected.is_compatible_with(actual) {
                return Err(LoadPlanError::semantic(format!(
                    "select item {} of query part {} is a {} but the first part selects a {}",
                    position + 1,
                    index + 1,
                    actual,
                    expected
                )));
            }
        }
        if fetch_structure(spec) != first_fetches {
            return Err(LoadPlanError::semantic(format!(
                "all query parts of a {} must have the same join fetches",
                group.operator
            )));
        }
    }

    check_fetch_offset(&group.order_by, group.fetch_offset)
}

fn first_spec(part: &SqmQueryPart) -> LoadPlanResult<&SqmQuerySpec> {
    part.first_query_spec()
        .ok_or_else(|| LoadPlanError::semantic("query group without a query specification"))
}

fn validate_in_scope<'m>(spec: &SqmQuerySpec, scope: &mut AliasScope<'m>) -> LoadPlanResult<()> {
    scope.push_frame();
    let result = validate_frame(spec, scope);
    scope.pop_frame();
    result
}

fn validate_frame<'m>(spec: &SqmQuerySpec, scope: &mut AliasScope<'m>) -> LoadPlanResult<()> {
    if spec.roots.is_empty() {
        let correlated = spec.joins.iter().any(|join| scope.is_outer_alias(&join.path.alias));
        if !scope.is_sub_query() {
            return Err(LoadPlanError::semantic("query has no root"));
        }
        if !correlated {
            return Err(LoadPlanError::semantic(
                "sub-query has neither a root nor a correlated join",
            ));
        }
    }

    bind_spec(spec, scope)?;

    for selection in &spec.selections {
        validate_expression(&selection.expression, scope)?;
        if let SqmExpression::Path(path) = &selection.expression {
            if let ResolvedPart::Composite(composite) = scope.resolve_path(path)? {
                if composite.contains_collection() {
                    return Err(LoadPlanError::semantic(format!(
                        "embeddable `{}` contains a collection and cannot be selected",
                        path
                    )));
                }
            }
        }
    }
    check_fetch_owners(spec)?;

    if let Some(restriction) = &spec.restriction {
        validate_predicate(restriction, scope)?;
    }
    for expression in &spec.group_by {
        validate_expression(expression, scope)?;
    }
    if let Some(having) = &spec.having {
        validate_predicate(having, scope)?;
    }
    for sort in &spec.order_by {
        validate_expression(&sort.expression, scope)?;
    }
    check_fetch_offset(&spec.order_by, spec.fetch_offset)
}

/// Bind roots and joins of `spec` into the current frame
fn bind_spec<'m>(spec: &SqmQuerySpec, scope: &mut AliasScope<'m>) -> LoadPlanResult<()> {
    let metamodel = scope.metamodel;
    for root in &spec.roots {
        let entity = metamodel.entity(&root.entity)?;
        scope.bind(&root.alias, ResolvedPart::Entity(entity))?;
    }

    for join in &spec.joins {
        if join.path.is_alias_reference() {
            return Err(LoadPlanError::semantic(format!(
                "join path `{}` does not name an attribute",
                join.path
            )));
        }
        if join.fetch && scope.is_sub_query() {
            return Err(LoadPlanError::semantic(format!(
                "sub-queries cannot join fetch `{}`",
                join.path
            )));
        }
        let bound = match scope.resolve_path(&join.path)? {
            entity @ ResolvedPart::Entity(_) => entity,
            ResolvedPart::Collection(collection) => element_part(metamodel, collection)?,
            ResolvedPart::Any(_) => {
                return Err(LoadPlanError::semantic(format!(
                    "any-valued association `{}` cannot be joined",
                    join.path
                )))
            }
            ResolvedPart::Composite(_) | ResolvedPart::Basic { .. } => {
                return Err(LoadPlanError::semantic(format!(
                    "`{}` is not an association and cannot be joined",
                    join.path
                )))
            }
        };
        scope.bind(&join.alias, bound)?;
        if let Some(on) = &join.on {
            validate_predicate(on, scope)?;
        }
    }
    Ok(())
}

/// Fetched associations need their owner in the select list
fn check_fetch_owners(spec: &SqmQuerySpec) -> LoadPlanResult<()> {
    if spec.selections.is_empty() {
        return Ok(());
    }
    let selected: HashSet<&str> = spec
        .selections
        .iter()
        .filter_map(|selection| match &selection.expression {
            SqmExpression::Path(path) if path.is_alias_reference() => Some(path.alias.as_str()),
            _ => None,
        })
        .collect();

    for join in spec.fetch_joins() {
        let mut owner = join.path.alias.as_str();
        for _ in 0..spec.joins.len() {
            match spec.find_join(owner) {
                Some(parent) if parent.fetch => owner = parent.path.alias.as_str(),
                _ => break,
            }
        }
        if !selected.contains(owner) {
            return Err(LoadPlanError::semantic(format!(
                "query specified join fetching, but the owner of the fetched association `{}` was not present in the select list",
                join.path
            )));
        }
    }
    Ok(())
}

fn check_fetch_offset(order_by: &[SqmSortSpecification], fetch_offset: SqmFetchOffset) -> LoadPlanResult<()> {
    if fetch_offset.with_ties && order_by.is_empty() {
        return Err(LoadPlanError::semantic(
            "FETCH ... WITH TIES requires an ORDER BY clause",
        ));
    }
    Ok(())
}

fn validate_predicate<'m>(predicate: &SqmPredicate, scope: &mut AliasScope<'m>) -> LoadPlanResult<()> {
    match predicate {
        SqmPredicate::Comparison { lhs, rhs, .. } => {
            validate_expression(lhs, scope)?;
            validate_expression(rhs, scope)
        }
        SqmPredicate::Junction { predicates, .. } => predicates
            .iter()
            .try_for_each(|predicate| validate_predicate(predicate, scope)),
        SqmPredicate::Negated(inner) => validate_predicate(inner, scope),
        SqmPredicate::IsNull { expression, .. } => validate_expression(expression, scope),
        SqmPredicate::InList { expression, values, .. } => {
            validate_expression(expression, scope)?;
            values
                .iter()
                .try_for_each(|value| validate_expression(value, scope))
        }
        SqmPredicate::Exists { subquery, .. } => validate_in_scope(subquery, scope),
    }
}

fn validate_expression(expression: &SqmExpression, scope: &AliasScope<'_>) -> LoadPlanResult<()> {
    for path in expression.paths() {
        scope.resolve_path(path)?;
    }
    Ok(())
}

/// Kinds of the select list items of an already validated query
fn selection_kinds(spec: &SqmQuerySpec, metamodel: &Metamodel) -> LoadPlanResult<Vec<SelectionKind>> {
    if spec.selections.is_empty() {
        return spec
            .roots
            .iter()
            .map(|root| Ok(ResolvedPart::Entity(metamodel.entity(&root.entity)?).kind()))
            .collect();
    }

    let mut scope = AliasScope::new(metamodel);
    scope.push_frame();
    bind_spec(spec, &mut scope)?;
    spec.selections
        .iter()
        .map(|selection| match &selection.expression {
            SqmExpression::Path(path) => Ok(scope.resolve_path(path)?.kind()),
            _ => Ok(SelectionKind::Value),
        })
        .collect()
}

/// Join fetched paths with aliases replaced by the root entity names
fn fetch_structure(spec: &SqmQuerySpec) -> Vec<String> {
    fn owner_path(spec: &SqmQuerySpec, alias: &str, depth: usize) -> String {
        if let Some(root) = spec.find_root(alias) {
            return root.entity.clone();
        }
        match spec.find_join(alias) {
            Some(join) if depth < spec.joins.len() => format!(
                "{}.{}",
                owner_path(spec, &join.path.alias, depth + 1),
                join.path.attributes.join(".")
            ),
            _ => alias.to_string(),
        }
    }

    let mut fetches: Vec<String> = spec
        .fetch_joins()
        .map(|join| {
            format!(
                "{}.{}",
                owner_path(spec, &join.path.alias, 0),
                join.path.attributes.join(".")
            )
        })
        .collect();
    fetches.sort();
    fetches
}
