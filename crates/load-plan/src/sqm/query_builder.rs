//! Load plans for select statements
//!
//! The statement's own joins go into the query spaces first. `join fetch`
//! joins are handed to the fetch policy as join fetch paths, so the walk
//! picks up the joined groups instead of adding its own.

use crate::error::LoadPlanResult;
use crate::fetch::LoadQueryInfluencers;
use crate::metamodel::Metamodel;
use crate::plan::LoadPlan;
use crate::sql_ast::{Expression, Predicate};
use crate::strategy::{EntityGraphPolicy, FetchStylePolicy, LoadPlanBuilder, LoadPlanBuildingPolicy};
use crate::walk::MetamodelGraphWalker;

use super::interpretation::{InterpretedQuery, SortSpecification, SqmInterpreter};
use super::tree::{SqmFetchOffset, SqmSelectStatement};
use super::validation::validate_statement;

/// Load plan of a query plus the clauses the plan does not carry
#[derive(Debug)]
pub struct QueryLoadPlan {
    pub plan: LoadPlan,
    pub restriction: Option<Predicate>,
    pub group_by: Vec<Expression>,
    pub having: Option<Predicate>,
    pub order_by: Vec<SortSpecification>,
    pub fetch_offset: SqmFetchOffset,
    pub distinct: bool,
}

/// Builds load plans for select statements against one metamodel
#[derive(Debug, Clone, Copy)]
pub struct QueryLoadPlanBuilder<'m> {
    metamodel: &'m Metamodel,
    influencers: &'m LoadQueryInfluencers,
}

impl<'m> QueryLoadPlanBuilder<'m> {
    pub fn new(metamodel: &'m Metamodel, influencers: &'m LoadQueryInfluencers) -> Self {
        Self {
            metamodel,
            influencers,
        }
    }

    /// Validate, interpret and walk the statement's root entity
    ///
    /// An effective entity graph takes over the fetch decisions; otherwise
    /// the mapped fetch styles apply.
    pub fn build(&self, statement: &SqmSelectStatement) -> LoadPlanResult<QueryLoadPlan> {
        validate_statement(statement, self.metamodel)?;
        let interpreted =
            SqmInterpreter::new(self.metamodel, self.influencers.alias_stem_length).interpret(statement)?;

        let influencers = interpreted
            .join_fetch_paths
            .iter()
            .cloned()
            .fold(self.influencers.clone(), LoadQueryInfluencers::with_join_fetch_path);

        match EntityGraphPolicy::from_influencers(&influencers) {
            Some(policy) => self.build_with_policy(&influencers, policy, interpreted),
            None => self.build_with_policy(&influencers, FetchStylePolicy::new(), interpreted),
        }
    }

    fn build_with_policy<P: LoadPlanBuildingPolicy>(
        &self,
        influencers: &LoadQueryInfluencers,
        policy: P,
        interpreted: InterpretedQuery,
    ) -> LoadPlanResult<QueryLoadPlan> {
        let InterpretedQuery {
            query_spaces,
            root,
            root_entity,
            root_path,
            root_alias,
            scalar_returns,
            restriction,
            group_by,
            having,
            order_by,
            fetch_offset,
            distinct,
            ..
        } = interpreted;

        let mut builder = LoadPlanBuilder::new(self.metamodel, influencers, policy)
            .with_query_spaces(query_spaces)
            .with_root_table_group(root)
            .with_root_path(root_path)
            .with_root_alias(root_alias);
        MetamodelGraphWalker::visit_entity(&mut builder, self.metamodel, &root_entity)?;
        let plan = builder.build_with_scalar_returns(scalar_returns)?;

        tracing::debug!(
            "Built query load plan for {} ({:?})",
            root_entity,
            plan.disposition()
        );
        Ok(QueryLoadPlan {
            plan,
            restriction,
            group_by,
            having,
            order_by,
            fetch_offset,
            distinct,
        })
    }
}
