//! Load plan building strategies
//!
//! [`LoadPlanBuilder`] reacts to the metamodel walk and assembles the plan;
//! a [`LoadPlanBuildingPolicy`] decides how each association is fetched.
//! Three policies are provided: the mapped fetch style, cascade style and
//! entity graph overlays.

pub mod builder;
pub mod cascade_style;
pub mod entity_graph;
pub mod fetch_plan;
pub mod fetch_style;

pub use builder::{build_collection_load_plan, build_entity_load_plan, LoadPlanBuilder};
pub use cascade_style::CascadeStylePolicy;
pub use entity_graph::EntityGraphPolicy;
pub use fetch_plan::determine_fetch_plan;
pub use fetch_style::FetchStylePolicy;

use crate::error::LoadPlanResult;
use crate::fetch::{FetchStrategy, LoadQueryInfluencers};
use crate::metamodel::{
    AssociationDefinition, AttributeDefinition, CollectionDefinition, CollectionPartDefinition,
    Metamodel,
};
use crate::navigable_path::NavigablePath;

/// Everything a policy may look at when deciding one association
#[derive(Debug, Clone, Copy)]
pub struct FetchDecision<'a> {
    pub attribute: &'a AttributeDefinition,
    pub association: &'a AssociationDefinition,

    /// Entity owning the attribute, if the fetch source resolves to one
    pub owner_entity: Option<&'a str>,

    /// Attribute path relative to the owning entity, as fetch profiles name it
    pub owner_path: &'a str,

    pub navigable_path: &'a NavigablePath,
    pub influencers: &'a LoadQueryInfluencers,
    pub metamodel: &'a Metamodel,

    /// The association is being revisited through an already registered key
    pub circular: bool,
}

/// Pluggable fetch policy of a [`LoadPlanBuilder`]
///
/// The builder downgrades JOIN decisions for lock mode, depth and collection
/// limits after the policy has answered, whatever the policy.
pub trait LoadPlanBuildingPolicy {
    fn determine_fetch_strategy(&mut self, decision: &FetchDecision<'_>) -> LoadPlanResult<FetchStrategy>;

    fn supports_root_entity_returns(&self) -> bool {
        true
    }

    fn supports_root_collection_returns(&self) -> bool {
        true
    }

    /// Whether a circular collection association may still be join fetched
    fn join_fetch_circular_collection(&self, _attribute: &AttributeDefinition) -> bool {
        false
    }

    fn on_start(&mut self) -> LoadPlanResult<()> {
        Ok(())
    }

    fn on_finish(&mut self) -> LoadPlanResult<()> {
        Ok(())
    }

    fn on_starting_attribute(&mut self, _attribute: &AttributeDefinition) -> LoadPlanResult<()> {
        Ok(())
    }

    fn on_finishing_attribute(&mut self, _attribute: &AttributeDefinition) -> LoadPlanResult<()> {
        Ok(())
    }

    fn on_starting_collection_index(
        &mut self,
        _collection: &CollectionDefinition,
        _index: &CollectionPartDefinition,
    ) -> LoadPlanResult<()> {
        Ok(())
    }

    fn on_finishing_collection_index(
        &mut self,
        _collection: &CollectionDefinition,
        _index: &CollectionPartDefinition,
    ) -> LoadPlanResult<()> {
        Ok(())
    }

    fn on_starting_collection_elements(
        &mut self,
        _collection: &CollectionDefinition,
        _element: &CollectionPartDefinition,
    ) -> LoadPlanResult<()> {
        Ok(())
    }

    fn on_finishing_collection_elements(
        &mut self,
        _collection: &CollectionDefinition,
        _element: &CollectionPartDefinition,
    ) -> LoadPlanResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests;
