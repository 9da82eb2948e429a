//! Depth-first walk of the metamodel association graph
//!
//! The [`MetamodelGraphWalker`] decides traversal order; an
//! [`AssociationVisitationStrategy`] reacts to matching `starting_*` /
//! `finishing_*` callbacks and decides how deep the walk goes.

pub mod walker;

pub use walker::MetamodelGraphWalker;

use crate::error::LoadPlanResult;
use crate::metamodel::{
    AssociationKey, AttributeDefinition, CollectionDefinition, CollectionPartDefinition,
    CompositeDefinition, EntityDefinition, IdentifierDefinition,
};

/// Callbacks driven by the metamodel walker
///
/// Every `starting_*` call is followed by exactly one matching `finishing_*`
/// call unless an error aborts the walk. `finish` is called even then.
pub trait AssociationVisitationStrategy {
    fn start(&mut self) -> LoadPlanResult<()>;
    fn finish(&mut self) -> LoadPlanResult<()>;

    fn starting_entity(&mut self, entity: &EntityDefinition) -> LoadPlanResult<()>;
    fn finishing_entity(&mut self, entity: &EntityDefinition) -> LoadPlanResult<()>;

    fn starting_entity_identifier(
        &mut self,
        entity: &EntityDefinition,
        identifier: &IdentifierDefinition,
    ) -> LoadPlanResult<()>;
    fn finishing_entity_identifier(
        &mut self,
        entity: &EntityDefinition,
        identifier: &IdentifierDefinition,
    ) -> LoadPlanResult<()>;

    fn starting_collection(&mut self, collection: &CollectionDefinition) -> LoadPlanResult<()>;
    fn finishing_collection(&mut self, collection: &CollectionDefinition) -> LoadPlanResult<()>;

    fn starting_collection_index(
        &mut self,
        collection: &CollectionDefinition,
        index: &CollectionPartDefinition,
    ) -> LoadPlanResult<()>;
    fn finishing_collection_index(
        &mut self,
        collection: &CollectionDefinition,
        index: &CollectionPartDefinition,
    ) -> LoadPlanResult<()>;

    fn starting_collection_elements(
        &mut self,
        collection: &CollectionDefinition,
        element: &CollectionPartDefinition,
    ) -> LoadPlanResult<()>;
    fn finishing_collection_elements(
        &mut self,
        collection: &CollectionDefinition,
        element: &CollectionPartDefinition,
    ) -> LoadPlanResult<()>;

    fn starting_composite(&mut self, composite: &CompositeDefinition) -> LoadPlanResult<()>;
    fn finishing_composite(&mut self, composite: &CompositeDefinition) -> LoadPlanResult<()>;

    /// Returns whether the walk should descend into the attribute
    fn starting_attribute(&mut self, attribute: &AttributeDefinition) -> LoadPlanResult<bool>;
    fn finishing_attribute(&mut self, attribute: &AttributeDefinition) -> LoadPlanResult<()>;

    /// An any-valued attribute or collection part was reached
    fn found_any(&mut self, _attribute: Option<&AttributeDefinition>) -> LoadPlanResult<()> {
        Ok(())
    }

    /// The walk is about to revisit an already registered association key
    fn found_circular_association(&mut self, attribute: &AttributeDefinition) -> LoadPlanResult<()>;

    fn is_duplicate_association_key(&self, key: &AssociationKey) -> bool;
    fn association_key_registered(&mut self, key: &AssociationKey);
}
