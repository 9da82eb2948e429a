use std::collections::HashSet;

use super::AssociationVisitationStrategy;
use crate::error::{LoadPlanError, LoadPlanResult};
use crate::metamodel::{
    AssociationDefinition, AssociationKey, AssociationNature, AttributeDefinition, AttributeKind,
    CollectionDefinition, CollectionPartDefinition, CompositeDefinition, EntityDefinition,
    IdentifierDefinition, Metamodel,
};

/// Drives an [`AssociationVisitationStrategy`] over the metamodel
///
/// Entities are walked identifier first, then attributes; collections index
/// first, then elements. Association keys are tracked so a repeated foreign
/// key is reported through `found_circular_association` instead of being
/// walked again.
pub struct MetamodelGraphWalker<'a, S: AssociationVisitationStrategy + ?Sized> {
    strategy: &'a mut S,
    metamodel: &'a Metamodel,
    visited_association_keys: HashSet<AssociationKey>,
    property_path: Vec<String>,
}

impl<'a, S: AssociationVisitationStrategy + ?Sized> MetamodelGraphWalker<'a, S> {
    fn new(strategy: &'a mut S, metamodel: &'a Metamodel) -> Self {
        Self {
            strategy,
            metamodel,
            visited_association_keys: HashSet::new(),
            property_path: Vec::new(),
        }
    }

    /// Walk the association graph rooted at an entity
    pub fn visit_entity(strategy: &'a mut S, metamodel: &'a Metamodel, entity_name: &str) -> LoadPlanResult<()> {
        let entity = metamodel.entity(entity_name)?;
        strategy.start()?;
        let mut walker = Self::new(strategy, metamodel);
        walker.property_path.push(entity.name.clone());
        let result = walker.visit_entity_definition(entity);
        let finished = walker.strategy.finish();
        result.and(finished)
    }

    /// Walk the association graph rooted at a collection role
    pub fn visit_collection(strategy: &'a mut S, metamodel: &'a Metamodel, role: &str) -> LoadPlanResult<()> {
        let collection = metamodel.collection(role)?;
        strategy.start()?;
        let mut walker = Self::new(strategy, metamodel);
        walker.property_path.push(collection.role.clone());
        let result = walker.visit_collection_definition(collection);
        let finished = walker.strategy.finish();
        result.and(finished)
    }

    fn visit_entity_definition(&mut self, entity: &'a EntityDefinition) -> LoadPlanResult<()> {
        self.strategy.starting_entity(entity)?;
        self.visit_identifier_definition(entity)?;
        self.visit_attributes(&entity.attributes)?;
        self.strategy.finishing_entity(entity)
    }

    fn visit_identifier_definition(&mut self, entity: &'a EntityDefinition) -> LoadPlanResult<()> {
        self.strategy
            .starting_entity_identifier(entity, &entity.identifier)?;
        match &entity.identifier {
            IdentifierDefinition::Simple { .. } => {}
            IdentifierDefinition::Encapsulated { composite, .. }
            | IdentifierDefinition::NonEncapsulated(composite) => {
                self.visit_composite_definition(composite)?;
            }
        }
        self.strategy
            .finishing_entity_identifier(entity, &entity.identifier)
    }

    fn visit_attributes(&mut self, attributes: &'a [AttributeDefinition]) -> LoadPlanResult<()> {
        for attribute in attributes {
            self.visit_attribute_definition(attribute)?;
        }
        Ok(())
    }

    fn visit_attribute_definition(&mut self, attribute: &'a AttributeDefinition) -> LoadPlanResult<()> {
        self.property_path.push(attribute.name.clone());
        tracing::trace!("Visiting attribute path : {}", self.property_path.join("."));

        if let Some(association) = attribute.association() {
            if self.is_duplicate_association_key(&association.association_key) {
                tracing::trace!(
                    "Property path deemed to be circular : {}",
                    self.property_path.join(".")
                );
                self.strategy.found_circular_association(attribute)?;
                self.property_path.pop();
                return Ok(());
            }
        }

        let continue_walk = self.strategy.starting_attribute(attribute)?;
        if continue_walk {
            match &attribute.kind {
                AttributeKind::Basic => {}
                AttributeKind::Composite(composite) => self.visit_composite_definition(composite)?,
                AttributeKind::Association(association) => {
                    self.visit_association(attribute, association)?
                }
            }
        }
        self.strategy.finishing_attribute(attribute)?;
        self.property_path.pop();
        Ok(())
    }

    fn visit_association(
        &mut self,
        attribute: &'a AttributeDefinition,
        association: &'a AssociationDefinition,
    ) -> LoadPlanResult<()> {
        self.add_association_key(&association.association_key)?;

        match association.nature {
            AssociationNature::Any => self.strategy.found_any(Some(attribute)),
            AssociationNature::Entity => {
                let entity = self.metamodel.entity(&association.target)?;
                self.visit_entity_definition(entity)
            }
            AssociationNature::Collection => {
                let collection = self.metamodel.collection(&association.target)?;
                self.visit_collection_definition(collection)
            }
        }
    }

    fn visit_composite_definition(&mut self, composite: &'a CompositeDefinition) -> LoadPlanResult<()> {
        self.strategy.starting_composite(composite)?;
        self.visit_attributes(&composite.attributes)?;
        self.strategy.finishing_composite(composite)
    }

    fn visit_collection_definition(&mut self, collection: &'a CollectionDefinition) -> LoadPlanResult<()> {
        self.strategy.starting_collection(collection)?;
        self.visit_collection_index(collection)?;
        self.visit_collection_elements(collection)?;
        self.strategy.finishing_collection(collection)
    }

    fn visit_collection_index(&mut self, collection: &'a CollectionDefinition) -> LoadPlanResult<()> {
        let Some(index) = &collection.index else {
            return Ok(());
        };

        self.strategy.starting_collection_index(collection, index)?;
        match index {
            CollectionPartDefinition::Basic { .. } => {}
            CollectionPartDefinition::Any { .. } => self.strategy.found_any(None)?,
            CollectionPartDefinition::Composite(composite) => self.visit_composite_definition(composite)?,
            CollectionPartDefinition::Entity { entity, .. } => {
                let entity = self.metamodel.entity(entity)?;
                self.visit_entity_definition(entity)?;
            }
        }
        self.strategy.finishing_collection_index(collection, index)
    }

    fn visit_collection_elements(&mut self, collection: &'a CollectionDefinition) -> LoadPlanResult<()> {
        let element = &collection.element;
        self.strategy.starting_collection_elements(collection, element)?;
        match element {
            CollectionPartDefinition::Basic { .. } => {}
            CollectionPartDefinition::Any { .. } => self.strategy.found_any(None)?,
            CollectionPartDefinition::Composite(composite) => self.visit_composite_definition(composite)?,
            CollectionPartDefinition::Entity { entity, .. } => {
                if !collection.one_to_many {
                    self.add_association_key(&collection.element_key())?;
                }
                let entity = self.metamodel.entity(entity)?;
                self.visit_entity_definition(entity)?;
            }
        }
        self.strategy.finishing_collection_elements(collection, element)
    }

    fn add_association_key(&mut self, key: &AssociationKey) -> LoadPlanResult<()> {
        if !self.visited_association_keys.insert(key.clone()) {
            return Err(LoadPlanError::walking(format!(
                "Association has already been visited: {}",
                key
            )));
        }
        self.strategy.association_key_registered(key);
        Ok(())
    }

    fn is_duplicate_association_key(&self, key: &AssociationKey) -> bool {
        self.visited_association_keys.contains(key) || self.strategy.is_duplicate_association_key(key)
    }
}
