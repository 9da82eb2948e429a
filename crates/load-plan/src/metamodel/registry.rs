//! Metamodel registry - lookup of entities, collection roles and fetch profiles

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use super::definitions::{AssociationNature, AttributeDefinition, CollectionDefinition, EntityDefinition};
use crate::error::{LoadPlanError, LoadPlanResult};

/// Named set of associations that are join fetched while the profile is enabled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchProfile {
    pub name: String,
    /// `(entity name, association path relative to that entity)`
    pub fetches: BTreeSet<(String, String)>,
}

impl FetchProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fetches: BTreeSet::new(),
        }
    }

    pub fn with_fetch(mut self, entity: impl Into<String>, association_path: impl Into<String>) -> Self {
        self.fetches.insert((entity.into(), association_path.into()));
        self
    }

    pub fn has_fetch(&self, entity: &str, association_path: &str) -> bool {
        self.fetches
            .iter()
            .any(|(e, p)| e == entity && p == association_path)
    }
}

/// Read-only registry the walk resolves definitions from
#[derive(Debug, Clone, Default)]
pub struct Metamodel {
    entities: HashMap<String, EntityDefinition>,
    collections: HashMap<String, CollectionDefinition>,
    fetch_profiles: HashMap<String, FetchProfile>,
}

impl Metamodel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity definition
    pub fn register_entity(&mut self, entity: EntityDefinition) -> LoadPlanResult<()> {
        if entity.key_columns.is_empty() {
            return Err(LoadPlanError::semantic(format!(
                "Entity `{}` has no key columns",
                entity.name
            )));
        }

        let mut seen = BTreeSet::new();
        for attribute in &entity.attributes {
            if !seen.insert(attribute.name.as_str()) {
                return Err(LoadPlanError::semantic(format!(
                    "Entity `{}` declares attribute `{}` twice",
                    entity.name, attribute.name
                )));
            }
            if let Some(table) = &attribute.table {
                if !entity.owns_table(table) {
                    return Err(LoadPlanError::UnknownTableReference {
                        table_expression: table.clone(),
                        navigable_path: format!("{}.{}", entity.name, attribute.name),
                    });
                }
            }
        }

        self.entities.insert(entity.name.clone(), entity);
        Ok(())
    }

    /// Register a collection role
    pub fn register_collection(&mut self, collection: CollectionDefinition) -> LoadPlanResult<()> {
        if collection.key_columns.is_empty() {
            return Err(LoadPlanError::semantic(format!(
                "Collection `{}` has no key columns",
                collection.role
            )));
        }
        self.collections.insert(collection.role.clone(), collection);
        Ok(())
    }

    pub fn register_fetch_profile(&mut self, profile: FetchProfile) {
        self.fetch_profiles.insert(profile.name.clone(), profile);
    }

    pub fn with_entity(mut self, entity: EntityDefinition) -> LoadPlanResult<Self> {
        self.register_entity(entity)?;
        Ok(self)
    }

    pub fn with_collection(mut self, collection: CollectionDefinition) -> LoadPlanResult<Self> {
        self.register_collection(collection)?;
        Ok(self)
    }

    pub fn with_fetch_profile(mut self, profile: FetchProfile) -> Self {
        self.register_fetch_profile(profile);
        self
    }

    pub fn entity(&self, name: &str) -> LoadPlanResult<&EntityDefinition> {
        self.entities
            .get(name)
            .ok_or_else(|| LoadPlanError::UnknownEntity(name.to_string()))
    }

    pub fn collection(&self, role: &str) -> LoadPlanResult<&CollectionDefinition> {
        self.collections
            .get(role)
            .ok_or_else(|| LoadPlanError::UnknownCollection(role.to_string()))
    }

    pub fn fetch_profile(&self, name: &str) -> Option<&FetchProfile> {
        self.fetch_profiles.get(name)
    }

    pub fn contains_entity(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    /// Attribute of an entity, including composite identifier parts
    pub fn attribute(&self, entity: &str, attribute: &str) -> LoadPlanResult<&AttributeDefinition> {
        self.entity(entity)?
            .find_attribute(attribute)
            .ok_or_else(|| LoadPlanError::UnknownAttribute {
                owner: entity.to_string(),
                attribute: attribute.to_string(),
            })
    }

    /// Check that every association target and collection part resolves
    pub fn validate(&self) -> LoadPlanResult<()> {
        for entity in self.entities.values() {
            let identifier_attributes = entity
                .identifier
                .composite()
                .map(|c| c.attributes.as_slice())
                .unwrap_or(&[]);
            for attribute in entity.attributes.iter().chain(identifier_attributes) {
                self.validate_attribute(attribute)?;
            }
        }

        for collection in self.collections.values() {
            self.entity(&collection.owner)?;
            for part in collection.index.iter().chain(Some(&collection.element)) {
                if let Some(entity) = part.entity_name() {
                    self.entity(entity)?;
                }
            }
        }

        Ok(())
    }

    fn validate_attribute(&self, attribute: &AttributeDefinition) -> LoadPlanResult<()> {
        if let Some(composite) = attribute.composite_definition() {
            for nested in &composite.attributes {
                self.validate_attribute(nested)?;
            }
        }

        if let Some(association) = attribute.association() {
            match association.nature {
                AssociationNature::Entity => {
                    self.entity(&association.target)?;
                }
                AssociationNature::Collection => {
                    let collection = self.collection(&association.target)?;
                    if collection.identity_key() != association.association_key {
                        return Err(LoadPlanError::semantic(format!(
                            "Attribute `{}` key {} does not match collection `{}` key {}",
                            attribute.name,
                            association.association_key,
                            collection.role,
                            collection.identity_key()
                        )));
                    }
                }
                AssociationNature::Any => {}
            }
        }

        Ok(())
    }
}
