//! Resolution of select tree paths against the metamodel

use std::fmt;

use crate::error::{LoadPlanError, LoadPlanResult};
use crate::metamodel::{
    AttributeDefinition, AttributeKind, AssociationNature, CollectionDefinition,
    CollectionPartDefinition, CompositeDefinition, EntityDefinition, IdentifierDefinition,
    Metamodel,
};

use super::tree::SqmPath;

/// Type name reported for simple identifier attributes
pub const IDENTIFIER_TYPE: &str = "identifier";

/// Model part a path resolves to
#[derive(Debug, Clone, Copy)]
pub enum ResolvedPart<'m> {
    Entity(&'m EntityDefinition),
    Collection(&'m CollectionDefinition),
    Composite(&'m CompositeDefinition),
    Basic {
        type_name: &'m str,
        /// Table holding the columns; `None` is the owner's primary table
        table: Option<&'m str>,
        columns: &'m [String],
    },
    Any(&'m AttributeDefinition),
}

impl<'m> ResolvedPart<'m> {
    pub fn kind(&self) -> SelectionKind {
        match self {
            ResolvedPart::Entity(entity) => SelectionKind::Entity(entity.name.clone()),
            ResolvedPart::Collection(collection) => SelectionKind::Collection(collection.role.clone()),
            ResolvedPart::Composite(composite) => SelectionKind::Composite {
                type_name: composite.type_name.clone(),
                contains_collection: composite.contains_collection(),
            },
            ResolvedPart::Basic { type_name, .. } => SelectionKind::Basic(type_name.to_string()),
            ResolvedPart::Any(_) => SelectionKind::Basic("any".to_string()),
        }
    }

    pub fn as_entity(&self) -> Option<&'m EntityDefinition> {
        match self {
            ResolvedPart::Entity(entity) => Some(entity),
            _ => None,
        }
    }
}

/// Shape of one select list item, used to compare set-operator parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionKind {
    Entity(String),
    Collection(String),
    Composite {
        type_name: String,
        contains_collection: bool,
    },
    Basic(String),
    /// Literal, parameter or function result
    Value,
}

impl SelectionKind {
    /// Whether two items may occupy the same position of a query group
    pub fn is_compatible_with(&self, other: &SelectionKind) -> bool {
        match (self, other) {
            (SelectionKind::Value, SelectionKind::Basic(_) | SelectionKind::Value)
            | (SelectionKind::Basic(_), SelectionKind::Basic(_) | SelectionKind::Value) => true,
            (SelectionKind::Entity(a), SelectionKind::Entity(b)) => a == b,
            (SelectionKind::Collection(a), SelectionKind::Collection(b)) => a == b,
            (
                SelectionKind::Composite { type_name: a, .. },
                SelectionKind::Composite { type_name: b, .. },
            ) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for SelectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionKind::Entity(name) => write!(f, "entity {}", name),
            SelectionKind::Collection(role) => write!(f, "collection {}", role),
            SelectionKind::Composite { type_name, .. } => write!(f, "embeddable {}", type_name),
            SelectionKind::Basic(type_name) => write!(f, "basic {}", type_name),
            SelectionKind::Value => write!(f, "value"),
        }
    }
}

/// One step of attribute navigation
#[derive(Debug, Clone, Copy)]
pub struct ResolvedAttribute<'m> {
    /// `None` for identifier attributes, which are not listed as attributes
    pub attribute: Option<&'m AttributeDefinition>,
    pub part: ResolvedPart<'m>,
}

/// Resolve `name` beneath `owner`
pub fn resolve_attribute<'m>(
    metamodel: &'m Metamodel,
    owner: ResolvedPart<'m>,
    name: &str,
    path: &SqmPath,
) -> LoadPlanResult<ResolvedAttribute<'m>> {
    match owner {
        ResolvedPart::Entity(entity) => {
            if let Some(part) = identifier_part(entity, name) {
                return Ok(ResolvedAttribute { attribute: None, part });
            }
            let attribute = entity
                .find_attribute(name)
                .ok_or_else(|| LoadPlanError::UnknownAttribute {
                    owner: entity.name.clone(),
                    attribute: name.to_string(),
                })?;
            Ok(ResolvedAttribute {
                attribute: Some(attribute),
                part: attribute_part(metamodel, attribute)?,
            })
        }
        ResolvedPart::Composite(composite) => {
            let attribute = composite
                .attribute(name)
                .ok_or_else(|| LoadPlanError::UnknownAttribute {
                    owner: composite.type_name.clone(),
                    attribute: name.to_string(),
                })?;
            Ok(ResolvedAttribute {
                attribute: Some(attribute),
                part: attribute_part(metamodel, attribute)?,
            })
        }
        ResolvedPart::Collection(collection) => Err(LoadPlanError::semantic(format!(
            "cannot dereference plural attribute {} in `{}`; join it first",
            collection.role, path
        ))),
        ResolvedPart::Basic { .. } | ResolvedPart::Any(_) => Err(LoadPlanError::semantic(format!(
            "cannot dereference `{}` beyond a basic value",
            path
        ))),
    }
}

fn identifier_part<'m>(entity: &'m EntityDefinition, name: &str) -> Option<ResolvedPart<'m>> {
    match &entity.identifier {
        IdentifierDefinition::Simple { attribute, columns } if attribute == name => Some(ResolvedPart::Basic {
            type_name: IDENTIFIER_TYPE,
            table: None,
            columns,
        }),
        IdentifierDefinition::Encapsulated { attribute, composite } if attribute == name => {
            Some(ResolvedPart::Composite(composite))
        }
        _ => None,
    }
}

/// Part an attribute's values resolve to
pub fn attribute_part<'m>(
    metamodel: &'m Metamodel,
    attribute: &'m AttributeDefinition,
) -> LoadPlanResult<ResolvedPart<'m>> {
    Ok(match &attribute.kind {
        AttributeKind::Basic => ResolvedPart::Basic {
            type_name: &attribute.type_name,
            table: attribute.table.as_deref(),
            columns: &attribute.columns,
        },
        AttributeKind::Composite(composite) => ResolvedPart::Composite(composite),
        AttributeKind::Association(association) => match association.nature {
            AssociationNature::Entity => ResolvedPart::Entity(metamodel.entity(&association.target)?),
            AssociationNature::Collection => {
                ResolvedPart::Collection(metamodel.collection(&association.target)?)
            }
            AssociationNature::Any => ResolvedPart::Any(attribute),
        },
    })
}

/// Part a join alias of `collection` binds to
pub fn element_part<'m>(
    metamodel: &'m Metamodel,
    collection: &'m CollectionDefinition,
) -> LoadPlanResult<ResolvedPart<'m>> {
    Ok(match &collection.element {
        CollectionPartDefinition::Entity { entity, .. } => ResolvedPart::Entity(metamodel.entity(entity)?),
        CollectionPartDefinition::Composite(composite) => ResolvedPart::Composite(composite),
        CollectionPartDefinition::Basic { type_name, columns } => ResolvedPart::Basic {
            type_name,
            table: Some(collection.table.as_str()),
            columns,
        },
        CollectionPartDefinition::Any { columns } => ResolvedPart::Basic {
            type_name: "any",
            table: Some(collection.table.as_str()),
            columns,
        },
    })
}
