//! Entity, attribute, association and collection definitions

use serde::{Deserialize, Serialize};

use super::AssociationKey;
use crate::fetch::{CascadeStyle, FetchStyle};

/// The nature of an association attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssociationNature {
    /// To-one association targeting an entity
    Entity,
    /// Plural association backed by a collection role
    Collection,
    /// Polymorphic association whose target table is not statically known
    Any,
}

/// Mapped fetch settings of an association
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchMapping {
    pub style: FetchStyle,
    pub lazy: bool,
    pub batch_size: Option<usize>,
}

impl FetchMapping {
    /// Eagerly joined association
    pub fn join() -> Self {
        Self {
            style: FetchStyle::Join,
            lazy: false,
            batch_size: None,
        }
    }

    /// Eagerly loaded through a subsequent select
    pub fn select() -> Self {
        Self {
            style: FetchStyle::Select,
            lazy: false,
            batch_size: None,
        }
    }

    /// Lazily loaded through a subsequent select
    pub fn lazy() -> Self {
        Self {
            style: FetchStyle::Select,
            lazy: true,
            batch_size: None,
        }
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }
}

impl Default for FetchMapping {
    fn default() -> Self {
        Self::select()
    }
}

/// Association metadata of an attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssociationDefinition {
    pub nature: AssociationNature,

    /// Target entity name, or collection role for plural associations
    pub target: String,

    /// Foreign key signature used for circularity detection
    pub association_key: AssociationKey,

    /// Columns on the owning side of the join
    pub join_columns: Vec<String>,

    /// Columns on the target side; empty means the target's key columns
    pub target_columns: Vec<String>,

    pub fetch: FetchMapping,
    pub cascade: CascadeStyle,

    /// Whether the association may be null
    pub optional: bool,

    /// Owning attribute on the target for the inverse side of a pair
    pub mapped_by: Option<String>,
}

impl AssociationDefinition {
    pub fn new(nature: AssociationNature, target: impl Into<String>, key: AssociationKey) -> Self {
        let join_columns = key.columns.clone();
        Self {
            nature,
            target: target.into(),
            association_key: key,
            join_columns,
            target_columns: Vec::new(),
            fetch: FetchMapping::default(),
            cascade: CascadeStyle::none(),
            optional: true,
            mapped_by: None,
        }
    }

    pub fn with_fetch(mut self, fetch: FetchMapping) -> Self {
        self.fetch = fetch;
        self
    }

    pub fn with_cascade(mut self, cascade: CascadeStyle) -> Self {
        self.cascade = cascade;
        self
    }

    pub fn with_join_columns<S: Into<String>>(mut self, columns: Vec<S>) -> Self {
        self.join_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_target_columns<S: Into<String>>(mut self, columns: Vec<S>) -> Self {
        self.target_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    pub fn with_mapped_by(mut self, attribute: impl Into<String>) -> Self {
        self.mapped_by = Some(attribute.into());
        self
    }

    pub fn is_collection(&self) -> bool {
        self.nature == AssociationNature::Collection
    }
}

/// Attribute classification driving the walk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeKind {
    Basic,
    Composite(CompositeDefinition),
    Association(AssociationDefinition),
}

/// A persistent attribute of an entity or composite
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDefinition {
    pub name: String,

    /// Type name used for polymorphic sub-graph lookup
    pub type_name: String,

    /// Table holding the columns; `None` means the owner's primary table
    pub table: Option<String>,

    pub columns: Vec<String>,
    pub nullable: bool,

    /// Lazily loaded basic attribute
    pub lazy: bool,

    pub kind: AttributeKind,
}

impl AttributeDefinition {
    /// Basic single-column attribute
    pub fn basic(name: impl Into<String>, type_name: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            table: None,
            columns: vec![column.into()],
            nullable: true,
            lazy: false,
            kind: AttributeKind::Basic,
        }
    }

    /// Embedded composite attribute
    pub fn composite(name: impl Into<String>, composite: CompositeDefinition) -> Self {
        let columns = composite.columns();
        Self {
            name: name.into(),
            type_name: composite.type_name.clone(),
            table: None,
            columns,
            nullable: true,
            lazy: false,
            kind: AttributeKind::Composite(composite),
        }
    }

    /// Many-to-one association through foreign key columns on `owner_table`
    pub fn many_to_one<S: Into<String>>(
        name: impl Into<String>,
        target: impl Into<String>,
        owner_table: impl Into<String>,
        fk_columns: Vec<S>,
    ) -> Self {
        let target = target.into();
        let key = AssociationKey::new(owner_table, fk_columns);
        let columns = key.columns.clone();
        Self {
            name: name.into(),
            type_name: target.clone(),
            table: None,
            columns,
            nullable: true,
            lazy: false,
            kind: AttributeKind::Association(AssociationDefinition::new(
                AssociationNature::Entity,
                target,
                key,
            )),
        }
    }

    /// Inverse one-to-one whose foreign key lives on the target table
    pub fn one_to_one_inverse<S: Into<String>>(
        name: impl Into<String>,
        target: impl Into<String>,
        target_table: impl Into<String>,
        target_fk_columns: Vec<S>,
        owner_key_columns: Vec<S>,
        mapped_by: impl Into<String>,
    ) -> Self {
        let target = target.into();
        let key = AssociationKey::new(target_table, target_fk_columns);
        let target_columns = key.columns.clone();
        let association = AssociationDefinition::new(AssociationNature::Entity, target.clone(), key)
            .with_join_columns(owner_key_columns)
            .with_target_columns(target_columns)
            .with_mapped_by(mapped_by);
        Self {
            name: name.into(),
            type_name: target,
            table: None,
            columns: Vec::new(),
            nullable: true,
            lazy: false,
            kind: AttributeKind::Association(association),
        }
    }

    /// Plural attribute backed by the collection `role`
    ///
    /// `collection_table` and `key_columns` must match the collection
    /// definition, since together they form the association key.
    pub fn collection<S: Into<String>>(
        name: impl Into<String>,
        role: impl Into<String>,
        element_type: impl Into<String>,
        collection_table: impl Into<String>,
        key_columns: Vec<S>,
    ) -> Self {
        let key = AssociationKey::new(collection_table, key_columns);
        let association = AssociationDefinition::new(AssociationNature::Collection, role, key)
            .with_fetch(FetchMapping::lazy());
        Self {
            name: name.into(),
            type_name: element_type.into(),
            table: None,
            columns: Vec::new(),
            nullable: true,
            lazy: false,
            kind: AttributeKind::Association(association),
        }
    }

    /// Polymorphic any-valued association (discriminator plus id columns)
    pub fn any(
        name: impl Into<String>,
        owner_table: impl Into<String>,
        discriminator_column: impl Into<String>,
        id_column: impl Into<String>,
    ) -> Self {
        let key = AssociationKey::new(
            owner_table,
            vec![discriminator_column.into(), id_column.into()],
        );
        let columns = key.columns.clone();
        Self {
            name: name.into(),
            type_name: "any".to_string(),
            table: None,
            columns,
            nullable: true,
            lazy: false,
            kind: AttributeKind::Association(AssociationDefinition::new(
                AssociationNature::Any,
                String::new(),
                key,
            )),
        }
    }

    /// Place the attribute's columns in a secondary table
    pub fn in_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn with_lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    pub fn with_type_name(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = type_name.into();
        self
    }

    /// Adjust the association part in place; no effect on other kinds
    pub fn map_association<F>(mut self, f: F) -> Self
    where
        F: FnOnce(AssociationDefinition) -> AssociationDefinition,
    {
        if let AttributeKind::Association(association) = self.kind {
            self.kind = AttributeKind::Association(f(association));
        }
        self
    }

    pub fn with_fetch(self, fetch: FetchMapping) -> Self {
        self.map_association(|a| a.with_fetch(fetch))
    }

    pub fn with_cascade(self, cascade: CascadeStyle) -> Self {
        self.map_association(|a| a.with_cascade(cascade))
    }

    pub fn association(&self) -> Option<&AssociationDefinition> {
        match &self.kind {
            AttributeKind::Association(association) => Some(association),
            _ => None,
        }
    }

    pub fn composite_definition(&self) -> Option<&CompositeDefinition> {
        match &self.kind {
            AttributeKind::Composite(composite) => Some(composite),
            _ => None,
        }
    }

    pub fn is_basic(&self) -> bool {
        matches!(self.kind, AttributeKind::Basic)
    }

    /// Whether a value of this attribute may transitively hold a collection
    pub fn contains_collection(&self) -> bool {
        match &self.kind {
            AttributeKind::Basic => false,
            AttributeKind::Association(association) => association.is_collection(),
            AttributeKind::Composite(composite) => composite.contains_collection(),
        }
    }
}

/// Embeddable type definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeDefinition {
    pub type_name: String,
    pub attributes: Vec<AttributeDefinition>,
}

impl CompositeDefinition {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            attributes: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, attribute: AttributeDefinition) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeDefinition> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// All columns of the composite, in attribute order
    pub fn columns(&self) -> Vec<String> {
        self.attributes
            .iter()
            .flat_map(|a| a.columns.iter().cloned())
            .collect()
    }

    pub fn contains_collection(&self) -> bool {
        self.attributes.iter().any(AttributeDefinition::contains_collection)
    }
}

/// How an entity identifies its rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IdentifierDefinition {
    /// Single basic identifier attribute
    Simple { attribute: String, columns: Vec<String> },
    /// Identifier held by one embedded-id attribute
    Encapsulated {
        attribute: String,
        composite: CompositeDefinition,
    },
    /// Identifier spread over several attributes of the entity itself
    NonEncapsulated(CompositeDefinition),
}

impl IdentifierDefinition {
    pub fn simple(attribute: impl Into<String>, column: impl Into<String>) -> Self {
        Self::Simple {
            attribute: attribute.into(),
            columns: vec![column.into()],
        }
    }

    pub fn columns(&self) -> Vec<String> {
        match self {
            Self::Simple { columns, .. } => columns.clone(),
            Self::Encapsulated { composite, .. } | Self::NonEncapsulated(composite) => {
                composite.columns()
            }
        }
    }

    /// The composite walked under the identifier, if any
    pub fn composite(&self) -> Option<&CompositeDefinition> {
        match self {
            Self::Simple { .. } => None,
            Self::Encapsulated { composite, .. } | Self::NonEncapsulated(composite) => {
                Some(composite)
            }
        }
    }

    /// Name of the attribute holding the identifier value, if any
    pub fn attribute_name(&self) -> Option<&str> {
        match self {
            Self::Simple { attribute, .. } | Self::Encapsulated { attribute, .. } => {
                Some(attribute)
            }
            Self::NonEncapsulated(_) => None,
        }
    }
}

/// Secondary table of an entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecondaryTable {
    pub table: String,
    /// Columns of the secondary table referencing the primary key
    pub key_columns: Vec<String>,
    /// Optional tables are outer joined and only when referenced
    pub optional: bool,
}

/// Persistent entity definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDefinition {
    pub name: String,
    pub table: String,
    pub key_columns: Vec<String>,
    pub identifier: IdentifierDefinition,
    pub secondary_tables: Vec<SecondaryTable>,
    pub attributes: Vec<AttributeDefinition>,

    /// Concrete subclass tables for table-per-class (union) inheritance
    pub union_subclass_tables: Vec<String>,
}

impl EntityDefinition {
    /// Entity with a simple `id` identifier column
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            key_columns: vec!["id".to_string()],
            identifier: IdentifierDefinition::simple("id", "id"),
            secondary_tables: Vec::new(),
            attributes: Vec::new(),
            union_subclass_tables: Vec::new(),
        }
    }

    /// Replace the identifier; key columns follow the identifier columns
    pub fn with_identifier(mut self, identifier: IdentifierDefinition) -> Self {
        self.key_columns = identifier.columns();
        self.identifier = identifier;
        self
    }

    pub fn with_attribute(mut self, attribute: AttributeDefinition) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn with_secondary_table<S: Into<String>>(
        mut self,
        table: impl Into<String>,
        key_columns: Vec<S>,
        optional: bool,
    ) -> Self {
        self.secondary_tables.push(SecondaryTable {
            table: table.into(),
            key_columns: key_columns.into_iter().map(Into::into).collect(),
            optional,
        });
        self
    }

    pub fn with_union_subclasses<S: Into<String>>(mut self, tables: Vec<S>) -> Self {
        self.union_subclass_tables = tables.into_iter().map(Into::into).collect();
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeDefinition> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Attribute lookup that also searches composite identifier parts
    pub fn find_attribute(&self, name: &str) -> Option<&AttributeDefinition> {
        self.attribute(name)
            .or_else(|| self.identifier.composite().and_then(|c| c.attribute(name)))
    }

    /// The key registered for this entity when it is the root of a walk
    pub fn identity_key(&self) -> AssociationKey {
        AssociationKey::new(self.table.clone(), self.key_columns.clone())
    }

    pub fn secondary_table(&self, table: &str) -> Option<&SecondaryTable> {
        self.secondary_tables.iter().find(|t| t.table == table)
    }

    /// Whether `table` is one of the tables backing this entity
    pub fn owns_table(&self, table: &str) -> bool {
        self.table == table
            || self.secondary_table(table).is_some()
            || self.union_subclass_tables.iter().any(|t| t == table)
    }
}

/// Index or element part of a collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CollectionPartDefinition {
    Basic { type_name: String, columns: Vec<String> },
    Composite(CompositeDefinition),
    Entity { entity: String, columns: Vec<String> },
    Any { columns: Vec<String> },
}

impl CollectionPartDefinition {
    pub fn basic(type_name: impl Into<String>, column: impl Into<String>) -> Self {
        Self::Basic {
            type_name: type_name.into(),
            columns: vec![column.into()],
        }
    }

    pub fn entity<S: Into<String>>(entity: impl Into<String>, columns: Vec<S>) -> Self {
        Self::Entity {
            entity: entity.into(),
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn type_name(&self) -> &str {
        match self {
            Self::Basic { type_name, .. } => type_name,
            Self::Composite(composite) => &composite.type_name,
            Self::Entity { entity, .. } => entity,
            Self::Any { .. } => "any",
        }
    }

    pub fn columns(&self) -> Vec<String> {
        match self {
            Self::Basic { columns, .. } | Self::Entity { columns, .. } | Self::Any { columns } => {
                columns.clone()
            }
            Self::Composite(composite) => composite.columns(),
        }
    }

    /// Parts that become fetch sources during the walk
    pub fn is_expanding(&self) -> bool {
        matches!(self, Self::Composite(_) | Self::Entity { .. })
    }

    pub fn entity_name(&self) -> Option<&str> {
        match self {
            Self::Entity { entity, .. } => Some(entity),
            _ => None,
        }
    }
}

/// Collection role definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionDefinition {
    /// Role name, conventionally `Owner.attribute`
    pub role: String,
    pub owner: String,

    /// Collection table; the element entity table for one-to-many
    pub table: String,

    /// Columns of `table` referencing the owner key
    pub key_columns: Vec<String>,

    pub one_to_many: bool,
    pub index: Option<CollectionPartDefinition>,
    pub element: CollectionPartDefinition,
}

impl CollectionDefinition {
    /// One-to-many collection of `element_entity` stored in its own table
    pub fn one_to_many<S: Into<String>>(
        role: impl Into<String>,
        owner: impl Into<String>,
        element_entity: impl Into<String>,
        element_table: impl Into<String>,
        key_columns: Vec<S>,
    ) -> Self {
        Self {
            role: role.into(),
            owner: owner.into(),
            table: element_table.into(),
            key_columns: key_columns.into_iter().map(Into::into).collect(),
            one_to_many: true,
            index: None,
            element: CollectionPartDefinition::entity(element_entity, vec!["id"]),
        }
    }

    /// Collection stored in a dedicated collection table
    pub fn with_table<S: Into<String>>(
        role: impl Into<String>,
        owner: impl Into<String>,
        table: impl Into<String>,
        key_columns: Vec<S>,
        element: CollectionPartDefinition,
    ) -> Self {
        Self {
            role: role.into(),
            owner: owner.into(),
            table: table.into(),
            key_columns: key_columns.into_iter().map(Into::into).collect(),
            one_to_many: false,
            index: None,
            element,
        }
    }

    pub fn with_index(mut self, index: CollectionPartDefinition) -> Self {
        self.index = Some(index);
        self
    }

    /// Key registered for the collection itself
    pub fn identity_key(&self) -> AssociationKey {
        AssociationKey::new(self.table.clone(), self.key_columns.clone())
    }

    /// Key of the many-to-many element foreign key
    pub fn element_key(&self) -> AssociationKey {
        AssociationKey::new(self.table.clone(), self.element.columns())
    }

    pub fn is_many_to_many(&self) -> bool {
        !self.one_to_many && self.element.entity_name().is_some()
    }

    /// Unqualified attribute part of the role
    pub fn role_attribute(&self) -> &str {
        self.role.rsplit('.').next().unwrap_or(&self.role)
    }
}
