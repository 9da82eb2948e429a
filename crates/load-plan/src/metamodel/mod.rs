//! Metamodel definitions consumed by the association walk
//!
//! The metamodel itself is owned by the mapping layer; this module only
//! describes the shapes the load plan builder reads: entities, their
//! identifiers and attributes, associations, collections and fetch profiles.

pub mod definitions;
pub mod registry;

pub use definitions::*;
pub use registry::*;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Table plus key columns signature of a foreign key relationship
///
/// Two navigable paths whose association keys are equal walk the same
/// underlying foreign key, which is how bidirectional associations are
/// recognized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssociationKey {
    pub table: String,
    pub columns: Vec<String>,
}

impl AssociationKey {
    pub fn new<S: Into<String>>(table: impl Into<String>, columns: Vec<S>) -> Self {
        Self {
            table: table.into(),
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for AssociationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AssociationKey({}[{}])", self.table, self.columns.join(","))
    }
}
