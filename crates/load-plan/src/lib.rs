//! # elif-load-plan: Load Plan Construction for elif.rs
//!
//! Turns a metamodel plus per-load influencers (fetch profiles, entity
//! graphs, lock mode, depth limits) into a load plan: the tree of returns
//! and fetches to materialize, and the table groups and joins the SQL
//! renderer reads them from.
//!
//! Plans are built by walking the association graph depth first and letting
//! a building policy decide, per association, whether to join, select,
//! batch or defer. Select statements over the domain model get the same
//! treatment on top of their own joins.

pub mod config;
pub mod error;
pub mod fetch;
pub mod graph;
pub mod metamodel;
pub mod navigable_path;
pub mod plan;
pub mod sql_ast;
pub mod sqm;
pub mod strategy;
pub mod walk;

// Re-export the types most callers need
pub use config::LoadPlanConfig;
pub use error::{LoadPlanError, LoadPlanResult};
pub use fetch::{CascadeStyle, CascadingAction, FetchStrategy, FetchStyle, FetchTiming, LoadQueryInfluencers, LockMode};
pub use graph::{AttributeNode, EntityGraph, GraphSemantic, SubGraph};
pub use metamodel::{
    AttributeDefinition, CollectionDefinition, CollectionPartDefinition, CompositeDefinition,
    EntityDefinition, FetchMapping, FetchProfile, IdentifierDefinition, Metamodel,
};
pub use navigable_path::NavigablePath;
pub use plan::{Disposition, LoadPlan, NodeKind, PlanNode, Return};
pub use sqm::{QueryLoadPlan, QueryLoadPlanBuilder, SqmQuerySpec, SqmSelectStatement};
pub use strategy::{
    build_collection_load_plan, build_entity_load_plan, CascadeStylePolicy, EntityGraphPolicy,
    FetchStylePolicy, LoadPlanBuilder, LoadPlanBuildingPolicy,
};
pub use walk::{AssociationVisitationStrategy, MetamodelGraphWalker};
