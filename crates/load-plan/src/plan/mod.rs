//! Load plan output: return and fetch nodes plus the query spaces they read

pub mod load_plan;
pub mod nodes;
pub mod query_spaces;

pub use load_plan::{Disposition, LoadPlan, Return, ScalarReturn};
pub use nodes::{NodeId, NodeKind, PlanNode, PlanNodes};
pub use query_spaces::{CollectionJoin, CollectionSpaces, EntityJoin, QuerySpaces};
