use crate::error::LoadPlanResult;
use crate::fetch::{CascadingAction, FetchStrategy};

use super::{FetchDecision, LoadPlanBuildingPolicy};

/// Loads exactly the associations an entity operation cascades to
///
/// Used to load the graph a merge or refresh will touch: cascading
/// associations are joined, all others are left for later.
#[derive(Debug, Clone, Copy)]
pub struct CascadeStylePolicy {
    action: CascadingAction,
}

impl CascadeStylePolicy {
    pub fn new(action: CascadingAction) -> Self {
        Self { action }
    }

    pub fn action(&self) -> CascadingAction {
        self.action
    }
}

impl LoadPlanBuildingPolicy for CascadeStylePolicy {
    fn determine_fetch_strategy(&mut self, decision: &FetchDecision<'_>) -> LoadPlanResult<FetchStrategy> {
        if decision.association.cascade.does_cascade(self.action) {
            Ok(FetchStrategy::EAGER_JOIN)
        } else {
            Ok(FetchStrategy::DELAYED_SELECT)
        }
    }

    fn supports_root_collection_returns(&self) -> bool {
        false
    }
}
