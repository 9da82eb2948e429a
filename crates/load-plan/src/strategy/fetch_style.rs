use crate::error::LoadPlanResult;
use crate::fetch::FetchStrategy;

use super::{determine_fetch_plan, FetchDecision, LoadPlanBuildingPolicy};

/// Fetches associations the way they are mapped, honoring fetch profiles
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchStylePolicy;

impl FetchStylePolicy {
    pub fn new() -> Self {
        Self
    }
}

impl LoadPlanBuildingPolicy for FetchStylePolicy {
    fn determine_fetch_strategy(&mut self, decision: &FetchDecision<'_>) -> LoadPlanResult<FetchStrategy> {
        Ok(determine_fetch_plan(decision))
    }
}
