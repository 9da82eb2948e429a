use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Entity operation that may cascade across an association
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CascadingAction {
    Persist,
    Merge,
    Remove,
    Refresh,
    Detach,
    Lock,
    Replicate,
    SaveUpdate,
}

impl CascadingAction {
    pub const ALL: [CascadingAction; 8] = [
        Self::Persist,
        Self::Merge,
        Self::Remove,
        Self::Refresh,
        Self::Detach,
        Self::Lock,
        Self::Replicate,
        Self::SaveUpdate,
    ];
}

/// Set of actions cascaded through an association
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CascadeStyle {
    actions: BTreeSet<CascadingAction>,
}

impl CascadeStyle {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self {
            actions: CascadingAction::ALL.into_iter().collect(),
        }
    }

    pub fn of(actions: &[CascadingAction]) -> Self {
        Self {
            actions: actions.iter().copied().collect(),
        }
    }

    pub fn does_cascade(&self, action: CascadingAction) -> bool {
        self.actions.contains(&action)
    }

    pub fn is_none(&self) -> bool {
        self.actions.is_empty()
    }
}
