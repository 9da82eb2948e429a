use serde::{Deserialize, Serialize};
use std::fmt;

/// When an association is loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FetchTiming {
    /// As part of the current load
    Immediate,
    /// Later, on first access
    Delayed,
}

/// How an association is loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FetchStyle {
    /// Through a SQL join in the same result set
    Join,
    /// Through a follow-up select per owner
    Select,
    /// Through a follow-up select covering a batch of owners
    Batch,
    /// Through a follow-up select re-running the owner query as a sub-select
    Subselect,
}

/// The `(timing, style)` pair decided for one association
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FetchStrategy {
    pub timing: FetchTiming,
    pub style: FetchStyle,
}

impl FetchStrategy {
    pub const EAGER_JOIN: Self = Self::new(FetchTiming::Immediate, FetchStyle::Join);
    pub const IMMEDIATE_SELECT: Self = Self::new(FetchTiming::Immediate, FetchStyle::Select);
    pub const DELAYED_SELECT: Self = Self::new(FetchTiming::Delayed, FetchStyle::Select);

    pub const fn new(timing: FetchTiming, style: FetchStyle) -> Self {
        Self { timing, style }
    }

    pub fn is_immediate(&self) -> bool {
        self.timing == FetchTiming::Immediate
    }

    /// Immediate and joined into the same result set
    pub fn is_join_fetched(&self) -> bool {
        self.is_immediate() && self.style == FetchStyle::Join
    }

    /// Same timing, different style
    pub fn with_style(self, style: FetchStyle) -> Self {
        Self::new(self.timing, style)
    }
}

impl fmt::Display for FetchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{:?}", self.timing, self.style)
    }
}

/// Row lock requested by the load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum LockMode {
    #[default]
    None,
    Read,
    Optimistic,
    OptimisticForceIncrement,
    Write,
    UpgradeNoWait,
    UpgradeSkipLocked,
    PessimisticRead,
    PessimisticWrite,
    PessimisticForceIncrement,
}

impl LockMode {
    fn level(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Read => 5,
            Self::Optimistic => 6,
            Self::OptimisticForceIncrement => 7,
            Self::Write | Self::UpgradeNoWait | Self::UpgradeSkipLocked => 10,
            Self::PessimisticRead => 12,
            Self::PessimisticWrite => 13,
            Self::PessimisticForceIncrement => 17,
        }
    }

    pub fn greater_than(self, other: LockMode) -> bool {
        self.level() > other.level()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_fetched() {
        assert!(FetchStrategy::EAGER_JOIN.is_join_fetched());
        assert!(!FetchStrategy::IMMEDIATE_SELECT.is_join_fetched());
        assert!(!FetchStrategy::new(FetchTiming::Delayed, FetchStyle::Join).is_join_fetched());
        assert_eq!(
            FetchStrategy::EAGER_JOIN.with_style(FetchStyle::Select),
            FetchStrategy::IMMEDIATE_SELECT
        );
    }

    #[test]
    fn test_lock_mode_ordering() {
        assert!(LockMode::PessimisticWrite.greater_than(LockMode::Read));
        assert!(LockMode::Optimistic.greater_than(LockMode::Read));
        assert!(!LockMode::Read.greater_than(LockMode::Read));
        assert!(!LockMode::None.greater_than(LockMode::Read));
    }
}
