//! Fetch strategy vocabulary and the influencers that steer it

pub mod cascade;
pub mod influencers;
pub mod strategy;

pub use cascade::{CascadeStyle, CascadingAction};
pub use influencers::LoadQueryInfluencers;
pub use strategy::{FetchStrategy, FetchStyle, FetchTiming, LockMode};
