//! Core domain types for the dependency flow engine.
//!
//! This module contains all the fundamental types used throughout the
//! application, designed to encode invariants via the type system.

pub mod build;
pub mod ids;
pub mod pr;
pub mod subscription;

// Re-export commonly used types at the module level
pub use build::{Asset, AssetLocation, AssetUpdate, Build, LocationType};
pub use ids::{BuildId, ChannelId, PrUrl, SubscriptionId};
pub use pr::{CheckState, InFlightPullRequest, PrCheck, PrStatus};
pub use subscription::{MergePolicy, Subscription, UpdateFrequency};
