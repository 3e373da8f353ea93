//! Build and asset records as published by the build asset registry.
//!
//! A `Build` is immutable once created: one record per CI run, carrying the
//! assets that run produced. Builds are attached to channels after creation;
//! the attachment is the only relationship that changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::BuildId;

/// The kind of location an asset is published to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationType {
    /// A package feed (NuGet, crates.io, npm registry, ...).
    PackageFeed,

    /// A raw blob container or download URL.
    Container,
}

/// A place an asset was published to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetLocation {
    pub uri: String,
    pub location_type: LocationType,
}

/// An asset produced by a build: a named, versioned artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub name: String,
    pub version: String,
    pub locations: Vec<AssetLocation>,
}

impl Asset {
    /// Returns the preferred publication location: the first package feed if
    /// one exists, otherwise the first location of any type.
    pub fn preferred_location(&self) -> Option<&AssetLocation> {
        self.locations
            .iter()
            .find(|l| l.location_type == LocationType::PackageFeed)
            .or_else(|| self.locations.first())
    }
}

/// An immutable build record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Build {
    pub id: BuildId,

    /// The repository the build was produced from.
    pub repository: String,

    /// The branch the build was produced from.
    pub branch: String,

    /// The commit the build was produced at.
    pub commit: String,

    /// The CI build number, for display in PR titles.
    pub build_number: String,

    pub date_produced: DateTime<Utc>,

    pub assets: Vec<Asset>,
}

/// One dependency update to propagate to a target repository.
///
/// This is the reduced form of an [`Asset`] that the pull request updater
/// hands to the remote operations client: name, version, the commit the
/// version was built from, and where to fetch it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetUpdate {
    pub name: String,
    pub version: String,
    pub source_commit: String,
    pub location: Option<String>,
}

impl AssetUpdate {
    /// Reduces a build's assets to the update list for a target.
    ///
    /// By default every asset the build produced is relevant to the target.
    pub fn from_build(build: &Build) -> Vec<AssetUpdate> {
        build
            .assets
            .iter()
            .map(|a| AssetUpdate {
                name: a.name.clone(),
                version: a.version.clone(),
                source_commit: build.commit.clone(),
                location: a.preferred_location().map(|l| l.uri.clone()),
            })
            .collect()
    }
}
