//! Core packaging engine.
//!
//! The engine is organized leaf-first:
//! - [`asset`] - the versioned release-asset model and feed
//! - [`container`] - the on-disk package container format
//! - [`entries`] - selection, merge and retention over feeds
//! - [`delta`] - binary delta generation/application via external zstd
//! - [`bundle`] - bootstrapper embedding (self-contained installers)
//! - [`builder`] - the release pipeline orchestrator
//! - [`repository`] - upload/download collaborator contracts

pub mod asset;
pub mod builder;
pub mod bundle;
pub mod container;
pub mod delta;
pub mod entries;
pub mod error;
pub mod repository;
pub mod utils;

pub use asset::{AssetType, ReleaseAsset, ReleaseFeed, TargetOs};
pub use builder::{PackOptions, PackageBuilder};
pub use container::{Manifest, ReleasePackage};
pub use delta::{DeltaEngine, DeltaMode};
pub use entries::ReleaseEntryHelper;
pub use error::{Error, Result};
pub use repository::{AssetRepository, LocalRepository};
