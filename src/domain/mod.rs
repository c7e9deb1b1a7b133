//! Domain types for the deployer.
//!
//! - Artifacts: local repository items and remote workspace items
//! - Run: per-invocation records, phases and strategies

pub mod artifact;
pub mod run;

pub use artifact::{ArtifactType, DefinitionFile, ItemKey, LocalArtifact, RemoteItem};
pub use run::{DeploymentRecord, DeploymentRun, Phase, Strategy};
