//! fabdeploy - Dependency-aware deployment of Fabric workspace artifacts
//!
//! Reads item folders from source control and deploys them into a target
//! workspace in an order that respects the references between them.
//!
//! # Architecture
//!
//! - Pipelines are scanned for references to other items
//! - References are resolved by logical id (repository) or live id (workspace)
//! - A topological sort orders creates (dependencies first) and deletes
//!   (dependents first)
//! - Items are created or updated one by one; long-running operations are
//!   polled to completion before the next item starts
//!
//! # Modules
//!
//! - `adapters`: Remote service traits and the REST client
//! - `core`: Ordering, lifecycle and orchestration logic
//! - `domain`: Data structures (artifacts, items, runs)
//! - `repository`: Reading item folders from disk
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Deploy the layer selected by the environment
//! fabdeploy deploy --env dev --env-type internal
//!
//! # Show the creation and deletion order without touching the workspace
//! fabdeploy plan --env dev --env-type internal
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod repository;

// Re-export main types at crate root for convenience
pub use crate::core::{DeployError, DeployResult, Orchestrator};
pub use domain::{ArtifactType, DeploymentRun, LocalArtifact, RemoteItem, Strategy};
pub use repository::ArtifactRepository;
