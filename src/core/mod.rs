//! Core deployment logic.
//!
//! This module contains:
//! - Scanner and resolver: finding and naming cross-item references
//! - Graph: dependency ordering for creation and deletion
//! - Lifecycle: create/update/delete of single items, with polling
//! - Rewrite: connection and lakehouse rewriting of item content
//! - Orchestrator: phases, strategies and failure handling

pub mod environment;
pub mod error;
pub mod graph;
pub mod lifecycle;
pub mod orchestrator;
pub mod record_log;
pub mod resolver;
pub mod rewrite;
pub mod scanner;
pub mod throttle;

// Re-export commonly used types
pub use environment::EnvironmentSettings;
pub use error::{DeployError, DeployResult, OperationState};
pub use graph::{sort_artifacts, DependencyGraph, SortMode};
pub use lifecycle::{DeployAction, DeployOutcome, LifecycleDriver, PollingSettings};
pub use orchestrator::{DeploymentReport, Orchestrator, PhaseResult};
pub use record_log::{RecordEntry, RecordLog};
pub use resolver::{ItemTables, LookupSource, Resolve};
pub use scanner::scan_references;
pub use throttle::{Throttle, ThrottleSettings};
