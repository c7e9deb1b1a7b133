//! Deployment run state.
//!
//! A `DeploymentRun` lives for one invocation against one workspace. It
//! accumulates a record per deployed item and the non-fatal errors that
//! were deferred along the way.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::artifact::ArtifactType;

/// One successfully created or updated item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub artifact_type: ArtifactType,
    pub artifact_name: String,

    /// Live id of the workspace holding the item (`None` for the workspace itself)
    pub location_id: Option<String>,
    pub location_name: Option<String>,

    /// Live id assigned by the remote system
    pub live_id: String,
}

/// Top-level orchestration mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Workspace was just created; every item is a create
    Fresh,

    /// Workspace already existed; old items are renamed/deleted first
    Refresh,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fresh => f.write_str("fresh"),
            Self::Refresh => f.write_str("refresh"),
        }
    }
}

/// Ordered stages of a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    DeleteOldItems,
    Lakehouses,
    Eventhouses,
    Notebooks,
    Pipelines,
    Environment,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::DeleteOldItems => "delete old items",
            Self::Lakehouses => "lakehouse deployment",
            Self::Eventhouses => "eventhouse deployment",
            Self::Notebooks => "notebook deployment",
            Self::Pipelines => "pipeline deployment",
            Self::Environment => "environment deployment",
        };
        f.write_str(name)
    }
}

/// State of a single deployment invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRun {
    pub id: Uuid,
    pub workspace_id: String,
    pub workspace_name: String,
    pub strategy: Strategy,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,

    /// Records in the order items were deployed; the workspace comes first
    pub records: Vec<DeploymentRecord>,

    /// Deferred, non-fatal error messages
    pub errors: Vec<String>,

    pub notebooks_deployed: usize,
    pub notebooks_skipped: usize,
}

impl DeploymentRun {
    /// Start a run; the workspace itself is always the first record
    pub fn new(workspace_id: impl Into<String>, workspace_name: impl Into<String>, strategy: Strategy) -> Self {
        let workspace_id = workspace_id.into();
        let workspace_name = workspace_name.into();

        let workspace_record = DeploymentRecord {
            artifact_type: ArtifactType::Workspace,
            artifact_name: workspace_name.clone(),
            location_id: None,
            location_name: None,
            live_id: workspace_id.clone(),
        };

        Self {
            id: Uuid::new_v4(),
            workspace_id,
            workspace_name,
            strategy,
            started_at: Utc::now(),
            completed_at: None,
            records: vec![workspace_record],
            errors: Vec::new(),
            notebooks_deployed: 0,
            notebooks_skipped: 0,
        }
    }

    /// Append a record for an item deployed into this run's workspace
    pub fn record(&mut self, artifact_type: ArtifactType, name: impl Into<String>, live_id: impl Into<String>) {
        self.records.push(DeploymentRecord {
            artifact_type,
            artifact_name: name.into(),
            location_id: Some(self.workspace_id.clone()),
            location_name: Some(self.workspace_name.clone()),
            live_id: live_id.into(),
        });
    }

    /// Records of a given type, in deployment order
    pub fn records_of(&self, artifact_type: ArtifactType) -> impl Iterator<Item = &DeploymentRecord> {
        self.records
            .iter()
            .filter(move |r| r.artifact_type == artifact_type)
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn finish(&mut self) {
        self.completed_at = Some(Utc::now());
    }
}
