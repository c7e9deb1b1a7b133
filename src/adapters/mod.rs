//! Adapter interfaces for the remote workspace service.
//!
//! The engine only talks to the remote system through these traits, so the
//! orchestrator can be driven by the REST client in production and by an
//! in-memory fake in tests.

pub mod auth;
pub mod fabric;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

use crate::core::error::{DeployResult, OperationState};
use crate::domain::{ArtifactType, DefinitionFile, RemoteItem};

pub use auth::{acquire_token, ClientCredentials};
pub use fabric::FabricClient;

/// One encoded file of an item definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefinitionPart {
    pub path: String,
    pub payload: String,
    pub payload_type: String,
}

impl DefinitionPart {
    /// Encode raw text as an `InlineBase64` part
    pub fn inline(path: impl Into<String>, content: &str) -> Self {
        Self {
            path: path.into(),
            payload: STANDARD.encode(content.as_bytes()),
            payload_type: "InlineBase64".to_string(),
        }
    }

    /// Decode the payload back to text (used for diagnostics and tests)
    pub fn decoded(&self) -> Option<String> {
        let bytes = STANDARD.decode(&self.payload).ok()?;
        String::from_utf8(bytes).ok()
    }
}

/// The `definition` body of a create or update request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDefinition {
    pub parts: Vec<DefinitionPart>,
}

impl ItemDefinition {
    pub fn from_files(files: &[DefinitionFile]) -> Self {
        Self {
            parts: files
                .iter()
                .map(|f| DefinitionPart::inline(f.path.clone(), &f.content))
                .collect(),
        }
    }

    pub fn part(&self, path: &str) -> Option<&DefinitionPart> {
        self.parts.iter().find(|p| p.path == path)
    }
}

/// Body of a create-item request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateItemRequest {
    pub display_name: String,
    pub artifact_type: ArtifactType,
    pub description: Option<String>,
    pub definition: Option<ItemDefinition>,
}

/// A long-running operation accepted by the remote system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteOperation {
    /// Where to poll for status
    pub location: String,

    /// Service-provided wait hint in seconds
    pub retry_after: Option<u64>,

    pub operation_id: Option<String>,
}

/// Outcome of submitting a create or update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// Accepted synchronously; creates carry the new item
    Completed(Option<RemoteItem>),

    /// Accepted for asynchronous processing
    Accepted(RemoteOperation),
}

/// Status reported while polling an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationStatus {
    pub state: OperationState,
    pub result_location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceInfo {
    pub id: String,
    pub display_name: String,
}

/// Listing and mutating items inside a workspace
#[async_trait]
pub trait ItemDirectory: Send + Sync {
    async fn list_items(&self, workspace_id: &str) -> DeployResult<Vec<RemoteItem>>;

    async fn create_item(
        &self,
        workspace_id: &str,
        request: &CreateItemRequest,
    ) -> DeployResult<Submission>;

    async fn update_definition(
        &self,
        workspace_id: &str,
        item_id: &str,
        definition: &ItemDefinition,
    ) -> DeployResult<Submission>;

    async fn delete_item(&self, workspace_id: &str, item_id: &str) -> DeployResult<()>;

    async fn rename_item(
        &self,
        workspace_id: &str,
        item_id: &str,
        new_display_name: &str,
        description: &str,
    ) -> DeployResult<()>;

    /// Query endpoint of a named eventhouse, if it exists
    async fn eventhouse_query_uri(
        &self,
        workspace_id: &str,
        eventhouse_name: &str,
    ) -> DeployResult<Option<String>>;
}

/// Following long-running operations to completion
#[async_trait]
pub trait OperationPoller: Send + Sync {
    async fn poll_status(&self, operation: &RemoteOperation) -> DeployResult<OperationStatus>;

    /// Fetch the result of a succeeded operation, from the location the
    /// final poll named when there is one
    async fn fetch_result(
        &self,
        operation: &RemoteOperation,
        result_location: Option<&str>,
    ) -> DeployResult<serde_json::Value>;
}

#[async_trait]
pub trait ConnectionDirectory: Send + Sync {
    async fn find_connection_id(&self, display_name: &str) -> DeployResult<Option<String>>;
}

/// Workspace-level operations used to bootstrap a run
#[async_trait]
pub trait WorkspaceDirectory: Send + Sync {
    async fn find_workspace(&self, display_name: &str) -> DeployResult<Option<WorkspaceInfo>>;

    async fn create_workspace(
        &self,
        display_name: &str,
        capacity_id: &str,
    ) -> DeployResult<WorkspaceInfo>;

    async fn delete_workspace(&self, workspace_id: &str) -> DeployResult<()>;

    async fn assign_group(&self, workspace_id: &str, group_id: &str) -> DeployResult<()>;
}

/// Spark compute environments
#[async_trait]
pub trait EnvironmentService: Send + Sync {
    async fn create_environment(
        &self,
        workspace_id: &str,
        display_name: &str,
        description: Option<&str>,
    ) -> DeployResult<String>;

    async fn publish_environment(&self, workspace_id: &str, environment_id: &str) -> DeployResult<()>;

    /// Current publish state (`Running`, `Success`, `Failed`, ...)
    async fn publish_state(
        &self,
        workspace_id: &str,
        environment_id: &str,
    ) -> DeployResult<Option<String>>;

    async fn set_default_environment(
        &self,
        workspace_id: &str,
        environment_name: &str,
        runtime_version: &str,
    ) -> DeployResult<()>;
}

/// Everything the orchestrator needs from the remote side
pub trait FabricApi:
    ItemDirectory + OperationPoller + ConnectionDirectory + WorkspaceDirectory + EnvironmentService
{
}

impl<T> FabricApi for T where
    T: ItemDirectory + OperationPoller + ConnectionDirectory + WorkspaceDirectory + EnvironmentService
{
}
