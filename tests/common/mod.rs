//! In-memory stand-in for the remote workspace service.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{json, Value};

use fabdeploy::adapters::{
    ConnectionDirectory, CreateItemRequest, EnvironmentService, ItemDefinition, ItemDirectory,
    OperationPoller, OperationStatus, RemoteOperation, Submission, WorkspaceDirectory, WorkspaceInfo,
};
use fabdeploy::core::{DeployError, DeployResult, OperationState};
use fabdeploy::domain::{ArtifactType, DefinitionFile, LocalArtifact, RemoteItem};

#[derive(Debug, Default)]
pub struct MockState {
    pub workspaces: Vec<WorkspaceInfo>,
    pub items: HashMap<String, Vec<RemoteItem>>,
    pub next_id: u64,

    /// Every call, in order (`create Notebook_1`, `delete id-3`, ...)
    pub calls: Vec<String>,

    /// Creates answer 202 and finish after this many polls
    pub async_polls: Option<u32>,
    /// Definition updates answer 202 and finish after this many polls
    pub async_update_polls: Option<u32>,
    /// Pending operations; updates carry no item
    pub pending: HashMap<String, (u32, Option<RemoteItem>)>,
    pub failing_operations: bool,
    pub polls: u32,
    pub fetches: u32,
    /// Result locations handed to `fetch_result`
    pub fetched_from: Vec<Option<String>>,

    pub fail_create: HashSet<String>,
    pub fail_delete: HashSet<String>,
    pub fail_workspace_delete: bool,

    pub connections: HashMap<String, String>,
    pub eventhouse_uri: Option<String>,
    pub definitions: HashMap<String, ItemDefinition>,

    /// Publish states handed out in order; `Success` once drained
    pub publish_states: VecDeque<String>,
    pub default_environment: Option<(String, String)>,
    pub groups: Vec<(String, String)>,
    pub deleted_workspaces: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MockFabric {
    state: Arc<Mutex<MockState>>,
}

impl MockFabric {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn with_workspace(self, id: &str, name: &str) -> Self {
        self.state().workspaces.push(WorkspaceInfo {
            id: id.to_string(),
            display_name: name.to_string(),
        });
        self
    }

    pub fn with_item(self, workspace_id: &str, id: &str, name: &str, artifact_type: ArtifactType) -> Self {
        self.state()
            .items
            .entry(workspace_id.to_string())
            .or_default()
            .push(RemoteItem::new(id, name, artifact_type));
        self
    }

    pub fn items(&self, workspace_id: &str) -> Vec<RemoteItem> {
        self.state().items.get(workspace_id).cloned().unwrap_or_default()
    }

    pub fn names_of(&self, workspace_id: &str, artifact_type: ArtifactType) -> Vec<String> {
        let mut names: Vec<String> = self
            .items(workspace_id)
            .into_iter()
            .filter(|i| i.artifact_type == artifact_type)
            .map(|i| i.display_name)
            .collect();
        names.sort();
        names
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    /// Position of the first call equal to `call`
    pub fn call_index(&self, call: &str) -> Option<usize> {
        self.state().calls.iter().position(|c| c == call)
    }

    /// Decoded part of the definition last pushed for an item name
    pub fn pushed_part(&self, name: &str, path: &str) -> Option<String> {
        self.state()
            .definitions
            .get(name)
            .and_then(|d| d.part(path))
            .and_then(|p| p.decoded())
    }

    fn add_item(state: &mut MockState, workspace_id: &str, item: RemoteItem) {
        if item.artifact_type == ArtifactType::Eventhouse {
            state.next_id += 1;
            let database = RemoteItem::new(
                format!("kql-{}", state.next_id),
                item.display_name.clone(),
                ArtifactType::KqlDatabase,
            );
            state.items.entry(workspace_id.to_string()).or_default().push(database);
        }
        state.items.entry(workspace_id.to_string()).or_default().push(item);
    }
}

fn remote_failure(operation: String) -> DeployError {
    DeployError::remote(operation, 400, "rejected by mock")
}

#[async_trait]
impl ItemDirectory for MockFabric {
    async fn list_items(&self, workspace_id: &str) -> DeployResult<Vec<RemoteItem>> {
        let mut state = self.state();
        state.calls.push("list".to_string());
        Ok(state.items.get(workspace_id).cloned().unwrap_or_default())
    }

    async fn create_item(&self, workspace_id: &str, request: &CreateItemRequest) -> DeployResult<Submission> {
        let mut state = self.state();
        state.calls.push(format!("create {}", request.display_name));
        if state.fail_create.contains(&request.display_name) {
            return Err(remote_failure(format!("create item '{}'", request.display_name)));
        }

        state.next_id += 1;
        let item = RemoteItem {
            id: format!("id-{}", state.next_id),
            display_name: request.display_name.clone(),
            artifact_type: request.artifact_type,
            description: request.description.clone(),
        };
        if let Some(definition) = &request.definition {
            state
                .definitions
                .insert(request.display_name.clone(), definition.clone());
        }

        match state.async_polls {
            Some(polls) => {
                let location = format!("op-{}", state.next_id);
                state.pending.insert(location.clone(), (polls, Some(item)));
                Ok(Submission::Accepted(RemoteOperation {
                    location,
                    retry_after: Some(5),
                    operation_id: None,
                }))
            }
            None => {
                Self::add_item(&mut state, workspace_id, item.clone());
                Ok(Submission::Completed(Some(item)))
            }
        }
    }

    async fn update_definition(
        &self,
        workspace_id: &str,
        item_id: &str,
        definition: &ItemDefinition,
    ) -> DeployResult<Submission> {
        let mut state = self.state();
        state.calls.push(format!("update {}", item_id));
        let name = state
            .items
            .get(workspace_id)
            .and_then(|items| items.iter().find(|i| i.id == item_id))
            .map(|i| i.display_name.clone())
            .unwrap_or_default();
        state.definitions.insert(name, definition.clone());

        match state.async_update_polls {
            Some(polls) => {
                state.next_id += 1;
                let location = format!("op-{}", state.next_id);
                state.pending.insert(location.clone(), (polls, None));
                Ok(Submission::Accepted(RemoteOperation {
                    location,
                    retry_after: Some(5),
                    operation_id: None,
                }))
            }
            None => Ok(Submission::Completed(None)),
        }
    }

    async fn delete_item(&self, workspace_id: &str, item_id: &str) -> DeployResult<()> {
        let mut state = self.state();
        state.calls.push(format!("delete {}", item_id));
        if state.fail_delete.contains(item_id) {
            return Err(remote_failure(format!("delete item '{}'", item_id)));
        }
        if let Some(items) = state.items.get_mut(workspace_id) {
            items.retain(|i| i.id != item_id);
        }
        Ok(())
    }

    async fn rename_item(
        &self,
        workspace_id: &str,
        item_id: &str,
        new_display_name: &str,
        _description: &str,
    ) -> DeployResult<()> {
        let mut state = self.state();
        state.calls.push(format!("rename {} {}", item_id, new_display_name));
        if let Some(item) = state
            .items
            .get_mut(workspace_id)
            .and_then(|items| items.iter_mut().find(|i| i.id == item_id))
        {
            item.display_name = new_display_name.to_string();
        }
        Ok(())
    }

    async fn eventhouse_query_uri(&self, _workspace_id: &str, _eventhouse_name: &str) -> DeployResult<Option<String>> {
        Ok(self.state().eventhouse_uri.clone())
    }
}

#[async_trait]
impl OperationPoller for MockFabric {
    async fn poll_status(&self, operation: &RemoteOperation) -> DeployResult<OperationStatus> {
        let mut state = self.state();
        state.polls += 1;
        let failing = state.failing_operations;
        let Some((remaining, _)) = state.pending.get_mut(&operation.location) else {
            return Err(remote_failure(format!("poll {}", operation.location)));
        };

        let status = if failing {
            OperationState::Failed
        } else if *remaining > 1 {
            *remaining -= 1;
            OperationState::Running
        } else {
            *remaining = 0;
            OperationState::Succeeded
        };
        let result_location = (status == OperationState::Succeeded).then(|| format!("{}/result", operation.location));
        Ok(OperationStatus {
            state: status,
            result_location,
        })
    }

    async fn fetch_result(&self, operation: &RemoteOperation, result_location: Option<&str>) -> DeployResult<Value> {
        let mut state = self.state();
        state.fetches += 1;
        state.fetched_from.push(result_location.map(str::to_string));
        let Some((_, item)) = state.pending.remove(&operation.location) else {
            return Err(remote_failure(format!("fetch {}", operation.location)));
        };
        let Some(item) = item else {
            return Ok(Value::Null);
        };

        // Workspace id is not part of the operation; every test uses one workspace
        let workspace_id = state.items.keys().next().cloned().unwrap_or_else(|| "ws-1".to_string());
        Self::add_item(&mut state, &workspace_id, item.clone());
        Ok(json!({ "id": item.id, "displayName": item.display_name }))
    }
}

#[async_trait]
impl ConnectionDirectory for MockFabric {
    async fn find_connection_id(&self, display_name: &str) -> DeployResult<Option<String>> {
        Ok(self.state().connections.get(display_name).cloned())
    }
}

#[async_trait]
impl WorkspaceDirectory for MockFabric {
    async fn find_workspace(&self, display_name: &str) -> DeployResult<Option<WorkspaceInfo>> {
        Ok(self
            .state()
            .workspaces
            .iter()
            .find(|w| w.display_name == display_name)
            .cloned())
    }

    async fn create_workspace(&self, display_name: &str, _capacity_id: &str) -> DeployResult<WorkspaceInfo> {
        let mut state = self.state();
        state.calls.push(format!("create workspace {}", display_name));
        state.next_id += 1;
        let workspace = WorkspaceInfo {
            id: format!("ws-{}", state.next_id),
            display_name: display_name.to_string(),
        };
        state.workspaces.push(workspace.clone());
        state.items.insert(workspace.id.clone(), Vec::new());
        Ok(workspace)
    }

    async fn delete_workspace(&self, workspace_id: &str) -> DeployResult<()> {
        let mut state = self.state();
        state.calls.push(format!("delete workspace {}", workspace_id));
        if state.fail_workspace_delete {
            return Err(remote_failure(format!("delete workspace '{}'", workspace_id)));
        }
        state.workspaces.retain(|w| w.id != workspace_id);
        state.items.remove(workspace_id);
        state.deleted_workspaces.push(workspace_id.to_string());
        Ok(())
    }

    async fn assign_group(&self, workspace_id: &str, group_id: &str) -> DeployResult<()> {
        self.state()
            .groups
            .push((workspace_id.to_string(), group_id.to_string()));
        Ok(())
    }
}

#[async_trait]
impl EnvironmentService for MockFabric {
    async fn create_environment(
        &self,
        workspace_id: &str,
        display_name: &str,
        _description: Option<&str>,
    ) -> DeployResult<String> {
        let mut state = self.state();
        state.calls.push(format!("create {}", display_name));
        state.next_id += 1;
        let id = format!("env-{}", state.next_id);
        let item = RemoteItem::new(id.clone(), display_name, ArtifactType::Environment);
        Self::add_item(&mut state, workspace_id, item);
        Ok(id)
    }

    async fn publish_environment(&self, _workspace_id: &str, environment_id: &str) -> DeployResult<()> {
        self.state().calls.push(format!("publish {}", environment_id));
        Ok(())
    }

    async fn publish_state(&self, _workspace_id: &str, _environment_id: &str) -> DeployResult<Option<String>> {
        let state = self.state().publish_states.pop_front();
        Ok(Some(state.unwrap_or_else(|| "Success".to_string())))
    }

    async fn set_default_environment(
        &self,
        _workspace_id: &str,
        environment_name: &str,
        runtime_version: &str,
    ) -> DeployResult<()> {
        self.state().default_environment = Some((environment_name.to_string(), runtime_version.to_string()));
        Ok(())
    }
}

/// An in-memory artifact, as the repository would load it
pub fn artifact(artifact_type: ArtifactType, name: &str, logical_id: &str, files: &[(&str, &str)]) -> LocalArtifact {
    let files: Vec<DefinitionFile> = files
        .iter()
        .map(|(path, content)| DefinitionFile {
            path: path.to_string(),
            content: content.to_string(),
        })
        .collect();
    let definition = match artifact_type {
        ArtifactType::DataPipeline => files
            .iter()
            .find(|f| f.path == "pipeline-content.json")
            .and_then(|f| serde_json::from_str(&f.content).ok()),
        _ => None,
    };

    LocalArtifact {
        artifact_type,
        display_name: name.to_string(),
        logical_id: logical_id.to_string(),
        description: String::new(),
        folder: PathBuf::from(format!("items/{}.{}", name, artifact_type.as_str())),
        files,
        platform: format!(
            r#"{{"metadata":{{"type":"{}","displayName":"{}"}},"config":{{"logicalId":"{}"}}}}"#,
            artifact_type.as_str(),
            name,
            logical_id
        ),
        definition,
    }
}

/// Pipeline whose activities invoke the given logical ids
pub fn pipeline(name: &str, logical_id: &str, invokes: &[&str]) -> LocalArtifact {
    let activities: Vec<Value> = invokes
        .iter()
        .map(|id| {
            json!({
                "name": format!("Run {}", id),
                "type": "ExecutePipeline",
                "typeProperties": { "pipeline": { "referenceName": id, "type": "PipelineReference" } }
            })
        })
        .collect();
    let content = json!({ "properties": { "activities": activities } }).to_string();
    artifact(
        ArtifactType::DataPipeline,
        name,
        logical_id,
        &[("pipeline-content.json", content.as_str())],
    )
}

pub fn notebook(name: &str, content: &str) -> LocalArtifact {
    artifact(
        ArtifactType::Notebook,
        name,
        &format!("lid-{}", name),
        &[("notebook-content.py", content)],
    )
}
