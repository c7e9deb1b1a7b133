//! REST client for the Fabric workspace API.
//!
//! Implements every adapter trait over `reqwest`. Non-2xx responses become
//! `DeployError::Remote` carrying the status code and body; `202 Accepted`
//! responses become a `RemoteOperation` the lifecycle driver polls.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{
    ConnectionDirectory, CreateItemRequest, EnvironmentService, ItemDefinition, ItemDirectory,
    OperationPoller, OperationStatus, RemoteOperation, Submission, WorkspaceDirectory,
    WorkspaceInfo,
};
use crate::core::error::{DeployError, DeployResult, OperationState};
use crate::domain::RemoteItem;

/// Default public endpoint
pub const DEFAULT_BASE_URL: &str = "https://api.fabric.microsoft.com/v1";

/// Envelope used by every list endpoint
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse<T> {
    value: Vec<T>,
    #[serde(default)]
    continuation_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NamedResource {
    id: String,
    display_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventhouseResource {
    display_name: String,
    #[serde(default)]
    properties: Option<EventhouseProperties>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventhouseProperties {
    #[serde(default)]
    query_service_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OperationBody {
    status: String,
}

/// Fabric REST API client
pub struct FabricClient {
    client: Client,
    base_url: String,
    token: String,
}

impl FabricClient {
    /// Create a client against `base_url` authenticating with `token`
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> DeployResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| DeployError::transport("build http client", e))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Send a request and reject non-success statuses
    async fn send(&self, operation: &str, request: RequestBuilder) -> DeployResult<Response> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| DeployError::transport(operation, e))?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(DeployError::remote(operation, status, body))
    }

    async fn json<T: DeserializeOwned>(operation: &str, response: Response) -> DeployResult<T> {
        response
            .json()
            .await
            .map_err(|e| DeployError::UnexpectedResponse {
                operation: operation.to_string(),
                reason: e.to_string(),
            })
    }

    /// Collect every page of a list endpoint
    async fn list_all<T: DeserializeOwned>(&self, operation: &str, path: &str) -> DeployResult<Vec<T>> {
        let mut url = self.url(path);
        let mut values = Vec::new();

        loop {
            let response = self.send(operation, self.client.get(&url)).await?;
            let page: ListResponse<T> = Self::json(operation, response).await?;
            values.extend(page.value);

            match page.continuation_uri {
                Some(next) if !next.is_empty() => url = next,
                _ => break,
            }
        }

        Ok(values)
    }

    async fn submission(operation: &str, response: Response) -> DeployResult<Submission> {
        if response.status() == StatusCode::ACCEPTED {
            return accepted_operation(operation, response.headers()).map(Submission::Accepted);
        }

        let text = response.text().await.unwrap_or_default();
        let item = if text.trim().is_empty() {
            None
        } else {
            serde_json::from_str::<RemoteItem>(&text).ok()
        };
        Ok(Submission::Completed(item))
    }
}

/// Read the poll target out of a `202 Accepted` response
pub fn accepted_operation(operation: &str, headers: &HeaderMap) -> DeployResult<RemoteOperation> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };

    let location = header("location").ok_or_else(|| DeployError::MissingPollTarget {
        operation: operation.to_string(),
    })?;

    Ok(RemoteOperation {
        location,
        retry_after: header("retry-after").and_then(|v| v.parse().ok()),
        operation_id: header("x-ms-operation-id"),
    })
}

#[async_trait]
impl ItemDirectory for FabricClient {
    async fn list_items(&self, workspace_id: &str) -> DeployResult<Vec<RemoteItem>> {
        let operation = format!("list items in workspace '{}'", workspace_id);
        self.list_all(&operation, &format!("workspaces/{}/items", workspace_id))
            .await
    }

    async fn create_item(
        &self,
        workspace_id: &str,
        request: &CreateItemRequest,
    ) -> DeployResult<Submission> {
        let operation = format!("create {} '{}'", request.artifact_type, request.display_name);

        let mut body = json!({
            "displayName": request.display_name,
            "type": request.artifact_type.as_str(),
        });
        if let Some(description) = &request.description {
            body["description"] = json!(description);
        }
        if let Some(definition) = &request.definition {
            body["definition"] = json!(definition);
        }

        let url = self.url(&format!("workspaces/{}/items", workspace_id));
        let response = self
            .send(&operation, self.client.post(url).json(&body))
            .await?;
        Self::submission(&operation, response).await
    }

    async fn update_definition(
        &self,
        workspace_id: &str,
        item_id: &str,
        definition: &ItemDefinition,
    ) -> DeployResult<Submission> {
        let operation = format!("update definition of item '{}'", item_id);
        let url = self.url(&format!(
            "workspaces/{}/items/{}/updateDefinition",
            workspace_id, item_id
        ));

        let response = self
            .send(
                &operation,
                self.client.post(url).json(&json!({ "definition": definition })),
            )
            .await?;
        Self::submission(&operation, response).await
    }

    async fn delete_item(&self, workspace_id: &str, item_id: &str) -> DeployResult<()> {
        let operation = format!("delete item '{}'", item_id);
        let url = self.url(&format!("workspaces/{}/items/{}", workspace_id, item_id));
        self.send(&operation, self.client.delete(url)).await?;
        Ok(())
    }

    async fn rename_item(
        &self,
        workspace_id: &str,
        item_id: &str,
        new_display_name: &str,
        description: &str,
    ) -> DeployResult<()> {
        let operation = format!("rename item '{}' to '{}'", item_id, new_display_name);
        let url = self.url(&format!("workspaces/{}/items/{}", workspace_id, item_id));
        let body = json!({ "displayName": new_display_name, "description": description });
        self.send(&operation, self.client.patch(url).json(&body))
            .await?;
        Ok(())
    }

    async fn eventhouse_query_uri(
        &self,
        workspace_id: &str,
        eventhouse_name: &str,
    ) -> DeployResult<Option<String>> {
        let operation = format!("list eventhouses in workspace '{}'", workspace_id);
        let eventhouses: Vec<EventhouseResource> = self
            .list_all(&operation, &format!("workspaces/{}/eventhouses", workspace_id))
            .await?;

        let wanted = eventhouse_name.trim().to_lowercase();
        Ok(eventhouses
            .into_iter()
            .find(|e| e.display_name.trim().to_lowercase() == wanted)
            .and_then(|e| e.properties)
            .and_then(|p| p.query_service_uri))
    }
}

#[async_trait]
impl OperationPoller for FabricClient {
    async fn poll_status(&self, operation: &RemoteOperation) -> DeployResult<OperationStatus> {
        let name = "poll operation status";
        let response = self.send(name, self.client.get(&operation.location)).await?;
        let location = response
            .headers()
            .get("location")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body: OperationBody = Self::json(name, response).await?;

        debug!(status = %body.status, location = %operation.location, "Polled operation");

        Ok(OperationStatus {
            state: OperationState::parse(&body.status),
            result_location: location,
        })
    }

    async fn fetch_result(
        &self,
        operation: &RemoteOperation,
        result_location: Option<&str>,
    ) -> DeployResult<serde_json::Value> {
        let name = "fetch operation result";
        let url = match (result_location, &operation.operation_id) {
            (Some(location), _) => location.to_string(),
            (None, Some(id)) => self.url(&format!("operations/{}/result", id)),
            (None, None) => format!("{}/result", operation.location.trim_end_matches('/')),
        };

        let response = self.send(name, self.client.get(url)).await?;

        // definition updates finish without a result body
        let text = response
            .text()
            .await
            .map_err(|e| DeployError::transport(name, e))?;
        if text.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| DeployError::UnexpectedResponse {
            operation: name.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl ConnectionDirectory for FabricClient {
    async fn find_connection_id(&self, display_name: &str) -> DeployResult<Option<String>> {
        let operation = format!("look up connection '{}'", display_name);
        let connections: Vec<NamedResource> = self.list_all(&operation, "connections").await?;

        Ok(connections
            .into_iter()
            .find(|c| c.display_name == display_name)
            .map(|c| c.id))
    }
}

#[async_trait]
impl WorkspaceDirectory for FabricClient {
    async fn find_workspace(&self, display_name: &str) -> DeployResult<Option<WorkspaceInfo>> {
        let workspaces: Vec<WorkspaceInfo> = self.list_all("list workspaces", "workspaces").await?;
        Ok(workspaces
            .into_iter()
            .find(|w| w.display_name == display_name))
    }

    async fn create_workspace(
        &self,
        display_name: &str,
        capacity_id: &str,
    ) -> DeployResult<WorkspaceInfo> {
        let operation = format!("create workspace '{}'", display_name);
        let body = json!({ "displayName": display_name, "capacityId": capacity_id });
        let response = self
            .send(&operation, self.client.post(self.url("workspaces")).json(&body))
            .await?;
        Self::json(&operation, response).await
    }

    async fn delete_workspace(&self, workspace_id: &str) -> DeployResult<()> {
        let operation = format!("delete workspace '{}'", workspace_id);
        let url = self.url(&format!("workspaces/{}", workspace_id));
        self.send(&operation, self.client.delete(url)).await?;
        Ok(())
    }

    async fn assign_group(&self, workspace_id: &str, group_id: &str) -> DeployResult<()> {
        let operation = format!("assign group '{}' to workspace '{}'", group_id, workspace_id);
        let url = self.url(&format!("workspaces/{}/roleAssignments", workspace_id));
        let body = json!({
            "principal": { "id": group_id, "type": "Group" },
            "role": "Admin",
        });

        match self.send(&operation, self.client.post(url).json(&body)).await {
            Ok(_) => Ok(()),
            // already assigned
            Err(DeployError::Remote { status: 409, .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl EnvironmentService for FabricClient {
    async fn create_environment(
        &self,
        workspace_id: &str,
        display_name: &str,
        description: Option<&str>,
    ) -> DeployResult<String> {
        let operation = format!("create environment '{}'", display_name);
        let url = self.url(&format!("workspaces/{}/environments", workspace_id));
        let body = json!({ "displayName": display_name, "description": description });

        let response = self.send(&operation, self.client.post(url).json(&body)).await?;
        let created: NamedResource = Self::json(&operation, response).await?;
        Ok(created.id.trim().to_string())
    }

    async fn publish_environment(&self, workspace_id: &str, environment_id: &str) -> DeployResult<()> {
        let operation = format!("publish environment '{}'", environment_id);
        let url = self.url(&format!(
            "workspaces/{}/environments/{}/staging/publish",
            workspace_id, environment_id
        ));
        self.send(&operation, self.client.post(url)).await?;
        Ok(())
    }

    async fn publish_state(
        &self,
        workspace_id: &str,
        environment_id: &str,
    ) -> DeployResult<Option<String>> {
        let operation = format!("get environment '{}'", environment_id);
        let url = self.url(&format!(
            "workspaces/{}/environments/{}",
            workspace_id, environment_id
        ));

        let response = self.send(&operation, self.client.get(url)).await?;
        let body: serde_json::Value = Self::json(&operation, response).await?;
        Ok(body
            .pointer("/properties/publishDetails/state")
            .and_then(|v| v.as_str())
            .map(str::to_string))
    }

    async fn set_default_environment(
        &self,
        workspace_id: &str,
        environment_name: &str,
        runtime_version: &str,
    ) -> DeployResult<()> {
        let operation = format!("set default environment '{}'", environment_name);
        let url = self.url(&format!("workspaces/{}/spark/settings", workspace_id));
        let body = json!({
            "environment": { "name": environment_name, "runtimeVersion": runtime_version }
        });
        self.send(&operation, self.client.patch(url).json(&body)).await?;
        Ok(())
    }
}
