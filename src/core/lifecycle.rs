//! Lifecycle driver: create-or-update for a single item.
//!
//! The driver decides between create and update by looking the item up by
//! `(type, display name)`, submits the request, follows asynchronous
//! operations until they reach a terminal state and records the outcome.
//! All mutating calls pass through the shared [`Throttle`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument};

use super::error::{DeployError, DeployResult, OperationState};
use super::resolver::ItemTables;
use super::throttle::Throttle;
use crate::adapters::{CreateItemRequest, ItemDirectory, OperationPoller, RemoteOperation, Submission};
use crate::domain::{DeploymentRun, ItemKey, RemoteItem};

/// GUID placeholder that stands for "the workspace being deployed to"
pub const WORKSPACE_PLACEHOLDER: &str = "00000000-0000-0000-0000-000000000000";

/// Polling and waiting settings (the `polling` section of the config file)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingSettings {
    /// Wait between polls when the service gives no hint (default: 30)
    #[serde(default = "default_retry_after")]
    pub default_retry_after_seconds: u64,

    /// Ceiling for waiting on renamed items to disappear (default: 300)
    #[serde(default = "default_deletion_wait")]
    pub deletion_wait_seconds: u64,

    /// Interval between deletion checks (default: 30)
    #[serde(default = "default_deletion_check_interval")]
    pub deletion_check_interval_seconds: u64,
}

fn default_retry_after() -> u64 {
    30
}
fn default_deletion_wait() -> u64 {
    300
}
fn default_deletion_check_interval() -> u64 {
    30
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            default_retry_after_seconds: default_retry_after(),
            deletion_wait_seconds: default_deletion_wait(),
            deletion_check_interval_seconds: default_deletion_check_interval(),
        }
    }
}

/// Whether an item was newly created or an existing one was updated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployAction {
    Created,
    Updated,
}

/// Result of a successful deploy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployOutcome {
    pub live_id: String,
    pub action: DeployAction,
}

/// Drives items through create, update, rename and delete
pub struct LifecycleDriver<'a, A: ?Sized> {
    api: &'a A,
    throttle: &'a Throttle,
    polling: &'a PollingSettings,
}

impl<'a, A> LifecycleDriver<'a, A>
where
    A: ItemDirectory + OperationPoller + ?Sized,
{
    pub fn new(api: &'a A, throttle: &'a Throttle, polling: &'a PollingSettings) -> Self {
        Self {
            api,
            throttle,
            polling,
        }
    }

    /// Replace repository logical ids with live ids, and the workspace
    /// placeholder with `workspace_id`. Text without either is returned
    /// unchanged.
    ///
    /// # Errors
    ///
    /// `NotYetDeployed` if a logical id appears whose item has no live id yet.
    pub fn substitute(
        &self,
        content: &str,
        workspace_id: &str,
        tables: &ItemTables,
    ) -> DeployResult<String> {
        substitute_ids(content, workspace_id, tables)
    }

    /// Create the item, or update the definition of an existing item with
    /// the same `(type, display name)`
    #[instrument(skip(self, request, tables, run), fields(item = %request.display_name, kind = %request.artifact_type))]
    pub async fn deploy(
        &self,
        workspace_id: &str,
        request: &CreateItemRequest,
        tables: &mut ItemTables,
        run: &mut DeploymentRun,
    ) -> DeployResult<DeployOutcome> {
        let key = ItemKey::new(request.artifact_type, request.display_name.clone());
        let existing = tables.existing(&key).cloned();

        let outcome = match (existing, &request.definition) {
            (Some(item), Some(definition)) => {
                info!(live_id = %item.id, "Updating existing item");
                self.throttle.admit("update definition").await;
                let submission = self
                    .api
                    .update_definition(workspace_id, &item.id, definition)
                    .await?;
                if let Submission::Accepted(operation) = submission {
                    self.await_operation(&request.display_name, &operation).await?;
                }
                tables.record_deployed(item.clone());
                DeployOutcome {
                    live_id: item.id,
                    action: DeployAction::Updated,
                }
            }
            (Some(item), None) => {
                debug!(live_id = %item.id, "Item exists and has no definition to push");
                DeployOutcome {
                    live_id: item.id,
                    action: DeployAction::Updated,
                }
            }
            (None, _) => {
                info!("Creating item");
                self.throttle.admit("create item").await;
                let created = match self.api.create_item(workspace_id, request).await? {
                    Submission::Completed(Some(item)) => item,
                    Submission::Completed(None) => {
                        return Err(DeployError::UnexpectedResponse {
                            operation: format!("create item '{}'", request.display_name),
                            reason: "response did not describe the created item".to_string(),
                        })
                    }
                    Submission::Accepted(operation) => {
                        let result = self.await_operation(&request.display_name, &operation).await?;
                        created_item(request, result)?
                    }
                };
                let live_id = created.id.clone();
                tables.record_deployed(created);
                DeployOutcome {
                    live_id,
                    action: DeployAction::Created,
                }
            }
        };

        info!(live_id = %outcome.live_id, action = ?outcome.action, "Item deployed");
        run.record(request.artifact_type, request.display_name.clone(), outcome.live_id.clone());
        Ok(outcome)
    }

    /// Poll an accepted operation until it terminates
    ///
    /// Returns the operation result, fetched exactly once on success.
    pub async fn await_operation(&self, item: &str, operation: &RemoteOperation) -> DeployResult<Value> {
        let wait = Duration::from_secs(
            operation
                .retry_after
                .unwrap_or(self.polling.default_retry_after_seconds),
        );

        loop {
            tokio::time::sleep(wait).await;

            let status = self.api.poll_status(operation).await?;
            if !status.state.is_terminal() {
                debug!(item, state = %status.state, wait_seconds = wait.as_secs(), "Operation still in progress");
                continue;
            }
            if status.state != OperationState::Succeeded {
                return Err(DeployError::OperationTerminated {
                    item: item.to_string(),
                    state: status.state,
                });
            }

            debug!(item, "Operation succeeded, fetching result");
            return self
                .api
                .fetch_result(operation, status.result_location.as_deref())
                .await;
        }
    }

    /// Delete an item and drop it from the deployed table
    pub async fn delete(
        &self,
        workspace_id: &str,
        item: &RemoteItem,
        tables: &mut ItemTables,
    ) -> DeployResult<()> {
        info!(item = %item.display_name, live_id = %item.id, kind = %item.artifact_type, "Deleting item");
        self.throttle.admit("delete item").await;
        self.api.delete_item(workspace_id, &item.id).await?;
        tables.forget_deployed(item.artifact_type, &item.id);
        Ok(())
    }

    /// Rename an item in place
    pub async fn rename(
        &self,
        workspace_id: &str,
        item: &RemoteItem,
        new_display_name: &str,
        tables: &mut ItemTables,
    ) -> DeployResult<RemoteItem> {
        info!(item = %item.display_name, new_name = new_display_name, "Renaming item");
        self.throttle.admit("rename item").await;

        let description = item.description.clone().unwrap_or_default();
        self.api
            .rename_item(workspace_id, &item.id, new_display_name, &description)
            .await?;

        tables.forget_deployed(item.artifact_type, &item.id);
        let renamed = RemoteItem {
            display_name: new_display_name.to_string(),
            ..item.clone()
        };
        tables.record_deployed(renamed.clone());
        Ok(renamed)
    }
}

/// Build the created item from an operation result, filling gaps from the request
fn created_item(request: &CreateItemRequest, result: Value) -> DeployResult<RemoteItem> {
    let id = result
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| DeployError::UnexpectedResponse {
            operation: format!("create item '{}'", request.display_name),
            reason: "operation result has no item id".to_string(),
        })?;

    let display_name = result
        .get("displayName")
        .and_then(Value::as_str)
        .unwrap_or(&request.display_name);

    Ok(RemoteItem {
        id: id.to_string(),
        display_name: display_name.to_string(),
        artifact_type: request.artifact_type,
        description: request.description.clone(),
    })
}

/// Logical-id and workspace-placeholder substitution over raw text
pub fn substitute_ids(content: &str, workspace_id: &str, tables: &ItemTables) -> DeployResult<String> {
    let mut output = content.to_string();

    for entry in tables.repository_entries() {
        if entry.logical_id.is_empty()
            || entry.logical_id == WORKSPACE_PLACEHOLDER
            || !output.contains(&entry.logical_id)
        {
            continue;
        }

        let live_id = tables
            .live_id(entry.artifact_type, &entry.display_name)
            .ok_or_else(|| DeployError::NotYetDeployed {
                logical_id: entry.logical_id.clone(),
                artifact_type: entry.artifact_type,
                name: entry.display_name.clone(),
            })?;

        debug!(logical_id = %entry.logical_id, live_id, "Substituting logical id");
        output = output.replace(&entry.logical_id, live_id);
    }

    if output.contains(WORKSPACE_PLACEHOLDER) {
        output = output.replace(WORKSPACE_PLACEHOLDER, workspace_id);
    }

    Ok(output)
}
