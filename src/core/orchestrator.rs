//! Deployment orchestrator.
//!
//! Coordinates one deployment run against one workspace:
//!
//! 1. Bootstrap: find the workspace, or create it and assign groups.
//! 2. Refresh only: rename old pipelines and notebooks, delete environments
//!    and repository pipelines (dependents first), delete leftovers and wait
//!    for them to disappear. Failures here are deferred.
//! 3. Phases in order: lakehouses, eventhouses, notebooks, pipelines
//!    (dependencies first), environment. The first failure stops the run.
//!
//! The run reports success, or one aggregated error with every deferred
//! message plus the first fatal one.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, error, info, instrument, warn};

use super::environment::deploy_environment;
use super::error::{DeployError, DeployResult};
use super::graph::{sort_artifacts, SortMode};
use super::lifecycle::LifecycleDriver;
use super::resolver::{ItemTables, LookupSource, Resolve};
use super::rewrite::{
    bind_notebook, resolve_connections, rewrite_connections, to_pretty_json, FolderCategory, KustoTarget,
    LakehouseCatalog, LakehouseRef,
};
use super::throttle::Throttle;
use crate::adapters::{CreateItemRequest, DefinitionPart, FabricApi, ItemDefinition, WorkspaceInfo};
use crate::config::{DeploymentTarget, ResolvedConfig};
use crate::domain::{ArtifactType, DeploymentRun, LocalArtifact, Phase, RemoteItem, Strategy};
use crate::repository::PLATFORM_FILE;

/// Suffix given to items awaiting deletion during a refresh
pub const OLD_SUFFIX: &str = "_Old";

/// Phases run after the optional cleanup, in order
pub const DEPLOY_PHASES: [Phase; 5] = [
    Phase::Lakehouses,
    Phase::Eventhouses,
    Phase::Notebooks,
    Phase::Pipelines,
    Phase::Environment,
];

/// Outcome of one phase
#[derive(Debug)]
pub struct PhaseResult {
    pub phase: Phase,

    /// Error that stops the run, already wrapped with the phase
    pub fatal: Option<DeployError>,

    /// Deferred messages; the run continues past them
    pub errors: Vec<String>,
}

impl PhaseResult {
    /// A phase whose failure is deferred
    pub fn deferred(phase: Phase, result: DeployResult<()>) -> Self {
        let errors = match result {
            Ok(()) => Vec::new(),
            Err(e) => vec![e.in_phase(phase).to_string()],
        };
        Self {
            phase,
            fatal: None,
            errors,
        }
    }

    /// A phase whose failure stops the run
    pub fn fatal(phase: Phase, result: DeployResult<()>) -> Self {
        Self {
            phase,
            fatal: result.err().map(|e| e.in_phase(phase)),
            errors: Vec::new(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal.is_some()
    }
}

/// Everything a run produced
#[derive(Debug)]
pub struct DeploymentReport {
    pub run: DeploymentRun,
    pub phases: Vec<PhaseResult>,
}

impl DeploymentReport {
    /// Deferred messages in phase order, then the first fatal error
    pub fn messages(&self) -> Vec<String> {
        let mut messages: Vec<String> = self
            .phases
            .iter()
            .flat_map(|p| p.errors.iter().cloned())
            .collect();
        if let Some(fatal) = self.phases.iter().find_map(|p| p.fatal.as_ref()) {
            messages.push(fatal.to_string());
        }
        messages
    }

    pub fn is_success(&self) -> bool {
        self.messages().is_empty()
    }

    /// The run on success, otherwise one aggregated error
    pub fn into_result(self) -> DeployResult<DeploymentRun> {
        let messages = self.messages();
        if messages.is_empty() {
            Ok(self.run)
        } else {
            Err(DeployError::Aggregated(messages))
        }
    }
}

/// Main deployment orchestrator
pub struct Orchestrator<A> {
    api: A,
    config: ResolvedConfig,
    throttle: Throttle,
}

impl<A: FabricApi> Orchestrator<A> {
    pub fn new(api: A, config: ResolvedConfig) -> Self {
        let throttle = Throttle::new(config.throttle.clone());
        Self {
            api,
            config,
            throttle,
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn throttle(&self) -> &Throttle {
        &self.throttle
    }

    fn driver(&self) -> LifecycleDriver<'_, A> {
        LifecycleDriver::new(&self.api, &self.throttle, &self.config.polling)
    }

    /// Find or create the target workspace and deploy into it
    pub async fn deploy_workspace(
        &self,
        target: &DeploymentTarget,
        artifacts: &[LocalArtifact],
    ) -> DeployResult<DeploymentRun> {
        self.deploy_workspace_report(target, artifacts).await?.into_result()
    }

    /// Like `deploy_workspace`, but hands back the report even when a phase
    /// failed, so the records of what was deployed survive the error
    #[instrument(skip(self, target, artifacts), fields(workspace = %target.workspace_name))]
    pub async fn deploy_workspace_report(
        &self,
        target: &DeploymentTarget,
        artifacts: &[LocalArtifact],
    ) -> DeployResult<DeploymentReport> {
        match self.api.find_workspace(&target.workspace_name).await? {
            Some(workspace) => {
                info!(workspace_id = %workspace.id, "Workspace exists, refreshing");
                self.assign_groups(&workspace, target).await?;
                self.execute(Strategy::Refresh, &workspace, target, artifacts).await
            }
            None => {
                info!(capacity = %target.capacity_id, "Workspace not found, creating");
                let workspace = self
                    .api
                    .create_workspace(&target.workspace_name, &target.capacity_id)
                    .await?;

                let result = match self.assign_groups(&workspace, target).await {
                    Ok(()) => self.execute(Strategy::Fresh, &workspace, target, artifacts).await,
                    Err(e) => Err(e),
                };

                let failure = match &result {
                    Ok(report) => report.messages().first().cloned(),
                    Err(e) => Some(e.to_string()),
                };
                if let Some(failure) = failure {
                    error!(error = %failure, workspace_id = %workspace.id, "Fresh deployment failed, removing workspace");
                    if let Err(cleanup) = self.api.delete_workspace(&workspace.id).await {
                        warn!(error = %cleanup, workspace_id = %workspace.id, "Failed to clean up workspace");
                    }
                }
                result
            }
        }
    }

    async fn assign_groups(&self, workspace: &WorkspaceInfo, target: &DeploymentTarget) -> DeployResult<()> {
        for group in &target.default_groups {
            debug!(group = %group, "Assigning group to workspace");
            self.api.assign_group(&workspace.id, group).await?;
        }
        Ok(())
    }

    /// Run every phase of one strategy against an existing workspace
    #[instrument(skip(self, workspace, target, artifacts), fields(workspace = %workspace.display_name, strategy = %strategy))]
    pub async fn execute(
        &self,
        strategy: Strategy,
        workspace: &WorkspaceInfo,
        target: &DeploymentTarget,
        artifacts: &[LocalArtifact],
    ) -> DeployResult<DeploymentReport> {
        let mut run = DeploymentRun::new(workspace.id.clone(), workspace.display_name.clone(), strategy);
        info!(run_id = %run.id, artifacts = artifacts.len(), "Starting deployment");

        let items = match strategy {
            Strategy::Fresh => Vec::new(),
            Strategy::Refresh => self.api.list_items(&workspace.id).await?,
        };
        let mut tables = ItemTables::build(artifacts, &items)?;
        let mut phases = Vec::new();

        if strategy == Strategy::Refresh {
            let result = self
                .delete_old_items(&workspace.id, artifacts, &target.notebooks_to_deploy, &mut tables)
                .await;
            if let Err(e) = &result {
                warn!(error = %e, "Cleaning up old items failed, continuing with deployment");
            }
            phases.push(PhaseResult::deferred(Phase::DeleteOldItems, result));
        }

        for phase in DEPLOY_PHASES {
            info!(phase = %phase, "Starting phase");
            let result = match phase {
                Phase::Lakehouses => {
                    self.deploy_plain(ArtifactType::Lakehouse, &workspace.id, artifacts, &mut tables, &mut run)
                        .await
                }
                Phase::Eventhouses => {
                    self.deploy_plain(ArtifactType::Eventhouse, &workspace.id, artifacts, &mut tables, &mut run)
                        .await
                }
                Phase::Notebooks => {
                    self.deploy_notebooks(&workspace.id, target, artifacts, &mut tables, &mut run)
                        .await
                }
                Phase::Pipelines => {
                    self.deploy_pipelines(&workspace.id, artifacts, &mut tables, &mut run)
                        .await
                }
                Phase::Environment => {
                    deploy_environment(
                        &self.api,
                        &workspace.id,
                        &mut tables,
                        &mut run,
                        &self.config.environment,
                        &self.throttle,
                    )
                    .await
                }
                Phase::DeleteOldItems => Ok(()),
            };

            let outcome = PhaseResult::fatal(phase, result);
            let stop = outcome.is_fatal();
            if let Some(e) = &outcome.fatal {
                error!(error = %e, "Phase failed");
            }
            phases.push(outcome);
            if stop {
                break;
            }
        }

        run.errors = phases.iter().flat_map(|p| p.errors.iter().cloned()).collect();
        run.finish();
        info!(
            records = run.records.len(),
            deferred_errors = run.errors.len(),
            "Deployment finished"
        );

        Ok(DeploymentReport { run, phases })
    }

    /// Rename, delete and wait (refresh only).
    ///
    /// Notebooks outside a non-empty allow-list are left alone, since the
    /// notebook phase will not redeploy them.
    #[instrument(skip(self, artifacts, allowed, tables))]
    async fn delete_old_items(
        &self,
        workspace_id: &str,
        artifacts: &[LocalArtifact],
        allowed: &[String],
        tables: &mut ItemTables,
    ) -> DeployResult<()> {
        let driver = self.driver();

        // Live ids of repository pipelines, taken before renaming
        let pipeline_ids: HashMap<String, String> = tables
            .deployed_of(ArtifactType::DataPipeline)
            .into_iter()
            .map(|item| (item.display_name.clone(), item.id.clone()))
            .collect();

        for artifact_type in [ArtifactType::DataPipeline, ArtifactType::Notebook] {
            let items: Vec<RemoteItem> = tables.deployed_of(artifact_type).into_iter().cloned().collect();
            for item in items {
                if item.display_name.ends_with(OLD_SUFFIX) {
                    debug!(item = %item.display_name, "Already carries the old suffix");
                    continue;
                }
                if !replaces(artifact_type, &item.display_name, allowed) {
                    debug!(item = %item.display_name, "Not in the deployment list, keeping");
                    continue;
                }
                let new_name = format!("{}{}", item.display_name, OLD_SUFFIX);
                driver.rename(workspace_id, &item, &new_name, tables).await?;
            }
        }

        let environments: Vec<RemoteItem> = tables
            .deployed_of(ArtifactType::Environment)
            .into_iter()
            .cloned()
            .collect();
        for environment in environments {
            driver.delete(workspace_id, &environment, tables).await?;
        }

        let pipelines: Vec<LocalArtifact> = artifacts
            .iter()
            .filter(|a| a.artifact_type == ArtifactType::DataPipeline)
            .cloned()
            .collect();
        let order = sort_artifacts(&pipelines, tables, LookupSource::Repository, SortMode::ForDeletion)?;
        info!(count = order.len(), "Deleting repository pipelines, dependents first");

        for name in order {
            let Some(live_id) = pipeline_ids.get(&name) else {
                continue;
            };
            let Some(current_name) = tables.resolve(ArtifactType::DataPipeline, live_id, LookupSource::Deployed)?
            else {
                continue;
            };
            let item = RemoteItem::new(live_id.clone(), current_name, ArtifactType::DataPipeline);
            driver.delete(workspace_id, &item, tables).await?;
        }

        for artifact_type in [ArtifactType::DataPipeline, ArtifactType::Notebook] {
            let leftovers: Vec<RemoteItem> = tables
                .deployed_of(artifact_type)
                .into_iter()
                .filter(|item| item.display_name.ends_with(OLD_SUFFIX))
                .filter(|item| replaces(artifact_type, &item.display_name, allowed))
                .cloned()
                .collect();
            for item in leftovers {
                driver.delete(workspace_id, &item, tables).await?;
            }
        }

        self.wait_for_deletion(workspace_id).await;
        Ok(())
    }

    /// Wait until no suffixed item is listed, up to the configured ceiling
    async fn wait_for_deletion(&self, workspace_id: &str) -> bool {
        let polling = &self.config.polling;
        let interval = polling.deletion_check_interval_seconds.max(1);
        let mut elapsed = 0;

        while elapsed < polling.deletion_wait_seconds {
            match self.api.list_items(workspace_id).await {
                Ok(items) => {
                    let remaining = items
                        .iter()
                        .filter(|item| item.display_name.ends_with(OLD_SUFFIX))
                        .count();
                    if remaining == 0 {
                        info!("All old items have been deleted");
                        return true;
                    }
                    debug!(remaining, wait_seconds = interval, "Old items still present");
                }
                Err(e) => {
                    warn!(error = %e, "Error checking deletion status");
                }
            }

            tokio::time::sleep(Duration::from_secs(interval)).await;
            elapsed += interval;
        }

        warn!(
            timeout_seconds = polling.deletion_wait_seconds,
            "Old items still present after timeout, proceeding with deployment"
        );
        false
    }

    /// Lakehouses and eventhouses: reuse by name, otherwise create
    async fn deploy_plain(
        &self,
        artifact_type: ArtifactType,
        workspace_id: &str,
        artifacts: &[LocalArtifact],
        tables: &mut ItemTables,
        run: &mut DeploymentRun,
    ) -> DeployResult<()> {
        let driver = self.driver();

        for artifact in artifacts.iter().filter(|a| a.artifact_type == artifact_type) {
            let request = CreateItemRequest {
                display_name: artifact.display_name.clone(),
                artifact_type,
                description: non_empty(&artifact.description),
                definition: None,
            };
            driver.deploy(workspace_id, &request, tables, run).await?;
        }
        Ok(())
    }

    /// Lakehouses notebooks in this folder may bind to
    async fn lakehouse_catalog(
        &self,
        workspace_id: &str,
        category: FolderCategory,
        tables: &ItemTables,
    ) -> DeployResult<LakehouseCatalog> {
        let binding = &self.config.notebook_binding;

        let mut catalog: LakehouseCatalog = tables
            .deployed_of(ArtifactType::Lakehouse)
            .into_iter()
            .map(|item| {
                (
                    item.display_name.clone(),
                    LakehouseRef {
                        id: item.id.clone(),
                        workspace_id: workspace_id.to_string(),
                    },
                )
            })
            .collect();

        match category {
            FolderCategory::Standard => {}
            FolderCategory::Dedicated => {
                catalog.retain(|name, _| name.contains(binding.default_lakehouse.as_str()));
            }
            FolderCategory::Borrowed => {
                let Some(workspace_name) = self.config.borrowed_workspace_name() else {
                    warn!(marker = %binding.borrowed_workspace_marker, "No profile names a workspace to borrow the default lakehouse from");
                    return Ok(catalog);
                };
                let Some(source) = self.api.find_workspace(workspace_name).await? else {
                    warn!(workspace = workspace_name, "Workspace to borrow the default lakehouse from does not exist");
                    return Ok(catalog);
                };

                let borrowed = self
                    .api
                    .list_items(&source.id)
                    .await?
                    .into_iter()
                    .find(|item| {
                        item.artifact_type == ArtifactType::Lakehouse && item.display_name == binding.default_lakehouse
                    });

                match borrowed {
                    Some(item) => {
                        info!(workspace = workspace_name, live_id = %item.id, "Borrowing default lakehouse");
                        catalog.insert(
                            binding.default_lakehouse.clone(),
                            LakehouseRef {
                                id: item.id,
                                workspace_id: source.id,
                            },
                        );
                    }
                    None => {
                        warn!(workspace = workspace_name, lakehouse = %binding.default_lakehouse, "Default lakehouse not found in borrowed workspace");
                    }
                }
            }
        }

        Ok(catalog)
    }

    /// Stale cleanup, then deploy the allowed notebooks
    async fn deploy_notebooks(
        &self,
        workspace_id: &str,
        target: &DeploymentTarget,
        artifacts: &[LocalArtifact],
        tables: &mut ItemTables,
        run: &mut DeploymentRun,
    ) -> DeployResult<()> {
        let driver = self.driver();
        let notebooks: Vec<&LocalArtifact> = artifacts
            .iter()
            .filter(|a| a.artifact_type == ArtifactType::Notebook)
            .collect();

        let source_names: Vec<String> = notebooks
            .iter()
            .map(|nb| nb.folder_name().unwrap_or_else(|| nb.display_name.clone()))
            .collect();
        let stale: Vec<RemoteItem> = tables
            .deployed_of(ArtifactType::Notebook)
            .into_iter()
            .filter(|item| !source_names.contains(&item.display_name))
            .cloned()
            .collect();
        for item in stale {
            info!(item = %item.display_name, "Removing notebook no longer in source");
            driver.delete(workspace_id, &item, tables).await?;
        }

        let binding = &self.config.notebook_binding;
        let category = binding.category(&target.target_folder);
        let catalog = self.lakehouse_catalog(workspace_id, category, tables).await?;

        let allowed = &target.notebooks_to_deploy;
        if !allowed.is_empty() {
            info!(allowed = ?allowed, "Selective notebook deployment");
        }

        let mut deployed = 0;
        let mut skipped = 0;
        for notebook in notebooks {
            if !allowed.is_empty() && !allowed.contains(&notebook.display_name) {
                debug!(item = %notebook.display_name, "Not in the deployment list, skipping");
                skipped += 1;
                continue;
            }

            let content_file = ArtifactType::Notebook.content_file().unwrap_or_default();
            let mut parts: Vec<DefinitionPart> = notebook
                .files
                .iter()
                .map(|file| {
                    if file.path == content_file {
                        let content = bind_notebook(&file.content, &catalog, category, binding)
                            .unwrap_or_else(|| file.content.clone());
                        DefinitionPart::inline(file.path.clone(), &content)
                    } else {
                        DefinitionPart::inline(file.path.clone(), &file.content)
                    }
                })
                .collect();
            parts.push(DefinitionPart::inline(PLATFORM_FILE, &notebook.platform));

            let request = CreateItemRequest {
                display_name: notebook.display_name.clone(),
                artifact_type: ArtifactType::Notebook,
                description: non_empty(&notebook.description),
                definition: Some(ItemDefinition { parts }),
            };
            driver.deploy(workspace_id, &request, tables, run).await?;
            deployed += 1;
        }

        run.notebooks_deployed += deployed;
        run.notebooks_skipped += skipped;
        info!(deployed, skipped, "Notebook deployment summary");
        Ok(())
    }

    /// Endpoint and database for Kusto linked services
    async fn kusto_target(
        &self,
        workspace_id: &str,
        artifacts: &[LocalArtifact],
        tables: &ItemTables,
    ) -> DeployResult<KustoTarget> {
        let eventhouse = artifacts
            .iter()
            .find(|a| a.artifact_type == ArtifactType::Eventhouse)
            .map(|a| a.display_name.clone())
            .or_else(|| {
                tables
                    .deployed_of(ArtifactType::Eventhouse)
                    .first()
                    .map(|item| item.display_name.clone())
            });

        let Some(name) = eventhouse else {
            return Ok(KustoTarget::default());
        };

        let endpoint = self.api.eventhouse_query_uri(workspace_id, &name).await?;
        if endpoint.is_none() {
            warn!(eventhouse = %name, "Eventhouse has no query endpoint");
        }

        let database_id = self
            .api
            .list_items(workspace_id)
            .await?
            .into_iter()
            .find(|item| item.artifact_type == ArtifactType::KqlDatabase && item.display_name == name)
            .map(|item| item.id);

        Ok(KustoTarget {
            endpoint,
            database_id,
        })
    }

    /// Pipelines in creation order with ids and connections rewritten
    async fn deploy_pipelines(
        &self,
        workspace_id: &str,
        artifacts: &[LocalArtifact],
        tables: &mut ItemTables,
        run: &mut DeploymentRun,
    ) -> DeployResult<()> {
        let driver = self.driver();
        let pipelines: Vec<LocalArtifact> = artifacts
            .iter()
            .filter(|a| a.artifact_type == ArtifactType::DataPipeline)
            .cloned()
            .collect();
        if pipelines.is_empty() {
            return Ok(());
        }

        let order = sort_artifacts(&pipelines, tables, LookupSource::Repository, SortMode::ForCreation)?;
        info!(order = ?order, "Pipeline creation order");

        let kusto = self.kusto_target(workspace_id, artifacts, tables).await?;
        let content_file = ArtifactType::DataPipeline.content_file().unwrap_or_default();

        for name in order {
            let Some(pipeline) = pipelines.iter().find(|p| p.display_name == name) else {
                continue;
            };

            let mut parts = Vec::with_capacity(pipeline.files.len());
            for file in &pipeline.files {
                let substituted = driver.substitute(&file.content, workspace_id, tables)?;

                let content = if file.path == content_file {
                    let mut document: serde_json::Value =
                        serde_json::from_str(&substituted).map_err(|e| DeployError::InvalidArtifact {
                            path: pipeline.folder.join(&file.path).display().to_string(),
                            reason: e.to_string(),
                        })?;
                    let connection_ids =
                        resolve_connections(&document, &self.config.connections, &self.api).await;
                    rewrite_connections(&mut document, &connection_ids, workspace_id, &kusto);
                    to_pretty_json(&document)?
                } else {
                    substituted
                };

                parts.push(DefinitionPart::inline(file.path.clone(), &content));
            }

            let request = CreateItemRequest {
                display_name: pipeline.display_name.clone(),
                artifact_type: ArtifactType::DataPipeline,
                description: non_empty(&pipeline.description),
                definition: Some(ItemDefinition { parts }),
            };
            driver.deploy(workspace_id, &request, tables, run).await?;
        }

        Ok(())
    }
}

/// Whether a refresh may replace this deployed item. Only notebooks are
/// limited, and only by a non-empty allow-list.
fn replaces(artifact_type: ArtifactType, display_name: &str, allowed: &[String]) -> bool {
    if artifact_type != ArtifactType::Notebook || allowed.is_empty() {
        return true;
    }
    let name = display_name.strip_suffix(OLD_SUFFIX).unwrap_or(display_name);
    allowed.iter().any(|a| a == name)
}

fn non_empty(value: &str) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
